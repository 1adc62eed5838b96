//! SQLite connection pool
//!
//! Thin wrapper around `sqlx::SqlitePool` that owns the lifecycle concerns
//! the store itself should not care about: creating the database directory
//! and file on first use, switching to WAL journal mode, applying the
//! schema, and providing an in-memory variant for tests.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::StateError;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections kept for a file-backed database
const FILE_POOL_SIZE: u32 = 5;

const SCHEMA: &str = include_str!("migrations/20260801_initial.sql");

/// Pooled SQLite handle for the TwinSync state database
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if necessary) the database at `db_path`
    ///
    /// WAL mode keeps status queries readable while a run is committing
    /// actions.
    ///
    /// # Errors
    /// `StateError::ConnectionFailed` when the file or its directory cannot
    /// be opened, `StateError::MigrationFailed` when the schema cannot be
    /// applied.
    pub async fn new(db_path: &Path) -> Result<Self, StateError> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                StateError::ConnectionFailed(format!(
                    "cannot create {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .connect_with(options)
            .await
            .map_err(|e| {
                StateError::ConnectionFailed(format!("cannot open {}: {}", db_path.display(), e))
            })?;

        let pool = Self::migrated(pool).await?;
        tracing::info!(path = %db_path.display(), "State database ready");
        Ok(Self { pool })
    }

    /// Opens a private in-memory database
    ///
    /// Capped at a single connection: an in-memory SQLite database lives
    /// and dies with its connection, so a second one would see an empty
    /// schema.
    ///
    /// # Errors
    /// Same failure modes as [`DatabasePool::new`].
    pub async fn in_memory() -> Result<Self, StateError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                StateError::ConnectionFailed(format!("cannot open in-memory database: {}", e))
            })?;

        let pool = Self::migrated(pool).await?;
        tracing::debug!("In-memory state database ready");
        Ok(Self { pool })
    }

    /// Returns the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the schema; every statement is idempotent
    async fn migrated(pool: SqlitePool) -> Result<SqlitePool, StateError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StateError::MigrationFailed(e.to_string()))?;
        Ok(pool)
    }
}
