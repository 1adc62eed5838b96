//! TwinSync State - Persistent reconciliation state
//!
//! SQLite-backed storage for:
//! - The sync pair table (the engine's memory of "what did we last see")
//! - Per-provider delta cursors
//! - Run history and last-activity bookkeeping
//!
//! ## Architecture
//!
//! This crate implements the `StateStore` port from `twinsync-core` using
//! SQLite as the storage backend. It is a driven (secondary) adapter in the
//! hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteStateStore`] - Full `StateStore` implementation
//! - [`StateError`] - Error types for storage operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use twinsync_state::{DatabasePool, SqliteStateStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/twinsync/state.db")).await?;
//! let store = SqliteStateStore::new(pool.pool().clone());
//! // Use store as StateStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod store;

pub use pool::DatabasePool;
pub use store::SqliteStateStore;

/// Errors that can occur during state store operations
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An upsert would bind an identifier already bound to another pair
    #[error("Injectivity violation: {0}")]
    InjectivityViolation(String),
}

impl From<sqlx::Error> for StateError {
    fn from(e: sqlx::Error) -> Self {
        StateError::QueryFailed(e.to_string())
    }
}
