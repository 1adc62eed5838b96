//! SQLite implementation of StateStore
//!
//! This module provides the concrete SQLite-based implementation of the
//! state store port defined in twinsync-core. It handles all domain type
//! serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type    | SQL Type | Strategy                                  |
//! |----------------|----------|-------------------------------------------|
//! | ItemId         | TEXT     | String via `.as_str()` / `ItemId::new()`  |
//! | TreePath       | TEXT     | String via `.as_str()` / `TreePath::new()`|
//! | Fingerprint    | TEXT     | String via `.as_str()` / `Fingerprint::new()` |
//! | Cursor         | TEXT     | String via `.as_str()` / `Cursor::new()`  |
//! | RunId          | TEXT     | UUID string via `.to_string()` / `FromStr`|
//! | DateTime<Utc>  | TEXT     | ISO 8601 via `to_rfc3339()`               |
//! | PairStatus     | TEXT     | `name()` string                           |
//! | ItemKind       | TEXT     | "file" / "folder"                         |
//! | RunStatus      | TEXT     | name, `failed:<reason>` for failures      |
//! | errors list    | TEXT     | serde_json array                          |

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use twinsync_core::domain::{
    Cursor, ItemId, RunDirection, RunId, RunStatus, Side, SyncPair, SyncRun, TreePath,
};
use twinsync_core::ports::StateStore;

use crate::StateError;

/// SQLite-based implementation of the state store port
///
/// Provides persistent storage for the pair table, delta cursors, and run
/// history. All operations go through a connection pool; the scoped
/// `commit_action` uses an explicit transaction.
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Serialize a RunStatus to a string for storage
///
/// Simple statuses are stored as plain strings; the Failed variant is
/// stored as "failed:<reason>".
fn run_status_to_string(status: &RunStatus) -> String {
    match status {
        RunStatus::Running => "running".to_string(),
        RunStatus::Succeeded => "succeeded".to_string(),
        RunStatus::Partial => "partial".to_string(),
        RunStatus::Cancelled => "cancelled".to_string(),
        RunStatus::Failed(reason) => format!("failed:{}", reason),
    }
}

/// Deserialize a RunStatus from its stored string representation
fn run_status_from_string(s: &str) -> Result<RunStatus, StateError> {
    match s {
        "running" => Ok(RunStatus::Running),
        "succeeded" => Ok(RunStatus::Succeeded),
        "partial" => Ok(RunStatus::Partial),
        "cancelled" => Ok(RunStatus::Cancelled),
        s if s.starts_with("failed:") => Ok(RunStatus::Failed(s[7..].to_string())),
        other => Err(StateError::SerializationError(format!(
            "Unknown run status: {}",
            other
        ))),
    }
}

/// Serialize a RunDirection for storage
fn direction_to_string(direction: RunDirection) -> &'static str {
    match direction {
        RunDirection::LeftToRight => "left_to_right",
        RunDirection::RightToLeft => "right_to_left",
        RunDirection::Bidirectional => "bidirectional",
    }
}

/// Deserialize a RunDirection from its stored string representation
fn direction_from_string(s: &str) -> Result<RunDirection, StateError> {
    match s {
        "left_to_right" => Ok(RunDirection::LeftToRight),
        "right_to_left" => Ok(RunDirection::RightToLeft),
        "bidirectional" => Ok(RunDirection::Bidirectional),
        other => Err(StateError::SerializationError(format!(
            "Unknown run direction: {}",
            other
        ))),
    }
}

/// Parse a DateTime<Utc> from an ISO 8601 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StateError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StateError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StateError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

/// Reconstruct a SyncPair from a database row
///
/// Uses serde JSON deserialization to reconstruct the SyncPair since the
/// struct has private fields that can only be set through constructors or
/// deserialization.
fn pair_from_row(row: &SqliteRow) -> Result<SyncPair, StateError> {
    let left_id: String = row.get("left_id");
    let right_id: String = row.get("right_id");
    let path: String = row.get("path");
    let kind: String = row.get("kind");
    let synced_left: Option<String> = row.get("synced_left");
    let synced_right: Option<String> = row.get("synced_right");
    let last_synced_at: Option<String> = row.get("last_synced_at");
    let status: String = row.get("status");

    let last_synced_val = match parse_optional_datetime(last_synced_at)? {
        Some(dt) => serde_json::Value::String(dt.to_rfc3339()),
        None => serde_json::Value::Null,
    };

    let pair_json = serde_json::json!({
        "left_id": left_id,
        "right_id": right_id,
        "path": path,
        "kind": kind,
        "synced_left": synced_left,
        "synced_right": synced_right,
        "last_synced_at": last_synced_val,
        "status": status,
    });

    serde_json::from_value(pair_json).map_err(|e| {
        StateError::SerializationError(format!("Failed to reconstruct SyncPair from row: {}", e))
    })
}

/// Reconstruct a SyncRun from a database row
fn run_from_row(row: &SqliteRow) -> Result<SyncRun, StateError> {
    let id_str: String = row.get("id");
    let direction_str: String = row.get("direction");
    let scope_str: Option<String> = row.get("scope");
    let started_at_str: String = row.get("started_at");
    let completed_at_str: Option<String> = row.get("completed_at");
    let status_str: String = row.get("status");
    let actions_committed: i64 = row.get("actions_committed");
    let actions_failed: i64 = row.get("actions_failed");
    let conflicts_resolved: i64 = row.get("conflicts_resolved");
    let bytes_transferred: i64 = row.get("bytes_transferred");
    let errors_str: String = row.get("errors");

    let id = RunId::from_str(&id_str).map_err(|e| {
        StateError::SerializationError(format!("Invalid RunId '{}': {}", id_str, e))
    })?;
    let direction = direction_from_string(&direction_str)?;
    let started_at = parse_datetime(&started_at_str)?;
    let completed_at = parse_optional_datetime(completed_at_str)?;
    let status = run_status_from_string(&status_str)?;

    let scope = match scope_str {
        Some(ref s) if !s.is_empty() => Some(TreePath::new(s.clone()).map_err(|e| {
            StateError::SerializationError(format!("Invalid scope path '{}': {}", s, e))
        })?),
        _ => None,
    };

    let errors: Vec<String> = serde_json::from_str(&errors_str).unwrap_or_default();

    let mut run = SyncRun::with_id(id, direction, started_at);
    run.set_scope(scope);
    run.restore_counters(
        actions_committed as u64,
        actions_failed as u64,
        conflicts_resolved as u64,
        bytes_transferred as u64,
    );
    run.restore_errors(errors);
    run.restore_status(status, completed_at);

    Ok(run)
}

// ============================================================================
// Internal helpers
// ============================================================================

impl SqliteStateStore {
    /// Upserts a pair within the given executor (pool or transaction)
    async fn upsert_pair_sql<'e, E>(pair: &SyncPair, executor: E) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO sync_pairs
                (left_id, right_id, path, kind, synced_left, synced_right, last_synced_at, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (left_id, right_id) DO UPDATE SET
                path = excluded.path,
                kind = excluded.kind,
                synced_left = excluded.synced_left,
                synced_right = excluded.synced_right,
                last_synced_at = excluded.last_synced_at,
                status = excluded.status
            "#,
        )
        .bind(pair.left_id().as_str())
        .bind(pair.right_id().as_str())
        .bind(pair.path().as_str())
        .bind(pair.kind().to_string())
        .bind(pair.synced_left().map(|f| f.as_str().to_string()))
        .bind(pair.synced_right().map(|f| f.as_str().to_string()))
        .bind(pair.last_synced_at().map(|dt| dt.to_rfc3339()))
        .bind(pair.status().name())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Rejects an upsert that would bind an identifier already bound to a
    /// different live pair
    async fn check_injectivity<'e, E>(pair: &SyncPair, executor: E) -> anyhow::Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        if pair.is_tombstoned() {
            return Ok(());
        }

        let conflicting = sqlx::query(
            r#"
            SELECT left_id, right_id FROM sync_pairs
            WHERE status != 'tombstoned'
              AND ((left_id = ? AND right_id != ?) OR (right_id = ? AND left_id != ?))
            "#,
        )
        .bind(pair.left_id().as_str())
        .bind(pair.right_id().as_str())
        .bind(pair.right_id().as_str())
        .bind(pair.left_id().as_str())
        .fetch_optional(executor)
        .await
        .map_err(StateError::from)?;

        if let Some(row) = conflicting {
            let left: String = row.get("left_id");
            let right: String = row.get("right_id");
            return Err(StateError::InjectivityViolation(format!(
                "identifier already bound by pair ({}, {})",
                left, right
            ))
            .into());
        }

        Ok(())
    }
}

// ============================================================================
// StateStore implementation
// ============================================================================

#[async_trait::async_trait]
impl StateStore for SqliteStateStore {
    async fn pair_by_left(&self, left_id: &ItemId) -> anyhow::Result<Option<SyncPair>> {
        let row = sqlx::query(
            "SELECT * FROM sync_pairs WHERE left_id = ? AND status != 'tombstoned'",
        )
        .bind(left_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StateError::from)?;

        row.map(|r| pair_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn pair_by_right(&self, right_id: &ItemId) -> anyhow::Result<Option<SyncPair>> {
        let row = sqlx::query(
            "SELECT * FROM sync_pairs WHERE right_id = ? AND status != 'tombstoned'",
        )
        .bind(right_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StateError::from)?;

        row.map(|r| pair_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn pair_by_path(&self, path: &TreePath) -> anyhow::Result<Option<SyncPair>> {
        // Live pairs shadow tombstones at the same path.
        let row = sqlx::query(
            r#"
            SELECT * FROM sync_pairs WHERE path = ?
            ORDER BY CASE WHEN status = 'tombstoned' THEN 1 ELSE 0 END
            LIMIT 1
            "#,
        )
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StateError::from)?;

        row.map(|r| pair_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn tombstone_by_id(&self, side: Side, id: &ItemId) -> anyhow::Result<Option<SyncPair>> {
        let query = match side {
            Side::Left => {
                "SELECT * FROM sync_pairs WHERE left_id = ? AND status = 'tombstoned' LIMIT 1"
            }
            Side::Right => {
                "SELECT * FROM sync_pairs WHERE right_id = ? AND status = 'tombstoned' LIMIT 1"
            }
        };

        let row = sqlx::query(query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StateError::from)?;

        row.map(|r| pair_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn upsert_pair(&self, pair: &SyncPair) -> anyhow::Result<()> {
        Self::check_injectivity(pair, &self.pool).await?;
        Self::upsert_pair_sql(pair, &self.pool)
            .await
            .map_err(StateError::from)?;
        Ok(())
    }

    async fn tombstone_pair(&self, left_id: &ItemId, right_id: &ItemId) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE sync_pairs SET status = 'tombstoned' WHERE left_id = ? AND right_id = ?",
        )
        .bind(left_id.as_str())
        .bind(right_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(StateError::from)?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                left_id = %left_id,
                right_id = %right_id,
                "Tombstone requested for unknown pair"
            );
        }
        Ok(())
    }

    async fn all_pairs(&self) -> anyhow::Result<Vec<SyncPair>> {
        let rows = sqlx::query("SELECT * FROM sync_pairs ORDER BY path")
            .fetch_all(&self.pool)
            .await
            .map_err(StateError::from)?;

        rows.iter()
            .map(|r| pair_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn pairs_under(&self, scope: &TreePath) -> anyhow::Result<Vec<SyncPair>> {
        let rows = if scope.is_root() {
            sqlx::query("SELECT * FROM sync_pairs WHERE status != 'tombstoned' ORDER BY path")
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query(
                r#"
                SELECT * FROM sync_pairs
                WHERE status != 'tombstoned' AND (path = ? OR path LIKE ? || '/%')
                ORDER BY path
                "#,
            )
            .bind(scope.as_str())
            .bind(scope.as_str())
            .fetch_all(&self.pool)
            .await
        }
        .map_err(StateError::from)?;

        rows.iter()
            .map(|r| pair_from_row(r).map_err(Into::into))
            .collect()
    }

    async fn commit_action(
        &self,
        pair: &SyncPair,
        replaces: Option<(&ItemId, &ItemId)>,
        run_id: &RunId,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.map_err(StateError::from)?;

        // An action that rebinds an identifier supersedes its old row; the
        // old binding must be gone before injectivity is judged.
        if let Some((old_left, old_right)) = replaces {
            if old_left != pair.left_id() || old_right != pair.right_id() {
                sqlx::query("DELETE FROM sync_pairs WHERE left_id = ? AND right_id = ?")
                    .bind(old_left.as_str())
                    .bind(old_right.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(StateError::from)?;
            }
        }

        Self::check_injectivity(pair, &mut *tx).await?;

        Self::upsert_pair_sql(pair, &mut *tx)
            .await
            .map_err(StateError::from)?;

        sqlx::query("UPDATE sync_runs SET actions_committed = actions_committed + 1 WHERE id = ?")
            .bind(run_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(StateError::from)?;

        sqlx::query(
            r#"
            INSERT INTO engine_meta (key, value) VALUES ('last_activity', ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(StateError::from)?;

        tx.commit().await.map_err(StateError::from)?;
        Ok(())
    }

    async fn cursor(&self, side: Side) -> anyhow::Result<Option<Cursor>> {
        let row = sqlx::query("SELECT cursor FROM cursors WHERE side = ?")
            .bind(side.name())
            .fetch_optional(&self.pool)
            .await
            .map_err(StateError::from)?;

        match row {
            Some(r) => {
                let cursor_str: String = r.get("cursor");
                let cursor = Cursor::new(cursor_str).map_err(|e| {
                    StateError::SerializationError(format!("Invalid stored cursor: {}", e))
                })?;
                Ok(Some(cursor))
            }
            None => Ok(None),
        }
    }

    async fn save_cursor(&self, side: Side, cursor: &Cursor) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cursors (side, cursor, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (side) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(side.name())
        .bind(cursor.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(StateError::from)?;
        Ok(())
    }

    async fn clear_cursor(&self, side: Side) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cursors WHERE side = ?")
            .bind(side.name())
            .execute(&self.pool)
            .await
            .map_err(StateError::from)?;
        Ok(())
    }

    async fn record_run(&self, run: &SyncRun) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs
                (id, direction, scope, started_at, completed_at, status,
                 actions_committed, actions_failed, conflicts_resolved,
                 bytes_transferred, errors)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                completed_at = excluded.completed_at,
                status = excluded.status,
                actions_committed = excluded.actions_committed,
                actions_failed = excluded.actions_failed,
                conflicts_resolved = excluded.conflicts_resolved,
                bytes_transferred = excluded.bytes_transferred,
                errors = excluded.errors
            "#,
        )
        .bind(run.id().to_string())
        .bind(direction_to_string(run.direction()))
        .bind(run.scope().map(|p| p.as_str().to_string()))
        .bind(run.started_at().to_rfc3339())
        .bind(run.completed_at().map(|dt| dt.to_rfc3339()))
        .bind(run_status_to_string(run.status()))
        .bind(run.actions_committed() as i64)
        .bind(run.actions_failed() as i64)
        .bind(run.conflicts_resolved() as i64)
        .bind(run.bytes_transferred() as i64)
        .bind(serde_json::to_string(run.errors()).map_err(|e| {
            StateError::SerializationError(format!("Failed to serialize run errors: {}", e))
        })?)
        .execute(&self.pool)
        .await
        .map_err(StateError::from)?;
        Ok(())
    }

    async fn run(&self, id: &RunId) -> anyhow::Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StateError::from)?;

        row.map(|r| run_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn latest_run(&self) -> anyhow::Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StateError::from)?;

        row.map(|r| run_from_row(&r)).transpose().map_err(Into::into)
    }

    async fn last_activity(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT value FROM engine_meta WHERE key = 'last_activity'")
            .fetch_optional(&self.pool)
            .await
            .map_err(StateError::from)?;

        match row {
            Some(r) => {
                let value: String = r.get("value");
                Ok(Some(parse_datetime(&value)?))
            }
            None => Ok(None),
        }
    }

    async fn unresolved_conflicts(&self) -> anyhow::Result<Vec<SyncPair>> {
        let rows =
            sqlx::query("SELECT * FROM sync_pairs WHERE status = 'conflicted' ORDER BY path")
                .fetch_all(&self.pool)
                .await
                .map_err(StateError::from)?;

        rows.iter()
            .map(|r| pair_from_row(r).map_err(Into::into))
            .collect()
    }
}
