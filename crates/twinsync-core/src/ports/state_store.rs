//! State store port (driven/secondary port)
//!
//! This module defines the interface for persisting sync pairs, per-provider
//! delta cursors, and run history. The pair table is modeled as an explicit
//! indexed mapping keyed by both identifiers, not as object references
//! between the two provider trees, so neither tree owns the other.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, etc.) and don't need domain-level classification; the engine
//!   treats any store failure as fatal for the current run.
//! - All operations are atomic per pair. `commit_action` is the scoped
//!   transaction of one action's outcome: the pair update and the run
//!   bookkeeping either both commit or neither does.
//! - The store must reflect only *successfully completed* actions; callers
//!   invoke `commit_action` strictly after the provider confirmed the
//!   remote operation.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{Cursor, ItemId, RunId, Side, TreePath};
use crate::domain::pair::SyncPair;
use crate::domain::run::SyncRun;

/// Port trait for persistent reconciliation state
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    // --- SyncPair operations ---

    /// Looks up the non-tombstoned pair bound to a left-side identifier
    async fn pair_by_left(&self, left_id: &ItemId) -> anyhow::Result<Option<SyncPair>>;

    /// Looks up the non-tombstoned pair bound to a right-side identifier
    async fn pair_by_right(&self, right_id: &ItemId) -> anyhow::Result<Option<SyncPair>>;

    /// Looks up the pair bound to an identifier on the given side
    async fn pair_by_id(&self, side: Side, id: &ItemId) -> anyhow::Result<Option<SyncPair>> {
        match side {
            Side::Left => self.pair_by_left(id).await,
            Side::Right => self.pair_by_right(id).await,
        }
    }

    /// Looks up any pair (tombstones included) at a logical path
    ///
    /// Tombstones are returned so callers can distinguish "never seen" from
    /// "deleted and propagated" when deciding whether to bind a new pair.
    async fn pair_by_path(&self, path: &TreePath) -> anyhow::Result<Option<SyncPair>>;

    /// Looks up a tombstoned pair by an identifier on either side
    async fn tombstone_by_id(&self, side: Side, id: &ItemId) -> anyhow::Result<Option<SyncPair>>;

    /// Inserts or updates a pair (keyed by left_id + right_id)
    ///
    /// Must reject a non-tombstoned pair whose left or right identifier is
    /// already bound to a *different* non-tombstoned pair (injectivity).
    async fn upsert_pair(&self, pair: &SyncPair) -> anyhow::Result<()>;

    /// Marks a pair tombstoned; the row is retained, never purged
    async fn tombstone_pair(&self, left_id: &ItemId, right_id: &ItemId) -> anyhow::Result<()>;

    /// Returns all pairs, tombstones included
    async fn all_pairs(&self) -> anyhow::Result<Vec<SyncPair>>;

    /// Returns all non-tombstoned pairs whose path lies under `scope`
    async fn pairs_under(&self, scope: &TreePath) -> anyhow::Result<Vec<SyncPair>>;

    // --- Scoped action commit ---

    /// Atomically records one committed action's outcome
    ///
    /// Upserts the pair *and* stamps the run bookkeeping (last-activity
    /// timestamp, committed-action counter for `run_id`) in one transaction.
    ///
    /// `replaces` names the pair row this outcome supersedes. When an
    /// action rebinds an identifier (a rewrite handed out a fresh id, a
    /// resurrection created a new item), the new binding carries a new key;
    /// the superseded row is removed in the same transaction so the
    /// injectivity invariant holds throughout.
    async fn commit_action(
        &self,
        pair: &SyncPair,
        replaces: Option<(&ItemId, &ItemId)>,
        run_id: &RunId,
    ) -> anyhow::Result<()>;

    // --- Cursor operations ---

    /// Loads the stored delta cursor for one provider
    async fn cursor(&self, side: Side) -> anyhow::Result<Option<Cursor>>;

    /// Stores the delta cursor for one provider
    async fn save_cursor(&self, side: Side, cursor: &Cursor) -> anyhow::Result<()>;

    /// Drops the stored cursor (forces a full listing on the next run)
    async fn clear_cursor(&self, side: Side) -> anyhow::Result<()>;

    // --- Run history ---

    /// Inserts or updates a run record
    async fn record_run(&self, run: &SyncRun) -> anyhow::Result<()>;

    /// Fetches one run by id
    async fn run(&self, id: &RunId) -> anyhow::Result<Option<SyncRun>>;

    /// Fetches the most recently started run
    async fn latest_run(&self) -> anyhow::Result<Option<SyncRun>>;

    /// Timestamp of the last committed action, if any
    async fn last_activity(&self) -> anyhow::Result<Option<DateTime<Utc>>>;

    // --- Introspection ---

    /// Returns all pairs currently flagged conflicted
    async fn unresolved_conflicts(&self) -> anyhow::Result<Vec<SyncPair>>;
}
