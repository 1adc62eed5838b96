//! Execution engine
//!
//! Applies a plan against the two providers. Each action runs the state
//! machine `Planned → InProgress → Committed | Failed`; an action is only
//! `Committed` once the remote operation is confirmed *and* the state
//! store recorded the outcome through its scoped transaction. A failed
//! action never mutates its pair; the next planning pass re-derives it
//! from fresh state.
//!
//! ## Scheduling
//!
//! Work is executed in depth waves: deletions run first, deepest paths
//! first, so children are gone before their parent folders; then
//! creations/updates/renames run shallowest first, so a parent folder's
//! create commits before any child action targeting it starts. Within a
//! wave, units run concurrently, bounded by a per-provider worker pool and
//! paced by a per-provider rate limiter. Mutations to a single pair are
//! serialized through a per-pair lock; disjoint pairs need no
//! coordination.
//!
//! ## Retry
//!
//! Transient errors retry with exponential backoff and jitter up to a
//! bounded attempt count (quota errors get a longer floor). Precondition
//! failures and permanent errors are never retried here: the underlying
//! state may have changed, so the action fails and is re-planned.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use twinsync_core::config::EngineConfig;
use twinsync_core::domain::{
    Fingerprint, ItemId, ItemKind, Operation, RemoteItem, RunId, Side, SyncPair, TreePath,
};
use twinsync_core::ports::remote_tree::{ProviderError, RemoteTree};
use twinsync_core::ports::StateStore;

use crate::backoff::Backoff;
use crate::planner::{PlannedAction, WorkUnit};
use crate::transfer::ChunkedTransfer;

// ============================================================================
// Report types
// ============================================================================

/// A permanently failed action, surfaced for operator attention
#[derive(Debug, Clone)]
pub struct FailedAction {
    pub path: TreePath,
    pub operation: Operation,
    pub reason: String,
}

/// Outcome of executing one plan
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Actions that reached `Committed`
    pub committed: u64,
    /// Actions that reached `Failed`, with reasons
    pub failed: Vec<FailedAction>,
    /// Content bytes moved between providers
    pub bytes: u64,
    /// True when the run was cancelled before all waves finished
    pub cancelled: bool,
}

/// Internal error split: provider errors keep their taxonomy for retry
/// classification; store errors are never retried
enum ExecError {
    Provider(ProviderError),
    Store(String),
}

impl From<ProviderError> for ExecError {
    fn from(e: ProviderError) -> Self {
        ExecError::Provider(e)
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Provider(e) => write!(f, "{e}"),
            ExecError::Store(e) => write!(f, "state store: {e}"),
        }
    }
}

struct ActionOutcome {
    path: TreePath,
    operation: Operation,
    committed: bool,
    bytes: u64,
    reason: Option<String>,
}

// ============================================================================
// ExecutionEngine
// ============================================================================

/// Applies planned work against the two provider adapters
pub struct ExecutionEngine {
    left: Arc<dyn RemoteTree>,
    right: Arc<dyn RemoteTree>,
    store: Arc<dyn StateStore>,
    transfer: ChunkedTransfer,
    max_retries: u32,
    backoff: Backoff,
    quota_floor: Duration,
    left_workers: Arc<Semaphore>,
    right_workers: Arc<Semaphore>,
    left_limiter: DefaultDirectRateLimiter,
    right_limiter: DefaultDirectRateLimiter,
    pair_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    cancel: CancellationToken,
}

impl ExecutionEngine {
    /// Builds an engine from configuration
    pub fn new(
        left: Arc<dyn RemoteTree>,
        right: Arc<dyn RemoteTree>,
        store: Arc<dyn StateStore>,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let rps = NonZeroU32::new(config.requests_per_second.max(1)).expect("non-zero");
        Self {
            left,
            right,
            store,
            transfer: ChunkedTransfer {
                chunk_size: config.chunk_size_mb * 1024 * 1024,
                large_threshold: config.large_file_threshold_mb * 1024 * 1024,
            },
            max_retries: config.max_retries,
            backoff: Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
                true,
            ),
            quota_floor: Duration::from_millis(config.quota_backoff_floor_ms),
            left_workers: Arc::new(Semaphore::new(config.workers_per_provider)),
            right_workers: Arc::new(Semaphore::new(config.workers_per_provider)),
            left_limiter: RateLimiter::direct(Quota::per_second(rps)),
            right_limiter: RateLimiter::direct(Quota::per_second(rps)),
            pair_locks: DashMap::new(),
            cancel,
        }
    }

    fn adapter(&self, side: Side) -> &Arc<dyn RemoteTree> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn workers(&self, side: Side) -> &Arc<Semaphore> {
        match side {
            Side::Left => &self.left_workers,
            Side::Right => &self.right_workers,
        }
    }

    /// Waits for rate-limit headroom on one provider
    async fn pace(&self, side: Side) {
        let limiter = match side {
            Side::Left => &self.left_limiter,
            Side::Right => &self.right_limiter,
        };
        limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
            .await;
    }

    // ========================================================================
    // Wave scheduling
    // ========================================================================

    /// Executes all work units, honoring the topological ordering rules
    pub async fn execute(self: &Arc<Self>, run_id: RunId, units: Vec<WorkUnit>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let (deletes, applies): (Vec<WorkUnit>, Vec<WorkUnit>) =
            units.into_iter().partition(WorkUnit::is_delete);

        // Child deletions commit before their parent folder's delete starts
        let delete_waves = waves(deletes, true);
        // Parent creations commit before any child action starts
        let apply_waves = waves(applies, false);

        for wave in delete_waves.into_iter().chain(apply_waves) {
            if self.cancel.is_cancelled() {
                info!("Run cancelled; remaining waves skipped");
                report.cancelled = true;
                return report;
            }
            self.run_wave(run_id, wave, &mut report).await;
        }

        report
    }

    /// Runs one depth wave concurrently and folds the outcomes
    async fn run_wave(self: &Arc<Self>, run_id: RunId, wave: Vec<WorkUnit>, report: &mut ExecutionReport) {
        let mut tasks: JoinSet<Vec<ActionOutcome>> = JoinSet::new();

        for unit in wave {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let engine = Arc::clone(self);
            tasks.spawn(async move { engine.execute_unit(run_id, unit).await });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcomes = match joined {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!(error = %e, "Execution task panicked");
                    continue;
                }
            };
            for outcome in outcomes {
                if outcome.committed {
                    report.committed += 1;
                    report.bytes += outcome.bytes;
                } else {
                    report.failed.push(FailedAction {
                        path: outcome.path,
                        operation: outcome.operation,
                        reason: outcome.reason.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
            }
        }
    }

    /// Executes a unit's actions serially; a failure aborts the rest
    async fn execute_unit(self: Arc<Self>, run_id: RunId, unit: WorkUnit) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(unit.actions.len());
        for planned in unit.actions {
            let outcome = self.execute_action(run_id, planned).await;
            let committed = outcome.committed;
            outcomes.push(outcome);
            if !committed {
                break;
            }
        }
        outcomes
    }

    // ========================================================================
    // Single-action execution
    // ========================================================================

    /// Drives one action through its state machine with bounded retry
    async fn execute_action(&self, run_id: RunId, planned: PlannedAction) -> ActionOutcome {
        let mut action = planned.action.clone();
        let path = action.target_path.clone();
        let operation = action.operation;

        // Serialize mutations per pair; pairless actions key by target path
        let lock_key = match &planned.pair {
            Some(pair) => format!("{}|{}", pair.left_id(), pair.right_id()),
            None => format!("path:{}", path),
        };
        let lock = self
            .pair_locks
            .entry(lock_key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _pair_guard = lock.lock().await;

        let _worker = self
            .workers(action.direction.target())
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore never closed");

        if action.start().is_err() {
            return ActionOutcome {
                path,
                operation,
                committed: false,
                bytes: 0,
                reason: Some("action was not in Planned state".to_string()),
            };
        }

        let mut attempt: u32 = 0;
        loop {
            match self.perform(&planned, run_id).await {
                Ok(bytes) => {
                    action.commit().expect("InProgress -> Committed");
                    debug!(path = %path, op = %operation, "Action committed");
                    return ActionOutcome {
                        path,
                        operation,
                        committed: true,
                        bytes,
                        reason: None,
                    };
                }
                Err(ExecError::Provider(err)) if err.is_transient() && attempt < self.max_retries => {
                    let mut delay = self.backoff.delay(attempt);
                    if matches!(err, ProviderError::QuotaExceeded(_)) {
                        delay = delay.max(self.quota_floor);
                    }
                    warn!(
                        path = %path,
                        op = %operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    let reason = err.to_string();
                    action
                        .fail(reason.clone())
                        .expect("InProgress -> Failed");
                    warn!(path = %path, op = %operation, reason = %reason, "Action failed");
                    return ActionOutcome {
                        path,
                        operation,
                        committed: false,
                        bytes: 0,
                        reason: Some(reason),
                    };
                }
            }
        }
    }

    /// One attempt at the remote operation plus the scoped store commit
    async fn perform(&self, planned: &PlannedAction, run_id: RunId) -> Result<u64, ExecError> {
        match planned.action.operation {
            Operation::Create | Operation::Update => self.perform_write(planned, run_id).await,
            Operation::Delete => self.perform_delete(planned, run_id).await,
            Operation::Rename => self.perform_rename(planned, run_id).await,
        }
    }

    async fn perform_write(&self, planned: &PlannedAction, run_id: RunId) -> Result<u64, ExecError> {
        let action = &planned.action;
        let source_side = action.direction.source();
        let target_side = action.direction.target();
        let snapshot = action.source.as_ref().ok_or_else(|| {
            ExecError::Store("write action carries no source snapshot".to_string())
        })?;
        let name = action
            .target_path
            .file_name()
            .ok_or_else(|| ExecError::Provider(ProviderError::Protocol(
                "cannot write to the tree root".to_string(),
            )))?;

        // Optimistic-concurrency guard on the target item
        if let (Some(expected), Some(pair)) = (
            &action.preconditions.expected_target_fingerprint,
            &planned.pair,
        ) {
            self.check_target_guard(target_side, pair.id_on(target_side), expected)
                .await?;
        }

        self.pace(target_side).await;
        let parent = self
            .resolve_or_create_parent(target_side, &action.target_path)
            .await?;

        let (written, bytes) = match snapshot.kind {
            ItemKind::Folder => {
                let created = self
                    .adapter(target_side)
                    .create_folder(
                        parent.as_ref(),
                        name,
                        action.preconditions.expected_parent_fingerprint.as_ref(),
                    )
                    .await?;
                (created, 0)
            }
            ItemKind::File => {
                self.pace(source_side).await;
                self.transfer
                    .copy_file(
                        self.adapter(source_side).as_ref(),
                        self.adapter(target_side).as_ref(),
                        snapshot,
                        parent.as_ref(),
                        name,
                        action.preconditions.expected_parent_fingerprint.as_ref(),
                    )
                    .await?
            }
        };

        let pair = bind_pair(planned, snapshot, &written, &action.target_path)?;
        self.store
            .commit_action(&pair, replaced_key(planned).as_ref().map(|(l, r)| (l, r)), &run_id)
            .await
            .map_err(|e| ExecError::Store(e.to_string()))?;

        Ok(bytes)
    }

    async fn perform_delete(&self, planned: &PlannedAction, run_id: RunId) -> Result<u64, ExecError> {
        let action = &planned.action;
        let target_side = action.direction.target();
        let pair = planned.pair.as_ref().ok_or_else(|| {
            ExecError::Store("delete action carries no pair context".to_string())
        })?;

        self.pace(target_side).await;
        let target_id = pair.id_on(target_side);
        match self
            .adapter(target_side)
            .delete(
                target_id,
                action.preconditions.expected_target_fingerprint.as_ref(),
            )
            .await
        {
            // Already gone: the deletion is effectively propagated
            Ok(()) | Err(ProviderError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let mut tombstoned = pair.clone();
        if !tombstoned.is_tombstoned() {
            tombstoned
                .mark_tombstoned()
                .map_err(|e| ExecError::Store(e.to_string()))?;
        }
        self.store
            .commit_action(&tombstoned, None, &run_id)
            .await
            .map_err(|e| ExecError::Store(e.to_string()))?;

        Ok(0)
    }

    async fn perform_rename(&self, planned: &PlannedAction, run_id: RunId) -> Result<u64, ExecError> {
        let action = &planned.action;
        let target_side = action.direction.target();
        let source_side = action.direction.source();

        // For pair-backed renames the item being moved is the pair's item
        // on the target side; for pairless renames (conflict set-aside) the
        // snapshot itself describes the target-side item.
        let item_id = match (&planned.pair, &action.source) {
            (Some(pair), _) => pair.id_on(target_side).clone(),
            (None, Some(snapshot)) => snapshot.id.clone(),
            (None, None) => {
                return Err(ExecError::Store(
                    "rename action carries neither pair nor snapshot".to_string(),
                ))
            }
        };

        let new_name = action
            .target_path
            .file_name()
            .ok_or_else(|| ExecError::Provider(ProviderError::Protocol(
                "cannot rename to the tree root".to_string(),
            )))?;

        self.pace(target_side).await;
        let new_parent = self
            .resolve_or_create_parent(target_side, &action.target_path)
            .await?;

        let adapter = self.adapter(target_side);
        let renamed = if adapter.supports_rename() {
            adapter
                .rename(
                    &item_id,
                    new_parent.as_ref(),
                    new_name,
                    action.preconditions.expected_target_fingerprint.as_ref(),
                )
                .await?
        } else {
            // Same-provider copy + delete for providers without moves
            let current = adapter.get_metadata(&item_id).await?;
            if let Some(expected) = &action.preconditions.expected_target_fingerprint {
                if current.fingerprint.as_ref() != Some(expected) {
                    return Err(ProviderError::PreconditionFailed(format!(
                        "{} changed since fingerprint was taken",
                        current.path
                    ))
                    .into());
                }
            }
            let (written, _) = self
                .transfer
                .copy_file(
                    adapter.as_ref(),
                    adapter.as_ref(),
                    &current,
                    new_parent.as_ref(),
                    new_name,
                    None,
                )
                .await?;
            adapter.delete(&item_id, None).await?;
            written
        };

        if let Some(pair) = &planned.pair {
            let mut moved = pair.clone();
            moved.set_path(action.target_path.clone());
            moved.set_id_on(target_side, renamed.id.clone());
            if let Some(snapshot) = &action.source {
                moved.set_id_on(source_side, snapshot.id.clone());
            }
            let source_fp = action
                .source
                .as_ref()
                .and_then(|s| s.fingerprint.clone())
                .or_else(|| pair.synced_on(source_side).cloned());
            let (left_fp, right_fp) =
                orient(source_side, source_fp, renamed.fingerprint.clone());
            moved
                .record_synced(left_fp, right_fp, Utc::now())
                .map_err(|e| ExecError::Store(e.to_string()))?;
            self.store
                .commit_action(
                    &moved,
                    replaced_key(planned).as_ref().map(|(l, r)| (l, r)),
                    &run_id,
                )
                .await
                .map_err(|e| ExecError::Store(e.to_string()))?;
        }

        Ok(0)
    }

    /// Fails fast when the target item no longer matches the plan's guard
    async fn check_target_guard(
        &self,
        side: Side,
        id: &ItemId,
        expected: &Fingerprint,
    ) -> Result<(), ExecError> {
        self.pace(side).await;
        match self.adapter(side).get_metadata(id).await {
            Ok(current) => {
                if current.fingerprint.as_ref() != Some(expected) {
                    return Err(ProviderError::PreconditionFailed(format!(
                        "{} changed since the plan was computed",
                        current.path
                    ))
                    .into());
                }
                Ok(())
            }
            Err(ProviderError::NotFound(_)) => Err(ProviderError::PreconditionFailed(
                "target item deleted concurrently".to_string(),
            )
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves the target-side parent folder, creating missing folders
    ///
    /// The pair table answers most lookups; the fallback walks the remote
    /// tree segment by segment, creating folders that do not exist yet
    /// (delta-scoped runs may carry a file whose folder chain predates the
    /// cursor).
    async fn resolve_or_create_parent(
        &self,
        side: Side,
        path: &TreePath,
    ) -> Result<Option<ItemId>, ExecError> {
        let parent = path.parent().ok_or_else(|| {
            ExecError::Provider(ProviderError::Protocol(
                "the tree root has no parent".to_string(),
            ))
        })?;
        if parent.is_root() {
            return Ok(None);
        }

        if let Some(pair) = self
            .store
            .pair_by_path(&parent)
            .await
            .map_err(|e| ExecError::Store(e.to_string()))?
        {
            if !pair.is_tombstoned() && pair.kind() == ItemKind::Folder {
                return Ok(Some(pair.id_on(side).clone()));
            }
        }

        let adapter = self.adapter(side);
        let mut current: Option<ItemId> = None;
        for segment in parent.as_str()[1..].split('/') {
            self.pace(side).await;
            let children = adapter.list_children(current.as_ref()).await?;
            match children
                .iter()
                .find(|c| c.kind == ItemKind::Folder && c.name() == segment)
            {
                Some(folder) => current = Some(folder.id.clone()),
                None => {
                    self.pace(side).await;
                    let created = adapter
                        .create_folder(current.as_ref(), segment, None)
                        .await?;
                    debug!(side = %side, path = %created.path, "Created missing parent folder");
                    current = Some(created.id);
                }
            }
        }
        Ok(current)
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Groups units into depth waves (descending for deletes)
fn waves(mut units: Vec<WorkUnit>, descending: bool) -> Vec<Vec<WorkUnit>> {
    if units.is_empty() {
        return Vec::new();
    }
    units.sort_by_key(|u| {
        if descending {
            usize::MAX - u.depth()
        } else {
            u.depth()
        }
    });

    let mut result: Vec<Vec<WorkUnit>> = Vec::new();
    let mut current_depth = None;
    for unit in units {
        let depth = unit.depth();
        if current_depth == Some(depth) {
            result.last_mut().expect("non-empty").push(unit);
        } else {
            current_depth = Some(depth);
            result.push(vec![unit]);
        }
    }
    result
}

/// Builds the pair recorded when a write action commits
fn bind_pair(
    planned: &PlannedAction,
    snapshot: &RemoteItem,
    written: &RemoteItem,
    target_path: &TreePath,
) -> Result<SyncPair, ExecError> {
    let source_side = planned.action.direction.source();

    let mut pair = match &planned.pair {
        Some(existing) => existing.clone(),
        None => {
            let (left_id, right_id) = match source_side {
                Side::Left => (snapshot.id.clone(), written.id.clone()),
                Side::Right => (written.id.clone(), snapshot.id.clone()),
            };
            SyncPair::new(left_id, right_id, target_path.clone(), snapshot.kind)
        }
    };

    pair.set_id_on(source_side, snapshot.id.clone());
    pair.set_id_on(source_side.opposite(), written.id.clone());
    pair.set_path(target_path.clone());

    let (left_fp, right_fp) = orient(
        source_side,
        snapshot.fingerprint.clone(),
        written.fingerprint.clone(),
    );
    pair.record_synced(left_fp, right_fp, Utc::now())
        .map_err(|e| ExecError::Store(e.to_string()))?;

    Ok(pair)
}

/// The pair row a committing action supersedes, if it had one
fn replaced_key(planned: &PlannedAction) -> Option<(ItemId, ItemId)> {
    planned
        .pair
        .as_ref()
        .map(|p| (p.left_id().clone(), p.right_id().clone()))
}

/// Orients (source, target) fingerprints into (left, right) order
fn orient(
    source_side: Side,
    source_fp: Option<Fingerprint>,
    target_fp: Option<Fingerprint>,
) -> (Option<Fingerprint>, Option<Fingerprint>) {
    match source_side {
        Side::Left => (source_fp, target_fp),
        Side::Right => (target_fp, source_fp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_core::domain::{Action, Direction, Preconditions};

    fn unit_at(path: &str, op: Operation) -> WorkUnit {
        WorkUnit::single(PlannedAction {
            action: Action::new(
                Direction::LeftToRight,
                op,
                None,
                TreePath::new(path.to_string()).unwrap(),
                Preconditions::none(),
            ),
            pair: None,
        })
    }

    #[test]
    fn test_waves_ascending_for_creates() {
        let units = vec![
            unit_at("/a/b/c.txt", Operation::Create),
            unit_at("/a", Operation::Create),
            unit_at("/a/b", Operation::Create),
        ];
        let waves = waves(units, false);
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0][0].actions[0].action.target_path.as_str(), "/a");
        assert_eq!(waves[1][0].actions[0].action.target_path.as_str(), "/a/b");
        assert_eq!(
            waves[2][0].actions[0].action.target_path.as_str(),
            "/a/b/c.txt"
        );
    }

    #[test]
    fn test_waves_descending_for_deletes() {
        let units = vec![
            unit_at("/a", Operation::Delete),
            unit_at("/a/b/c.txt", Operation::Delete),
            unit_at("/a/b", Operation::Delete),
        ];
        let waves = waves(units, true);
        assert_eq!(waves.len(), 3);
        assert_eq!(
            waves[0][0].actions[0].action.target_path.as_str(),
            "/a/b/c.txt"
        );
        assert_eq!(waves[2][0].actions[0].action.target_path.as_str(), "/a");
    }

    #[test]
    fn test_waves_same_depth_share_a_wave() {
        let units = vec![
            unit_at("/a.txt", Operation::Create),
            unit_at("/b.txt", Operation::Create),
        ];
        let waves = waves(units, false);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 2);
    }

    #[test]
    fn test_orient() {
        let fp = |s: &str| Some(Fingerprint::new(s.to_string()).unwrap());
        assert_eq!(
            orient(Side::Left, fp("s"), fp("t")),
            (fp("s"), fp("t"))
        );
        assert_eq!(
            orient(Side::Right, fp("s"), fp("t")),
            (fp("t"), fp("s"))
        );
    }
}
