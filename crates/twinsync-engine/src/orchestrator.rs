//! Run orchestration
//!
//! The [`SyncOrchestrator`] owns one pass of the pipeline: drain queued
//! change signals, detect changes on both providers, plan, resolve
//! conflicts, execute, and record the run. It is the only component that
//! advances delta cursors, and it does so conservatively: a cursor moves
//! forward only when every action of the batch it fed has committed, so a
//! failed or cancelled run re-polls the same window and re-plans from
//! fresh state.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use twinsync_core::config::Config;
use twinsync_core::domain::{
    ChangeKind, ChangeRecord, RunDirection, RunId, Side, SyncRun, TreePath,
};
use twinsync_core::ports::remote_tree::{ProviderError, RemoteTree};
use twinsync_core::ports::StateStore;

use twinsync_conflict::{ConflictResolver, ResolutionPolicy};

use crate::detector::{ChangeDetector, Detection};
use crate::executor::ExecutionEngine;
use crate::notifications::NotificationQueue;
use crate::planner::{Capabilities, PlannedAction, Planner, WorkUnit};

/// Wires the pipeline stages and drives full runs
pub struct SyncOrchestrator {
    left: Arc<dyn RemoteTree>,
    right: Arc<dyn RemoteTree>,
    store: Arc<dyn StateStore>,
    left_detector: ChangeDetector,
    right_detector: ChangeDetector,
    planner: Planner,
    resolver: ConflictResolver,
    executor: Arc<ExecutionEngine>,
    queue: Arc<NotificationQueue>,
}

impl SyncOrchestrator {
    /// Builds the pipeline from configuration and the two adapters
    pub fn new(
        left: Arc<dyn RemoteTree>,
        right: Arc<dyn RemoteTree>,
        store: Arc<dyn StateStore>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        let caps = Capabilities {
            left_rename: left.supports_rename(),
            right_rename: right.supports_rename(),
        };
        Self {
            left_detector: ChangeDetector::new(Side::Left, Arc::clone(&left), Arc::clone(&store)),
            right_detector: ChangeDetector::new(
                Side::Right,
                Arc::clone(&right),
                Arc::clone(&store),
            ),
            planner: Planner::new(Arc::clone(&store), caps),
            resolver: ConflictResolver::new(ResolutionPolicy::from_config(&config.conflicts)),
            executor: Arc::new(ExecutionEngine::new(
                Arc::clone(&left),
                Arc::clone(&right),
                Arc::clone(&store),
                &config.engine,
                cancel,
            )),
            left,
            right,
            store,
            queue: Arc::new(NotificationQueue::new()),
        }
    }

    /// Queue receiving inbound change signals (webhook deliveries)
    pub fn notifications(&self) -> Arc<NotificationQueue> {
        Arc::clone(&self.queue)
    }

    /// Read access to the state store (status/introspection surface)
    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    /// Runs one full pass and waits for its terminal status
    pub async fn run_sync(
        &self,
        direction: RunDirection,
        scope: Option<TreePath>,
    ) -> Result<SyncRun> {
        let run = SyncRun::new(direction, scope);
        self.store
            .record_run(&run)
            .await
            .context("recording run start")?;
        Ok(self.drive(run).await)
    }

    /// Starts a run in the background, returning its identifier immediately
    ///
    /// Terminal status and counters are exposed through the run history in
    /// the state store once the run completes.
    pub async fn spawn_run(
        self: &Arc<Self>,
        direction: RunDirection,
        scope: Option<TreePath>,
    ) -> Result<RunId> {
        let run = SyncRun::new(direction, scope);
        let run_id = *run.id();
        self.store
            .record_run(&run)
            .await
            .context("recording run start")?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let finished = this.drive(run).await;
            debug!(
                run = %finished.id(),
                status = finished.status().name(),
                "Background run finished"
            );
        });

        Ok(run_id)
    }

    /// Drives a recorded run to a terminal status
    async fn drive(&self, mut run: SyncRun) -> SyncRun {
        let direction = run.direction();
        let scope = run.scope().cloned();

        info!(
            run = %run.id(),
            direction = %direction,
            scope = scope.as_ref().map(|s| s.as_str()).unwrap_or("/"),
            "Sync run starting"
        );

        match self.pipeline(&mut run, direction, scope.as_ref()).await {
            Ok(cancelled) => {
                if cancelled {
                    run.cancel();
                } else {
                    run.complete();
                }
            }
            Err(e) => {
                error!(run = %run.id(), error = format!("{e:#}"), "Sync run failed");
                run.fail(format!("{e:#}"));
            }
        }

        if let Err(e) = self.store.record_run(&run).await {
            error!(run = %run.id(), error = %e, "Failed to record run outcome");
        }

        info!(
            run = %run.id(),
            status = run.status().name(),
            committed = run.actions_committed(),
            failed = run.actions_failed(),
            conflicts = run.conflicts_resolved(),
            bytes = run.bytes_transferred(),
            "Sync run finished"
        );

        run
    }

    /// One pass: detect → plan → resolve → execute → bookkeep
    ///
    /// Returns true when execution was cancelled mid-run.
    async fn pipeline(
        &self,
        run: &mut SyncRun,
        direction: RunDirection,
        scope: Option<&TreePath>,
    ) -> Result<bool> {
        let signals = self.queue.drain();
        if !signals.is_empty() {
            debug!(count = signals.len(), "Folding queued change signals into this run");
        }

        // Step 1: detect on both providers (both always polled; one-way
        // runs still need the other side for conflict detection)
        let (left_detection, right_detection) =
            tokio::try_join!(self.left_detector.detect(), self.right_detector.detect())?;

        let mut left_records = left_detection.records.clone();
        let mut right_records = right_detection.records.clone();

        // Step 2: re-inject pairs that stayed conflicted after an earlier
        // run, so resolution is retried against their current state
        self.revisit_stale_conflicts(&mut left_records, &mut right_records)
            .await?;

        // Step 3: plan
        let plan = self
            .planner
            .plan(&left_records, &right_records, direction, scope)
            .await
            .context("planning pass")?;

        // Step 4: record no-transfer outcomes
        for pair in &plan.binds {
            self.store
                .upsert_pair(pair)
                .await
                .context("binding matched pair")?;
        }
        for pair in &plan.tombstones {
            self.store
                .upsert_pair(pair)
                .await
                .context("tombstoning vanished pair")?;
        }

        // Step 5: resolve conflicts into executable units
        let mut units = plan.units;
        for planned_conflict in plan.conflicts {
            // Persist the conflicted status first: if this run dies before
            // the resolution commits, the next run revisits the pair.
            if let Some(pair) = &planned_conflict.pair {
                let mut conflicted = pair.clone();
                if conflicted.status() != twinsync_core::domain::PairStatus::Conflicted {
                    if conflicted.mark_conflicted().is_ok() {
                        self.store
                            .upsert_pair(&conflicted)
                            .await
                            .context("recording conflicted pair")?;
                    }
                }
            }

            match self.resolver.resolve(&planned_conflict.flagged) {
                Ok(resolved) => {
                    run.record_conflict_resolved();
                    let conflict_path = planned_conflict.flagged.path.clone();
                    let pair = planned_conflict.pair.clone();
                    let actions = resolved
                        .actions
                        .into_iter()
                        .map(|action| {
                            // Actions at the conflicted path carry the pair;
                            // set-asides and mirror copies do not.
                            let attach = action.target_path == conflict_path;
                            PlannedAction {
                                action,
                                pair: if attach { pair.clone() } else { None },
                            }
                        })
                        .collect();
                    units.push(WorkUnit { actions });
                }
                Err(e) => {
                    warn!(
                        path = %planned_conflict.flagged.path,
                        error = %e,
                        "Conflict could not be resolved"
                    );
                    run.record_failed(format!(
                        "conflict at {}: {e}",
                        planned_conflict.flagged.path
                    ));
                }
            }
        }

        // Step 6: execute
        let report = self.executor.execute(*run.id(), units).await;
        for _ in 0..report.committed {
            run.record_committed();
        }
        for failed in &report.failed {
            run.record_failed(format!(
                "{} {}: {}",
                failed.operation, failed.path, failed.reason
            ));
        }
        run.add_bytes(report.bytes);

        // Step 7: advance cursors only when the whole window landed
        let clean = report.failed.is_empty() && !report.cancelled;
        if clean && scope.is_none() {
            self.save_cursor_if_consumed(direction, Side::Left, &left_detection)
                .await?;
            self.save_cursor_if_consumed(direction, Side::Right, &right_detection)
                .await?;
        }

        Ok(report.cancelled)
    }

    /// A side's cursor advances only when this run propagated its changes
    async fn save_cursor_if_consumed(
        &self,
        direction: RunDirection,
        side: Side,
        detection: &Detection,
    ) -> Result<()> {
        let consumed = match direction {
            RunDirection::Bidirectional => true,
            RunDirection::LeftToRight => side == Side::Left,
            RunDirection::RightToLeft => side == Side::Right,
        };
        if consumed {
            self.store
                .save_cursor(side, &detection.cursor)
                .await
                .context("saving delta cursor")?;
        }
        Ok(())
    }

    /// Synthesizes change records for pairs still flagged conflicted
    async fn revisit_stale_conflicts(
        &self,
        left_records: &mut Vec<ChangeRecord>,
        right_records: &mut Vec<ChangeRecord>,
    ) -> Result<()> {
        let conflicted = self
            .store
            .unresolved_conflicts()
            .await
            .context("loading unresolved conflicts")?;

        for pair in conflicted {
            for (side, records) in [
                (Side::Left, &mut *left_records),
                (Side::Right, &mut *right_records),
            ] {
                let id = pair.id_on(side);
                if records.iter().any(|r| r.item_id == *id) {
                    continue;
                }
                let adapter = match side {
                    Side::Left => &self.left,
                    Side::Right => &self.right,
                };
                match adapter.get_metadata(id).await {
                    Ok(item) => {
                        records.push(ChangeRecord::observed(ChangeKind::Modified, item));
                    }
                    Err(ProviderError::NotFound(_)) => {
                        records.push(ChangeRecord::deleted(id.clone()));
                    }
                    Err(e) => {
                        warn!(
                            side = %side,
                            path = %pair.path(),
                            error = %e,
                            "Could not refresh conflicted pair; leaving for next run"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}
