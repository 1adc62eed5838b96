//! Sync run bookkeeping
//!
//! A `SyncRun` records one end-to-end pass of the pipeline, from change
//! detection through plan execution. Runs are persisted so operators can
//! inspect history and so a "partial success" (some actions permanently
//! failed) is never silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{RunId, TreePath};

/// Requested scope of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDirection {
    LeftToRight,
    RightToLeft,
    Bidirectional,
}

impl std::fmt::Display for RunDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunDirection::LeftToRight => "left->right",
            RunDirection::RightToLeft => "right->left",
            RunDirection::Bidirectional => "bidirectional",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunDirection {
    type Err = super::errors::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left-to-right" | "left->right" | "push" => Ok(RunDirection::LeftToRight),
            "right-to-left" | "right->left" | "pull" => Ok(RunDirection::RightToLeft),
            "bidirectional" | "both" => Ok(RunDirection::Bidirectional),
            other => Err(super::errors::DomainError::ValidationFailed(format!(
                "Unknown run direction: {other}"
            ))),
        }
    }
}

/// Terminal (or in-flight) status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every planned action committed
    Succeeded,
    /// Some actions permanently failed; their reasons are in `errors`
    Partial,
    /// The pipeline itself failed before or during execution
    Failed(String),
    Cancelled,
}

impl RunStatus {
    /// Returns the status name (without failure details)
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed(_) => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// One end-to-end pass of the reconciliation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Run identifier
    id: RunId,
    /// Requested direction
    direction: RunDirection,
    /// Optional folder scope (None = whole tree)
    scope: Option<TreePath>,
    /// When the run started
    started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    completed_at: Option<DateTime<Utc>>,
    /// Current status
    status: RunStatus,
    /// Number of actions that committed
    actions_committed: u64,
    /// Number of actions that permanently failed
    actions_failed: u64,
    /// Number of conflicts resolved by policy during this run
    conflicts_resolved: u64,
    /// Bytes moved between providers
    bytes_transferred: u64,
    /// Reasons for permanently failed actions, for operator attention
    errors: Vec<String>,
}

impl SyncRun {
    /// Starts a new run
    pub fn new(direction: RunDirection, scope: Option<TreePath>) -> Self {
        Self {
            id: RunId::new(),
            direction,
            scope,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            actions_committed: 0,
            actions_failed: 0,
            conflicts_resolved: 0,
            bytes_transferred: 0,
            errors: Vec::new(),
        }
    }

    /// Reconstructs a run with a known id and start time (used by storage)
    pub fn with_id(id: RunId, direction: RunDirection, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            direction,
            scope: None,
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            actions_committed: 0,
            actions_failed: 0,
            conflicts_resolved: 0,
            bytes_transferred: 0,
            errors: Vec::new(),
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn direction(&self) -> RunDirection {
        self.direction
    }

    pub fn scope(&self) -> Option<&TreePath> {
        self.scope.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn actions_committed(&self) -> u64 {
        self.actions_committed
    }

    pub fn actions_failed(&self) -> u64 {
        self.actions_failed
    }

    pub fn conflicts_resolved(&self) -> u64 {
        self.conflicts_resolved
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    // --- Progress recording ---

    /// Records one committed action
    pub fn record_committed(&mut self) {
        self.actions_committed += 1;
    }

    /// Records one permanently failed action with its reason
    pub fn record_failed(&mut self, reason: impl Into<String>) {
        self.actions_failed += 1;
        self.errors.push(reason.into());
    }

    /// Records one policy-resolved conflict
    pub fn record_conflict_resolved(&mut self) {
        self.conflicts_resolved += 1;
    }

    /// Adds transferred bytes
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    /// Sets the scope (used by storage reconstruction)
    pub fn set_scope(&mut self, scope: Option<TreePath>) {
        self.scope = scope;
    }

    /// Restores counters (used by storage reconstruction)
    pub fn restore_counters(&mut self, committed: u64, failed: u64, conflicts: u64, bytes: u64) {
        self.actions_committed = committed;
        self.actions_failed = failed;
        self.conflicts_resolved = conflicts;
        self.bytes_transferred = bytes;
    }

    /// Restores recorded errors (used by storage reconstruction)
    pub fn restore_errors(&mut self, errors: Vec<String>) {
        self.errors = errors;
    }

    // --- Terminal transitions ---

    /// Completes the run: `Succeeded` when nothing failed, else `Partial`
    pub fn complete(&mut self) {
        self.status = if self.actions_failed == 0 {
            RunStatus::Succeeded
        } else {
            RunStatus::Partial
        };
        self.completed_at = Some(Utc::now());
    }

    /// Fails the whole run (pipeline error before/during execution)
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed(reason.into());
        self.completed_at = Some(Utc::now());
    }

    /// Marks the run cancelled
    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Applies a terminal status read back from storage
    pub fn restore_status(&mut self, status: RunStatus, completed_at: Option<DateTime<Utc>>) {
        self.status = status;
        self.completed_at = completed_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_running() {
        let run = SyncRun::new(RunDirection::Bidirectional, None);
        assert_eq!(*run.status(), RunStatus::Running);
        assert!(run.completed_at().is_none());
    }

    #[test]
    fn test_complete_all_committed() {
        let mut run = SyncRun::new(RunDirection::Bidirectional, None);
        run.record_committed();
        run.record_committed();
        run.complete();

        assert_eq!(*run.status(), RunStatus::Succeeded);
        assert_eq!(run.actions_committed(), 2);
        assert!(run.completed_at().is_some());
    }

    #[test]
    fn test_complete_with_failures_is_partial() {
        let mut run = SyncRun::new(RunDirection::LeftToRight, None);
        run.record_committed();
        run.record_failed("permission denied: /secret.txt");
        run.complete();

        assert_eq!(*run.status(), RunStatus::Partial);
        assert_eq!(run.actions_failed(), 1);
        assert_eq!(run.errors().len(), 1);
    }

    #[test]
    fn test_fail() {
        let mut run = SyncRun::new(RunDirection::RightToLeft, None);
        run.fail("state store unavailable");
        assert!(matches!(run.status(), RunStatus::Failed(_)));
    }

    #[test]
    fn test_cancel() {
        let mut run = SyncRun::new(RunDirection::Bidirectional, None);
        run.cancel();
        assert_eq!(*run.status(), RunStatus::Cancelled);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(
            "both".parse::<RunDirection>().unwrap(),
            RunDirection::Bidirectional
        );
        assert_eq!(
            "push".parse::<RunDirection>().unwrap(),
            RunDirection::LeftToRight
        );
        assert!("sideways".parse::<RunDirection>().is_err());
    }

    #[test]
    fn test_scoped_run() {
        let scope = TreePath::new("/docs".to_string()).unwrap();
        let run = SyncRun::new(RunDirection::Bidirectional, Some(scope.clone()));
        assert_eq!(run.scope(), Some(&scope));
    }
}
