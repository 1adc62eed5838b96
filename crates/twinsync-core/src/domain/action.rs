//! Planned actions
//!
//! An `Action` is one planned, atomic unit of reconciliation work: copy,
//! update, delete, or rename one item in one direction. Actions are
//! immutable once planned; the executor either commits an action in full or
//! reports it failed without touching the pair table.
//!
//! ## State machine
//!
//! ```text
//!     Planned ──► InProgress ──► Committed
//!                      │
//!                      └───────► Failed
//! ```
//!
//! `Committed` means the remote operation succeeded *and* the state store
//! recorded the outcome. A crash between those two leaves the action
//! uncommitted and the next planning pass re-derives it.

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::item::RemoteItem;
use super::newtypes::{Fingerprint, Side, TreePath};

// ============================================================================
// Direction and Operation
// ============================================================================

/// Which way an action moves content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LeftToRight,
    RightToLeft,
}

impl Direction {
    /// The provider the content is read from
    #[must_use]
    pub const fn source(self) -> Side {
        match self {
            Direction::LeftToRight => Side::Left,
            Direction::RightToLeft => Side::Right,
        }
    }

    /// The provider the action is applied to
    #[must_use]
    pub const fn target(self) -> Side {
        self.source().opposite()
    }

    /// Direction that propagates a change observed on `side`
    #[must_use]
    pub const fn from_source(side: Side) -> Self {
        match side {
            Side::Left => Direction::LeftToRight,
            Side::Right => Direction::RightToLeft,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::LeftToRight => "left->right",
            Direction::RightToLeft => "right->left",
        };
        write!(f, "{s}")
    }
}

/// What the executor is asked to do on the target provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Rename,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Rename => "rename",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Preconditions
// ============================================================================

/// Optimistic-concurrency guards checked by the target provider
///
/// A mismatch surfaces as `PreconditionFailed`: the action is discarded and
/// re-planned on the next pass rather than applied over a concurrent edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preconditions {
    /// The target item must still carry this fingerprint (updates, deletes)
    pub expected_target_fingerprint: Option<Fingerprint>,
    /// The target parent folder must still carry this fingerprint (creates)
    pub expected_parent_fingerprint: Option<Fingerprint>,
}

impl Preconditions {
    /// No guards: the action applies unconditionally
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Guard on the target item's current fingerprint
    #[must_use]
    pub fn target_fingerprint(fp: Fingerprint) -> Self {
        Self {
            expected_target_fingerprint: Some(fp),
            expected_parent_fingerprint: None,
        }
    }
}

// ============================================================================
// ActionState
// ============================================================================

/// Execution state of a planned action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Queued, not yet picked up by the executor
    Planned,
    /// Dequeued; the remote operation may be in flight
    InProgress,
    /// Remote operation confirmed and state store updated
    Committed,
    /// Discarded (precondition failure, retry budget exhausted, permanent error)
    Failed(String),
}

impl ActionState {
    /// Returns the state name (without failure details)
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ActionState::Planned => "planned",
            ActionState::InProgress => "in_progress",
            ActionState::Committed => "committed",
            ActionState::Failed(_) => "failed",
        }
    }

    /// Returns true for Committed and Failed
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Committed | ActionState::Failed(_))
    }
}

// ============================================================================
// Action
// ============================================================================

/// One planned unit of reconciliation work
///
/// The payload (`source`, `target_path`, `preconditions`) is immutable once
/// planned; only the execution `state` advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Which way content moves
    pub direction: Direction,
    /// What to do on the target provider
    pub operation: Operation,
    /// Snapshot of the source item driving this action (None for deletes,
    /// where only the target needs identifying)
    pub source: Option<RemoteItem>,
    /// Where the result lands on the target provider
    pub target_path: TreePath,
    /// For renames: the path the target item currently occupies
    pub rename_from: Option<TreePath>,
    /// Optimistic-concurrency guards
    pub preconditions: Preconditions,
    /// Execution state
    state: ActionState,
}

impl Action {
    /// Plans a new action
    pub fn new(
        direction: Direction,
        operation: Operation,
        source: Option<RemoteItem>,
        target_path: TreePath,
        preconditions: Preconditions,
    ) -> Self {
        Self {
            direction,
            operation,
            source,
            target_path,
            rename_from: None,
            preconditions,
            state: ActionState::Planned,
        }
    }

    /// Plans a rename from `rename_from` to `target_path`
    pub fn rename(
        direction: Direction,
        source: RemoteItem,
        rename_from: TreePath,
        target_path: TreePath,
        preconditions: Preconditions,
    ) -> Self {
        Self {
            direction,
            operation: Operation::Rename,
            source: Some(source),
            target_path,
            rename_from: Some(rename_from),
            preconditions,
            state: ActionState::Planned,
        }
    }

    /// Returns the execution state
    pub fn state(&self) -> &ActionState {
        &self.state
    }

    /// Path depth used for topological ordering
    #[must_use]
    pub fn depth(&self) -> usize {
        self.target_path.depth()
    }

    /// Checks if a state transition is valid
    pub fn can_transition_to(&self, target: &ActionState) -> bool {
        matches!(
            (&self.state, target),
            (ActionState::Planned, ActionState::InProgress)
                | (ActionState::InProgress, ActionState::Committed)
                | (ActionState::InProgress, ActionState::Failed(_))
        )
    }

    /// Attempts to transition to a new state
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the transition is not allowed.
    pub fn transition_to(&mut self, target: ActionState) -> Result<(), DomainError> {
        if !self.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    /// Marks the action dequeued
    pub fn start(&mut self) -> Result<(), DomainError> {
        self.transition_to(ActionState::InProgress)
    }

    /// Marks the action committed
    pub fn commit(&mut self) -> Result<(), DomainError> {
        self.transition_to(ActionState::Committed)
    }

    /// Marks the action failed with a reason
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.transition_to(ActionState::Failed(reason.into()))
    }
}
