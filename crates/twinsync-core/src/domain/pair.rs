//! SyncPair domain entity
//!
//! A `SyncPair` is the durable binding between a left item and a right item
//! believed to represent the same logical object. The pair table is the
//! engine's memory of "what did we last see": every reconciliation decision
//! compares current provider snapshots against the fingerprints recorded
//! here.
//!
//! ## Status machine
//!
//! ```text
//!     ┌─────────┐  reconciled   ┌────────┐
//!     │ Pending │ ────────────► │ Synced │ ◄──┐
//!     └─────────┘               └────────┘    │ resolved
//!          │                        │         │
//!          │ divergence             │ both    │
//!          ▼                        ▼ changed │
//!     ┌────────────┐           ┌────────────┐ │
//!     │ Tombstoned │ ◄──────── │ Conflicted │─┘
//!     └────────────┘  deletion └────────────┘
//!        (terminal)   propagated
//! ```
//!
//! Tombstones are retained, never purged: a late or duplicated change
//! notification for a deleted identifier must find the tombstone and be
//! ignored instead of resurrecting the pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::item::ItemKind;
use super::newtypes::{Fingerprint, ItemId, TreePath};

// ============================================================================
// PairStatus
// ============================================================================

/// Lifecycle status of a sync pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// Bound but not yet reconciled (first-run match awaiting confirmation)
    #[default]
    Pending,
    /// Both sides last observed equal to the recorded fingerprints
    Synced,
    /// Both sides changed since the last sync; awaiting resolution
    Conflicted,
    /// Deletion observed and propagated; retained to block resurrection
    Tombstoned,
}

impl PairStatus {
    /// Returns the status name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            PairStatus::Pending => "pending",
            PairStatus::Synced => "synced",
            PairStatus::Conflicted => "conflicted",
            PairStatus::Tombstoned => "tombstoned",
        }
    }
}

impl std::fmt::Display for PairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PairStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PairStatus::Pending),
            "synced" => Ok(PairStatus::Synced),
            "conflicted" => Ok(PairStatus::Conflicted),
            "tombstoned" => Ok(PairStatus::Tombstoned),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown pair status: {other}"
            ))),
        }
    }
}

// ============================================================================
// SyncPair
// ============================================================================

/// The durable binding between corresponding items on both providers
///
/// Invariant (enforced by the state store): at most one non-tombstoned pair
/// exists per left identifier and per right identifier: the mapping is
/// injective in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPair {
    /// Item identifier on the left provider
    left_id: ItemId,
    /// Item identifier on the right provider
    right_id: ItemId,
    /// Logical path shared by both sides at last sync
    path: TreePath,
    /// File or folder
    kind: ItemKind,
    /// Left-side fingerprint recorded at the last successful sync
    synced_left: Option<Fingerprint>,
    /// Right-side fingerprint recorded at the last successful sync
    synced_right: Option<Fingerprint>,
    /// When the pair was last successfully reconciled
    last_synced_at: Option<DateTime<Utc>>,
    /// Lifecycle status
    status: PairStatus,
}

impl SyncPair {
    /// Creates a pending pair for a newly bound logical object
    pub fn new(left_id: ItemId, right_id: ItemId, path: TreePath, kind: ItemKind) -> Self {
        Self {
            left_id,
            right_id,
            path,
            kind,
            synced_left: None,
            synced_right: None,
            last_synced_at: None,
            status: PairStatus::Pending,
        }
    }

    // --- Getters ---

    /// Returns the left-side identifier
    pub fn left_id(&self) -> &ItemId {
        &self.left_id
    }

    /// Returns the right-side identifier
    pub fn right_id(&self) -> &ItemId {
        &self.right_id
    }

    /// Returns the identifier on the given side
    pub fn id_on(&self, side: super::newtypes::Side) -> &ItemId {
        match side {
            super::newtypes::Side::Left => &self.left_id,
            super::newtypes::Side::Right => &self.right_id,
        }
    }

    /// Returns the logical path
    pub fn path(&self) -> &TreePath {
        &self.path
    }

    /// Returns the item kind
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Returns the left fingerprint recorded at last sync
    pub fn synced_left(&self) -> Option<&Fingerprint> {
        self.synced_left.as_ref()
    }

    /// Returns the right fingerprint recorded at last sync
    pub fn synced_right(&self) -> Option<&Fingerprint> {
        self.synced_right.as_ref()
    }

    /// Returns the recorded fingerprint for the given side
    pub fn synced_on(&self, side: super::newtypes::Side) -> Option<&Fingerprint> {
        match side {
            super::newtypes::Side::Left => self.synced_left.as_ref(),
            super::newtypes::Side::Right => self.synced_right.as_ref(),
        }
    }

    /// Returns when the pair was last reconciled
    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    /// Returns the lifecycle status
    pub fn status(&self) -> PairStatus {
        self.status
    }

    /// Returns true once the pair has been tombstoned
    pub fn is_tombstoned(&self) -> bool {
        matches!(self.status, PairStatus::Tombstoned)
    }

    // --- Mutations ---

    /// Updates the identifier on one side (identifier churn on re-upload)
    pub fn set_id_on(&mut self, side: super::newtypes::Side, id: ItemId) {
        match side {
            super::newtypes::Side::Left => self.left_id = id,
            super::newtypes::Side::Right => self.right_id = id,
        }
    }

    /// Moves the pair to a new logical path (rename propagation)
    pub fn set_path(&mut self, path: TreePath) {
        self.path = path;
    }

    /// Records a successful reconciliation at `at` with both observed
    /// fingerprints, transitioning to `Synced`
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` when called on a tombstone.
    pub fn record_synced(
        &mut self,
        left: Option<Fingerprint>,
        right: Option<Fingerprint>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(PairStatus::Synced)?;
        self.synced_left = left;
        self.synced_right = right;
        self.last_synced_at = Some(at);
        Ok(())
    }

    /// Flags the pair as conflicted
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` when called on a tombstone.
    pub fn mark_conflicted(&mut self) -> Result<(), DomainError> {
        self.transition_to(PairStatus::Conflicted)
    }

    /// Tombstones the pair after a propagated deletion
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if already tombstoned.
    pub fn mark_tombstoned(&mut self) -> Result<(), DomainError> {
        self.transition_to(PairStatus::Tombstoned)
    }

    /// Checks if a status transition is valid
    ///
    /// Tombstoned is terminal; everything else may reach any status, and a
    /// re-sync of a synced pair is a self-transition.
    pub fn can_transition_to(&self, target: PairStatus) -> bool {
        if self.is_tombstoned() {
            return false;
        }
        match (self.status, target) {
            (PairStatus::Pending, _) => true,
            (PairStatus::Synced, PairStatus::Pending) => false,
            (PairStatus::Synced, _) => true,
            (PairStatus::Conflicted, PairStatus::Pending) => false,
            (PairStatus::Conflicted, _) => true,
            (PairStatus::Tombstoned, _) => false,
        }
    }

    fn transition_to(&mut self, target: PairStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.status.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }
}
