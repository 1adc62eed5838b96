//! Conflict resolver
//!
//! Turns every conflict flagged by the diff planner into a deterministic,
//! ordered action sequence. The executor never sees ambiguity: by the time
//! a plan leaves this module, every conflict has exactly one winning side
//! and a fixed set of actions.
//!
//! ## Resolution shapes
//!
//! **Modify/modify** (and first-run divergence, which is the same situation
//! without a recorded pair): the more recently modified side wins, the
//! losing content is preserved under a conflict-copy name on *both* trees:
//!
//! 1. rename the losing item aside to the conflict-copy path on its own tree
//! 2. write the winning content over the original path on the losing tree
//! 3. copy the preserved losing content across to the winning tree
//!
//! **Delete/modify**: the modification wins and the deleted side is
//! resurrected from the surviving content, unless `prefer_deletions` is
//! configured, in which case the deletion propagates.
//!
//! Resolution is idempotent: no wall-clock reads, no randomness. Winner
//! selection uses only the recorded change timestamps and the configured
//! tie-break, and the conflict-copy name is derived from the losing
//! timestamp.

use tracing::debug;

use twinsync_core::domain::{
    Action, Direction, Operation, Preconditions, RemoteItem, Side, TreePath,
};

use crate::error::ConflictError;
use crate::namer::conflict_copy_path;
use crate::policy::{ResolutionPolicy, Strategy};

// ============================================================================
// Flagged conflicts
// ============================================================================

/// Why the planner could not pick a direction on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides modified since the last sync
    ModifyModify,
    /// One side deleted while the other modified
    DeleteModify {
        /// The side that deleted the item
        deleted: Side,
    },
    /// First-run path match with differing fingerprints (no pair yet)
    FirstRunDivergence,
}

/// A conflict flagged by the planner, awaiting policy resolution
#[derive(Debug, Clone)]
pub struct FlaggedConflict {
    /// Logical path of the conflicting object
    pub path: TreePath,
    /// What happened
    pub kind: ConflictKind,
    /// Current left-side snapshot (None when the left side deleted)
    pub left: Option<RemoteItem>,
    /// Current right-side snapshot (None when the right side deleted)
    pub right: Option<RemoteItem>,
}

impl FlaggedConflict {
    fn item_on(&self, side: Side) -> Option<&RemoteItem> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    fn require(&self, side: Side) -> Result<&RemoteItem, ConflictError> {
        self.item_on(side).ok_or_else(|| ConflictError::MalformedConflict {
            path: self.path.to_string(),
            reason: format!("missing {side} snapshot for {:?}", self.kind),
        })
    }
}

// ============================================================================
// Resolved conflicts
// ============================================================================

/// The unambiguous outcome of resolving one conflict
///
/// `actions` are in execution order and must run serially: later steps
/// assume the earlier ones committed.
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    /// Logical path of the conflicting object
    pub path: TreePath,
    /// The side whose content survives at the original path
    pub winner: Side,
    /// Where the losing content is preserved (None when nothing is kept)
    pub copy_path: Option<TreePath>,
    /// Ordered actions implementing the resolution
    pub actions: Vec<Action>,
    /// True when the resolution propagates a deletion (pair tombstoned)
    pub tombstones_pair: bool,
}

// ============================================================================
// Resolver
// ============================================================================

/// Applies the configured policy to flagged conflicts
pub struct ConflictResolver {
    policy: ResolutionPolicy,
}

impl ConflictResolver {
    /// Creates a resolver over a compiled policy
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy in use
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Resolves one flagged conflict into an ordered action sequence
    ///
    /// # Errors
    /// Returns `ConflictError::MalformedConflict` when the flagged conflict
    /// is missing the snapshot its kind requires.
    pub fn resolve(&self, conflict: &FlaggedConflict) -> Result<ResolvedConflict, ConflictError> {
        match conflict.kind {
            ConflictKind::ModifyModify | ConflictKind::FirstRunDivergence => {
                self.resolve_divergence(conflict)
            }
            ConflictKind::DeleteModify { deleted } => self.resolve_delete_modify(conflict, deleted),
        }
    }

    /// Both sides carry content; pick a winner and preserve the loser
    fn resolve_divergence(
        &self,
        conflict: &FlaggedConflict,
    ) -> Result<ResolvedConflict, ConflictError> {
        let left = conflict.require(Side::Left)?;
        let right = conflict.require(Side::Right)?;

        let winner = self.pick_winner(&conflict.path, left, right);
        let loser_side = winner.opposite();
        let winner_item = conflict.require(winner)?.clone();
        let loser_item = conflict.require(loser_side)?.clone();

        let copy_path = conflict_copy_path(
            &conflict.path,
            self.policy.marker(),
            loser_side,
            loser_item.modified_at,
        )?;

        debug!(
            path = %conflict.path,
            winner = %winner,
            copy = %copy_path,
            "Resolving content divergence"
        );

        let set_aside = Action::rename(
            Direction::from_source(winner),
            loser_item.clone(),
            conflict.path.clone(),
            copy_path.clone(),
            match &loser_item.fingerprint {
                Some(fp) => Preconditions::target_fingerprint(fp.clone()),
                None => Preconditions::none(),
            },
        );

        let propagate_winner = Action::new(
            Direction::from_source(winner),
            Operation::Update,
            Some(winner_item),
            conflict.path.clone(),
            // The losing content was just renamed away; the path is vacant.
            Preconditions::none(),
        );

        let mirror_copy = Action::new(
            Direction::from_source(loser_side),
            Operation::Create,
            Some(loser_item),
            copy_path.clone(),
            Preconditions::none(),
        );

        Ok(ResolvedConflict {
            path: conflict.path.clone(),
            winner,
            copy_path: Some(copy_path),
            actions: vec![set_aside, propagate_winner, mirror_copy],
            tombstones_pair: false,
        })
    }

    /// One side deleted, the other modified
    fn resolve_delete_modify(
        &self,
        conflict: &FlaggedConflict,
        deleted: Side,
    ) -> Result<ResolvedConflict, ConflictError> {
        let modified = deleted.opposite();
        let modified_item = conflict.require(modified)?.clone();

        if self.policy.prefer_deletions() {
            debug!(
                path = %conflict.path,
                deleted = %deleted,
                "Resolving delete/modify: deletion preferred by policy"
            );

            let delete = Action::new(
                Direction::from_source(deleted),
                Operation::Delete,
                Some(modified_item.clone()),
                conflict.path.clone(),
                match &modified_item.fingerprint {
                    Some(fp) => Preconditions::target_fingerprint(fp.clone()),
                    None => Preconditions::none(),
                },
            );

            return Ok(ResolvedConflict {
                path: conflict.path.clone(),
                winner: deleted,
                copy_path: None,
                actions: vec![delete],
                tombstones_pair: true,
            });
        }

        debug!(
            path = %conflict.path,
            modified = %modified,
            "Resolving delete/modify: modification wins, resurrecting"
        );

        let resurrect = Action::new(
            Direction::from_source(modified),
            Operation::Create,
            Some(modified_item),
            conflict.path.clone(),
            Preconditions::none(),
        );

        Ok(ResolvedConflict {
            path: conflict.path.clone(),
            winner: modified,
            copy_path: None,
            actions: vec![resurrect],
            tombstones_pair: false,
        })
    }

    /// Picks the winning side for a content divergence
    ///
    /// Per-path rules can force a side; otherwise the newer timestamp wins
    /// and exact ties break by the configured side.
    fn pick_winner(&self, path: &TreePath, left: &RemoteItem, right: &RemoteItem) -> Side {
        match self.policy.strategy_for(path) {
            Strategy::LeftWins => Side::Left,
            Strategy::RightWins => Side::Right,
            Strategy::NewestWins => {
                if left.modified_at > right.modified_at {
                    Side::Left
                } else if right.modified_at > left.modified_at {
                    Side::Right
                } else {
                    self.policy.tie_break()
                }
            }
        }
    }
}
