//! Diff & reconciliation planner
//!
//! Consumes the change records detected on both providers plus the pair
//! table and computes a plan: actions whose direction is unambiguous, plus
//! flagged conflicts for the resolver. The planner performs no I/O against
//! the providers; it only reads the state store.
//!
//! ## Decision table, per logical object
//!
//! | pair | left            | right           | outcome                          |
//! |------|-----------------|-----------------|----------------------------------|
//! | none | exists          | absent          | create left→right                |
//! | none | exists          | exists, same fp | bind pair, no transfer           |
//! | none | exists          | exists, diff fp | first-run divergence conflict    |
//! | yes  | changed         | unchanged       | update/rename/delete left→right  |
//! | yes  | unchanged       | changed         | symmetric, right→left            |
//! | yes  | changed         | changed         | modify/modify conflict           |
//! | yes  | deleted         | unchanged       | propagate delete                 |
//! | yes  | deleted         | changed         | delete/modify conflict           |
//! | yes  | deleted         | deleted         | tombstone, nothing to do         |
//!
//! "Changed" is judged against the fingerprints recorded at last sync, so
//! the engine's own writes echoing back through the next delta plan
//! nothing. Moves are changes whose identifier is stable but whose path
//! differs from the recorded one; they plan a rename when the target
//! provider supports identifier-stable moves and degrade to delete+create
//! otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, trace, warn};

use twinsync_core::domain::{
    Action, ChangeRecord, Direction, ItemKind, Operation, Preconditions, RemoteItem, RunDirection,
    Side, SyncPair, TreePath,
};
use twinsync_core::ports::StateStore;

use twinsync_conflict::{ConflictKind, FlaggedConflict};

// ============================================================================
// Plan types
// ============================================================================

/// One action plus the pair context the executor commits against
///
/// `pair: None` on a create means "bind a new pair from the result". On a
/// rename it means "move something aside without touching the pair table"
/// (used by conflict resolution).
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action: Action,
    pub pair: Option<SyncPair>,
}

/// An ordered group of actions that must execute serially
///
/// Most units hold a single action. Multi-action units come from moves
/// that degrade to delete+create, combined move+edit changes, and resolved
/// conflicts; their later steps assume the earlier ones committed.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub actions: Vec<PlannedAction>,
}

impl WorkUnit {
    /// Wraps a single action
    pub fn single(planned: PlannedAction) -> Self {
        Self {
            actions: vec![planned],
        }
    }

    /// True when every action in the unit is a delete
    pub fn is_delete(&self) -> bool {
        self.actions
            .iter()
            .all(|p| p.action.operation == Operation::Delete)
    }

    /// Depth used for wave ordering (first action's target path)
    pub fn depth(&self) -> usize {
        self.actions.first().map(|p| p.action.depth()).unwrap_or(0)
    }
}

/// A conflict flagged by the planner, with its pair context
#[derive(Debug, Clone)]
pub struct PlannedConflict {
    pub flagged: FlaggedConflict,
    pub pair: Option<SyncPair>,
}

/// Output of one planning pass
#[derive(Debug, Default)]
pub struct Plan {
    /// Unambiguous work, unordered (the executor schedules into waves)
    pub units: Vec<WorkUnit>,
    /// Conflicts awaiting policy resolution
    pub conflicts: Vec<PlannedConflict>,
    /// Pairs to record without any provider operation (first-run matches,
    /// convergent edits)
    pub binds: Vec<SyncPair>,
    /// Pairs whose both sides vanished; tombstone without provider work
    pub tombstones: Vec<SyncPair>,
}

impl Plan {
    /// Total number of planned provider actions
    pub fn action_count(&self) -> usize {
        self.units.iter().map(|u| u.actions.len()).sum()
    }

    /// True when the pass found nothing to do
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
            && self.conflicts.is_empty()
            && self.binds.is_empty()
            && self.tombstones.is_empty()
    }
}

/// Which providers support identifier-stable moves
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub left_rename: bool,
    pub right_rename: bool,
}

impl Capabilities {
    fn rename_on(&self, side: Side) -> bool {
        match side {
            Side::Left => self.left_rename,
            Side::Right => self.right_rename,
        }
    }
}

// ============================================================================
// Internal classification
// ============================================================================

/// What one side effectively did to a paired object since the last sync
#[derive(Debug, Clone)]
enum Delta {
    Unchanged,
    Content(RemoteItem),
    Move(RemoteItem),
    ContentAndMove(RemoteItem),
    Deleted,
}

impl Delta {
    fn is_changed(&self) -> bool {
        !matches!(self, Delta::Unchanged)
    }

    fn snapshot(&self) -> Option<&RemoteItem> {
        match self {
            Delta::Content(s) | Delta::Move(s) | Delta::ContentAndMove(s) => Some(s),
            _ => None,
        }
    }
}

struct PairWork {
    pair: SyncPair,
    left: Option<ChangeRecord>,
    right: Option<ChangeRecord>,
}

// ============================================================================
// Planner
// ============================================================================

/// Computes reconciliation plans from detected changes
pub struct Planner {
    store: Arc<dyn StateStore>,
    caps: Capabilities,
}

impl Planner {
    /// Creates a planner over the pair table
    pub fn new(store: Arc<dyn StateStore>, caps: Capabilities) -> Self {
        Self { store, caps }
    }

    /// Computes the plan for one run
    ///
    /// `left` and `right` are the change records detected on each provider
    /// since the last run. `direction` filters which side's changes are
    /// propagated; conflicts are flagged regardless so policy resolution
    /// stays consistent. `scope` restricts planning to one subtree.
    pub async fn plan(
        &self,
        left: &[ChangeRecord],
        right: &[ChangeRecord],
        direction: RunDirection,
        scope: Option<&TreePath>,
    ) -> Result<Plan> {
        let mut plan = Plan::default();

        let left_effective = coalesce(left);
        let right_effective = coalesce(right);

        // Associate records with pairs (by identifier, falling back to the
        // recorded path for providers that churn identifiers on rewrite).
        let mut pair_work: HashMap<(String, String), PairWork> = HashMap::new();
        let mut unpaired_left: Vec<ChangeRecord> = Vec::new();
        let mut unpaired_right: Vec<ChangeRecord> = Vec::new();

        for record in left_effective {
            match self.associate(Side::Left, &record).await? {
                Some(pair) => {
                    attach(&mut pair_work, pair, Side::Left, record);
                }
                None => unpaired_left.push(record),
            }
        }
        for record in right_effective {
            match self.associate(Side::Right, &record).await? {
                Some(pair) => {
                    attach(&mut pair_work, pair, Side::Right, record);
                }
                None => unpaired_right.push(record),
            }
        }

        // Paired objects
        for work in pair_work.into_values() {
            if !in_scope(scope, Some(work.pair.path())) {
                continue;
            }
            self.plan_pair(work, direction, &mut plan)?;
        }

        // Unpaired objects: first-run matching, then plain creates
        self.plan_unpaired(
            unpaired_left,
            unpaired_right,
            direction,
            scope,
            &mut plan,
        )
        .await?;

        debug!(
            units = plan.units.len(),
            actions = plan.action_count(),
            conflicts = plan.conflicts.len(),
            binds = plan.binds.len(),
            tombstones = plan.tombstones.len(),
            "Planning pass complete"
        );

        Ok(plan)
    }

    /// Finds the pair a record belongs to, if any
    async fn associate(&self, side: Side, record: &ChangeRecord) -> Result<Option<SyncPair>> {
        if let Some(pair) = self
            .store
            .pair_by_id(side, &record.item_id)
            .await
            .context("pair lookup by id")?
        {
            return Ok(Some(pair));
        }

        // Identifier churn: some providers hand out a fresh identifier when
        // a file is rewritten. Fall back to the recorded path.
        if let Some(snapshot) = &record.snapshot {
            if let Some(pair) = self
                .store
                .pair_by_path(&snapshot.path)
                .await
                .context("pair lookup by path")?
            {
                if !pair.is_tombstoned() && pair.kind() == snapshot.kind {
                    return Ok(Some(pair));
                }
            }
        }

        Ok(None)
    }

    /// Applies the decision table to one paired object
    fn plan_pair(&self, work: PairWork, direction: RunDirection, plan: &mut Plan) -> Result<()> {
        let pair = work.pair;
        let left = classify(&pair, Side::Left, work.left.as_ref());
        let right = classify(&pair, Side::Right, work.right.as_ref());

        match (&left, &right) {
            (Delta::Unchanged, Delta::Unchanged) => {}

            (Delta::Deleted, Delta::Deleted) => {
                let mut tombstoned = pair;
                tombstoned.mark_tombstoned()?;
                plan.tombstones.push(tombstoned);
            }

            (Delta::Deleted, Delta::Unchanged) => {
                if allows(direction, Side::Left) {
                    plan.units
                        .push(WorkUnit::single(delete_propagation(&pair, Side::Left)));
                }
            }
            (Delta::Unchanged, Delta::Deleted) => {
                if allows(direction, Side::Right) {
                    plan.units
                        .push(WorkUnit::single(delete_propagation(&pair, Side::Right)));
                }
            }

            (Delta::Deleted, changed) if changed.is_changed() => {
                plan.conflicts.push(PlannedConflict {
                    flagged: FlaggedConflict {
                        path: pair.path().clone(),
                        kind: ConflictKind::DeleteModify {
                            deleted: Side::Left,
                        },
                        left: None,
                        right: changed.snapshot().cloned(),
                    },
                    pair: Some(pair),
                });
            }
            (changed, Delta::Deleted) if changed.is_changed() => {
                plan.conflicts.push(PlannedConflict {
                    flagged: FlaggedConflict {
                        path: pair.path().clone(),
                        kind: ConflictKind::DeleteModify {
                            deleted: Side::Right,
                        },
                        left: changed.snapshot().cloned(),
                        right: None,
                    },
                    pair: Some(pair),
                });
            }

            (changed, Delta::Unchanged) if changed.is_changed() => {
                if allows(direction, Side::Left) {
                    self.plan_single_sided(&pair, Side::Left, changed, plan)?;
                }
            }
            (Delta::Unchanged, changed) if changed.is_changed() => {
                if allows(direction, Side::Right) {
                    self.plan_single_sided(&pair, Side::Right, changed, plan)?;
                }
            }

            (l, r) => {
                // Both sides changed. If they converged on identical content
                // at the identical path, just record it; otherwise flag.
                let (Some(ls), Some(rs)) = (l.snapshot(), r.snapshot()) else {
                    warn!(path = %pair.path(), "Unclassifiable change combination, skipping");
                    return Ok(());
                };
                if ls.path == rs.path && ls.same_content(rs) {
                    let mut converged = pair;
                    converged.set_path(ls.path.clone());
                    converged.record_synced(
                        ls.fingerprint.clone(),
                        rs.fingerprint.clone(),
                        Utc::now(),
                    )?;
                    plan.binds.push(converged);
                } else {
                    plan.conflicts.push(PlannedConflict {
                        flagged: FlaggedConflict {
                            path: pair.path().clone(),
                            kind: ConflictKind::ModifyModify,
                            left: Some(ls.clone()),
                            right: Some(rs.clone()),
                        },
                        pair: Some(pair),
                    });
                }
            }
        }

        Ok(())
    }

    /// One side changed, the other did not: direction is unambiguous
    fn plan_single_sided(
        &self,
        pair: &SyncPair,
        source: Side,
        delta: &Delta,
        plan: &mut Plan,
    ) -> Result<()> {
        let direction = Direction::from_source(source);
        let target = direction.target();
        let guard = pair
            .synced_on(target)
            .cloned()
            .map(Preconditions::target_fingerprint)
            .unwrap_or_default();

        match delta {
            Delta::Content(snapshot) => {
                plan.units.push(WorkUnit::single(PlannedAction {
                    action: Action::new(
                        direction,
                        Operation::Update,
                        Some(snapshot.clone()),
                        pair.path().clone(),
                        guard,
                    ),
                    pair: Some(pair.clone()),
                }));
            }
            Delta::Move(snapshot) => {
                plan.units.push(self.move_unit(pair, direction, snapshot, None)?);
            }
            Delta::ContentAndMove(snapshot) => {
                plan.units
                    .push(self.move_unit(pair, direction, snapshot, Some(snapshot))?);
            }
            Delta::Unchanged | Delta::Deleted => unreachable!("filtered by caller"),
        }

        Ok(())
    }

    /// A move, optionally carrying a content change to apply at the new path
    ///
    /// Plans a rename when the target provider supports identifier-stable
    /// moves; degrades to delete+create otherwise.
    fn move_unit(
        &self,
        pair: &SyncPair,
        direction: Direction,
        snapshot: &RemoteItem,
        content_change: Option<&RemoteItem>,
    ) -> Result<WorkUnit> {
        let target = direction.target();
        // Same file-only rule as delete guards: a folder's revision moves
        // whenever any child changes, so it cannot anchor a precondition.
        let guard = match pair.kind() {
            ItemKind::File => pair
                .synced_on(target)
                .cloned()
                .map(Preconditions::target_fingerprint)
                .unwrap_or_default(),
            ItemKind::Folder => Preconditions::none(),
        };

        let mut actions = Vec::new();

        if self.caps.rename_on(target) {
            actions.push(PlannedAction {
                action: Action::rename(
                    direction,
                    snapshot.clone(),
                    pair.path().clone(),
                    snapshot.path.clone(),
                    guard,
                ),
                pair: Some(pair.clone()),
            });
            if let Some(changed) = content_change {
                actions.push(PlannedAction {
                    action: Action::new(
                        direction,
                        Operation::Update,
                        Some(changed.clone()),
                        snapshot.path.clone(),
                        Preconditions::none(),
                    ),
                    pair: Some(pair.clone()),
                });
            }
        } else {
            trace!(
                path = %pair.path(),
                target = %target,
                "Target provider cannot move items; degrading to delete+create"
            );
            actions.push(PlannedAction {
                action: Action::new(
                    direction,
                    Operation::Delete,
                    None,
                    pair.path().clone(),
                    guard,
                ),
                pair: Some(pair.clone()),
            });
            actions.push(PlannedAction {
                action: Action::new(
                    direction,
                    Operation::Create,
                    Some(snapshot.clone()),
                    snapshot.path.clone(),
                    Preconditions::none(),
                ),
                pair: None,
            });
        }

        Ok(WorkUnit { actions })
    }

    /// First-run matching and plain creates for unpaired records
    async fn plan_unpaired(
        &self,
        left: Vec<ChangeRecord>,
        right: Vec<ChangeRecord>,
        direction: RunDirection,
        scope: Option<&TreePath>,
        plan: &mut Plan,
    ) -> Result<()> {
        // Index the right side's unpaired snapshots by path
        let mut right_by_path: HashMap<String, ChangeRecord> = HashMap::new();
        let mut right_deletions: Vec<ChangeRecord> = Vec::new();
        for record in right {
            match &record.snapshot {
                Some(snapshot) => {
                    right_by_path.insert(snapshot.path.as_str().to_string(), record);
                }
                None => right_deletions.push(record),
            }
        }

        for record in left {
            let Some(snapshot) = record.snapshot.clone() else {
                // Deletion of something never paired: stale notification or
                // an item created and removed between runs.
                self.note_unknown_deletion(Side::Left, &record).await?;
                continue;
            };
            if !in_scope(scope, Some(&snapshot.path)) {
                continue;
            }
            if self.is_resurrection(Side::Left, &snapshot).await? {
                continue;
            }

            match right_by_path.remove(snapshot.path.as_str()) {
                Some(opposite) => {
                    let other = opposite.snapshot.expect("indexed by snapshot presence");
                    if self.is_resurrection(Side::Right, &other).await? {
                        // The right identifier is a tombstoned ghost; treat
                        // the left item as standing alone.
                        if allows(direction, Side::Left) {
                            plan.units
                                .push(WorkUnit::single(fresh_create(Side::Left, &snapshot)));
                        }
                        continue;
                    }
                    self.match_first_run(snapshot, other, plan)?;
                }
                None => {
                    if allows(direction, Side::Left) {
                        plan.units
                            .push(WorkUnit::single(fresh_create(Side::Left, &snapshot)));
                    }
                }
            }
        }

        // Remaining right-side records found no counterpart
        for record in right_by_path.into_values() {
            let snapshot = record.snapshot.expect("indexed by snapshot presence");
            if !in_scope(scope, Some(&snapshot.path)) {
                continue;
            }
            if self.is_resurrection(Side::Right, &snapshot).await? {
                continue;
            }
            if allows(direction, Side::Right) {
                plan.units
                    .push(WorkUnit::single(fresh_create(Side::Right, &snapshot)));
            }
        }
        for record in right_deletions {
            self.note_unknown_deletion(Side::Right, &record).await?;
        }

        Ok(())
    }

    /// Both sides carry an unpaired item at the same path
    fn match_first_run(
        &self,
        left: RemoteItem,
        right: RemoteItem,
        plan: &mut Plan,
    ) -> Result<()> {
        let matched = left.kind == right.kind
            && (left.kind == ItemKind::Folder || left.same_content(&right));

        if matched {
            debug!(path = %left.path, "First-run match, binding without transfer");
            let mut pair = SyncPair::new(
                left.id.clone(),
                right.id.clone(),
                left.path.clone(),
                left.kind,
            );
            pair.record_synced(left.fingerprint, right.fingerprint, Utc::now())?;
            plan.binds.push(pair);
        } else {
            debug!(path = %left.path, "First-run divergence, flagging conflict");
            plan.conflicts.push(PlannedConflict {
                flagged: FlaggedConflict {
                    path: left.path.clone(),
                    kind: ConflictKind::FirstRunDivergence,
                    left: Some(left),
                    right: Some(right),
                },
                pair: None,
            });
        }

        Ok(())
    }

    /// No-resurrection rule: a change record for a tombstoned identifier
    /// never creates a new pair
    async fn is_resurrection(&self, side: Side, snapshot: &RemoteItem) -> Result<bool> {
        let tombstone = self
            .store
            .tombstone_by_id(side, &snapshot.id)
            .await
            .context("tombstone lookup")?;
        if tombstone.is_some() {
            debug!(
                side = %side,
                id = %snapshot.id,
                path = %snapshot.path,
                "Ignoring change for tombstoned identifier"
            );
            return Ok(true);
        }
        Ok(false)
    }

    async fn note_unknown_deletion(&self, side: Side, record: &ChangeRecord) -> Result<()> {
        let tombstoned = self
            .store
            .tombstone_by_id(side, &record.item_id)
            .await
            .context("tombstone lookup")?
            .is_some();
        trace!(
            side = %side,
            id = %record.item_id,
            tombstoned,
            "Deletion for unpaired identifier, nothing to do"
        );
        Ok(())
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Folds raw records into one effective record per item (last wins)
fn coalesce(records: &[ChangeRecord]) -> Vec<ChangeRecord> {
    let mut by_id: HashMap<String, ChangeRecord> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for record in records {
        let key = record.item_id.as_str().to_string();
        if !by_id.contains_key(&key) {
            order.push(key.clone());
        }
        by_id.insert(key, record.clone());
    }
    order
        .into_iter()
        .filter_map(|key| by_id.remove(&key))
        .collect()
}

/// Judges what a record means for one side of a pair
fn classify(pair: &SyncPair, side: Side, record: Option<&ChangeRecord>) -> Delta {
    let Some(record) = record else {
        return Delta::Unchanged;
    };
    let Some(snapshot) = &record.snapshot else {
        return Delta::Deleted;
    };

    // Folder "content" is provider bookkeeping (child revisions); only
    // moves and deletions matter for folders.
    let content_changed = snapshot.kind == ItemKind::File
        && snapshot.fingerprint.as_ref() != pair.synced_on(side);
    let moved = snapshot.path != *pair.path();

    match (content_changed, moved) {
        (false, false) => Delta::Unchanged,
        (true, false) => Delta::Content(snapshot.clone()),
        (false, true) => Delta::Move(snapshot.clone()),
        (true, true) => Delta::ContentAndMove(snapshot.clone()),
    }
}

fn allows(direction: RunDirection, source: Side) -> bool {
    match direction {
        RunDirection::Bidirectional => true,
        RunDirection::LeftToRight => source == Side::Left,
        RunDirection::RightToLeft => source == Side::Right,
    }
}

fn in_scope(scope: Option<&TreePath>, path: Option<&TreePath>) -> bool {
    match (scope, path) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(scope), Some(path)) => path.starts_with(scope),
    }
}

fn delete_propagation(pair: &SyncPair, deleted_on: Side) -> PlannedAction {
    let direction = Direction::from_source(deleted_on);
    // Folder fingerprints are revision counters that drift with every child
    // mutation (including this run's own child deletes), so only file
    // deletes carry a guard.
    let guard = match pair.kind() {
        ItemKind::File => pair
            .synced_on(direction.target())
            .cloned()
            .map(Preconditions::target_fingerprint)
            .unwrap_or_default(),
        ItemKind::Folder => Preconditions::none(),
    };
    PlannedAction {
        action: Action::new(
            direction,
            Operation::Delete,
            None,
            pair.path().clone(),
            guard,
        ),
        pair: Some(pair.clone()),
    }
}

fn fresh_create(source: Side, snapshot: &RemoteItem) -> PlannedAction {
    PlannedAction {
        action: Action::new(
            Direction::from_source(source),
            Operation::Create,
            Some(snapshot.clone()),
            snapshot.path.clone(),
            Preconditions::none(),
        ),
        pair: None,
    }
}

fn attach(
    map: &mut HashMap<(String, String), PairWork>,
    pair: SyncPair,
    side: Side,
    record: ChangeRecord,
) {
    let key = (
        pair.left_id().as_str().to_string(),
        pair.right_id().as_str().to_string(),
    );
    let entry = map.entry(key).or_insert_with(|| PairWork {
        pair,
        left: None,
        right: None,
    });
    match side {
        Side::Left => entry.left = Some(record),
        Side::Right => entry.right = Some(record),
    }
}
