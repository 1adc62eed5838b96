//! Change records
//!
//! A `ChangeRecord` is one observed delta for one item on one provider
//! since the last detection pass. Records are ephemeral: they are consumed
//! by exactly one planning pass and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::RemoteItem;
use super::newtypes::ItemId;

/// What kind of change was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Moved => "moved",
        };
        write!(f, "{s}")
    }
}

/// One observed delta on one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Provider-native identifier of the changed item
    pub item_id: ItemId,
    /// What happened
    pub kind: ChangeKind,
    /// Metadata snapshot after the change (None for deletions)
    pub snapshot: Option<RemoteItem>,
    /// When the change was detected by TwinSync
    pub detected_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Builds a record from a post-change snapshot
    #[must_use]
    pub fn observed(kind: ChangeKind, snapshot: RemoteItem) -> Self {
        Self {
            item_id: snapshot.id.clone(),
            kind,
            snapshot: Some(snapshot),
            detected_at: Utc::now(),
        }
    }

    /// Builds a deletion record (no snapshot survives a delete)
    #[must_use]
    pub fn deleted(item_id: ItemId) -> Self {
        Self {
            item_id,
            kind: ChangeKind::Deleted,
            snapshot: None,
            detected_at: Utc::now(),
        }
    }

    /// Returns true for deletion records
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self.kind, ChangeKind::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::ItemKind;
    use crate::domain::newtypes::TreePath;

    #[test]
    fn test_deleted_has_no_snapshot() {
        let record = ChangeRecord::deleted(ItemId::new("x".to_string()).unwrap());
        assert!(record.is_deletion());
        assert!(record.snapshot.is_none());
    }

    #[test]
    fn test_observed_copies_id() {
        let item = RemoteItem {
            id: ItemId::new("f1".to_string()).unwrap(),
            path: TreePath::new("/a.txt".to_string()).unwrap(),
            kind: ItemKind::File,
            fingerprint: None,
            size: 0,
            modified_at: Utc::now(),
            parent_id: None,
        };
        let record = ChangeRecord::observed(ChangeKind::Created, item.clone());
        assert_eq!(record.item_id, item.id);
        assert!(!record.is_deletion());
    }
}
