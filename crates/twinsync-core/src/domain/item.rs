//! Remote item entity
//!
//! A `RemoteItem` is one file or folder as observed on one provider. It is
//! a snapshot: the engine never mutates it, only compares snapshots taken
//! at different times against the recorded pair state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Fingerprint, ItemId, TreePath};

/// Whether an item is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    /// Returns true for folders
    #[must_use]
    pub const fn is_folder(self) -> bool {
        matches!(self, ItemKind::Folder)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        };
        write!(f, "{s}")
    }
}

/// A file or folder as reported by one provider
///
/// Folders may lack a fingerprint; providers that version folder metadata
/// can supply one and it will be used for optimistic-concurrency
/// preconditions on child creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    /// Provider-native identifier
    pub id: ItemId,
    /// Rooted path within the provider tree
    pub path: TreePath,
    /// File or folder
    pub kind: ItemKind,
    /// Content fingerprint (None when the provider reports none, e.g. folders)
    pub fingerprint: Option<Fingerprint>,
    /// Size in bytes (0 for folders)
    pub size: u64,
    /// Last-modified timestamp as reported by the provider
    pub modified_at: DateTime<Utc>,
    /// Parent folder identifier (None for items directly under the root)
    pub parent_id: Option<ItemId>,
}

impl RemoteItem {
    /// Returns the item's name (final path segment), or "/" for the root
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or("/")
    }

    /// Returns true if both items carry fingerprints and they match
    #[must_use]
    pub fn same_content(&self, other: &RemoteItem) -> bool {
        match (&self.fingerprint, &other.fingerprint) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
