//! In-memory provider tree
//!
//! The tree is a flat `id -> Node` map with parent links; paths are derived
//! by climbing parents so renames stay identifier-stable. Every mutation
//! appends to a sequence-numbered change log, and delta cursors are just
//! encoded sequence numbers, so truncating the log below a cursor is exactly
//! a provider expiring it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use twinsync_core::domain::{
    ChangeKind, ChangeRecord, Cursor, Fingerprint, ItemId, ItemKind, RemoteItem, TreePath,
};
use twinsync_core::ports::remote_tree::{
    DeltaPage, ProviderError, ProviderResult, RemoteTree, SubscriptionHandle, UploadSession,
};

/// Computes the fingerprint the adapter assigns to file content
pub fn content_fingerprint(data: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(data);
    Fingerprint::new(format!("sha256:{:x}", digest)).expect("hex digest is never empty")
}

struct Node {
    id: String,
    name: String,
    parent: Option<String>,
    kind: ItemKind,
    data: Vec<u8>,
    /// Folder revision; bumped when a direct child is added/removed/renamed
    revision: u64,
    modified_at: DateTime<Utc>,
}

struct LogEntry {
    kind: ChangeKind,
    item_id: String,
    snapshot: Option<RemoteItem>,
}

struct UploadBuf {
    parent: Option<String>,
    name: String,
    total_size: u64,
    received: Vec<u8>,
    acked: u64,
}

struct Inner {
    nodes: HashMap<String, Node>,
    id_counter: u64,
    log: VecDeque<(u64, LogEntry)>,
    next_seq: u64,
    /// Sequence number below which the log has been truncated
    log_floor: u64,
    uploads: HashMap<String, UploadBuf>,
    upload_counter: u64,
    sub_counter: u64,
    faults: VecDeque<ProviderError>,
}

/// In-memory [`RemoteTree`] implementation
pub struct MemoryTree {
    label: String,
    supports_rename: bool,
    inner: Mutex<Inner>,
}

impl MemoryTree {
    /// Creates an empty tree that supports identifier-stable renames
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            supports_rename: true,
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                id_counter: 0,
                log: VecDeque::new(),
                next_seq: 0,
                log_floor: 0,
                uploads: HashMap::new(),
                upload_counter: 0,
                sub_counter: 0,
                faults: VecDeque::new(),
            }),
        }
    }

    /// Creates a tree whose provider cannot move items (rename degrades to
    /// delete+create in the planner)
    pub fn without_rename(label: impl Into<String>) -> Self {
        Self {
            supports_rename: false,
            ..Self::new(label)
        }
    }

    // ========================================================================
    // Fault injection and log control
    // ========================================================================

    /// Queues an error; the next adapter call fails with it
    pub fn fail_next(&self, err: ProviderError) {
        self.inner.lock().unwrap().faults.push_back(err);
    }

    /// Queues the same error for the next `n` adapter calls
    pub fn fail_times(&self, err: ProviderError, n: usize) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..n {
            inner.faults.push_back(err.clone());
        }
    }

    /// Truncates the change log; every previously issued cursor expires
    pub fn expire_log(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.log_floor = inner.next_seq;
        inner.log.clear();
    }

    // ========================================================================
    // External mutation helpers (edits made behind the engine's back)
    // ========================================================================

    /// Creates or overwrites a file, creating parent folders as needed
    pub fn put_file(&self, path: &str, data: &[u8]) -> RemoteItem {
        self.put_file_at(path, data, Utc::now())
    }

    /// Like [`put_file`](MemoryTree::put_file) with an explicit mtime
    pub fn put_file_at(&self, path: &str, data: &[u8], modified_at: DateTime<Utc>) -> RemoteItem {
        let tree_path = TreePath::new(path.to_string()).expect("valid path");
        let parent_path = tree_path.parent().expect("file cannot be the root");
        let name = tree_path.file_name().expect("file has a name").to_string();

        let mut inner = self.inner.lock().unwrap();
        let parent = inner.mkdir_all_locked(&parent_path);
        inner.write_file_locked(parent, &name, data, modified_at)
    }

    /// Creates a folder chain; returns the deepest folder's id (None = root)
    pub fn mkdir_all(&self, path: &str) -> Option<ItemId> {
        let tree_path = TreePath::new(path.to_string()).expect("valid path");
        let mut inner = self.inner.lock().unwrap();
        inner
            .mkdir_all_locked(&tree_path)
            .map(|id| ItemId::new(id).expect("valid id"))
    }

    /// Removes the item (and subtree) at `path`; returns false if absent
    pub fn remove(&self, path: &str) -> bool {
        let tree_path = TreePath::new(path.to_string()).expect("valid path");
        let mut inner = self.inner.lock().unwrap();
        match inner.resolve_path_locked(&tree_path) {
            Some(id) => {
                inner.delete_subtree_locked(&id);
                true
            }
            None => false,
        }
    }

    /// Moves an item to a new path (external edit; ignores the rename flag)
    pub fn move_item(&self, from: &str, to: &str) -> bool {
        let from_path = TreePath::new(from.to_string()).expect("valid path");
        let to_path = TreePath::new(to.to_string()).expect("valid path");
        let to_parent = to_path.parent().expect("target cannot be the root");
        let to_name = to_path.file_name().expect("target has a name").to_string();

        let mut inner = self.inner.lock().unwrap();
        let Some(id) = inner.resolve_path_locked(&from_path) else {
            return false;
        };
        let new_parent = inner.mkdir_all_locked(&to_parent);
        inner.move_locked(&id, new_parent, &to_name);
        true
    }

    /// Returns the item at `path`, if any
    pub fn item_at(&self, path: &str) -> Option<RemoteItem> {
        let tree_path = TreePath::new(path.to_string()).ok()?;
        let inner = self.inner.lock().unwrap();
        let id = inner.resolve_path_locked(&tree_path)?;
        Some(inner.snapshot_locked(&id))
    }

    /// Returns a file's content at `path`, if any
    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        let tree_path = TreePath::new(path.to_string()).ok()?;
        let inner = self.inner.lock().unwrap();
        let id = inner.resolve_path_locked(&tree_path)?;
        let node = inner.nodes.get(&id)?;
        match node.kind {
            ItemKind::File => Some(node.data.clone()),
            ItemKind::Folder => None,
        }
    }

    /// Number of items in the tree
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }

    /// Returns true when the tree holds no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites an existing item's mtime (for timestamp-sensitive tests)
    pub fn set_modified(&self, path: &str, modified_at: DateTime<Utc>) -> bool {
        let tree_path = TreePath::new(path.to_string()).expect("valid path");
        let mut inner = self.inner.lock().unwrap();
        let Some(id) = inner.resolve_path_locked(&tree_path) else {
            return false;
        };
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.modified_at = modified_at;
        }
        true
    }

    fn take_fault(&self) -> Option<ProviderError> {
        self.inner.lock().unwrap().faults.pop_front()
    }
}

// ============================================================================
// Locked internals
// ============================================================================

impl Inner {
    fn fresh_id(&mut self) -> String {
        self.id_counter += 1;
        format!("m{}", self.id_counter)
    }

    fn path_of_locked(&self, id: &str) -> TreePath {
        let mut segments = Vec::new();
        let mut current = Some(id.to_string());
        while let Some(cur) = current {
            let node = self.nodes.get(&cur).expect("consistent parent links");
            segments.push(node.name.clone());
            current = node.parent.clone();
        }
        let mut path = TreePath::root();
        for segment in segments.iter().rev() {
            path = path.join(segment).expect("stored names are valid segments");
        }
        path
    }

    fn fingerprint_locked(&self, node: &Node) -> Fingerprint {
        match node.kind {
            ItemKind::File => content_fingerprint(&node.data),
            ItemKind::Folder => {
                Fingerprint::new(format!("r{}", node.revision)).expect("non-empty")
            }
        }
    }

    fn snapshot_locked(&self, id: &str) -> RemoteItem {
        let node = self.nodes.get(id).expect("snapshot of existing node");
        RemoteItem {
            id: ItemId::new(node.id.clone()).expect("valid id"),
            path: self.path_of_locked(id),
            kind: node.kind,
            fingerprint: Some(self.fingerprint_locked(node)),
            size: node.data.len() as u64,
            modified_at: node.modified_at,
            parent_id: node
                .parent
                .as_ref()
                .map(|p| ItemId::new(p.clone()).expect("valid id")),
        }
    }

    fn child_by_name_locked(&self, parent: Option<&str>, name: &str) -> Option<String> {
        self.nodes
            .values()
            .find(|n| n.parent.as_deref() == parent && n.name == name)
            .map(|n| n.id.clone())
    }

    fn children_of_locked(&self, parent: Option<&str>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.parent.as_deref() == parent)
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn resolve_path_locked(&self, path: &TreePath) -> Option<String> {
        if path.is_root() {
            return None;
        }
        let mut parent: Option<String> = None;
        let mut resolved = None;
        for segment in path.as_str()[1..].split('/') {
            resolved = self.child_by_name_locked(parent.as_deref(), segment);
            resolved.as_ref()?;
            parent = resolved.clone();
        }
        resolved
    }

    fn record_locked(&mut self, kind: ChangeKind, item_id: &str) {
        let snapshot = match kind {
            ChangeKind::Deleted => None,
            _ => Some(self.snapshot_locked(item_id)),
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.log.push_back((
            seq,
            LogEntry {
                kind,
                item_id: item_id.to_string(),
                snapshot,
            },
        ));
    }

    fn bump_revision_locked(&mut self, folder: Option<&str>) {
        if let Some(id) = folder {
            if let Some(node) = self.nodes.get_mut(id) {
                node.revision += 1;
            }
        }
    }

    fn mkdir_all_locked(&mut self, path: &TreePath) -> Option<String> {
        if path.is_root() {
            return None;
        }
        let mut parent: Option<String> = None;
        for segment in path.as_str()[1..].split('/').map(str::to_string) {
            match self.child_by_name_locked(parent.as_deref(), &segment) {
                Some(existing) => parent = Some(existing),
                None => {
                    let id = self.fresh_id();
                    self.nodes.insert(
                        id.clone(),
                        Node {
                            id: id.clone(),
                            name: segment,
                            parent: parent.clone(),
                            kind: ItemKind::Folder,
                            data: Vec::new(),
                            revision: 0,
                            modified_at: Utc::now(),
                        },
                    );
                    self.bump_revision_locked(parent.as_deref());
                    self.record_locked(ChangeKind::Created, &id);
                    parent = Some(id);
                }
            }
        }
        parent
    }

    fn write_file_locked(
        &mut self,
        parent: Option<String>,
        name: &str,
        data: &[u8],
        modified_at: DateTime<Utc>,
    ) -> RemoteItem {
        match self.child_by_name_locked(parent.as_deref(), name) {
            Some(existing) => {
                let node = self.nodes.get_mut(&existing).expect("existing node");
                node.data = data.to_vec();
                node.modified_at = modified_at;
                self.record_locked(ChangeKind::Modified, &existing);
                self.snapshot_locked(&existing)
            }
            None => {
                let id = self.fresh_id();
                self.nodes.insert(
                    id.clone(),
                    Node {
                        id: id.clone(),
                        name: name.to_string(),
                        parent: parent.clone(),
                        kind: ItemKind::File,
                        data: data.to_vec(),
                        revision: 0,
                        modified_at,
                    },
                );
                self.bump_revision_locked(parent.as_deref());
                self.record_locked(ChangeKind::Created, &id);
                self.snapshot_locked(&id)
            }
        }
    }

    fn delete_subtree_locked(&mut self, id: &str) {
        // Children first so the log orders child deletions before parents
        for child in self.children_of_locked(Some(id)) {
            self.delete_subtree_locked(&child);
        }
        if let Some(node) = self.nodes.get(id) {
            let parent = node.parent.clone();
            self.record_locked(ChangeKind::Deleted, id);
            self.nodes.remove(id);
            self.bump_revision_locked(parent.as_deref());
        }
    }

    fn move_locked(&mut self, id: &str, new_parent: Option<String>, new_name: &str) {
        let old_parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent.clone();
            node.name = new_name.to_string();
            node.modified_at = Utc::now();
        }
        self.bump_revision_locked(old_parent.as_deref());
        self.bump_revision_locked(new_parent.as_deref());
        self.record_locked(ChangeKind::Moved, id);
    }
}

// ============================================================================
// RemoteTree implementation
// ============================================================================

#[async_trait::async_trait]
impl RemoteTree for MemoryTree {
    async fn list_children(&self, folder: Option<&ItemId>) -> ProviderResult<Vec<RemoteItem>> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let inner = self.inner.lock().unwrap();
        let parent = match folder {
            Some(id) => {
                let node = inner
                    .nodes
                    .get(id.as_str())
                    .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
                if !node.kind.is_folder() {
                    return Err(ProviderError::Protocol(format!(
                        "{} is not a folder",
                        id
                    )));
                }
                Some(id.as_str())
            }
            None => None,
        };
        Ok(inner
            .children_of_locked(parent)
            .iter()
            .map(|id| inner.snapshot_locked(id))
            .collect())
    }

    async fn get_metadata(&self, id: &ItemId) -> ProviderResult<RemoteItem> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(id.as_str()) {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        Ok(inner.snapshot_locked(id.as_str()))
    }

    async fn read_content(&self, id: &ItemId, offset: u64, len: u64) -> ProviderResult<Vec<u8>> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get(id.as_str())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        if node.kind.is_folder() {
            return Err(ProviderError::Protocol(format!(
                "{} is a folder, not readable",
                id
            )));
        }
        let start = (offset as usize).min(node.data.len());
        let end = (offset.saturating_add(len) as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }

    async fn write_content(
        &self,
        parent: Option<&ItemId>,
        name: &str,
        data: &[u8],
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let parent_id = check_parent(&inner, parent, expected_parent_fingerprint)?;

        if let Some(existing) = inner.child_by_name_locked(parent_id.as_deref(), name) {
            let node = inner.nodes.get(&existing).expect("existing node");
            if node.kind.is_folder() {
                return Err(ProviderError::Protocol(format!(
                    "cannot overwrite folder '{}' with file content",
                    name
                )));
            }
        }

        Ok(inner.write_file_locked(parent_id, name, data, Utc::now()))
    }

    async fn create_folder(
        &self,
        parent: Option<&ItemId>,
        name: &str,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let parent_id = check_parent(&inner, parent, expected_parent_fingerprint)?;

        // Creating an already-existing folder is idempotent
        if let Some(existing) = inner.child_by_name_locked(parent_id.as_deref(), name) {
            let node = inner.nodes.get(&existing).expect("existing node");
            if !node.kind.is_folder() {
                return Err(ProviderError::PreconditionFailed(format!(
                    "'{}' exists and is a file",
                    name
                )));
            }
            return Ok(inner.snapshot_locked(&existing));
        }

        let id = inner.fresh_id();
        inner.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                name: name.to_string(),
                parent: parent_id.clone(),
                kind: ItemKind::Folder,
                data: Vec::new(),
                revision: 0,
                modified_at: Utc::now(),
            },
        );
        inner.bump_revision_locked(parent_id.as_deref());
        inner.record_locked(ChangeKind::Created, &id);
        Ok(inner.snapshot_locked(&id))
    }

    async fn begin_upload(
        &self,
        parent: Option<&ItemId>,
        name: &str,
        total_size: u64,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<UploadSession> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let parent_id = check_parent(&inner, parent, expected_parent_fingerprint)?;

        inner.upload_counter += 1;
        let session_id = format!("u{}", inner.upload_counter);
        inner.uploads.insert(
            session_id.clone(),
            UploadBuf {
                parent: parent_id.clone(),
                name: name.to_string(),
                total_size,
                received: Vec::new(),
                acked: 0,
            },
        );

        Ok(UploadSession {
            id: session_id,
            parent_id: parent_id.map(|p| ItemId::new(p).expect("valid id")),
            name: name.to_string(),
            total_size,
        })
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        offset: u64,
        data: &[u8],
    ) -> ProviderResult<u64> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let buf = inner
            .uploads
            .get_mut(&session.id)
            .ok_or_else(|| ProviderError::NotFound(format!("upload session {}", session.id)))?;

        if offset > buf.acked {
            return Err(ProviderError::Protocol(format!(
                "upload gap: offset {} past acknowledged {}",
                offset, buf.acked
            )));
        }
        if offset < buf.acked {
            // Re-sent part after a lost acknowledgement; already have it
            return Ok(buf.acked);
        }

        buf.received.extend_from_slice(data);
        buf.acked += data.len() as u64;
        Ok(buf.acked)
    }

    async fn finish_upload(&self, session: UploadSession) -> ProviderResult<RemoteItem> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let buf = inner
            .uploads
            .remove(&session.id)
            .ok_or_else(|| ProviderError::NotFound(format!("upload session {}", session.id)))?;

        if buf.acked != buf.total_size {
            return Err(ProviderError::Protocol(format!(
                "upload incomplete: {} of {} bytes",
                buf.acked, buf.total_size
            )));
        }

        Ok(inner.write_file_locked(buf.parent, &buf.name, &buf.received, Utc::now()))
    }

    async fn delete(
        &self,
        id: &ItemId,
        expected_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<()> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get(id.as_str())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;

        if let Some(expected) = expected_fingerprint {
            let current = inner.fingerprint_locked(node);
            if current != *expected {
                return Err(ProviderError::PreconditionFailed(format!(
                    "{} changed since fingerprint was taken",
                    id
                )));
            }
        }

        inner.delete_subtree_locked(id.as_str());
        Ok(())
    }

    async fn rename(
        &self,
        id: &ItemId,
        new_parent: Option<&ItemId>,
        new_name: &str,
        expected_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        if !self.supports_rename {
            return Err(ProviderError::Protocol(
                "provider does not support renames".to_string(),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get(id.as_str())
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;

        if let Some(expected) = expected_fingerprint {
            let current = inner.fingerprint_locked(node);
            if current != *expected {
                return Err(ProviderError::PreconditionFailed(format!(
                    "{} changed since fingerprint was taken",
                    id
                )));
            }
        }

        let parent_id = match new_parent {
            Some(p) => {
                if !inner.nodes.contains_key(p.as_str()) {
                    return Err(ProviderError::NotFound(p.to_string()));
                }
                Some(p.as_str().to_string())
            }
            None => None,
        };

        if let Some(taken) = inner.child_by_name_locked(parent_id.as_deref(), new_name) {
            if taken != id.as_str() {
                return Err(ProviderError::PreconditionFailed(format!(
                    "name '{}' already taken in target folder",
                    new_name
                )));
            }
        }

        inner.move_locked(id.as_str(), parent_id, new_name);
        Ok(inner.snapshot_locked(id.as_str()))
    }

    fn supports_rename(&self) -> bool {
        self.supports_rename
    }

    async fn poll_delta(&self, cursor: Option<&Cursor>) -> ProviderResult<DeltaPage> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let inner = self.inner.lock().unwrap();

        let records = match cursor {
            None => {
                // Initial sync: everything, folders before their children
                let mut ids: Vec<String> = inner.nodes.keys().cloned().collect();
                ids.sort_by_key(|id| {
                    let path = inner.path_of_locked(id);
                    (path.depth(), path.as_str().to_string())
                });
                ids.iter()
                    .map(|id| {
                        ChangeRecord::observed(ChangeKind::Created, inner.snapshot_locked(id))
                    })
                    .collect()
            }
            Some(cursor) => {
                let since: u64 = cursor
                    .as_str()
                    .parse()
                    .map_err(|_| ProviderError::Protocol(format!("bad cursor: {}", cursor)))?;
                if since < inner.log_floor {
                    return Err(ProviderError::CursorExpired);
                }
                inner
                    .log
                    .iter()
                    .filter(|(seq, _)| *seq >= since)
                    .map(|(_, entry)| match &entry.snapshot {
                        Some(snapshot) => ChangeRecord::observed(entry.kind, snapshot.clone()),
                        None => ChangeRecord::deleted(
                            ItemId::new(entry.item_id.clone()).expect("valid id"),
                        ),
                    })
                    .collect()
            }
        };

        Ok(DeltaPage {
            records,
            cursor: Cursor::new(inner.next_seq.to_string()).expect("non-empty"),
        })
    }

    async fn subscribe_changes(
        &self,
        folder: Option<&ItemId>,
    ) -> ProviderResult<SubscriptionHandle> {
        if let Some(err) = self.take_fault() {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.sub_counter += 1;
        Ok(SubscriptionHandle {
            id: format!("{}-sub-{}", self.label, inner.sub_counter),
            resource_hint: folder
                .map(|f| f.as_str().to_string())
                .unwrap_or_else(|| "root".to_string()),
            expires_at: Utc::now() + Duration::hours(24),
        })
    }
}

/// Validates the parent folder reference and its optional fingerprint guard
fn check_parent(
    inner: &Inner,
    parent: Option<&ItemId>,
    expected_fingerprint: Option<&Fingerprint>,
) -> Result<Option<String>, ProviderError> {
    match parent {
        Some(id) => {
            let node = inner
                .nodes
                .get(id.as_str())
                .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
            if !node.kind.is_folder() {
                return Err(ProviderError::Protocol(format!("{} is not a folder", id)));
            }
            if let Some(expected) = expected_fingerprint {
                let current = inner.fingerprint_locked(node);
                if current != *expected {
                    return Err(ProviderError::PreconditionFailed(format!(
                        "parent {} changed since fingerprint was taken",
                        id
                    )));
                }
            }
            Ok(Some(id.as_str().to_string()))
        }
        None => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_list() {
        let tree = MemoryTree::new("left");
        tree.put_file("/docs/a.txt", b"hello");

        let root = tree.list_children(None).await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].path.as_str(), "/docs");
        assert!(root[0].kind.is_folder());

        let docs = tree.list_children(Some(&root[0].id)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path.as_str(), "/docs/a.txt");
        assert_eq!(docs[0].size, 5);
    }

    #[tokio::test]
    async fn test_ranged_reads() {
        let tree = MemoryTree::new("left");
        let item = tree.put_file("/a.bin", b"0123456789");

        assert_eq!(tree.read_content(&item.id, 0, 4).await.unwrap(), b"0123");
        assert_eq!(tree.read_content(&item.id, 4, 4).await.unwrap(), b"4567");
        assert_eq!(tree.read_content(&item.id, 8, 100).await.unwrap(), b"89");
        assert!(tree.read_content(&item.id, 20, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_content_overwrite_keeps_id() {
        let tree = MemoryTree::new("left");
        let first = tree
            .write_content(None, "a.txt", b"v1", None)
            .await
            .unwrap();
        let second = tree
            .write_content(None, "a.txt", b"v2", None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.fingerprint, second.fingerprint);
        assert_eq!(tree.file_content("/a.txt").unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_parent_fingerprint_precondition() {
        let tree = MemoryTree::new("left");
        let folder_id = tree.mkdir_all("/docs").unwrap();
        let folder = tree.get_metadata(&folder_id).await.unwrap();
        let stale = folder.fingerprint.clone().unwrap();

        // Another child lands, bumping the folder revision
        tree.put_file("/docs/other.txt", b"x");

        let result = tree
            .write_content(Some(&folder_id), "a.txt", b"data", Some(&stale))
            .await;
        assert!(matches!(result, Err(ProviderError::PreconditionFailed(_))));

        // With the fresh fingerprint it goes through
        let fresh = tree
            .get_metadata(&folder_id)
            .await
            .unwrap()
            .fingerprint
            .unwrap();
        assert!(tree
            .write_content(Some(&folder_id), "a.txt", b"data", Some(&fresh))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_delete_with_fingerprint_guard() {
        let tree = MemoryTree::new("left");
        let item = tree.put_file("/a.txt", b"v1");
        let stale = item.fingerprint.clone().unwrap();

        tree.put_file("/a.txt", b"v2");

        let result = tree.delete(&item.id, Some(&stale)).await;
        assert!(matches!(result, Err(ProviderError::PreconditionFailed(_))));

        // Unguarded delete succeeds
        tree.delete(&item.id, None).await.unwrap();
        assert!(tree.item_at("/a.txt").is_none());
    }

    #[tokio::test]
    async fn test_delete_folder_removes_subtree() {
        let tree = MemoryTree::new("left");
        tree.put_file("/docs/sub/a.txt", b"a");
        tree.put_file("/docs/b.txt", b"b");
        let docs = tree.item_at("/docs").unwrap();

        tree.delete(&docs.id, None).await.unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn test_rename_keeps_id() {
        let tree = MemoryTree::new("left");
        let item = tree.put_file("/docs/a.txt", b"data");
        let docs = tree.item_at("/docs").unwrap();

        let renamed = tree
            .rename(&item.id, Some(&docs.id), "b.txt", None)
            .await
            .unwrap();
        assert_eq!(renamed.id, item.id);
        assert_eq!(renamed.path.as_str(), "/docs/b.txt");
        assert!(tree.item_at("/docs/a.txt").is_none());
    }

    #[tokio::test]
    async fn test_rename_unsupported() {
        let tree = MemoryTree::without_rename("left");
        let item = tree.put_file("/a.txt", b"data");
        assert!(!tree.supports_rename());
        assert!(tree.rename(&item.id, None, "b.txt", None).await.is_err());
    }

    #[tokio::test]
    async fn test_delta_initial_then_incremental() {
        let tree = MemoryTree::new("left");
        tree.put_file("/docs/a.txt", b"a");

        let initial = tree.poll_delta(None).await.unwrap();
        // Folder and file, folder first
        assert_eq!(initial.records.len(), 2);
        assert_eq!(
            initial.records[0].snapshot.as_ref().unwrap().path.as_str(),
            "/docs"
        );

        // No changes: empty page, same cursor value
        let idle = tree.poll_delta(Some(&initial.cursor)).await.unwrap();
        assert!(idle.records.is_empty());

        tree.put_file("/docs/b.txt", b"b");
        let page = tree.poll_delta(Some(&idle.cursor)).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].kind, ChangeKind::Created);
    }

    #[tokio::test]
    async fn test_delta_sees_deletions_children_first() {
        let tree = MemoryTree::new("left");
        tree.put_file("/docs/a.txt", b"a");
        let cursor = tree.poll_delta(None).await.unwrap().cursor;

        tree.remove("/docs");
        let page = tree.poll_delta(Some(&cursor)).await.unwrap();
        let kinds: Vec<ChangeKind> = page.records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Deleted, ChangeKind::Deleted]);
        // Child deletion logged before the parent folder's
        assert!(page.records[0].snapshot.is_none());
    }

    #[tokio::test]
    async fn test_cursor_expiry() {
        let tree = MemoryTree::new("left");
        tree.put_file("/a.txt", b"a");
        let old = tree.poll_delta(None).await.unwrap().cursor;

        tree.put_file("/b.txt", b"b");
        tree.expire_log();

        let result = tree.poll_delta(Some(&old)).await;
        assert!(matches!(result, Err(ProviderError::CursorExpired)));

        // A fresh full poll recovers
        let fresh = tree.poll_delta(None).await.unwrap();
        assert_eq!(fresh.records.len(), 2);
    }

    #[tokio::test]
    async fn test_upload_session_roundtrip() {
        let tree = MemoryTree::new("left");
        let session = tree.begin_upload(None, "big.bin", 10, None).await.unwrap();

        assert_eq!(tree.upload_part(&session, 0, b"01234").await.unwrap(), 5);
        // Re-sending an acknowledged part is idempotent
        assert_eq!(tree.upload_part(&session, 0, b"01234").await.unwrap(), 5);
        assert_eq!(tree.upload_part(&session, 5, b"56789").await.unwrap(), 10);

        let item = tree.finish_upload(session).await.unwrap();
        assert_eq!(item.size, 10);
        assert_eq!(tree.file_content("/big.bin").unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_upload_gap_rejected() {
        let tree = MemoryTree::new("left");
        let session = tree.begin_upload(None, "big.bin", 10, None).await.unwrap();
        assert!(tree.upload_part(&session, 5, b"56789").await.is_err());
    }

    #[tokio::test]
    async fn test_incomplete_upload_rejected() {
        let tree = MemoryTree::new("left");
        let session = tree.begin_upload(None, "big.bin", 10, None).await.unwrap();
        tree.upload_part(&session, 0, b"01234").await.unwrap();
        assert!(tree.finish_upload(session).await.is_err());
        assert!(tree.item_at("/big.bin").is_none());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let tree = MemoryTree::new("left");
        tree.put_file("/a.txt", b"a");
        tree.fail_next(ProviderError::Unavailable("injected".to_string()));

        assert!(tree.list_children(None).await.is_err());
        // The fault is consumed; the next call succeeds
        assert_eq!(tree.list_children(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_changes() {
        let tree = MemoryTree::new("left");
        let handle = tree.subscribe_changes(None).await.unwrap();
        assert_eq!(handle.resource_hint, "root");
        assert!(handle.expires_at > Utc::now());
    }
}
