//! Chunked content transfer
//!
//! Moves file content between providers in bounded windows. Small files go
//! through the single-shot write; larger ones use a resumable upload
//! session whose acknowledged offset is the resume point, so an
//! interrupted transfer continues from the last confirmed window instead
//! of restarting.
//!
//! A transfer only reports success after an integrity check: the written
//! size must match the source, and the source item must still carry the
//! fingerprint the plan was built against. A source that changed mid-copy
//! fails the action with `PreconditionFailed` so the next pass re-plans it
//! against fresh state.

use tracing::{debug, trace};

use twinsync_core::domain::{Fingerprint, ItemId, ItemKind, RemoteItem};
use twinsync_core::ports::remote_tree::{ProviderError, ProviderResult, RemoteTree};

/// Windowed copy configuration
#[derive(Debug, Clone, Copy)]
pub struct ChunkedTransfer {
    /// Size of each read/upload window in bytes
    pub chunk_size: u64,
    /// Files at or below this size use the single-shot write
    pub large_threshold: u64,
}

impl ChunkedTransfer {
    /// Copies one file from `source` to `target` under `parent`/`name`
    ///
    /// Returns the created/updated target item and the number of content
    /// bytes moved.
    pub async fn copy_file(
        &self,
        source: &dyn RemoteTree,
        target: &dyn RemoteTree,
        item: &RemoteItem,
        parent: Option<&ItemId>,
        name: &str,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<(RemoteItem, u64)> {
        if item.kind == ItemKind::Folder {
            return Err(ProviderError::Protocol(format!(
                "cannot transfer folder {} as content",
                item.path
            )));
        }

        let written = if item.size <= self.large_threshold {
            self.copy_small(source, target, item, parent, name, expected_parent_fingerprint)
                .await?
        } else {
            self.copy_sessioned(source, target, item, parent, name, expected_parent_fingerprint)
                .await?
        };

        // Integrity: the bytes we moved must match the source size, and the
        // source must not have changed underneath the copy.
        if written.size != item.size {
            return Err(ProviderError::Protocol(format!(
                "transfer size mismatch for {}: wrote {} bytes, source reported {}",
                item.path, written.size, item.size
            )));
        }
        let current = source.get_metadata(&item.id).await?;
        if current.fingerprint != item.fingerprint {
            return Err(ProviderError::PreconditionFailed(format!(
                "source {} changed during transfer",
                item.path
            )));
        }

        Ok((written, item.size))
    }

    /// Single-shot path for small content
    async fn copy_small(
        &self,
        source: &dyn RemoteTree,
        target: &dyn RemoteTree,
        item: &RemoteItem,
        parent: Option<&ItemId>,
        name: &str,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem> {
        let mut data = Vec::with_capacity(item.size as usize);
        let mut offset = 0u64;
        loop {
            let chunk = source
                .read_content(&item.id, offset, self.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }
            offset += chunk.len() as u64;
            data.extend_from_slice(&chunk);
            if offset >= item.size {
                break;
            }
        }

        trace!(path = %item.path, bytes = data.len(), "Single-shot write");
        target
            .write_content(parent, name, &data, expected_parent_fingerprint)
            .await
    }

    /// Resumable session path for large content
    async fn copy_sessioned(
        &self,
        source: &dyn RemoteTree,
        target: &dyn RemoteTree,
        item: &RemoteItem,
        parent: Option<&ItemId>,
        name: &str,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem> {
        let session = target
            .begin_upload(parent, name, item.size, expected_parent_fingerprint)
            .await?;

        debug!(
            path = %item.path,
            size = item.size,
            chunk = self.chunk_size,
            "Resumable upload session opened"
        );

        let mut offset = 0u64;
        while offset < item.size {
            let window = self.chunk_size.min(item.size - offset);
            let chunk = source.read_content(&item.id, offset, window).await?;
            if chunk.is_empty() {
                return Err(ProviderError::Protocol(format!(
                    "source {} ended early at offset {}",
                    item.path, offset
                )));
            }
            // The acknowledged offset is authoritative: a re-sent window
            // after a lost acknowledgement resumes from wherever the
            // provider actually got to.
            offset = target.upload_part(&session, offset, &chunk).await?;
        }

        target.finish_upload(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twinsync_memory::MemoryTree;

    fn transfer() -> ChunkedTransfer {
        ChunkedTransfer {
            chunk_size: 4,
            large_threshold: 8,
        }
    }

    #[tokio::test]
    async fn test_small_file_single_shot() {
        let source = MemoryTree::new("left");
        let target = MemoryTree::new("right");
        let item = source.put_file("/a.txt", b"hello");

        let (written, bytes) = transfer()
            .copy_file(&source, &target, &item, None, "a.txt", None)
            .await
            .unwrap();

        assert_eq!(bytes, 5);
        assert_eq!(written.size, 5);
        assert_eq!(target.file_content("/a.txt").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_large_file_chunked() {
        let source = MemoryTree::new("left");
        let target = MemoryTree::new("right");
        let item = source.put_file("/big.bin", b"0123456789abcdef");

        let (written, bytes) = transfer()
            .copy_file(&source, &target, &item, None, "big.bin", None)
            .await
            .unwrap();

        assert_eq!(bytes, 16);
        assert_eq!(written.size, 16);
        assert_eq!(target.file_content("/big.bin").unwrap(), b"0123456789abcdef");
    }

    #[tokio::test]
    async fn test_source_changed_mid_transfer_fails() {
        let source = MemoryTree::new("left");
        let target = MemoryTree::new("right");
        let item = source.put_file("/a.txt", b"hello");

        // Change the source after the snapshot was taken
        source.put_file("/a.txt", b"HELLO THERE");

        let result = transfer()
            .copy_file(&source, &target, &item, None, "a.txt", None)
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::Protocol(_)) | Err(ProviderError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_folder_rejected() {
        let source = MemoryTree::new("left");
        let target = MemoryTree::new("right");
        source.mkdir_all("/docs");
        let folder = source.item_at("/docs").unwrap();

        let result = transfer()
            .copy_file(&source, &target, &folder, None, "docs", None)
            .await;
        assert!(matches!(result, Err(ProviderError::Protocol(_))));
    }
}
