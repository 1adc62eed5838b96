//! Remote tree port (driven/secondary port)
//!
//! This module defines the capability interface over one remote storage
//! provider: item listing, metadata, ranged content reads, resumable
//! writes, deletes, renames, and change detection. Both the left and the
//! right provider are driven through the same trait; each concrete adapter
//! is a leaf implementation with no shared base state.
//!
//! ## Design Notes
//!
//! - Errors use the typed [`ProviderError`] taxonomy rather than `anyhow`:
//!   the engine dispatches on the error class (retry transient failures,
//!   re-plan precondition failures, rescan on expired cursors), so the
//!   classification must survive the port boundary.
//! - Content moves in explicit byte windows (`read_content` with an offset
//!   and length, upload sessions with acknowledged offsets) so transfers
//!   can resume mid-file after an interruption.
//! - `poll_delta` and `subscribe_changes` are the two change-detection
//!   primitives; push notifications are at-least-once, possibly duplicated,
//!   possibly reordered, and only ever treated as a hint to poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::change::ChangeRecord;
use crate::domain::item::RemoteItem;
use crate::domain::newtypes::{Cursor, Fingerprint, ItemId};

// ============================================================================
// ProviderError
// ============================================================================

/// Error taxonomy shared by every provider adapter
///
/// The engine's handling is keyed entirely off the variant:
///
/// | Variant              | Engine reaction                                |
/// |----------------------|------------------------------------------------|
/// | `Unavailable`        | retry with exponential backoff and jitter      |
/// | `QuotaExceeded`      | retry with a longer backoff floor              |
/// | `PreconditionFailed` | discard the action, re-plan on the next pass   |
/// | `NotFound`           | drop and re-plan from scratch                  |
/// | `CursorExpired`      | full rescan of the affected subtree            |
/// | `PermissionDenied`   | surface as a permanently failed action         |
/// | `Protocol`           | surface as a permanently failed action         |
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transient network/auth failure; the operation may succeed if retried
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// The item (or folder) does not exist under that identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// An optimistic-concurrency guard did not hold
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The provider can no longer compute a delta from the given cursor
    #[error("Delta cursor expired")]
    CursorExpired,

    /// The provider rejected the request for lack of quota
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The credentials lack permission for this operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The adapter could not interpret the provider's response
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ProviderError {
    /// Returns true for errors worth retrying with backoff
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::QuotaExceeded(_)
        )
    }

    /// Returns true for errors that must never be retried blindly
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::PermissionDenied(_) | ProviderError::Protocol(_)
        )
    }
}

/// Shorthand result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

// ============================================================================
// Delta and subscription DTOs
// ============================================================================

/// One page of change records plus the cursor for the next poll
#[derive(Debug, Clone)]
pub struct DeltaPage {
    /// Items changed since the supplied cursor (all items on a fresh poll)
    pub records: Vec<ChangeRecord>,
    /// Cursor to supply on the next `poll_delta` call
    pub cursor: Cursor,
}

/// Handle returned by `subscribe_changes`
///
/// Recorded so subscriptions can be renewed before `expires_at`; the
/// notifications themselves arrive out-of-band through the inbound
/// change-signal interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    /// Provider-assigned subscription identifier
    pub id: String,
    /// Opaque hint describing the watched resource
    pub resource_hint: String,
    /// When the provider will stop delivering notifications
    pub expires_at: DateTime<Utc>,
}

/// In-flight resumable upload
///
/// Obtained from `begin_upload`; parts are appended in offset order and the
/// item materializes only on `finish_upload`.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Provider-assigned session identifier
    pub id: String,
    /// Target parent folder
    pub parent_id: Option<ItemId>,
    /// Target item name
    pub name: String,
    /// Declared total size in bytes
    pub total_size: u64,
}

// ============================================================================
// RemoteTree trait
// ============================================================================

/// Port trait for one remote storage provider
///
/// Identical capability set for both providers, parameterized only by which
/// adapter instance is wired in. Implementations map provider-specific API
/// responses into the [`ProviderError`] taxonomy and must not retry
/// internally; retry policy belongs to the execution engine.
#[async_trait::async_trait]
pub trait RemoteTree: Send + Sync {
    /// Lists the direct children of a folder (None = tree root)
    ///
    /// # Errors
    /// `Unavailable` on transient failures, `NotFound` if the folder was
    /// deleted.
    async fn list_children(&self, folder: Option<&ItemId>) -> ProviderResult<Vec<RemoteItem>>;

    /// Fetches current metadata for one item
    ///
    /// # Errors
    /// `NotFound` if the identifier no longer resolves.
    async fn get_metadata(&self, id: &ItemId) -> ProviderResult<RemoteItem>;

    /// Reads `len` bytes of content starting at `offset`
    ///
    /// Short reads are allowed at end-of-file; an empty result means the
    /// offset is at or past the end.
    async fn read_content(&self, id: &ItemId, offset: u64, len: u64) -> ProviderResult<Vec<u8>>;

    /// Writes a complete item in one request (small content)
    ///
    /// If `expected_parent_fingerprint` is supplied and the parent folder's
    /// fingerprint no longer matches, fails with `PreconditionFailed`.
    async fn write_content(
        &self,
        parent: Option<&ItemId>,
        name: &str,
        data: &[u8],
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem>;

    /// Creates a folder under `parent`
    async fn create_folder(
        &self,
        parent: Option<&ItemId>,
        name: &str,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem>;

    /// Opens a resumable upload session for large content
    async fn begin_upload(
        &self,
        parent: Option<&ItemId>,
        name: &str,
        total_size: u64,
        expected_parent_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<UploadSession>;

    /// Appends one part at `offset`; returns the acknowledged end offset
    ///
    /// The acknowledged offset is the resume point after an interruption:
    /// a part re-sent at an already-acknowledged offset is idempotent.
    async fn upload_part(
        &self,
        session: &UploadSession,
        offset: u64,
        data: &[u8],
    ) -> ProviderResult<u64>;

    /// Completes the session, materializing the item
    async fn finish_upload(&self, session: UploadSession) -> ProviderResult<RemoteItem>;

    /// Deletes an item
    ///
    /// If `expected_fingerprint` is supplied and the item changed since the
    /// fingerprint was captured, fails with `PreconditionFailed` instead of
    /// deleting a concurrently modified item.
    async fn delete(
        &self,
        id: &ItemId,
        expected_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<()>;

    /// Moves/renames an item while keeping its identifier stable
    ///
    /// Only called when [`supports_rename`](RemoteTree::supports_rename)
    /// returns true; the planner degrades to delete+create otherwise.
    async fn rename(
        &self,
        id: &ItemId,
        new_parent: Option<&ItemId>,
        new_name: &str,
        expected_fingerprint: Option<&Fingerprint>,
    ) -> ProviderResult<RemoteItem>;

    /// Whether this provider supports identifier-stable moves
    fn supports_rename(&self) -> bool;

    /// Polls for changes since `cursor` (None = everything, initial sync)
    ///
    /// # Errors
    /// `CursorExpired` when the provider can no longer compute a delta from
    /// that cursor; the caller must fall back to a full listing.
    async fn poll_delta(&self, cursor: Option<&Cursor>) -> ProviderResult<DeltaPage>;

    /// Registers for out-of-band change notifications on a folder
    ///
    /// Delivery is at-least-once, possibly duplicated, possibly reordered;
    /// the only guarantee is eventual delivery of *a* notification after a
    /// change.
    async fn subscribe_changes(
        &self,
        folder: Option<&ItemId>,
    ) -> ProviderResult<SubscriptionHandle>;
}
