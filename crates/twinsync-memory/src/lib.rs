//! TwinSync Memory - In-memory remote tree adapter
//!
//! A complete [`RemoteTree`] implementation over an in-process tree,
//! used by the engine's integration tests and by local development wiring.
//! It behaves like a small but honest provider:
//!
//! - SHA-256 content fingerprints; folders carry a revision fingerprint
//!   that bumps whenever a direct child is added, removed, or renamed
//! - A monotonically-indexed change log backing `poll_delta` cursors, with
//!   configurable truncation so `CursorExpired` paths can be exercised
//! - Resumable upload sessions with acknowledged offsets
//! - Toggleable rename capability (to exercise the delete+create fallback)
//! - Fault injection: queue a `ProviderError` to fail the next call
//!
//! External mutation helpers (`put_file`, `mkdir_all`, `remove`,
//! `move_item`) simulate edits made behind the engine's back; they go
//! through the same internals, so the change log sees them.

mod tree;

pub use tree::MemoryTree;
