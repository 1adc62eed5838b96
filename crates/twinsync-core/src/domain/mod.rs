//! Domain entities and value objects
//!
//! Pure reconciliation logic with no I/O. Everything the planner, resolver,
//! and executor exchange is defined here.

pub mod action;
pub mod change;
pub mod errors;
pub mod item;
pub mod newtypes;
pub mod pair;
pub mod run;

pub use action::{Action, ActionState, Direction, Operation, Preconditions};
pub use change::{ChangeKind, ChangeRecord};
pub use errors::DomainError;
pub use item::{ItemKind, RemoteItem};
pub use newtypes::{Cursor, Fingerprint, ItemId, RunId, Side, TreePath};
pub use pair::{PairStatus, SyncPair};
pub use run::{RunDirection, RunStatus, SyncRun};
