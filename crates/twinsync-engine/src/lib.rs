//! TwinSync Engine - The reconciliation pipeline
//!
//! One sync run is one pass through:
//!
//! ```text
//! ChangeDetector ──► Planner ──► ConflictResolver ──► ExecutionEngine ──► StateStore
//!      (×2)            │               │                    │
//!   poll deltas     diff vs        policy turns         worker pools,
//!   or rescan       pair table     every conflict       chunked transfer,
//!                                  into actions         retry + backoff
//! ```
//!
//! The [`SyncOrchestrator`] wires the stages together and records each run.
//! Webhook change notifications land in the [`NotificationQueue`] and are
//! folded into the *next* run rather than interrupting the current one, so
//! every plan is built against a settled view of state.

pub mod backoff;
pub mod detector;
pub mod executor;
pub mod notifications;
pub mod orchestrator;
pub mod planner;
pub mod transfer;

pub use detector::ChangeDetector;
pub use executor::{ExecutionEngine, ExecutionReport};
pub use notifications::NotificationQueue;
pub use orchestrator::SyncOrchestrator;
pub use planner::{Plan, PlannedAction, Planner, WorkUnit};
