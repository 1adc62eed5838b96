//! TwinSync Conflict - Deterministic conflict resolution
//!
//! Provides:
//! - The conflict taxonomy flagged by the diff planner
//! - A policy engine (default strategy + per-path glob rules)
//! - Deterministic conflict-copy naming
//! - The resolver that turns every flagged conflict into an unambiguous,
//!   ordered action sequence; nothing ambiguous ever reaches the executor

pub mod error;
pub mod namer;
pub mod policy;
pub mod resolver;

pub use error::ConflictError;
pub use policy::{ResolutionPolicy, Strategy};
pub use resolver::{ConflictKind, ConflictResolver, FlaggedConflict, ResolvedConflict};
