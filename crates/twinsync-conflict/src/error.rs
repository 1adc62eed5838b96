//! Conflict resolution error types

use thiserror::Error;

/// Errors raised while building policies or resolving conflicts
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A configured glob pattern or strategy is invalid
    #[error("Invalid conflict rule '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// The flagged conflict is internally inconsistent
    #[error("Malformed conflict for {path}: {reason}")]
    MalformedConflict {
        /// Logical path of the conflict
        path: String,
        /// Why it cannot be resolved
        reason: String,
    },

    /// A path operation failed while building resolution actions
    #[error("Path error: {0}")]
    Path(#[from] twinsync_core::domain::DomainError),
}
