//! Domain error types
//!
//! Errors raised by domain constructors and state transitions. Adapter and
//! storage failures have their own types in the adapter crates.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid tree path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid provider item identifier
    #[error("Invalid item identifier: {0}")]
    InvalidItemId(String),

    /// Invalid fingerprint token
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Invalid delta cursor
    #[error("Invalid delta cursor: {0}")]
    InvalidCursor(String),

    /// Invalid provider side name
    #[error("Invalid side (expected 'left' or 'right'): {0}")]
    InvalidSide(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}
