//! Inbound change signals
//!
//! Payload of the change-notification interface: an externally triggered
//! hint that a provider's tree changed. Its only contract obligation is
//! "cause a change-detection pass for that provider soon"; duplicate and
//! spurious signals are tolerated by design of the detection pipeline, not
//! filtered here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::Side;

/// One inbound change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSignal {
    /// Which provider the signal concerns
    pub side: Side,
    /// Opaque resource hint forwarded from the provider, if any
    pub resource_hint: Option<String>,
    /// When the signal was received
    pub received_at: DateTime<Utc>,
}

impl ChangeSignal {
    /// Creates a signal received now
    #[must_use]
    pub fn new(side: Side, resource_hint: Option<String>) -> Self {
        Self {
            side,
            resource_hint,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_signal() {
        let signal = ChangeSignal::new(Side::Left, Some("folder-7".to_string()));
        assert_eq!(signal.side, Side::Left);
        assert_eq!(signal.resource_hint.as_deref(), Some("folder-7"));
    }
}
