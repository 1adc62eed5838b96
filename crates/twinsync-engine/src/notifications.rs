//! Queued change notifications
//!
//! Webhook-delivered signals may arrive while a run is in progress. They
//! are queued here and folded into the *next* run's change detection input
//! instead of interrupting the current one, preserving the single-writer
//! discipline over the state store.
//!
//! Duplicate and spurious signals are harmless: a signal only means "poll
//! that provider soon", and polling an unchanged provider plans nothing.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use twinsync_core::domain::Side;
use twinsync_core::ports::ChangeSignal;

/// Upper bound on retained signals; beyond this, duplicates add nothing
const QUEUE_CAP: usize = 64;

/// Thread-safe queue of pending change signals
pub struct NotificationQueue {
    signals: Mutex<VecDeque<ChangeSignal>>,
    notify: Notify,
}

impl NotificationQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self {
            signals: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueues a signal and wakes any waiter
    ///
    /// A side with a signal already pending absorbs further ones: one poll
    /// covers any number of notifications.
    pub fn push(&self, signal: ChangeSignal) {
        {
            let mut signals = self.signals.lock().unwrap();
            let already_pending = signals.iter().any(|s| s.side == signal.side);
            if already_pending || signals.len() >= QUEUE_CAP {
                debug!(side = %signal.side, "Change signal coalesced");
            } else {
                signals.push_back(signal);
            }
        }
        self.notify.notify_one();
    }

    /// Drains all pending signals
    pub fn drain(&self) -> Vec<ChangeSignal> {
        self.signals.lock().unwrap().drain(..).collect()
    }

    /// Returns true when at least one signal is pending
    pub fn has_pending(&self) -> bool {
        !self.signals.lock().unwrap().is_empty()
    }

    /// Returns true when a signal for `side` is pending
    pub fn has_pending_for(&self, side: Side) -> bool {
        self.signals.lock().unwrap().iter().any(|s| s.side == side)
    }

    /// Waits until a signal arrives (or returns immediately if one is queued)
    pub async fn wait(&self) {
        if self.has_pending() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}
