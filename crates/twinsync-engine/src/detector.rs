//! Change detection
//!
//! Produces, for one provider, the set of changes since the last run. The
//! normal path is an incremental `poll_delta` from the stored cursor; when
//! the provider declares the cursor expired, the detector falls back to a
//! full listing and synthesizes equivalent change records by diffing the
//! listing against the pair table.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use twinsync_core::domain::{ChangeRecord, Cursor, Side};
use twinsync_core::ports::remote_tree::{ProviderError, RemoteTree};
use twinsync_core::ports::StateStore;

/// Result of one detection pass
#[derive(Debug)]
pub struct Detection {
    /// Changes observed since the last stored cursor
    pub records: Vec<ChangeRecord>,
    /// Cursor to store once this batch has been fully processed
    pub cursor: Cursor,
    /// True when the cursor had expired and a full rescan was performed
    pub rescanned: bool,
}

/// Detects changes on one provider
pub struct ChangeDetector {
    side: Side,
    adapter: Arc<dyn RemoteTree>,
    store: Arc<dyn StateStore>,
}

impl ChangeDetector {
    /// Creates a detector for one provider side
    pub fn new(side: Side, adapter: Arc<dyn RemoteTree>, store: Arc<dyn StateStore>) -> Self {
        Self {
            side,
            adapter,
            store,
        }
    }

    /// Runs one detection pass
    ///
    /// The returned cursor is *not* persisted here: the caller stores it
    /// only after the batch fed a completed planning/execution pass, so an
    /// aborted run re-polls the same window (duplicates are harmless, the
    /// planner treats echoes as unchanged).
    pub async fn detect(&self) -> Result<Detection> {
        let cursor = self
            .store
            .cursor(self.side)
            .await
            .context("loading delta cursor")?;

        match self.adapter.poll_delta(cursor.as_ref()).await {
            Ok(page) => {
                debug!(
                    side = %self.side,
                    records = page.records.len(),
                    incremental = cursor.is_some(),
                    "Delta poll returned"
                );
                Ok(Detection {
                    records: page.records,
                    cursor: page.cursor,
                    rescanned: false,
                })
            }
            Err(ProviderError::CursorExpired) => {
                warn!(side = %self.side, "Delta cursor expired, falling back to full rescan");
                self.store
                    .clear_cursor(self.side)
                    .await
                    .context("clearing expired cursor")?;
                self.full_rescan().await
            }
            Err(e) => Err(e).context("delta poll failed"),
        }
    }

    /// Rebuilds the change set from a full listing
    ///
    /// A fresh unscoped poll reports every live item; pairs whose item no
    /// longer appears get a synthesized deletion record. The result is
    /// equivalent to what an unexpired incremental poll would have shown.
    async fn full_rescan(&self) -> Result<Detection> {
        let page = self
            .adapter
            .poll_delta(None)
            .await
            .context("full listing after cursor expiry")?;

        let seen: HashSet<String> = page
            .records
            .iter()
            .map(|r| r.item_id.as_str().to_string())
            .collect();

        let mut records = page.records;
        let mut synthesized = 0usize;
        for pair in self.store.all_pairs().await.context("loading pair table")? {
            if pair.is_tombstoned() {
                continue;
            }
            let id = pair.id_on(self.side);
            if !seen.contains(id.as_str()) {
                records.push(ChangeRecord::deleted(id.clone()));
                synthesized += 1;
            }
        }

        info!(
            side = %self.side,
            listed = seen.len(),
            deletions = synthesized,
            "Full rescan complete"
        );

        Ok(Detection {
            records,
            cursor: page.cursor,
            rescanned: true,
        })
    }
}
