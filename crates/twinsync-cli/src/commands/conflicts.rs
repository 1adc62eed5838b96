//! Conflicts command - list pairs awaiting resolution

use anyhow::{Context, Result};
use clap::Args;

use twinsync_core::config::Config;
use twinsync_core::ports::StateStore;

use crate::commands::open_store;
use crate::output::{format_time, print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct ConflictsCommand {}

impl ConflictsCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let store = open_store(config).await?;
        let conflicts = store
            .unresolved_conflicts()
            .await
            .context("loading conflicts")?;

        if format.is_json() {
            let items: Vec<serde_json::Value> = conflicts
                .iter()
                .map(|pair| {
                    serde_json::json!({
                        "path": pair.path().as_str(),
                        "left_id": pair.left_id().as_str(),
                        "right_id": pair.right_id().as_str(),
                        "last_synced_at": pair.last_synced_at().map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            print_json(&serde_json::json!({ "conflicts": items }));
            return Ok(());
        }

        if conflicts.is_empty() {
            println!("No outstanding conflicts.");
            return Ok(());
        }

        println!("{} conflict(s) awaiting resolution:", conflicts.len());
        for pair in &conflicts {
            println!(
                "  {}  (last synced {})",
                pair.path(),
                format_time(pair.last_synced_at())
            );
        }
        println!("\nThe next run retries resolution with the configured policy.");

        Ok(())
    }
}
