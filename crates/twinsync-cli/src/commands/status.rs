//! Status command - last run and pair table summary

use std::collections::HashMap;

use anyhow::{Context, Result};
use clap::Args;

use twinsync_core::config::Config;
use twinsync_core::ports::StateStore;

use crate::commands::open_store;
use crate::output::{format_time, print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let store = open_store(config).await?;

        let latest = store.latest_run().await.context("loading run history")?;
        let last_activity = store.last_activity().await.context("loading activity stamp")?;
        let pairs = store.all_pairs().await.context("loading pair table")?;
        let conflicts = store
            .unresolved_conflicts()
            .await
            .context("loading conflicts")?;

        let mut by_status: HashMap<&'static str, u64> = HashMap::new();
        for pair in &pairs {
            *by_status.entry(pair.status().name()).or_insert(0) += 1;
        }

        if format.is_json() {
            let latest_json = latest.as_ref().map(|run| {
                serde_json::json!({
                    "run_id": run.id().to_string(),
                    "direction": run.direction().to_string(),
                    "status": run.status().name(),
                    "started_at": run.started_at().to_rfc3339(),
                    "completed_at": run.completed_at().map(|t| t.to_rfc3339()),
                    "committed": run.actions_committed(),
                    "failed": run.actions_failed(),
                })
            });
            print_json(&serde_json::json!({
                "last_run": latest_json,
                "last_activity": last_activity.map(|t| t.to_rfc3339()),
                "pairs_by_status": by_status,
                "unresolved_conflicts": conflicts.len(),
            }));
            return Ok(());
        }

        match &latest {
            Some(run) => {
                println!(
                    "Last run:      {} ({}) started {}",
                    run.id(),
                    run.status().name(),
                    format_time(Some(run.started_at()))
                );
                println!(
                    "               committed {}, failed {}",
                    run.actions_committed(),
                    run.actions_failed()
                );
            }
            None => println!("Last run:      never"),
        }
        println!("Last activity: {}", format_time(last_activity));

        println!("Pairs:");
        for status in ["synced", "pending", "conflicted", "tombstoned"] {
            let count = by_status.get(status).copied().unwrap_or(0);
            println!("  {status:<12} {count}");
        }

        if !conflicts.is_empty() {
            println!(
                "\n{} unresolved conflict(s); see 'twinsync conflicts'",
                conflicts.len()
            );
        }

        Ok(())
    }
}
