//! Pairs command - inspect the pair table

use anyhow::{Context, Result};
use clap::Args;

use twinsync_core::config::Config;
use twinsync_core::domain::TreePath;
use twinsync_core::ports::StateStore;

use crate::commands::open_store;
use crate::output::{format_time, print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct PairsCommand {
    /// Include tombstoned pairs
    #[arg(long)]
    pub all: bool,

    /// Only pairs under this subtree
    #[arg(long)]
    pub under: Option<String>,
}

impl PairsCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let store = open_store(config).await?;

        let pairs = match &self.under {
            Some(scope) => {
                let scope = TreePath::new(scope.clone()).context("invalid --under path")?;
                store.pairs_under(&scope).await.context("loading pairs")?
            }
            None => store
                .all_pairs()
                .await
                .context("loading pairs")?
                .into_iter()
                .filter(|p| self.all || !p.is_tombstoned())
                .collect(),
        };

        if format.is_json() {
            let items: Vec<serde_json::Value> = pairs
                .iter()
                .map(|pair| {
                    serde_json::json!({
                        "path": pair.path().as_str(),
                        "kind": pair.kind().to_string(),
                        "status": pair.status().name(),
                        "left_id": pair.left_id().as_str(),
                        "right_id": pair.right_id().as_str(),
                        "last_synced_at": pair.last_synced_at().map(|t| t.to_rfc3339()),
                    })
                })
                .collect();
            print_json(&serde_json::json!({ "pairs": items }));
            return Ok(());
        }

        if pairs.is_empty() {
            println!("No pairs recorded.");
            return Ok(());
        }

        for pair in &pairs {
            println!(
                "{:<11} {:<6} {}  (last synced {})",
                pair.status().name(),
                pair.kind().to_string(),
                pair.path(),
                format_time(pair.last_synced_at())
            );
        }
        println!("\n{} pair(s)", pairs.len());

        Ok(())
    }
}
