//! Run command - trigger one synchronization pass

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use twinsync_core::config::Config;
use twinsync_core::domain::{RunDirection, RunStatus, TreePath};
use twinsync_daemon::providers::build_provider;
use twinsync_engine::SyncOrchestrator;

use crate::commands::open_store;
use crate::output::{print_json, OutputFormat};

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Direction: both, push (left to right), or pull (right to left)
    #[arg(long, default_value = "both")]
    pub direction: String,

    /// Restrict the run to one subtree, e.g. /Documents
    #[arg(long)]
    pub scope: Option<String>,
}

impl RunCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        let direction: RunDirection = self
            .direction
            .parse()
            .context("invalid --direction (expected both, push, or pull)")?;
        let scope = self
            .scope
            .as_ref()
            .map(|s| TreePath::new(s.clone()))
            .transpose()
            .context("invalid --scope path")?;

        let store = open_store(config).await?;
        let left = build_provider(&config.providers.left).context("building left provider")?;
        let right = build_provider(&config.providers.right).context("building right provider")?;

        let orchestrator = Arc::new(SyncOrchestrator::new(
            left,
            right,
            store,
            config,
            CancellationToken::new(),
        ));

        let run = orchestrator.run_sync(direction, scope).await?;

        if format.is_json() {
            print_json(&serde_json::json!({
                "run_id": run.id().to_string(),
                "status": run.status().name(),
                "committed": run.actions_committed(),
                "failed": run.actions_failed(),
                "conflicts_resolved": run.conflicts_resolved(),
                "bytes_transferred": run.bytes_transferred(),
                "errors": run.errors(),
            }));
        } else {
            println!("Run {} finished: {}", run.id(), run.status().name());
            println!(
                "  committed {}, failed {}, conflicts resolved {}, {} bytes moved",
                run.actions_committed(),
                run.actions_failed(),
                run.conflicts_resolved(),
                run.bytes_transferred()
            );
            for error in run.errors() {
                println!("  failed: {error}");
            }
        }

        if matches!(run.status(), RunStatus::Failed(_)) {
            anyhow::bail!("run failed");
        }
        Ok(())
    }
}
