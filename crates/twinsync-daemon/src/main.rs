//! TwinSync Daemon - Background synchronization service
//!
//! `twinsyncd` keeps the two configured provider trees consistent:
//! - Scheduled bidirectional runs on the configured interval
//! - An HTTP listener for inbound change notifications, which pull the
//!   next run forward instead of waiting out the interval
//! - Graceful shutdown on SIGTERM/SIGINT: the current run's in-flight
//!   actions reach a terminal state before the process exits
//!
//! # Architecture
//!
//! The daemon wires the state store, the two provider adapters, and the
//! engine's orchestrator, then enters a loop driven by a timer, the
//! notification queue, and a `CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use twinsync_core::config::Config;
use twinsync_core::domain::RunDirection;
use twinsync_engine::SyncOrchestrator;
use twinsync_state::{DatabasePool, SqliteStateStore};

use twinsync_daemon::providers::build_provider;
use twinsync_daemon::webhook::WebhookServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    info!(config_path = %config_path.display(), "Loaded configuration");

    let validation_errors = config.validate();
    if !validation_errors.is_empty() {
        for err in &validation_errors {
            error!(field = %err.field, "{}", err.message);
        }
        anyhow::bail!("configuration is invalid ({} errors)", validation_errors.len());
    }

    // Shutdown plumbing: first signal cancels, second aborts
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // State store
    let pool = DatabasePool::new(&config.state.database)
        .await
        .context("opening state database")?;
    let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));

    // Provider adapters
    let left = build_provider(&config.providers.left).context("building left provider")?;
    let right = build_provider(&config.providers.right).context("building right provider")?;
    info!(
        left = %config.providers.left.kind,
        right = %config.providers.right.kind,
        "Provider adapters ready"
    );

    // Engine
    let orchestrator = Arc::new(SyncOrchestrator::new(
        left,
        right,
        store,
        &config,
        shutdown.clone(),
    ));
    let queue = orchestrator.notifications();

    // Change-notification listener
    let webhook = WebhookServer::new(Arc::clone(&queue), &config.daemon.webhook_listen)
        .context("binding webhook listener")?;
    let webhook_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = webhook.run(webhook_shutdown, None).await {
            error!(error = format!("{e:#}"), "Webhook listener exited");
        }
    });

    // Main loop: run on the interval, or earlier when a signal arrives
    let mut interval = tokio::time::interval(Duration::from_secs(config.daemon.run_interval));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_secs = config.daemon.run_interval,
        "Entering sync loop"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested");
                break;
            }
            _ = interval.tick() => {
                run_once(&orchestrator, &shutdown).await;
            }
            _ = queue.wait() => {
                info!("Change notification received, pulling run forward");
                run_once(&orchestrator, &shutdown).await;
                interval.reset();
            }
        }
    }

    info!("Daemon stopped");
    Ok(())
}

/// Runs one bidirectional pass, logging but never propagating failures
async fn run_once(orchestrator: &Arc<SyncOrchestrator>, shutdown: &CancellationToken) {
    if shutdown.is_cancelled() {
        return;
    }
    match orchestrator.run_sync(RunDirection::Bidirectional, None).await {
        Ok(run) => {
            if !run.errors().is_empty() {
                warn!(
                    run = %run.id(),
                    failed = run.actions_failed(),
                    "Run finished with failed actions"
                );
            }
        }
        Err(e) => error!(error = format!("{e:#}"), "Sync run could not be started"),
    }
}

/// Cancels the token on SIGINT/SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("installing SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Ctrl-C received");
        }

        shutdown.cancel();
    });
}
