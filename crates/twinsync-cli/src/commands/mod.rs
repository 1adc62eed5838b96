//! CLI command implementations

pub mod config;
pub mod conflicts;
pub mod pairs;
pub mod run;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use twinsync_core::config::Config;
use twinsync_state::{DatabasePool, SqliteStateStore};

/// Opens the state store configured in `config`
pub(crate) async fn open_store(config: &Config) -> Result<Arc<SqliteStateStore>> {
    let pool = DatabasePool::new(&config.state.database)
        .await
        .context("opening state database")?;
    Ok(Arc::new(SqliteStateStore::new(pool.pool().clone())))
}
