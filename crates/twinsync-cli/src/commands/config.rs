//! Config command - view and validate configuration

use anyhow::Result;
use clap::Subcommand;

use twinsync_core::config::Config;

use crate::output::{print_json, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, config: &Config, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                if format.is_json() {
                    print_json(&serde_json::to_value(config)?);
                } else {
                    print!("{}", serde_yaml::to_string(config)?);
                }
                Ok(())
            }
            ConfigCommand::Validate => {
                let errors = config.validate();
                if format.is_json() {
                    let items: Vec<serde_json::Value> = errors
                        .iter()
                        .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                        .collect();
                    print_json(&serde_json::json!({
                        "valid": errors.is_empty(),
                        "errors": items,
                    }));
                } else if errors.is_empty() {
                    println!("Configuration is valid.");
                } else {
                    for error in &errors {
                        println!("{error}");
                    }
                }
                if errors.is_empty() {
                    Ok(())
                } else {
                    anyhow::bail!("configuration is invalid ({} errors)", errors.len())
                }
            }
        }
    }
}
