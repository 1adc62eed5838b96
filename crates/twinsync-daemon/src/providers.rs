//! Provider adapter registry
//!
//! Maps a configured adapter kind to a concrete `RemoteTree`
//! implementation. Concrete HTTP adapters for real storage services are
//! external collaborators; the in-tree `memory` kind serves local
//! development and end-to-end testing of the engine.

use std::sync::Arc;

use anyhow::bail;

use twinsync_core::config::ProviderConfig;
use twinsync_core::ports::remote_tree::RemoteTree;
use twinsync_memory::MemoryTree;

/// Builds the adapter for one configured provider
pub fn build_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn RemoteTree>> {
    match config.kind.as_str() {
        "memory" => Ok(Arc::new(MemoryTree::new(config.label.clone()))),
        other => bail!(
            "unknown provider kind '{other}'; only 'memory' ships in-tree, \
             external adapters must be wired by the embedding application"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kind() {
        let config = ProviderConfig {
            kind: "memory".to_string(),
            label: "left".to_string(),
        };
        assert!(build_provider(&config).is_ok());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let config = ProviderConfig {
            kind: "gopher".to_string(),
            label: String::new(),
        };
        assert!(build_provider(&config).is_err());
    }
}
