//! Configuration module for TwinSync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for TwinSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub conflicts: ConflictsConfig,
    pub state: StateConfig,
    pub daemon: DaemonConfig,
    pub providers: ProvidersConfig,
    pub logging: LoggingConfig,
}

/// Reconciliation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent actions per provider (worker pool size).
    pub workers_per_provider: usize,
    /// Provider requests per second (rate-limit pacing), per provider.
    pub requests_per_second: u32,
    /// Files above this size (in MiB) transfer through resumable sessions.
    pub large_file_threshold_mb: u64,
    /// Size of each transfer window (in MiB).
    pub chunk_size_mb: u64,
    /// Maximum retry attempts for transient provider errors.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub backoff_base_ms: u64,
    /// Cap on a single backoff delay (in milliseconds).
    pub backoff_max_ms: u64,
    /// Extra backoff floor applied after quota errors (in milliseconds).
    pub quota_backoff_floor_ms: u64,
}

/// Conflict resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    /// Default strategy: `newest_wins`, `left_wins`, or `right_wins`.
    pub default_strategy: String,
    /// Side that wins a modify/modify tie: `left` or `right`.
    pub tie_break: String,
    /// When true, a deletion beats a concurrent modification.
    pub prefer_deletions: bool,
    /// Marker word embedded in conflict-copy names.
    pub marker: String,
    /// Per-path strategy overrides, first match wins.
    pub rules: Vec<ConflictRule>,
}

/// A single per-path conflict strategy override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRule {
    /// Glob pattern matched against the logical path (e.g. `**/*.docx`).
    pub pattern: String,
    /// Strategy to apply when the pattern matches.
    pub strategy: String,
}

/// State store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path to the SQLite database file.
    pub database: PathBuf,
}

/// Daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between scheduled bidirectional runs.
    pub run_interval: u64,
    /// Listen address for the change-notification callback endpoint.
    pub webhook_listen: String,
}

/// The two provider adapters bound by this installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub left: ProviderConfig,
    pub right: ProviderConfig,
}

/// One provider adapter binding.
///
/// `kind` selects the adapter implementation; concrete HTTP adapters live
/// outside this workspace and register their own kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Adapter kind, e.g. `memory`.
    pub kind: String,
    /// Human-readable label used in logs.
    pub label: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/twinsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("twinsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers_per_provider: 4,
            requests_per_second: 10,
            large_file_threshold_mb: 8,
            chunk_size_mb: 10,
            max_retries: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            quota_backoff_floor_ms: 30_000,
        }
    }
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            default_strategy: "newest_wins".to_string(),
            tie_break: "left".to_string(),
            prefer_deletions: false,
            marker: "conflicted copy".to_string(),
            rules: Vec::new(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("twinsync");
        Self {
            database: data_dir.join("state.db"),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            run_interval: 300,
            webhook_listen: "127.0.0.1:7440".to_string(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            left: ProviderConfig {
                kind: "memory".to_string(),
                label: "left".to_string(),
            },
            right: ProviderConfig {
                kind: "memory".to_string(),
                label: "right".to_string(),
            },
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: "memory".to_string(),
            label: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"engine.max_retries"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `conflicts.default_strategy` and rule strategies.
const VALID_CONFLICT_STRATEGIES: &[&str] = &["newest_wins", "left_wins", "right_wins"];

/// Valid values for `conflicts.tie_break`.
const VALID_TIE_BREAKS: &[&str] = &["left", "right"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- engine ---
        if self.engine.workers_per_provider == 0 {
            errors.push(ValidationError {
                field: "engine.workers_per_provider".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.engine.requests_per_second == 0 {
            errors.push(ValidationError {
                field: "engine.requests_per_second".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.engine.chunk_size_mb == 0 {
            errors.push(ValidationError {
                field: "engine.chunk_size_mb".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.engine.backoff_base_ms == 0 {
            errors.push(ValidationError {
                field: "engine.backoff_base_ms".into(),
                message: "must be positive".into(),
            });
        }
        if self.engine.backoff_max_ms < self.engine.backoff_base_ms {
            errors.push(ValidationError {
                field: "engine.backoff_max_ms".into(),
                message: "must be >= engine.backoff_base_ms".into(),
            });
        }

        // --- conflicts ---
        if !VALID_CONFLICT_STRATEGIES.contains(&self.conflicts.default_strategy.as_str()) {
            errors.push(ValidationError {
                field: "conflicts.default_strategy".into(),
                message: format!(
                    "'{}' is not one of {:?}",
                    self.conflicts.default_strategy, VALID_CONFLICT_STRATEGIES
                ),
            });
        }
        if !VALID_TIE_BREAKS.contains(&self.conflicts.tie_break.as_str()) {
            errors.push(ValidationError {
                field: "conflicts.tie_break".into(),
                message: format!(
                    "'{}' is not one of {:?}",
                    self.conflicts.tie_break, VALID_TIE_BREAKS
                ),
            });
        }
        if self.conflicts.marker.is_empty() || self.conflicts.marker.contains('/') {
            errors.push(ValidationError {
                field: "conflicts.marker".into(),
                message: "must be non-empty and contain no '/'".into(),
            });
        }
        for (i, rule) in self.conflicts.rules.iter().enumerate() {
            if !VALID_CONFLICT_STRATEGIES.contains(&rule.strategy.as_str()) {
                errors.push(ValidationError {
                    field: format!("conflicts.rules[{i}].strategy"),
                    message: format!(
                        "'{}' is not one of {:?}",
                        rule.strategy, VALID_CONFLICT_STRATEGIES
                    ),
                });
            }
        }

        // --- daemon ---
        if self.daemon.run_interval == 0 {
            errors.push(ValidationError {
                field: "daemon.run_interval".into(),
                message: "must be at least 1 second".into(),
            });
        }
        if self.daemon.webhook_listen.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError {
                field: "daemon.webhook_listen".into(),
                message: format!(
                    "'{}' is not a valid socket address",
                    self.daemon.webhook_listen
                ),
            });
        }

        // --- providers ---
        if self.providers.left.kind.is_empty() {
            errors.push(ValidationError {
                field: "providers.left.kind".into(),
                message: "must name an adapter kind".into(),
            });
        }
        if self.providers.right.kind.is_empty() {
            errors.push(ValidationError {
                field: "providers.right.kind".into(),
                message: "must name an adapter kind".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "'{}' is not one of {:?}",
                    self.logging.level, VALID_LOG_LEVELS
                ),
            });
        }

        errors
    }
}
