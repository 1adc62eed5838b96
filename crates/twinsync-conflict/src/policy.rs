//! Policy engine for conflict resolution
//!
//! Evaluates the configured default strategy plus per-path glob rules to
//! decide which side wins a conflict. Rules are matched in first-match-wins
//! order against the logical path (without the leading slash).

use glob::Pattern;
use tracing::{debug, trace};

use twinsync_core::config::{ConflictRule, ConflictsConfig};
use twinsync_core::domain::{Side, TreePath};

use crate::error::ConflictError;

/// How the winning side of a conflict is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The more recently modified side wins (ties break by `tie_break`)
    NewestWins,
    /// The left provider always wins
    LeftWins,
    /// The right provider always wins
    RightWins,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::NewestWins => "newest_wins",
            Strategy::LeftWins => "left_wins",
            Strategy::RightWins => "right_wins",
        };
        write!(f, "{s}")
    }
}

/// Parses a strategy string from configuration
fn parse_strategy(s: &str) -> Option<Strategy> {
    match s {
        "newest_wins" => Some(Strategy::NewestWins),
        "left_wins" => Some(Strategy::LeftWins),
        "right_wins" => Some(Strategy::RightWins),
        _ => None,
    }
}

/// Validates a configured rule's pattern and strategy
pub fn validate_rule(rule: &ConflictRule) -> Result<(), ConflictError> {
    Pattern::new(&rule.pattern).map_err(|e| ConflictError::InvalidPattern {
        pattern: rule.pattern.clone(),
        reason: e.to_string(),
    })?;

    parse_strategy(&rule.strategy).ok_or_else(|| ConflictError::InvalidPattern {
        pattern: rule.pattern.clone(),
        reason: format!(
            "invalid strategy '{}'; valid: newest_wins, left_wins, right_wins",
            rule.strategy
        ),
    })?;

    Ok(())
}

/// Compiled resolution policy
///
/// Built once from configuration; evaluation is pure and deterministic so
/// re-running the resolver on the same inputs always picks the same winner.
pub struct ResolutionPolicy {
    rules: Vec<(Pattern, Strategy)>,
    default_strategy: Strategy,
    tie_break: Side,
    prefer_deletions: bool,
    marker: String,
}

impl ResolutionPolicy {
    /// Compiles a policy from the conflicts section of the configuration
    ///
    /// Invalid rules are logged and skipped.
    pub fn from_config(config: &ConflictsConfig) -> Self {
        let default_strategy =
            parse_strategy(&config.default_strategy).unwrap_or(Strategy::NewestWins);
        let tie_break = match config.tie_break.as_str() {
            "right" => Side::Right,
            _ => Side::Left,
        };

        let rules: Vec<(Pattern, Strategy)> = config
            .rules
            .iter()
            .filter_map(|rule| {
                let pattern = match Pattern::new(&rule.pattern) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(
                            pattern = %rule.pattern,
                            error = %e,
                            "Skipping invalid conflict rule pattern"
                        );
                        return None;
                    }
                };
                let strategy = match parse_strategy(&rule.strategy) {
                    Some(s) => s,
                    None => {
                        tracing::warn!(
                            strategy = %rule.strategy,
                            "Skipping invalid conflict rule strategy"
                        );
                        return None;
                    }
                };
                Some((pattern, strategy))
            })
            .collect();

        debug!(
            rules_count = rules.len(),
            default = %default_strategy,
            tie_break = %tie_break,
            prefer_deletions = config.prefer_deletions,
            "Resolution policy compiled"
        );

        Self {
            rules,
            default_strategy,
            tie_break,
            prefer_deletions: config.prefer_deletions,
            marker: config.marker.clone(),
        }
    }

    /// Evaluates the strategy for a logical path
    ///
    /// First-match-wins over the configured rules; the default strategy
    /// applies when nothing matches. Patterns match the path without its
    /// leading slash, so `**/*.docx` behaves as expected.
    pub fn strategy_for(&self, path: &TreePath) -> Strategy {
        let relative = path.as_str().trim_start_matches('/');
        for (pattern, strategy) in &self.rules {
            if pattern.matches(relative) {
                trace!(path = %path, pattern = %pattern, strategy = %strategy, "Conflict rule matched");
                return *strategy;
            }
        }
        self.default_strategy
    }

    /// Side that wins an exact-timestamp tie
    pub fn tie_break(&self) -> Side {
        self.tie_break
    }

    /// Whether a deletion beats a concurrent modification
    pub fn prefer_deletions(&self) -> bool {
        self.prefer_deletions
    }

    /// Marker word used in conflict-copy names
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Number of compiled rules
    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self::from_config(&ConflictsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> TreePath {
        TreePath::new(s.to_string()).unwrap()
    }

    fn config_with_rules(rules: Vec<ConflictRule>) -> ConflictsConfig {
        ConflictsConfig {
            rules,
            ..ConflictsConfig::default()
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = ResolutionPolicy::default();
        assert_eq!(policy.strategy_for(&path("/any/file.txt")), Strategy::NewestWins);
        assert_eq!(policy.tie_break(), Side::Left);
        assert!(!policy.prefer_deletions());
        assert_eq!(policy.rules_count(), 0);
    }

    #[test]
    fn test_first_match_wins() {
        let config = config_with_rules(vec![
            ConflictRule {
                pattern: "**/*.docx".to_string(),
                strategy: "left_wins".to_string(),
            },
            ConflictRule {
                pattern: "**/*".to_string(),
                strategy: "right_wins".to_string(),
            },
        ]);
        let policy = ResolutionPolicy::from_config(&config);

        assert_eq!(
            policy.strategy_for(&path("/Documents/report.docx")),
            Strategy::LeftWins
        );
        assert_eq!(
            policy.strategy_for(&path("/Documents/report.pdf")),
            Strategy::RightWins
        );
    }

    #[test]
    fn test_glob_patterns() {
        let config = config_with_rules(vec![
            ConflictRule {
                pattern: "*.tmp".to_string(),
                strategy: "right_wins".to_string(),
            },
            ConflictRule {
                pattern: "Documents/**/*.xlsx".to_string(),
                strategy: "left_wins".to_string(),
            },
        ]);
        let policy = ResolutionPolicy::from_config(&config);

        assert_eq!(policy.strategy_for(&path("/test.tmp")), Strategy::RightWins);
        assert_eq!(
            policy.strategy_for(&path("/Documents/Finance/budget.xlsx")),
            Strategy::LeftWins
        );
        assert_eq!(policy.strategy_for(&path("/other.txt")), Strategy::NewestWins);
    }

    #[test]
    fn test_invalid_rules_skipped() {
        let config = config_with_rules(vec![
            ConflictRule {
                pattern: "[invalid".to_string(),
                strategy: "left_wins".to_string(),
            },
            ConflictRule {
                pattern: "**/*.txt".to_string(),
                strategy: "coin_flip".to_string(),
            },
            ConflictRule {
                pattern: "**/*.rs".to_string(),
                strategy: "left_wins".to_string(),
            },
        ]);
        let policy = ResolutionPolicy::from_config(&config);
        assert_eq!(policy.rules_count(), 1);
        assert_eq!(policy.strategy_for(&path("/src/main.rs")), Strategy::LeftWins);
    }

    #[test]
    fn test_invalid_default_falls_back() {
        let config = ConflictsConfig {
            default_strategy: "garbage".to_string(),
            ..ConflictsConfig::default()
        };
        let policy = ResolutionPolicy::from_config(&config);
        assert_eq!(policy.strategy_for(&path("/x")), Strategy::NewestWins);
    }

    #[test]
    fn test_tie_break_right() {
        let config = ConflictsConfig {
            tie_break: "right".to_string(),
            ..ConflictsConfig::default()
        };
        let policy = ResolutionPolicy::from_config(&config);
        assert_eq!(policy.tie_break(), Side::Right);
    }

    #[test]
    fn test_validate_rule() {
        let good = ConflictRule {
            pattern: "**/*.docx".to_string(),
            strategy: "newest_wins".to_string(),
        };
        assert!(validate_rule(&good).is_ok());

        let bad_pattern = ConflictRule {
            pattern: "[invalid".to_string(),
            strategy: "newest_wins".to_string(),
        };
        assert!(matches!(
            validate_rule(&bad_pattern),
            Err(ConflictError::InvalidPattern { .. })
        ));

        let bad_strategy = ConflictRule {
            pattern: "**/*.txt".to_string(),
            strategy: "yolo".to_string(),
        };
        assert!(validate_rule(&bad_strategy).is_err());
    }
}
