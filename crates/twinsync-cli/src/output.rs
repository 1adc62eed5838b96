//! Output formatting helpers

use chrono::{DateTime, Utc};

/// Requested output style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// Returns true for JSON output
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

/// Pretty-prints a JSON value to stdout
pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to encode JSON output: {e}"),
    }
}

/// Formats an optional timestamp for human output
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(None), "never");
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 8, 15, 30).unwrap();
        assert_eq!(format_time(Some(t)), "2026-03-01 08:15:30 UTC");
    }

    #[test]
    fn test_is_json() {
        assert!(OutputFormat::Json.is_json());
        assert!(!OutputFormat::Human.is_json());
    }
}
