//! Deterministic conflict-copy naming
//!
//! Generates the name a losing version is preserved under. The name is a
//! pure function of the original name, the losing side, and the losing
//! change's recorded timestamp, so re-running the resolver on the same
//! conflict always produces the same name on both trees.
//!
//! Given "report.docx", a loser on the left modified at 2026-03-01T08:15:30Z
//! and the default marker, the copy is named:
//! "report (conflicted copy 2026-03-01T08-15-30Z left).docx"

use chrono::{DateTime, Utc};

use twinsync_core::domain::{Side, TreePath};

use crate::error::ConflictError;

/// Builds the conflict-copy file name for a losing version
pub fn conflict_copy_name(
    original_name: &str,
    marker: &str,
    losing_side: Side,
    losing_modified_at: DateTime<Utc>,
) -> String {
    // Colons are not safe in names on every provider; keep the timestamp
    // readable but filename-clean.
    let stamp = losing_modified_at.format("%Y-%m-%dT%H-%M-%SZ");
    let suffix = format!(" ({marker} {stamp} {losing_side})");

    match original_name.rfind('.') {
        Some(dot_pos) if dot_pos > 0 => {
            let stem = &original_name[..dot_pos];
            let ext = &original_name[dot_pos..];
            format!("{stem}{suffix}{ext}")
        }
        _ => format!("{original_name}{suffix}"),
    }
}

/// Builds the full conflict-copy path next to the original
pub fn conflict_copy_path(
    path: &TreePath,
    marker: &str,
    losing_side: Side,
    losing_modified_at: DateTime<Utc>,
) -> Result<TreePath, ConflictError> {
    let name = path.file_name().ok_or_else(|| ConflictError::MalformedConflict {
        path: path.to_string(),
        reason: "the root path cannot conflict".to_string(),
    })?;

    let copy_name = conflict_copy_name(name, marker, losing_side, losing_modified_at);
    path.with_file_name(&copy_name).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 15, 30).unwrap()
    }

    #[test]
    fn test_name_with_extension() {
        let name = conflict_copy_name("report.docx", "conflicted copy", Side::Left, stamp());
        assert_eq!(
            name,
            "report (conflicted copy 2026-03-01T08-15-30Z left).docx"
        );
    }

    #[test]
    fn test_name_without_extension() {
        let name = conflict_copy_name("Makefile", "conflicted copy", Side::Right, stamp());
        assert_eq!(name, "Makefile (conflicted copy 2026-03-01T08-15-30Z right)");
    }

    #[test]
    fn test_name_with_multiple_dots() {
        let name = conflict_copy_name("archive.tar.gz", "conflicted copy", Side::Left, stamp());
        assert_eq!(
            name,
            "archive.tar (conflicted copy 2026-03-01T08-15-30Z left).gz"
        );
    }

    #[test]
    fn test_hidden_file_keeps_leading_dot() {
        // ".bashrc" has no stem before the dot; the suffix goes at the end
        let name = conflict_copy_name(".bashrc", "conflicted copy", Side::Left, stamp());
        assert_eq!(name, ".bashrc (conflicted copy 2026-03-01T08-15-30Z left)");
    }

    #[test]
    fn test_determinism() {
        let a = conflict_copy_name("a.txt", "conflicted copy", Side::Left, stamp());
        let b = conflict_copy_name("a.txt", "conflicted copy", Side::Left, stamp());
        assert_eq!(a, b);
    }

    #[test]
    fn test_copy_path() {
        let path = TreePath::new("/docs/report.docx".to_string()).unwrap();
        let copy = conflict_copy_path(&path, "conflicted copy", Side::Right, stamp()).unwrap();
        assert_eq!(
            copy.as_str(),
            "/docs/report (conflicted copy 2026-03-01T08-15-30Z right).docx"
        );
    }

    #[test]
    fn test_copy_path_root_fails() {
        let result = conflict_copy_path(&TreePath::root(), "m", Side::Left, stamp());
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_marker() {
        let name = conflict_copy_name("a.txt", "sync conflict", Side::Left, stamp());
        assert!(name.contains("sync conflict"));
    }
}
