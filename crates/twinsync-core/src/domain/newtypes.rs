//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for identifiers and values exchanged with the
//! provider adapters. Each newtype ensures data validity at construction
//! time so the reconciliation logic never has to re-check.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Side
// ============================================================================

/// One of the two providers bound by a sync configuration
///
/// The engine is symmetric: "left" and "right" carry no semantics beyond
/// telling the two adapter instances apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Returns the other provider
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Returns the side name as a lowercase string
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Side {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(DomainError::InvalidSide(other.to_string())),
        }
    }
}

// ============================================================================
// Provider-native identifiers
// ============================================================================

/// Provider-native item identifier (opaque string)
///
/// Providers hand these out; TwinSync never inspects their structure, only
/// that they are non-empty and contain no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Create a new ItemId
    ///
    /// # Errors
    /// Returns error if the identifier is empty or contains control characters
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidItemId(
                "Item identifier cannot be empty".to_string(),
            ));
        }
        if id.chars().any(char::is_control) {
            return Err(DomainError::InvalidItemId(format!(
                "Item identifier contains control characters: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

// ============================================================================
// TreePath
// ============================================================================

/// A rooted path within a provider tree (must start with /)
///
/// Paths are the cross-provider coordinate system: the same logical object
/// lives at the same `TreePath` on both sides. Validated to be normalized:
/// no empty segments, no `.` or `..`, no trailing slash except for the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath(String);

impl TreePath {
    /// Create a new TreePath
    ///
    /// # Errors
    /// Returns error if the path is not rooted or not normalized
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must start with '/': {path}"
            )));
        }
        if path.len() > 1 && path.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must not end with '/': {path}"
            )));
        }
        if path.len() > 1 {
            for segment in path[1..].split('/') {
                if segment.is_empty() {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains an empty segment: {path}"
                    )));
                }
                if segment == "." || segment == ".." {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains a relative segment: {path}"
                    )));
                }
            }
        }
        Ok(Self(path))
    }

    /// The tree root "/"
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the root path
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Number of segments below the root (the root itself has depth 0)
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0[1..].split('/').count()
        }
    }

    /// Append one segment
    ///
    /// # Errors
    /// Returns error if the segment is empty or contains '/' or relative parts
    pub fn join(&self, segment: &str) -> Result<Self, DomainError> {
        if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path segment: {segment}"
            )));
        }
        let joined = if self.is_root() {
            format!("/{segment}")
        } else {
            format!("{}/{segment}", self.0)
        };
        Ok(Self(joined))
    }

    /// Get the parent path, or None for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Get the final segment, or None for the root
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Returns true if `self` equals `ancestor` or lies below it
    #[must_use]
    pub fn starts_with(&self, ancestor: &TreePath) -> bool {
        if ancestor.is_root() {
            return true;
        }
        self.0 == ancestor.0 || self.0.starts_with(&format!("{}/", ancestor.0))
    }

    /// Replace the final segment, keeping the parent
    ///
    /// # Errors
    /// Returns error on the root path or an invalid segment
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        let parent = self.parent().ok_or_else(|| {
            DomainError::InvalidPath("Cannot rename the root path".to_string())
        })?;
        parent.join(name)
    }
}

impl Display for TreePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TreePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for TreePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.0
    }
}

// ============================================================================
// Fingerprint and Cursor
// ============================================================================

/// Content-identifying token (hash or provider revision marker)
///
/// Opaque: two fingerprints are equal when their strings are equal, nothing
/// more is assumed. Folders may or may not carry one depending on the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Create a new Fingerprint
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.is_empty() {
            return Err(DomainError::InvalidFingerprint(
                "Fingerprint cannot be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Provider delta cursor (opaque string)
///
/// Returned by `poll_delta` and fed back on the next call. A provider may
/// declare a cursor expired at any time, forcing a full-subtree rescan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor(String);

impl Cursor {
    /// Create a new Cursor
    ///
    /// # Errors
    /// Returns error if the cursor is empty
    pub fn new(cursor: String) -> Result<Self, DomainError> {
        if cursor.is_empty() {
            return Err(DomainError::InvalidCursor(
                "Delta cursor cannot be empty".to_string(),
            ));
        }
        Ok(Self(cursor))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Cursor {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.0
    }
}

// ============================================================================
// RunId
// ============================================================================

/// Identifier for one end-to-end pipeline pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a RunId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid RunId: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod side_tests {
        use super::*;

        #[test]
        fn test_opposite() {
            assert_eq!(Side::Left.opposite(), Side::Right);
            assert_eq!(Side::Right.opposite(), Side::Left);
        }

        #[test]
        fn test_from_str() {
            assert_eq!("left".parse::<Side>().unwrap(), Side::Left);
            assert_eq!("right".parse::<Side>().unwrap(), Side::Right);
            assert!("middle".parse::<Side>().is_err());
        }

        #[test]
        fn test_display() {
            assert_eq!(Side::Left.to_string(), "left");
            assert_eq!(Side::Right.to_string(), "right");
        }
    }

    mod item_id_tests {
        use super::*;

        #[test]
        fn test_valid_id() {
            let id = ItemId::new("01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K".to_string()).unwrap();
            assert_eq!(id.as_str(), "01BYE5RZ6QN3ZWBTUFOFD3GSPGOHDJD36K");
        }

        #[test]
        fn test_empty_fails() {
            assert!(ItemId::new(String::new()).is_err());
        }

        #[test]
        fn test_control_chars_fail() {
            assert!(ItemId::new("abc\ndef".to_string()).is_err());
        }

        #[test]
        fn test_serde_roundtrip() {
            let id = ItemId::new("file-123".to_string()).unwrap();
            let json = serde_json::to_string(&id).unwrap();
            let parsed: ItemId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, parsed);
        }
    }

    mod tree_path_tests {
        use super::*;

        #[test]
        fn test_new_valid() {
            let path = TreePath::new("/Documents/file.txt".to_string()).unwrap();
            assert_eq!(path.as_str(), "/Documents/file.txt");
        }

        #[test]
        fn test_root() {
            let root = TreePath::root();
            assert!(root.is_root());
            assert_eq!(root.depth(), 0);
            assert!(root.parent().is_none());
            assert!(root.file_name().is_none());
        }

        #[test]
        fn test_not_rooted_fails() {
            assert!(TreePath::new("Documents/file.txt".to_string()).is_err());
        }

        #[test]
        fn test_trailing_slash_fails() {
            assert!(TreePath::new("/Documents/".to_string()).is_err());
        }

        #[test]
        fn test_empty_segment_fails() {
            assert!(TreePath::new("/Documents//file.txt".to_string()).is_err());
        }

        #[test]
        fn test_relative_segment_fails() {
            assert!(TreePath::new("/Documents/../file.txt".to_string()).is_err());
            assert!(TreePath::new("/./file.txt".to_string()).is_err());
        }

        #[test]
        fn test_depth() {
            assert_eq!(TreePath::new("/a".to_string()).unwrap().depth(), 1);
            assert_eq!(TreePath::new("/a/b/c".to_string()).unwrap().depth(), 3);
        }

        #[test]
        fn test_join() {
            let path = TreePath::root().join("Documents").unwrap();
            assert_eq!(path.as_str(), "/Documents");
            let path = path.join("file.txt").unwrap();
            assert_eq!(path.as_str(), "/Documents/file.txt");
        }

        #[test]
        fn test_join_invalid_segment() {
            let root = TreePath::root();
            assert!(root.join("").is_err());
            assert!(root.join("a/b").is_err());
            assert!(root.join("..").is_err());
        }

        #[test]
        fn test_parent() {
            let path = TreePath::new("/a/b/c".to_string()).unwrap();
            assert_eq!(path.parent().unwrap().as_str(), "/a/b");
            assert_eq!(path.parent().unwrap().parent().unwrap().as_str(), "/a");
            assert!(path.parent().unwrap().parent().unwrap().parent().unwrap().is_root());
        }

        #[test]
        fn test_file_name() {
            let path = TreePath::new("/Documents/file.txt".to_string()).unwrap();
            assert_eq!(path.file_name(), Some("file.txt"));
        }

        #[test]
        fn test_starts_with() {
            let root = TreePath::root();
            let docs = TreePath::new("/Documents".to_string()).unwrap();
            let file = TreePath::new("/Documents/file.txt".to_string()).unwrap();
            let sibling = TreePath::new("/Documents2".to_string()).unwrap();

            assert!(file.starts_with(&root));
            assert!(file.starts_with(&docs));
            assert!(docs.starts_with(&docs));
            // "/Documents2" is not under "/Documents"
            assert!(!sibling.starts_with(&docs));
        }

        #[test]
        fn test_with_file_name() {
            let path = TreePath::new("/a/b.txt".to_string()).unwrap();
            let renamed = path.with_file_name("c.txt").unwrap();
            assert_eq!(renamed.as_str(), "/a/c.txt");
            assert!(TreePath::root().with_file_name("x").is_err());
        }
    }

    mod fingerprint_tests {
        use super::*;

        #[test]
        fn test_valid() {
            let fp = Fingerprint::new("sha256:abcdef".to_string()).unwrap();
            assert_eq!(fp.as_str(), "sha256:abcdef");
        }

        #[test]
        fn test_empty_fails() {
            assert!(Fingerprint::new(String::new()).is_err());
        }
    }

    mod cursor_tests {
        use super::*;

        #[test]
        fn test_valid() {
            let cursor = Cursor::new("delta-42".to_string()).unwrap();
            assert_eq!(cursor.as_str(), "delta-42");
        }

        #[test]
        fn test_empty_fails() {
            assert!(Cursor::new(String::new()).is_err());
        }

        #[test]
        fn test_serde_roundtrip() {
            let cursor = Cursor::new("token-123".to_string()).unwrap();
            let json = serde_json::to_string(&cursor).unwrap();
            let parsed: Cursor = serde_json::from_str(&json).unwrap();
            assert_eq!(cursor, parsed);
        }
    }

    mod run_id_tests {
        use super::*;

        #[test]
        fn test_new_creates_unique_ids() {
            assert_ne!(RunId::new(), RunId::new());
        }

        #[test]
        fn test_from_str() {
            let s = "550e8400-e29b-41d4-a716-446655440000";
            let id: RunId = s.parse().unwrap();
            assert_eq!(id.to_string(), s);
        }

        #[test]
        fn test_from_str_invalid() {
            assert!("not-a-uuid".parse::<RunId>().is_err());
        }
    }
}
