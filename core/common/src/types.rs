//! Common types used throughout SkyBucket.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-chosen identifier under which an operation's outcome is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResponseId(String);

impl ResponseId {
    /// Create a new ResponseId from a string.
    ///
    /// # Preconditions
    /// - `id` must contain at least one non-whitespace character
    ///
    /// # Errors
    /// - Returns error if id is blank
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Response identifier cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ResponseId {
    type Error = crate::Error;

    fn try_from(value: &str) -> crate::Result<Self> {
        Self::new(value)
    }
}

/// A validated object path inside a storage backend.
///
/// The first component usually names a bucket, the rest directories and the
/// object itself. Paths are independent of any physical filesystem and are
/// rendered without a leading slash (`photos/2024/a.png`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Any component is empty, `.` or `..`
    /// - Any component contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a slash-delimited path string.
    ///
    /// Leading and trailing slashes are ignored; `""` and `"/"` are the root.
    /// Doubled slashes are rejected rather than collapsed.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let trimmed = path.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = trimmed.split('/').map(String::from).collect();
        Self::from_components(components).map_err(|e| match e {
            crate::Error::InvalidInput(msg) => {
                crate::Error::InvalidInput(format!("{} (in '{}')", msg, path))
            }
            other => other,
        })
    }

    fn validate_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(format!(
                "Path component '{}' is not allowed",
                comp
            )));
        }
        if comp.contains('/') || comp.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        if comp.chars().any(char::is_control) {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain control characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the object name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Extension of the last component, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name()?;
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Whether `other` lies strictly below this path.
    pub fn is_ancestor_of(&self, other: &StoragePath) -> bool {
        other.components.len() > self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Render as an object key (no leading slash, root is empty).
    pub fn to_key(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.to_key())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_response_id_creation() {
        let id = ResponseId::new("up").unwrap();
        assert_eq!(id.as_str(), "up");
    }

    #[test]
    fn test_response_id_blank_fails() {
        assert!(ResponseId::new("").is_err());
        assert!(ResponseId::new("   ").is_err());
    }

    #[test]
    fn test_storage_path_root() {
        let path = StoragePath::parse("/").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_key(), "");
        assert_eq!(path.to_string(), "/");
    }

    #[test]
    fn test_storage_path_parse() {
        let path = StoragePath::parse("/bucket/photos/a.png/").unwrap();
        assert_eq!(path.components(), &["bucket", "photos", "a.png"]);
        assert_eq!(path.to_key(), "bucket/photos/a.png");
    }

    #[test]
    fn test_storage_path_rejects_malformed() {
        assert!(StoragePath::parse("a//b").is_err());
        assert!(StoragePath::parse("a/../b").is_err());
        assert!(StoragePath::parse("a/./b").is_err());
        assert!(StoragePath::parse("a\\b").is_err());
    }

    #[test]
    fn test_storage_path_extension() {
        assert_eq!(StoragePath::parse("a/b.png").unwrap().extension(), Some("png"));
        assert_eq!(StoragePath::parse("a/.hidden").unwrap().extension(), None);
        assert_eq!(StoragePath::parse("a/noext").unwrap().extension(), None);
    }

    #[test]
    fn test_storage_path_ancestry() {
        let dir = StoragePath::parse("a/b").unwrap();
        assert!(dir.is_ancestor_of(&StoragePath::parse("a/b/c").unwrap()));
        assert!(!dir.is_ancestor_of(&StoragePath::parse("a/bc").unwrap()));
        assert!(!dir.is_ancestor_of(&dir));
        assert!(StoragePath::root().is_ancestor_of(&dir));
    }

    #[test]
    fn test_storage_path_parent_and_join() {
        let path = StoragePath::root().join("a").unwrap().join("b").unwrap();
        assert_eq!(path.to_key(), "a/b");
        assert_eq!(path.parent().unwrap().to_key(), "a");
        assert!(path.join("x/y").is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_preserves_valid_components(
            parts in proptest::collection::vec("[a-zA-Z0-9_-][a-zA-Z0-9_.-]{0,11}", 0..6)
        ) {
            let joined = parts.join("/");
            let parsed = StoragePath::parse(&joined).unwrap();
            prop_assert_eq!(parsed.to_key(), joined);
            prop_assert_eq!(parsed.components().len(), parts.len());
        }
    }
}
