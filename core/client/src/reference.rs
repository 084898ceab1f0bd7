//! Storage references.

use serde::{Deserialize, Serialize};
use std::fmt;

use skybucket_common::{Result, StoragePath};

/// A pointer to a bucket, directory or object.
///
/// References are plain, unvalidated paths: they may name something that
/// does not exist yet, and a malformed reference is only reported when an
/// operation tries to use it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageReference {
    path: String,
}

impl StorageReference {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The root of the store.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reference to `name` below this one.
    pub fn child(&self, name: &str) -> Self {
        let base = self.path.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        if base.is_empty() {
            Self::new(name)
        } else {
            Self::new(format!("{}/{}", base, name))
        }
    }

    /// Reference one level up, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.path.trim_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.rsplit_once('/') {
            Some((parent, _)) => Some(Self::new(parent)),
            None => Some(Self::root()),
        }
    }

    /// Validate into a backend path.
    ///
    /// # Errors
    /// - `InvalidInput` for malformed paths (`a//b`, `..`, ...)
    pub fn resolve(&self) -> Result<StoragePath> {
        StoragePath::parse(&self.path)
    }
}

impl From<&str> for StorageReference {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for StorageReference {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&StoragePath> for StorageReference {
    fn from(path: &StoragePath) -> Self {
        Self::new(path.to_key())
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_and_parent() {
        let images = StorageReference::root().child("images");
        assert_eq!(images.path(), "images");

        let file = images.child("a.png");
        assert_eq!(file.path(), "images/a.png");
        assert_eq!(file.parent().unwrap(), images);
        assert_eq!(images.parent().unwrap(), StorageReference::root());
        assert!(StorageReference::root().parent().is_none());
    }

    #[test]
    fn test_child_normalizes_slashes() {
        let reference = StorageReference::new("bucket/").child("/x.txt");
        assert_eq!(reference.path(), "bucket/x.txt");
    }

    #[test]
    fn test_malformed_reference_only_fails_on_resolve() {
        let reference = StorageReference::new("a//b");
        assert_eq!(reference.path(), "a//b");
        assert!(reference.resolve().is_err());
        assert_eq!(StorageReference::new("a/b").resolve().unwrap().to_key(), "a/b");
    }
}
