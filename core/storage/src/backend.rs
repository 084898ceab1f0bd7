//! Storage backend trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use skybucket_common::{Error, Result, StoragePath};

/// Characters escaped inside a single locator path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Content type used when nothing better can be guessed.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Descriptive attributes of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Full object path (`bucket/dir/file.png`).
    pub path: String,
    /// Last path component.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type.
    pub content_type: String,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Revision tag, if the backend tracks one.
    pub etag: Option<String>,
}

/// A retrievable locator for an object. No bytes are transferred to build it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLocator {
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Listing behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Return every object below the reference (relative paths) instead of
    /// only the direct children.
    pub recursive: bool,
    /// Cap on the number of names returned. `None` means unpaginated.
    pub page_size: Option<usize>,
}

/// Kind of access an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Per-call caller context.
#[derive(Clone, Default)]
pub struct RequestContext {
    token: Option<String>,
}

impl RequestContext {
    /// Context for a caller without a session.
    pub fn anonymous() -> Self {
        Self { token: None }
    }

    /// Context carrying a user token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// The caller's token, if signed in.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Whether the caller presented a token.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Object storage backend.
///
/// Implementations own durability and access control. Every call receives the
/// caller's [`RequestContext`]; a backend that refuses access answers with
/// `Error::PermissionDenied`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Store `data` at `path`, replacing any existing object.
    ///
    /// # Postconditions
    /// - Object exists at `path` with the given content type
    /// - Returns metadata of the stored object
    ///
    /// # Errors
    /// - Permission denied
    /// - Network/I/O errors
    async fn put(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectMetadata>;

    /// Build a locator for an existing object.
    ///
    /// # Errors
    /// - Object not found
    /// - Permission denied
    async fn locate(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        ttl: Option<Duration>,
    ) -> Result<DownloadLocator>;

    /// Delete an object.
    ///
    /// # Errors
    /// - Object not found
    /// - Permission denied
    async fn delete(&self, ctx: &RequestContext, path: &StoragePath) -> Result<()>;

    /// Names below `path`, sorted. An empty prefix yields an empty list.
    async fn list(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        options: &ListOptions,
    ) -> Result<Vec<String>>;

    /// Metadata of an object.
    ///
    /// # Errors
    /// - Object not found
    async fn stat(&self, ctx: &RequestContext, path: &StoragePath) -> Result<ObjectMetadata>;

    /// Check whether an object exists at `path`.
    async fn exists(&self, ctx: &RequestContext, path: &StoragePath) -> Result<bool>;
}

/// Guess a MIME type from the object path, then from a fallback file name.
pub fn guess_content_type(path: &StoragePath, fallback_name: Option<&str>) -> String {
    path.name()
        .and_then(|name| mime_guess::from_path(name).first())
        .or_else(|| fallback_name.and_then(|name| mime_guess::from_path(name).first()))
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Point in time `ttl` from now.
///
/// # Errors
/// - `ttl` reaches past the representable calendar
pub(crate) fn expiry_after(ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "Locator lifetime of {}s is out of range",
                ttl.as_secs()
            ))
        })
}

/// Percent-encode each component of a path for use in a locator URL.
pub(crate) fn encode_path<'a>(components: impl IntoIterator<Item = &'a str>) -> String {
    components
        .into_iter()
        .map(|c| utf8_percent_encode(c, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pick the names under `dir` from a set of object paths.
///
/// Direct children are first components below `dir` (objects and implied
/// directories alike); recursive listing yields full relative paths.
pub(crate) fn select_children<'a>(
    dir: &StoragePath,
    keys: impl IntoIterator<Item = &'a StoragePath>,
    options: &ListOptions,
) -> Vec<String> {
    let depth = dir.components().len();
    let names: BTreeSet<String> = keys
        .into_iter()
        .filter(|key| dir.is_ancestor_of(key))
        .map(|key| {
            let relative = &key.components()[depth..];
            if options.recursive {
                relative.join("/")
            } else {
                relative[0].clone()
            }
        })
        .collect();

    let limit = options.page_size.unwrap_or(usize::MAX);
    names.into_iter().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(keys: &[&str]) -> Vec<StoragePath> {
        keys.iter().map(|k| StoragePath::parse(k).unwrap()).collect()
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = ObjectMetadata {
            path: "a/b.png".to_string(),
            name: "b.png".to_string(),
            size: 1024,
            content_type: "image/png".to_string(),
            modified: Utc::now(),
            etag: Some("abc123".to_string()),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: ObjectMetadata = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, metadata);
    }

    #[test]
    fn test_select_direct_children() {
        let keys = paths(&["a/x.txt", "a/sub/y.txt", "a/sub/z.txt", "ab/w.txt", "b.txt"]);
        let dir = StoragePath::parse("a").unwrap();

        let names = select_children(&dir, &keys, &ListOptions::default());
        assert_eq!(names, vec!["sub", "x.txt"]);
    }

    #[test]
    fn test_select_recursive_and_paged() {
        let keys = paths(&["a/x.txt", "a/sub/y.txt", "a/sub/z.txt"]);
        let dir = StoragePath::parse("a").unwrap();

        let options = ListOptions {
            recursive: true,
            page_size: Some(2),
        };
        let names = select_children(&dir, &keys, &options);
        assert_eq!(names, vec!["sub/y.txt", "sub/z.txt"]);
    }

    #[test]
    fn test_select_empty_prefix() {
        let keys = paths(&["a/x.txt"]);
        let dir = StoragePath::parse("empty").unwrap();
        assert!(select_children(&dir, &keys, &ListOptions::default()).is_empty());
    }

    #[test]
    fn test_guess_content_type() {
        let png = StoragePath::parse("a/b.png").unwrap();
        assert_eq!(guess_content_type(&png, None), "image/png");

        let bare = StoragePath::parse("a/blob").unwrap();
        assert_eq!(guess_content_type(&bare, Some("notes.txt")), "text/plain");
        assert_eq!(guess_content_type(&bare, None), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path(["my bucket", "a?b.png"]), "my%20bucket/a%3Fb.png");
    }

    #[test]
    fn test_request_context_redacts_token() {
        let ctx = RequestContext::with_token("secret-token");
        let debug = format!("{:?}", ctx);
        assert!(!debug.contains("secret-token"));
        assert!(ctx.is_authenticated());
        assert!(!RequestContext::anonymous().is_authenticated());
    }

    #[test]
    fn test_expiry_after() {
        let expiry = expiry_after(Duration::from_secs(60)).unwrap();
        assert!(expiry > Utc::now());

        let err = expiry_after(Duration::from_secs(10_000_000_000_000)).unwrap_err();
        assert_eq!(err.kind(), skybucket_common::ErrorKind::InvalidArgument);
        let err = expiry_after(Duration::MAX).unwrap_err();
        assert_eq!(err.kind(), skybucket_common::ErrorKind::InvalidArgument);
    }
}
