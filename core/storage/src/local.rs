//! Local filesystem storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::backend::{
    encode_path, guess_content_type, select_children, DownloadLocator, ListOptions,
    ObjectMetadata, RequestContext, StorageBackend,
};
use skybucket_common::{Error, Result, StoragePath};

/// Reserved top-level directory mirroring each object's attributes.
const ATTRIBUTES_DIR: &str = ".skybucket";

const ATTRIBUTES_FILE: &str = "attributes.json";

/// Attributes the filesystem cannot carry for an object.
#[derive(Debug, Serialize, Deserialize)]
struct Attributes {
    content_type: String,
}

/// Local filesystem backend.
///
/// Each object is a regular file under the root directory. Directories are
/// created on demand when storing and are never reported as objects. The
/// content type given at upload is kept under the reserved `.skybucket`
/// directory; objects without one get a type guessed from their name.
pub struct LocalBackend {
    root: PathBuf,
    require_auth: bool,
}

impl LocalBackend {
    /// Create a new local backend with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            require_auth: false,
        })
    }

    /// Reject callers that present no token.
    pub fn with_require_auth(mut self, require_auth: bool) -> Self {
        self.require_auth = require_auth;
        self
    }

    fn to_fs_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn attributes_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.join(ATTRIBUTES_DIR);
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path.join(ATTRIBUTES_FILE)
    }

    fn authorize(&self, ctx: &RequestContext, path: &StoragePath) -> Result<()> {
        if path.components().first().map(String::as_str) == Some(ATTRIBUTES_DIR) {
            return Err(Error::InvalidInput(format!(
                "{} is reserved by the local backend",
                ATTRIBUTES_DIR
            )));
        }
        if self.require_auth && !ctx.is_authenticated() {
            return Err(Error::PermissionDenied(format!(
                "Sign-in required to access {}",
                path
            )));
        }
        Ok(())
    }

    /// Filesystem metadata of the object file, rejecting directories.
    async fn object_meta(&self, path: &StoragePath) -> Result<std::fs::Metadata> {
        let fs_path = self.to_fs_path(path);
        match fs::metadata(&fs_path).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(Error::NotFound(format!(
                "{} is a directory, not an object",
                path
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_attributes(&self, path: &StoragePath, content_type: &str) -> Result<()> {
        let attributes = serde_json::to_vec(&Attributes {
            content_type: content_type.to_string(),
        })?;
        let attributes_path = self.attributes_path(path);
        if let Some(parent) = attributes_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&attributes_path, attributes).await?;
        Ok(())
    }

    async fn read_attributes(&self, path: &StoragePath) -> Option<Attributes> {
        let attributes_path = self.attributes_path(path);
        let raw = match fs::read(&attributes_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}", attributes_path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(attributes) => Some(attributes),
            Err(e) => {
                warn!("Ignoring corrupt {}: {}", attributes_path.display(), e);
                None
            }
        }
    }

    async fn remove_attributes(&self, path: &StoragePath) -> Result<()> {
        let attributes_path = self.attributes_path(path);
        let Some(dir) = attributes_path.parent() else {
            return Ok(());
        };
        match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn create_metadata(
        path: &StoragePath,
        fs_meta: &std::fs::Metadata,
        content_type: String,
    ) -> ObjectMetadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        ObjectMetadata {
            path: path.to_key(),
            name: path.name().unwrap_or_default().to_string(),
            size: fs_meta.len(),
            content_type,
            modified,
            etag: Some(format!("{}-{}", modified.timestamp_millis(), fs_meta.len())),
        }
    }

    /// Every object path at or below `dir`.
    async fn walk(&self, dir: &StoragePath) -> Result<Vec<StoragePath>> {
        let mut found = Vec::new();
        let mut pending = vec![dir.clone()];

        while let Some(current) = pending.pop() {
            let fs_dir = self.to_fs_path(&current);
            let mut entries = match fs::read_dir(&fs_dir).await {
                Ok(entries) => entries,
                // A missing or non-directory prefix simply has no children.
                Err(e)
                    if e.kind() == std::io::ErrorKind::NotFound
                        || e.kind() == std::io::ErrorKind::NotADirectory =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(String::from) else {
                    warn!("Skipping non UTF-8 entry in {}", fs_dir.display());
                    continue;
                };
                let child = match current.join(&name) {
                    Ok(child) => child,
                    Err(_) => {
                        warn!("Skipping unaddressable entry '{}'", name);
                        continue;
                    }
                };

                if current.is_root() && name == ATTRIBUTES_DIR {
                    continue;
                }

                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(child);
                } else if file_type.is_file() {
                    found.push(child);
                }
            }
        }

        Ok(found)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectMetadata> {
        self.authorize(ctx, path)?;
        if path.is_root() {
            return Err(Error::InvalidInput(
                "The root reference does not denote an object".to_string(),
            ));
        }

        let fs_path = self.to_fs_path(path);
        if fs_path.is_dir() {
            return Err(Error::AlreadyExists(format!(
                "{} is a directory-like prefix",
                path
            )));
        }

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        debug!("Writing {} bytes to {}", data.len(), fs_path.display());
        fs::write(&fs_path, &data).await?;
        self.write_attributes(path, content_type).await?;

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(Self::create_metadata(path, &fs_meta, content_type.to_string()))
    }

    async fn locate(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        _ttl: Option<Duration>,
    ) -> Result<DownloadLocator> {
        self.authorize(ctx, path)?;
        self.object_meta(path).await?;

        let absolute = fs::canonicalize(self.to_fs_path(path)).await?;
        let components: Vec<String> = absolute
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        Ok(DownloadLocator {
            url: format!(
                "file:///{}",
                encode_path(components.iter().map(String::as_str))
            ),
            // Files do not expire.
            expires_at: None,
        })
    }

    async fn delete(&self, ctx: &RequestContext, path: &StoragePath) -> Result<()> {
        self.authorize(ctx, path)?;
        self.object_meta(path).await?;
        fs::remove_file(self.to_fs_path(path)).await?;
        self.remove_attributes(path).await
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        options: &ListOptions,
    ) -> Result<Vec<String>> {
        self.authorize(ctx, path)?;
        let objects = self.walk(path).await?;
        Ok(select_children(path, &objects, options))
    }

    async fn stat(&self, ctx: &RequestContext, path: &StoragePath) -> Result<ObjectMetadata> {
        self.authorize(ctx, path)?;
        let fs_meta = self.object_meta(path).await?;
        let content_type = match self.read_attributes(path).await {
            Some(attributes) => attributes.content_type,
            None => guess_content_type(path, None),
        };
        Ok(Self::create_metadata(path, &fs_meta, content_type))
    }

    async fn exists(&self, ctx: &RequestContext, path: &StoragePath) -> Result<bool> {
        self.authorize(ctx, path)?;
        match self.object_meta(path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skybucket_common::ErrorKind;
    use tempfile::TempDir;

    fn path(p: &str) -> StoragePath {
        StoragePath::parse(p).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::anonymous()
    }

    #[tokio::test]
    async fn test_put_creates_parents() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();

        let meta = backend
            .put(&ctx(), &path("a/b/c.txt"), b"hello".to_vec(), "text/plain")
            .await
            .unwrap();

        assert_eq!(meta.path, "a/b/c.txt");
        assert_eq!(meta.size, 5);
        assert_eq!(std::fs::read(temp.path().join("a/b/c.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_stat_keeps_uploaded_content_type() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        let stored = backend
            .put(&ctx(), &path("notes/readme"), b"# hi".to_vec(), "text/markdown")
            .await
            .unwrap();

        let meta = backend.stat(&ctx(), &path("notes/readme")).await.unwrap();
        assert_eq!(meta, stored);
        assert_eq!(meta.content_type, "text/markdown");

        let names = backend
            .list(&ctx(), &StoragePath::root(), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(names, vec!["notes"]);

        backend.delete(&ctx(), &path("notes/readme")).await.unwrap();
        assert!(!temp.path().join(".skybucket/notes/readme").exists());
    }

    #[tokio::test]
    async fn test_stat_guesses_content_type_of_foreign_files() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        std::fs::create_dir_all(temp.path().join("img")).unwrap();
        std::fs::write(temp.path().join("img/x.png"), [0x89, 0x50]).unwrap();

        let meta = backend.stat(&ctx(), &path("img/x.png")).await.unwrap();
        assert_eq!(meta.content_type, "image/png");
        assert_eq!(meta.size, 2);
    }

    #[tokio::test]
    async fn test_attributes_dir_is_reserved() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();

        let err = backend
            .put(&ctx(), &path(".skybucket/x.txt"), vec![1], "text/plain")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = backend.stat(&ctx(), &path(".skybucket")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_directory_is_not_an_object() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        backend.put(&ctx(), &path("d/f.txt"), vec![1], "text/plain").await.unwrap();

        let err = backend.stat(&ctx(), &path("d")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = backend.delete(&ctx(), &path("d")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!backend.exists(&ctx(), &path("d")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        for key in ["d/b.txt", "d/a.txt", "d/sub/c.txt"] {
            backend.put(&ctx(), &path(key), vec![1], "text/plain").await.unwrap();
        }

        let names = backend.list(&ctx(), &path("d"), &ListOptions::default()).await.unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);

        let options = ListOptions {
            recursive: true,
            page_size: None,
        };
        let all = backend.list(&ctx(), &path("d"), &options).await.unwrap();
        assert_eq!(all, vec!["a.txt", "b.txt", "sub/c.txt"]);

        backend.delete(&ctx(), &path("d/sub/c.txt")).await.unwrap();
        let names = backend.list(&ctx(), &path("d/sub"), &ListOptions::default()).await.unwrap();
        assert!(names.is_empty());

        let missing = backend
            .list(&ctx(), &path("nowhere"), &ListOptions::default())
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_locate_is_file_url() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap();
        backend.put(&ctx(), &path("a b.txt"), vec![1], "text/plain").await.unwrap();

        let locator = backend.locate(&ctx(), &path("a b.txt"), None).await.unwrap();
        assert!(locator.url.starts_with("file:///"));
        assert!(locator.url.ends_with("/a%20b.txt"));
        assert!(locator.expires_at.is_none());

        let err = backend.locate(&ctx(), &path("missing.txt"), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_require_auth() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path()).unwrap().with_require_auth(true);

        let err = backend
            .put(&ctx(), &path("x.txt"), vec![1], "text/plain")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let user = RequestContext::with_token("t");
        assert!(backend.put(&user, &path("x.txt"), vec![1], "text/plain").await.is_ok());
    }
}
