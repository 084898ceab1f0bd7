//! In-memory storage backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::{
    encode_path, expiry_after, select_children, Access, DownloadLocator, ListOptions,
    ObjectMetadata, RequestContext, StorageBackend,
};
use skybucket_common::{Error, Result, StoragePath};

/// Access rules enforced by [`MemoryBackend`].
///
/// Prefixes are slash-delimited paths; a rule covers the prefix itself and
/// everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    /// Reject callers without a token.
    pub require_auth: bool,
    /// Prefixes that can be read but not written.
    pub read_only: Vec<String>,
    /// Prefixes that can be neither read nor written.
    pub private: Vec<String>,
}

impl AccessPolicy {
    /// Anyone may read and write.
    pub fn open() -> Self {
        Self {
            require_auth: false,
            read_only: Vec::new(),
            private: Vec::new(),
        }
    }

    /// Any signed-in caller may read and write.
    pub fn authenticated() -> Self {
        Self {
            require_auth: true,
            ..Self::open()
        }
    }

    /// Mark a prefix read-only.
    pub fn with_read_only(mut self, prefix: impl Into<String>) -> Self {
        self.read_only.push(prefix.into());
        self
    }

    /// Mark a prefix private.
    pub fn with_private(mut self, prefix: impl Into<String>) -> Self {
        self.private.push(prefix.into());
        self
    }

    /// Decide whether `ctx` may perform `access` on `path`.
    pub fn check(&self, ctx: &RequestContext, path: &StoragePath, access: Access) -> Result<()> {
        if self.require_auth && !ctx.is_authenticated() {
            return Err(Error::PermissionDenied(format!(
                "Sign-in required to access {}",
                path
            )));
        }

        if covers(&self.private, path) {
            return Err(Error::PermissionDenied(format!("{} is private", path)));
        }

        if access == Access::Write && covers(&self.read_only, path) {
            return Err(Error::PermissionDenied(format!("{} is read-only", path)));
        }

        Ok(())
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::authenticated()
    }
}

fn covers(prefixes: &[String], path: &StoragePath) -> bool {
    prefixes.iter().any(|prefix| match StoragePath::parse(prefix) {
        Ok(prefix) => prefix == *path || prefix.is_ancestor_of(path),
        Err(_) => false,
    })
}

/// In-memory stored object.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    modified: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn metadata(&self, path: &StoragePath) -> ObjectMetadata {
        ObjectMetadata {
            path: path.to_key(),
            name: path.name().unwrap_or_default().to_string(),
            size: self.data.len() as u64,
            content_type: self.content_type.clone(),
            modified: self.modified,
            etag: Some(self.etag.clone()),
        }
    }
}

/// In-memory object store.
///
/// Objects live in an ordered map keyed by path; directories exist only as
/// prefixes of object paths. Useful for tests and development: all data is
/// lost on drop. Connectivity loss and slow links can be simulated.
pub struct MemoryBackend {
    bucket: String,
    objects: Arc<RwLock<BTreeMap<StoragePath, StoredObject>>>,
    policy: RwLock<AccessPolicy>,
    offline: AtomicBool,
    latency: RwLock<Vec<(StoragePath, Duration)>>,
}

impl MemoryBackend {
    /// Create an empty store with the default (authenticated) policy.
    pub fn new() -> Self {
        Self::with_policy(AccessPolicy::default())
    }

    /// Create an empty store with a custom access policy.
    pub fn with_policy(policy: AccessPolicy) -> Self {
        Self {
            bucket: "default".to_string(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            policy: RwLock::new(policy),
            offline: AtomicBool::new(false),
            latency: RwLock::new(Vec::new()),
        }
    }

    /// Name the bucket used in locators.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Replace the access policy.
    pub fn set_policy(&self, policy: AccessPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Simulate losing (or regaining) connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every call touching `prefix` (or below) by `delay`.
    ///
    /// # Errors
    /// - `prefix` is not a valid path
    pub fn set_latency(&self, prefix: &str, delay: Duration) -> Result<()> {
        let prefix = StoragePath::parse(prefix)?;
        let mut latency = self.latency.write().unwrap_or_else(PoisonError::into_inner);
        latency.retain(|(p, _)| *p != prefix);
        latency.push((prefix, delay));
        Ok(())
    }

    fn read_objects(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<StoragePath, StoredObject>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_objects(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<StoragePath, StoredObject>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulated transport: latency, connectivity, then the access policy.
    async fn round_trip(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        access: Access,
    ) -> Result<()> {
        let delay = self
            .latency
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(prefix, _)| prefix == path || prefix.is_ancestor_of(path))
            .map(|(_, delay)| *delay)
            .max();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network(format!(
                "Backend '{}' is unreachable",
                self.bucket
            )));
        }

        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .check(ctx, path, access)
    }

    fn require_object(path: &StoragePath) -> Result<()> {
        if path.is_root() {
            return Err(Error::InvalidInput(
                "The root reference does not denote an object".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<ObjectMetadata> {
        Self::require_object(path)?;
        self.round_trip(ctx, path, Access::Write).await?;

        let mut objects = self.write_objects();

        // An object cannot shadow a prefix that already holds objects, and
        // vice versa.
        if objects.keys().any(|key| path.is_ancestor_of(key)) {
            return Err(Error::AlreadyExists(format!(
                "{} is a directory-like prefix",
                path
            )));
        }
        if let Some(parent) = objects.keys().find(|key| key.is_ancestor_of(path)) {
            return Err(Error::InvalidInput(format!("Parent {} is an object", parent)));
        }

        let object = StoredObject {
            data,
            content_type: content_type.to_string(),
            modified: Utc::now(),
            etag: Uuid::new_v4().to_string(),
        };
        let metadata = object.metadata(path);
        objects.insert(path.clone(), object);

        Ok(metadata)
    }

    async fn locate(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        ttl: Option<Duration>,
    ) -> Result<DownloadLocator> {
        self.round_trip(ctx, path, Access::Read).await?;

        let expires_at = ttl.map(expiry_after).transpose()?;

        let objects = self.read_objects();
        let object = objects
            .get(path)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", path)))?;

        let mut url = format!(
            "memory://{}/{}",
            encode_path([self.bucket.as_str()]),
            encode_path(path.components().iter().map(String::as_str))
        );
        url.push_str(&format!("?rev={}", object.etag));

        Ok(DownloadLocator { url, expires_at })
    }

    async fn delete(&self, ctx: &RequestContext, path: &StoragePath) -> Result<()> {
        self.round_trip(ctx, path, Access::Write).await?;

        match self.write_objects().remove(path) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Object not found: {}", path))),
        }
    }

    async fn list(
        &self,
        ctx: &RequestContext,
        path: &StoragePath,
        options: &ListOptions,
    ) -> Result<Vec<String>> {
        self.round_trip(ctx, path, Access::Read).await?;

        let objects = self.read_objects();
        Ok(select_children(path, objects.keys(), options))
    }

    async fn stat(&self, ctx: &RequestContext, path: &StoragePath) -> Result<ObjectMetadata> {
        self.round_trip(ctx, path, Access::Read).await?;

        match self.read_objects().get(path) {
            Some(object) => Ok(object.metadata(path)),
            None => Err(Error::NotFound(format!("Object not found: {}", path))),
        }
    }

    async fn exists(&self, ctx: &RequestContext, path: &StoragePath) -> Result<bool> {
        self.round_trip(ctx, path, Access::Read).await?;
        Ok(self.read_objects().contains_key(path))
    }
}
