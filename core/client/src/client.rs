//! Reference-scoped asynchronous storage client.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use skybucket_common::{Error, ResponseId, Result};
use skybucket_storage::{guess_content_type, RequestContext, StorageBackend};

use crate::auth::AuthGate;
use crate::config::ClientConfig;
use crate::operation::{
    OperationId, OperationKind, OperationOutput, OperationTable, PendingOperation,
};
use crate::reference::StorageReference;
use crate::registry::AsyncResultRegistry;

/// Local content to upload.
pub enum UploadSource {
    /// A file on the local filesystem.
    File(PathBuf),
    /// Bytes already in memory, e.g. from an upload widget.
    Buffer {
        name: Option<String>,
        data: Vec<u8>,
        content_type: Option<String>,
    },
}

impl UploadSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        UploadSource::File(path.into())
    }

    pub fn buffer(data: impl Into<Vec<u8>>) -> Self {
        UploadSource::Buffer {
            name: None,
            data: data.into(),
            content_type: None,
        }
    }

    /// Original file name of a buffer, used to guess its content type.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        match self {
            UploadSource::Buffer {
                data, content_type, ..
            } => UploadSource::Buffer {
                name: Some(name.into()),
                data,
                content_type,
            },
            file => file,
        }
    }

    /// Explicit content type of a buffer.
    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        match self {
            UploadSource::Buffer { name, data, .. } => UploadSource::Buffer {
                name,
                data,
                content_type: Some(content_type.into()),
            },
            file => file,
        }
    }

    /// Read the content. Unreadable files are reported as `NotFound`.
    async fn load(self) -> Result<LoadedUpload> {
        match self {
            UploadSource::File(path) => {
                if path.as_os_str().is_empty() {
                    return Err(Error::InvalidInput("Local path is empty".to_string()));
                }
                let data = tokio::fs::read(&path).await.map_err(|e| {
                    Error::NotFound(format!("Cannot read {}: {}", path.display(), e))
                })?;
                Ok(LoadedUpload {
                    data,
                    name: path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(String::from),
                    content_type: None,
                })
            }
            UploadSource::Buffer {
                name,
                data,
                content_type,
            } => Ok(LoadedUpload {
                data,
                name,
                content_type,
            }),
        }
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadSource::Buffer {
                name,
                data,
                content_type,
            } => f
                .debug_struct("Buffer")
                .field("name", name)
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
        }
    }
}

impl From<&str> for UploadSource {
    fn from(path: &str) -> Self {
        UploadSource::file(path)
    }
}

impl From<String> for UploadSource {
    fn from(path: String) -> Self {
        UploadSource::file(path)
    }
}

impl From<&Path> for UploadSource {
    fn from(path: &Path) -> Self {
        UploadSource::file(path)
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::File(path)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        UploadSource::buffer(data)
    }
}

struct LoadedUpload {
    data: Vec<u8>,
    name: Option<String>,
    content_type: Option<String>,
}

/// Work carried by a dispatched operation.
enum Request {
    Upload(UploadSource),
    Download,
    Delete,
    List,
    Metadata,
}

impl Request {
    fn kind(&self) -> OperationKind {
        match self {
            Request::Upload(_) => OperationKind::Upload,
            Request::Download => OperationKind::Download,
            Request::Delete => OperationKind::Delete,
            Request::List => OperationKind::List,
            Request::Metadata => OperationKind::Metadata,
        }
    }
}

/// Builder for [`StorageClient`].
pub struct StorageClientBuilder {
    backend: Option<Arc<dyn StorageBackend>>,
    auth: Option<AuthGate>,
    registry: Option<AsyncResultRegistry>,
    config: ClientConfig,
    reference: StorageReference,
    runtime: Option<Handle>,
}

impl StorageClientBuilder {
    fn new() -> Self {
        Self {
            backend: None,
            auth: None,
            registry: None,
            config: ClientConfig::default(),
            reference: StorageReference::root(),
            runtime: None,
        }
    }

    /// Backend all operations are sent to. Required.
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Gate supplying the caller's session. Defaults to a signed-out session.
    pub fn auth(mut self, auth: AuthGate) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Share a registry with other clients. Defaults to a fresh one.
    pub fn registry(mut self, registry: AsyncResultRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial reference. Defaults to the root.
    pub fn reference(mut self, reference: impl Into<StorageReference>) -> Self {
        self.reference = reference.into();
        self
    }

    /// Runtime operations are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// # Errors
    /// - `InvalidInput` if no backend was given
    /// - `InvalidInput` if no runtime was given and none is running
    pub fn build(self) -> Result<StorageClient> {
        let backend = self
            .backend
            .ok_or_else(|| Error::InvalidInput("A storage backend is required".to_string()))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                Error::InvalidInput(
                    "StorageClient must be built inside a tokio runtime".to_string(),
                )
            })?,
        };

        let history_limit = self.config.history_limit;
        Ok(StorageClient {
            inner: Arc::new(ClientInner {
                backend,
                auth: self.auth.unwrap_or_else(AuthGate::anonymous),
                registry: self.registry.unwrap_or_default(),
                config: self.config,
                reference: RwLock::new(self.reference),
                operations: Mutex::new(OperationTable::new(history_limit)),
                tracker: TaskTracker::new(),
                settle_lock: tokio::sync::Mutex::new(()),
                runtime,
            }),
        })
    }
}

struct ClientInner {
    backend: Arc<dyn StorageBackend>,
    auth: AuthGate,
    registry: AsyncResultRegistry,
    config: ClientConfig,
    reference: RwLock<StorageReference>,
    operations: Mutex<OperationTable>,
    tracker: TaskTracker,
    settle_lock: tokio::sync::Mutex<()>,
    runtime: Handle,
}

impl ClientInner {
    fn operations(&self) -> MutexGuard<'_, OperationTable> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(
        &self,
        request: Request,
        ctx: &RequestContext,
        reference: &StorageReference,
    ) -> Result<OperationOutput> {
        let path = reference.resolve()?;
        let backend = &self.backend;

        match request {
            Request::Upload(source) => {
                let upload = source.load().await?;
                let content_type = upload
                    .content_type
                    .unwrap_or_else(|| guess_content_type(&path, upload.name.as_deref()));
                backend
                    .put(ctx, &path, upload.data, &content_type)
                    .await
                    .map(OperationOutput::Uploaded)
            }
            Request::Download => backend
                .locate(ctx, &path, self.config.locator_ttl())
                .await
                .map(OperationOutput::Located),
            Request::Delete => backend
                .delete(ctx, &path)
                .await
                .map(|()| OperationOutput::Deleted),
            Request::List => backend
                .list(ctx, &path, &self.config.listing)
                .await
                .map(OperationOutput::Listed),
            Request::Metadata => backend
                .stat(ctx, &path)
                .await
                .map(OperationOutput::Described),
        }
    }

    fn complete(
        &self,
        id: OperationId,
        response_id: Option<ResponseId>,
        outcome: Result<OperationOutput>,
    ) {
        let resolved = self.operations().resolve(id, outcome);

        let Some(op) = resolved else {
            warn!("Operation {} resolved twice or vanished", id);
            return;
        };
        match &op.error {
            None => info!("{} of '{}' succeeded", op.kind, op.reference),
            Some(err) => warn!("{} of '{}' failed: {}", op.kind, op.reference, err),
        }

        if let Some(response_id) = response_id {
            self.registry.publish(&response_id, op);
        }
    }
}

/// Facade over a storage backend, scoped by a current reference.
///
/// Every operation returns at once with an [`OperationId`]; the backend call
/// runs on the client's runtime and its outcome is published to the
/// [`AsyncResultRegistry`] under the caller's response identifier. Without an
/// identifier the outcome is discarded. Operations use the reference and the
/// session token as they were at dispatch time. A backend call that panics
/// resolves as an internal failure.
///
/// Cloning yields another handle to the same client.
#[derive(Clone)]
pub struct StorageClient {
    inner: Arc<ClientInner>,
}

impl StorageClient {
    pub fn builder() -> StorageClientBuilder {
        StorageClientBuilder::new()
    }

    /// Point subsequent operations at `reference`. Never fails; the path is
    /// validated by the operations that use it.
    pub fn set_reference(&self, reference: impl Into<StorageReference>) {
        let reference = reference.into();
        debug!("Reference set to '{}'", reference);
        *self
            .inner
            .reference
            .write()
            .unwrap_or_else(PoisonError::into_inner) = reference;
    }

    pub fn reference(&self) -> StorageReference {
        self.inner
            .reference
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_reference(&self) -> String {
        self.reference().path().to_string()
    }

    /// Upload local content to the current reference.
    ///
    /// Resolves to the stored object's metadata, or fails with `NotFound`
    /// (unreadable source), `PermissionDenied` or `Network`.
    pub fn upload_file(
        &self,
        source: impl Into<UploadSource>,
        response_id: Option<&str>,
    ) -> OperationId {
        self.dispatch(Request::Upload(source.into()), response_id)
    }

    /// Resolve a download locator for the object at the current reference.
    pub fn download_file(&self, response_id: Option<&str>) -> OperationId {
        self.dispatch(Request::Download, response_id)
    }

    /// Delete the object at the current reference.
    pub fn delete_file(&self, response_id: Option<&str>) -> OperationId {
        self.dispatch(Request::Delete, response_id)
    }

    /// List names under the current reference, sorted. An empty prefix
    /// resolves to an empty list.
    pub fn list_files(&self, response_id: Option<&str>) -> OperationId {
        self.dispatch(Request::List, response_id)
    }

    /// Fetch size, content type and modification time of the object at the
    /// current reference.
    pub fn get_metadata(&self, response_id: Option<&str>) -> OperationId {
        self.dispatch(Request::Metadata, response_id)
    }

    /// Record of a dispatched operation, while it is kept in history.
    pub fn operation(&self, id: OperationId) -> Option<PendingOperation> {
        self.inner.operations().get(id)
    }

    /// Number of dispatched operations not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.inner.operations().in_flight()
    }

    /// Wait until every operation dispatched so far has resolved.
    pub async fn settle(&self) {
        let _guard = self.inner.settle_lock.lock().await;
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    pub fn registry(&self) -> &AsyncResultRegistry {
        &self.inner.registry
    }

    pub fn auth(&self) -> &AuthGate {
        &self.inner.auth
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn dispatch(&self, request: Request, response_id: Option<&str>) -> OperationId {
        let kind = request.kind();
        let reference = self.reference();

        let response_id = response_id.and_then(|raw| match ResponseId::new(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Discarding outcome of {}: {}", kind, e);
                None
            }
        });

        let ctx = match self.inner.auth.session().current_user_token() {
            Some(token) => RequestContext::with_token(token),
            None => RequestContext::anonymous(),
        };

        let op = PendingOperation::new(kind, response_id.clone(), reference.path());
        let id = op.id;
        self.inner.operations().insert(op);

        debug!(
            "Dispatching {} {} on '{}' (response: {:?})",
            kind,
            id,
            reference,
            response_id.as_ref().map(ResponseId::as_str)
        );

        let inner = Arc::clone(&self.inner);
        let span = info_span!("storage_operation", id = %id, kind = %kind);
        self.inner.tracker.spawn_on(
            async move {
                let outcome = AssertUnwindSafe(inner.execute(request, &ctx, &reference))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(Error::Storage(format!(
                            "Backend call panicked: {}",
                            panic_message(&*panic)
                        )))
                    });
                inner.complete(id, response_id, outcome);
            }
            .instrument(span),
            &self.inner.runtime,
        );

        id
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("backend", &self.inner.backend.name())
            .field("reference", &self.reference())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
