//! SkyBucket client facade.
//!
//! A [`StorageClient`] is pointed at a [`StorageReference`] and fires
//! upload, download, delete, list and metadata operations against a storage
//! backend without blocking. Outcomes land in an [`AsyncResultRegistry`]
//! under the response identifier the caller chose, where the host reads,
//! awaits or subscribes to them. An [`AuthGate`] tells the host whether to
//! offer the actions at all.
//!
//! ```no_run
//! use std::sync::Arc;
//! use skybucket_client::{AuthGate, StorageClient, TokenSession, UploadSource};
//! use skybucket_storage::MemoryBackend;
//!
//! # async fn demo() -> skybucket_common::Result<()> {
//! let gate = AuthGate::new(Arc::new(TokenSession::new()));
//! let client = StorageClient::builder()
//!     .backend(Arc::new(MemoryBackend::new()))
//!     .auth(gate.clone())
//!     .build()?;
//!
//! gate.when_signed_in(|| {
//!     client.set_reference("images/cat.png");
//!     client.upload_file(UploadSource::file("/tmp/cat.png"), Some("up"));
//! });
//!
//! let outcome = client.registry().resolved("up").await?;
//! println!("{:?}", outcome.status);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod operation;
pub mod reference;
pub mod registry;

pub use auth::{AuthGate, SessionProvider, TokenSession, Tokens};
pub use client::{StorageClient, StorageClientBuilder, UploadSource};
pub use config::ClientConfig;
pub use operation::{
    OperationError, OperationId, OperationKind, OperationOutput, OperationStatus,
    PendingOperation,
};
pub use reference::StorageReference;
pub use registry::{AsyncResultRegistry, Observer, ResultState, SubscriptionId};
