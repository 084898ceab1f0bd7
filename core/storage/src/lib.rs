//! Object storage backends for SkyBucket.
//!
//! This module provides a trait-based interface for object stores and a
//! backend registry for resolving a backend from configuration. Two backends
//! ship with the crate: an in-memory store with a configurable access policy
//! and a local-filesystem store.
//!
//! # Design Principles
//! - Backend isolation: the client facade never sees backend internals
//! - Async operations: all I/O operations are async
//! - Caller context: every call carries the caller's token so the backend,
//!   not the client, decides what is permitted
//! - Unified error semantics: consistent error kinds across backends

pub mod backend;
pub mod local;
pub mod memory;
pub mod registry;

pub use backend::{
    guess_content_type, Access, DownloadLocator, ListOptions, ObjectMetadata, RequestContext,
    StorageBackend,
};
pub use local::LocalBackend;
pub use memory::{AccessPolicy, MemoryBackend};
pub use registry::{create_default_registry, BackendFactory, BackendRegistry};
