//! Common utilities and types shared across SkyBucket crates.
//!
//! This module provides the error model and the path/identifier types used by
//! the storage backends and the client facade.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{ResponseId, StoragePath};
