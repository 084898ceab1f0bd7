//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use skybucket_storage::ListOptions;

/// Default lifetime of download locators, in seconds.
const DEFAULT_LOCATOR_TTL_SECS: u64 = 3600;
/// Default number of operation records kept for inspection.
const DEFAULT_HISTORY_LIMIT: usize = 256;

/// Tunables of a [`crate::StorageClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Listing behavior (non-recursive, unpaginated by default).
    pub listing: ListOptions,
    /// Lifetime requested for download locators. `None` asks for
    /// non-expiring locators where the backend supports them.
    pub locator_ttl_secs: Option<u64>,
    /// Resolved operation records kept for [`crate::StorageClient::operation`].
    pub history_limit: usize,
}

impl ClientConfig {
    pub fn locator_ttl(&self) -> Option<Duration> {
        self.locator_ttl_secs.map(Duration::from_secs)
    }

    /// List every object below the reference instead of direct children.
    pub fn with_recursive_listing(mut self, recursive: bool) -> Self {
        self.listing.recursive = recursive;
        self
    }

    /// Cap listings at `page_size` names.
    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.listing.page_size = page_size;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listing: ListOptions::default(),
            locator_ttl_secs: Some(DEFAULT_LOCATOR_TTL_SECS),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}
