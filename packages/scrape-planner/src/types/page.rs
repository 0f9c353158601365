//! Page snapshots handed to the resolvers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An immutable capture of a page's HTML.
///
/// Owned by the caller; the resolvers only read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// URL the HTML was fetched from (used to resolve relative links)
    pub url: String,

    /// Raw HTML
    pub html: String,

    /// When the page was fetched
    pub fetched_at: DateTime<Utc>,
}

impl PageSnapshot {
    /// Create a snapshot fetched now.
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Set the fetched timestamp.
    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// SHA-256 of the HTML, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.html.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Parse the page URL.
    pub fn base_url(&self) -> Option<url::Url> {
        url::Url::parse(&self.url).ok()
    }
}
