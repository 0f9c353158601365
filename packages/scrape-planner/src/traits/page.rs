//! Browser/DOM provider contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::page::PageSnapshot;

/// Supplies page snapshots; the core never fetches pages itself.
#[async_trait]
pub trait PageProvider: Send + Sync {
    /// Snapshot the page at `url`.
    async fn snapshot(&self, url: &str) -> Result<PageSnapshot>;
}
