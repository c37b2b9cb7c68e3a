pub mod bluesky;
pub mod memory;

pub use bluesky::BlueskyClient;
pub use memory::MemorySource;

use anyhow::Result;
use async_trait::async_trait;
use snowball_common::config::AppConfig;
use snowball_common::{FetchError, Handle, Post};
use std::sync::Arc;

pub fn create_source(config: &AppConfig) -> Result<Arc<dyn RelationSource>> {
    Ok(Arc::new(BlueskyClient::from_config(config)?))
}

/// One page of a paginated relation endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
    /// Raw entries the response carried before filtering. Zero means the
    /// endpoint has nothing more to give, whatever the cursor says.
    pub scanned: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, cursor: Option<String>, scanned: usize) -> Self {
        let cursor = cursor.filter(|c| !c.is_empty());
        Self { items, cursor, scanned }
    }
}

/// Remote API exposing the two relations the crawler walks.
#[async_trait]
pub trait RelationSource: Send + Sync {
    /// Host the concurrency governor meters this source against.
    fn host(&self) -> &str;

    async fn followers_page(&self, actor: &Handle, cursor: Option<&str>) -> Result<Page<Handle>, FetchError>;

    async fn feed_page(&self, actor: &Handle, cursor: Option<&str>) -> Result<Page<Post>, FetchError>;
}
