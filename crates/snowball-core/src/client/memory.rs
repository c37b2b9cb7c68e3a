//! In-memory [`RelationSource`] used for offline runs, demos and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use snowball_common::{FetchError, Handle, Post};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Page, RelationSource};

pub const MEMORY_HOST: &str = "memory.local";

/// Serves follower lists and feeds from maps, paginating with numeric
/// offset cursors. Unknown accounts answer like a 404.
pub struct MemorySource {
    host: String,
    page_size: usize,
    latency: Duration,
    followers: HashMap<Handle, Vec<Handle>>,
    posts: HashMap<Handle, Vec<Post>>,
    scripted: DashMap<Handle, VecDeque<FetchError>>,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            host: MEMORY_HOST.to_string(),
            page_size: 100,
            latency: Duration::ZERO,
            followers: HashMap::new(),
            posts: HashMap::new(),
            scripted: DashMap::new(),
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Simulated round-trip time for every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_followers<I, S>(mut self, actor: &str, followers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.followers
            .insert(Handle::new(actor), followers.into_iter().map(Handle::new).collect());
        self
    }

    /// Gives `actor` `count` generated posts.
    pub fn with_post_count(mut self, actor: &str, count: usize) -> Self {
        let handle = Handle::new(actor);
        let posts = (0..count)
            .map(|i| Post {
                uri: format!("at://{}/app.bsky.feed.post/{}", handle, i),
                text: format!("post {} by {}", i, handle),
                created_at: None,
            })
            .collect();
        self.posts.insert(handle, posts);
        self
    }

    /// Queues errors returned, in order, by the next requests for `actor`.
    pub fn fail_with<I>(self, actor: &str, errors: I) -> Self
    where
        I: IntoIterator<Item = FetchError>,
    {
        self.scripted.entry(Handle::new(actor)).or_default().extend(errors);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Highest number of requests observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn serve<T: Clone>(
        &self,
        actor: &Handle,
        cursor: Option<&str>,
        items: Option<&Vec<T>>,
    ) -> Result<Page<T>, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let result = self.page_of(actor, cursor, items);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn page_of<T: Clone>(
        &self,
        actor: &Handle,
        cursor: Option<&str>,
        items: Option<&Vec<T>>,
    ) -> Result<Page<T>, FetchError> {
        let scripted = self.scripted.get_mut(actor).and_then(|mut queue| queue.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }

        let items = items.ok_or(FetchError::Rejected { status: 404 })?;
        let offset = match cursor {
            Some(raw) => raw.parse::<usize>().map_err(|_| FetchError::Rejected { status: 400 })?,
            None => 0,
        };

        let end = (offset + self.page_size).min(items.len());
        let slice = items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default();
        let next = (end < items.len()).then(|| end.to_string());
        let scanned = slice.len();
        Ok(Page::new(slice, next, scanned))
    }
}

#[async_trait]
impl RelationSource for MemorySource {
    fn host(&self) -> &str {
        &self.host
    }

    async fn followers_page(&self, actor: &Handle, cursor: Option<&str>) -> Result<Page<Handle>, FetchError> {
        self.serve(actor, cursor, self.followers.get(actor)).await
    }

    async fn feed_page(&self, actor: &Handle, cursor: Option<&str>) -> Result<Page<Post>, FetchError> {
        self.serve(actor, cursor, self.posts.get(actor)).await
    }
}
