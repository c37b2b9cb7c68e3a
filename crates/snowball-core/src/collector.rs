use futures::future::BoxFuture;
use snowball_common::config::{CrawlConfig, ModeLimits};
use snowball_common::{FailureStats, FetchError, Handle, Post, RelationMap};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::client::{Page, RelationSource};
use crate::fetch::{FetchOutcome, Governor, Paginator, RetryPolicy};

/// Accounts whose fetch needed more retries than this are reported loudly.
const NOISY_TRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectMode {
    Followers,
    Content,
}

impl CollectMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectMode::Followers => "followers",
            CollectMode::Content => "content",
        }
    }
}

impl fmt::Display for CollectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item type gathered in one collection mode.
pub trait Relation: Sized + Send + 'static {
    const MODE: CollectMode;

    /// Identity used to drop repeated items within one account's list.
    fn key(&self) -> &str;

    /// Whether the item may enter a collection at all.
    fn is_usable(&self) -> bool {
        true
    }

    fn fetch_page<'a>(
        source: &'a dyn RelationSource,
        actor: &'a Handle,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<Self>, FetchError>>;
}

impl Relation for Handle {
    const MODE: CollectMode = CollectMode::Followers;

    fn key(&self) -> &str {
        self.as_str()
    }

    fn is_usable(&self) -> bool {
        self.is_valid()
    }

    fn fetch_page<'a>(
        source: &'a dyn RelationSource,
        actor: &'a Handle,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<Self>, FetchError>> {
        Box::pin(async move { source.followers_page(actor, cursor.as_deref()).await })
    }
}

impl Relation for Post {
    const MODE: CollectMode = CollectMode::Content;

    fn key(&self) -> &str {
        &self.uri
    }

    fn fetch_page<'a>(
        source: &'a dyn RelationSource,
        actor: &'a Handle,
        cursor: Option<String>,
    ) -> BoxFuture<'a, Result<Page<Self>, FetchError>> {
        Box::pin(async move { source.feed_page(actor, cursor.as_deref()).await })
    }
}

/// Relations gathered for one work list.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    /// Accounts whose fetch yielded a result, including partial ones.
    pub relations: RelationMap<T>,
    pub failures: FailureStats,
    pub attempted: usize,
}

impl<T> Collection<T> {
    fn new(attempted: usize) -> Self {
        Self { relations: HashMap::new(), failures: FailureStats::default(), attempted }
    }

    /// Every related item across all accounts, first occurrence kept.
    pub fn flatten_unique(&self) -> Vec<&T>
    where
        T: Relation,
    {
        let mut seen = HashSet::new();
        let mut accounts: Vec<&Handle> = self.relations.keys().collect();
        accounts.sort();
        accounts
            .into_iter()
            .flat_map(|account| self.relations[account].iter())
            .filter(|item| seen.insert(item.key().to_string()))
            .collect()
    }
}

/// Accounts that passed the activity check, and what the check cost.
#[derive(Debug, Clone, Default)]
pub struct ActivityCheck {
    pub active: Vec<Handle>,
    pub post_counts: HashMap<Handle, usize>,
    pub failures: FailureStats,
}

struct ModeRuntime {
    paginator: Paginator,
    item_cap: usize,
    task_slots: Option<Semaphore>,
}

impl ModeRuntime {
    fn new(limits: &ModeLimits, crawl: &CrawlConfig) -> Self {
        let governor = Governor::new(
            limits.global_concurrency,
            limits.per_host_concurrency,
            crawl.batch_size,
            crawl.batch_pause(),
        );
        let policy = RetryPolicy::from_config(crawl, limits.max_tries);
        Self {
            paginator: Paginator::new(governor, policy, limits.page_pause()),
            item_cap: limits.item_cap,
            task_slots: limits.task_concurrency.map(|n| Semaphore::new(n.max(1))),
        }
    }
}

/// Runs the paginated fetch over a list of accounts for either relation,
/// absorbing per-account failures into statistics.
pub struct RelationCollector {
    source: Arc<dyn RelationSource>,
    followers: ModeRuntime,
    content: ModeRuntime,
}

impl RelationCollector {
    pub fn new(source: Arc<dyn RelationSource>, crawl: &CrawlConfig) -> Self {
        Self {
            followers: ModeRuntime::new(&crawl.followers, crawl),
            content: ModeRuntime::new(&crawl.content, crawl),
            source,
        }
    }

    fn runtime(&self, mode: CollectMode) -> &ModeRuntime {
        match mode {
            CollectMode::Followers => &self.followers,
            CollectMode::Content => &self.content,
        }
    }

    pub async fn collect_followers(&self, accounts: &[Handle]) -> Collection<Handle> {
        self.collect(accounts, self.followers.item_cap).await
    }

    pub async fn collect_posts(&self, accounts: &[Handle]) -> Collection<Post> {
        self.collect(accounts, self.content.item_cap).await
    }

    /// Counts posts per account, stopping each account at `min_posts`, and
    /// keeps the accounts that reach it.
    pub async fn filter_active(&self, accounts: &[Handle], min_posts: usize) -> ActivityCheck {
        let limit = min_posts.clamp(1, self.content.item_cap.max(1));
        let collection: Collection<Post> = self.collect(accounts, limit).await;

        let post_counts: HashMap<Handle, usize> = accounts
            .iter()
            .map(|account| {
                let count = collection.relations.get(account).map_or(0, Vec::len);
                (account.clone(), count)
            })
            .collect();
        let active = retain_active(&post_counts, min_posts);

        tracing::info!(
            checked = accounts.len(),
            active = active.len(),
            min_posts,
            "Activity filter applied"
        );

        ActivityCheck { active, post_counts, failures: collection.failures }
    }

    async fn collect<T: Relation>(&self, accounts: &[Handle], cap: usize) -> Collection<T> {
        let runtime = self.runtime(T::MODE);
        let source = self.source.as_ref();
        let host = source.host();

        let outcomes = runtime.paginator.governor()
            .run_batched(accounts, move |actor| async move {
                let _slot = match &runtime.task_slots {
                    Some(slots) => slots.acquire().await.ok(),
                    None => None,
                };
                runtime.paginator
                    .fetch_all(host, actor.clone(), cap, |cursor| T::fetch_page(source, actor, cursor))
                    .await
            })
            .await;

        let mut collection = Collection::new(accounts.len());
        for outcome in outcomes {
            absorb(&mut collection, outcome);
        }

        tracing::debug!(
            mode = %T::MODE,
            attempted = collection.attempted,
            collected = collection.relations.len(),
            failed = collection.failures.total_failures(),
            "Collection finished"
        );
        collection
    }
}

fn absorb<T: Relation>(collection: &mut Collection<T>, outcome: FetchOutcome<T>) {
    let FetchOutcome { actor, items, retries, failure, .. } = outcome;
    collection.failures.record_retries(retries.tries, retries.rate_limited);

    if let Some(failure) = failure {
        if failure.tries > NOISY_TRIES {
            tracing::warn!(actor = %actor, mode = %T::MODE, tries = failure.tries, kind = %failure.kind(), "Fetch failed: {}", failure.message);
        } else {
            tracing::debug!(actor = %actor, mode = %T::MODE, tries = failure.tries, kind = %failure.kind(), "Fetch failed: {}", failure.message);
        }

        if items.is_empty() {
            collection.failures.record(&failure);
            return;
        }
        collection.failures.partial += 1;
    }

    collection.relations.insert(actor, dedupe(items));
}

fn dedupe<T: Relation>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| item.is_usable() && seen.insert(item.key().to_string()))
        .collect()
}

/// Accounts whose observed post count is at least `min_posts`, sorted.
pub fn retain_active(post_counts: &HashMap<Handle, usize>, min_posts: usize) -> Vec<Handle> {
    let mut active: Vec<Handle> = post_counts
        .iter()
        .filter(|(_, count)| **count >= min_posts)
        .map(|(account, _)| account.clone())
        .collect();
    active.sort();
    active
}
