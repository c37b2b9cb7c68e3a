use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use snowball_common::FetchError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held for the duration of one request; releases both slots on drop.
pub struct RequestPermit {
    _host: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

/// Bounds in-flight requests globally and per remote host, and paces work
/// lists through sequential batches.
pub struct Governor {
    global: Arc<Semaphore>,
    per_host: DashMap<String, Arc<Semaphore>>,
    per_host_limit: usize,
    batch_size: usize,
    batch_pause: Duration,
}

impl Governor {
    pub fn new(global_limit: usize, per_host_limit: usize, batch_size: usize, batch_pause: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit.max(1))),
            per_host: DashMap::new(),
            per_host_limit: per_host_limit.max(1),
            batch_size: batch_size.max(1),
            batch_pause,
        }
    }

    fn host_slots(&self, host: &str) -> Arc<Semaphore> {
        self.per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    /// Waits for a per-host slot, then a global one.
    pub async fn acquire(&self, host: &str) -> Result<RequestPermit, FetchError> {
        let host_permit = self.host_slots(host)
            .acquire_owned()
            .await
            .map_err(FetchError::unexpected)?;
        let global_permit = self.global.clone()
            .acquire_owned()
            .await
            .map_err(FetchError::unexpected)?;
        Ok(RequestPermit { _host: host_permit, _global: global_permit })
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    /// Runs `task` for every item, one batch at a time. Tasks inside a batch
    /// are polled together and collected in completion order; the next batch
    /// starts only once the whole batch has finished.
    pub async fn run_batched<'a, I, T, F, Fut>(&self, items: &'a [I], mut task: F) -> Vec<T>
    where
        F: FnMut(&'a I) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut results = Vec::with_capacity(items.len());
        let batch_count = items.len().div_ceil(self.batch_size);

        for (idx, batch) in items.chunks(self.batch_size).enumerate() {
            let mut in_flight: FuturesUnordered<Fut> = batch.iter().map(&mut task).collect();
            while let Some(result) = in_flight.next().await {
                results.push(result);
            }

            tracing::debug!(batch = idx + 1, batches = batch_count, done = results.len(), "Batch complete");

            if idx + 1 < batch_count && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_sequentially_with_pause() {
        let governor = Governor::new(10, 10, 3, Duration::from_millis(300));
        let items: Vec<u32> = (0..7).collect();
        let started = tokio::time::Instant::now();

        let results = governor
            .run_batched(&items, |n| {
                let n = *n;
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    n * 2
                }
            })
            .await;

        let mut sorted = results.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 2, 4, 6, 8, 10, 12]);
        // three batches of 100ms work, two pauses between them
        assert_eq!(started.elapsed(), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_completion_order() {
        let governor = Governor::new(10, 10, 10, Duration::ZERO);
        let items = vec![300u64, 100, 200];

        let results = governor
            .run_batched(&items, |delay| {
                let delay = *delay;
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay
                }
            })
            .await;

        assert_eq!(results, vec![100, 200, 300]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_host_ceiling_bounds_in_flight() {
        let governor = Governor::new(50, 2, 20, Duration::ZERO);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<usize> = (0..20).collect();

        let (gov, counter, high) = (&governor, &in_flight, &peak);

        governor
            .run_batched(&items, move |_| async move {
                let _permit = gov.acquire("api.example").await.unwrap();
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                high.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            })
            .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(governor.available_global(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_metered_separately() {
        let governor = Governor::new(10, 1, 10, Duration::ZERO);

        let first = governor.acquire("a.example").await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(10), governor.acquire("b.example")).await;
        assert!(second.is_ok());

        let blocked = tokio::time::timeout(Duration::from_millis(10), governor.acquire("a.example")).await;
        assert!(blocked.is_err());

        drop(first);
        assert!(governor.acquire("a.example").await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_work_list() {
        let governor = Governor::new(1, 1, 100, Duration::from_secs(5));
        let results: Vec<u8> = governor.run_batched(&Vec::<u8>::new(), |n| {
            let n = *n;
            async move { n }
        }).await;
        assert!(results.is_empty());
    }
}
