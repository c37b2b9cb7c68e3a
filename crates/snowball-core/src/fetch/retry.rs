use snowball_common::config::CrawlConfig;
use snowball_common::{FetchError, FetchFailure};
use std::future::Future;
use std::time::Duration;

/// Retries consumed by one account's fetch, across all of its pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub tries: u32,
    pub rate_limited: u32,
}

/// Retry/backoff policy wrapped around single page requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_tries: u32,
    /// Length of one backoff unit; waits are `min(2^tries, cap_units)` units.
    pub unit: Duration,
    pub cap_units: u64,
}

impl RetryPolicy {
    pub fn new(max_tries: u32, unit: Duration, cap_units: u64) -> Self {
        Self { max_tries, unit, cap_units }
    }

    pub fn from_config(crawl: &CrawlConfig, max_tries: u32) -> Self {
        Self::new(max_tries, crawl.backoff_unit(), crawl.backoff_cap_units)
    }

    pub fn backoff(&self, tries: u32) -> Duration {
        let units = 2u64.saturating_pow(tries).min(self.cap_units);
        self.unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    /// Runs `attempt` until it succeeds, fails terminally, or the budget in
    /// `state` runs out. `state` carries over between calls so the budget
    /// spans every page of one account.
    pub async fn run<T, F, Fut>(&self, state: &mut RetryState, mut attempt: F) -> Result<T, FetchFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        loop {
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(FetchFailure::terminal(&err, state.tries));
            }

            state.tries += 1;
            if err == FetchError::RateLimited {
                state.rate_limited += 1;
            }
            if state.tries > self.max_tries {
                return Err(FetchFailure::exhausted(&err, state.tries));
            }

            let wait = self.backoff(state.tries);
            tracing::debug!(tries = state.tries, kind = %err.kind(), wait_ms = wait.as_millis() as u64, "Retrying after {}", err);
            tokio::time::sleep(wait).await;
        }
    }
}
