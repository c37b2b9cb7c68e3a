use snowball_common::{FetchError, FetchFailure, Handle};
use std::future::Future;
use std::time::Duration;

use super::governor::Governor;
use super::retry::{RetryPolicy, RetryState};
use crate::client::Page;

/// Result of walking every page of one account's relation.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<T> {
    pub actor: Handle,
    pub items: Vec<T>,
    pub retries: RetryState,
    /// Set when the walk ended on a terminal failure. `items` then holds
    /// whatever earlier pages yielded.
    pub failure: Option<FetchFailure>,
    pub pages: usize,
}

impl<T> FetchOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Cursor-following page loop. Every page request runs under the retry
/// policy and holds a governor permit while in flight.
pub struct Paginator {
    governor: Governor,
    policy: RetryPolicy,
    page_pause: Duration,
}

impl Paginator {
    pub fn new(governor: Governor, policy: RetryPolicy, page_pause: Duration) -> Self {
        Self { governor, policy, page_pause }
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Collects up to `cap` items for `actor`. Stops on a page without a
    /// cursor, on an empty page, once the cap is reached, or on the first
    /// terminal failure.
    pub async fn fetch_all<T, F, Fut>(&self, host: &str, actor: Handle, cap: usize, mut page: F) -> FetchOutcome<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<Page<T>, FetchError>>,
    {
        let mut outcome = FetchOutcome {
            actor,
            items: Vec::new(),
            retries: RetryState::default(),
            failure: None,
            pages: 0,
        };
        let mut cursor: Option<String> = None;

        loop {
            let governor = &self.governor;
            let result = self.policy
                .run(&mut outcome.retries, || {
                    let request = page(cursor.clone());
                    async move {
                        let _permit = governor.acquire(host).await?;
                        request.await
                    }
                })
                .await;

            let fetched = match result {
                Ok(fetched) => fetched,
                Err(failure) => {
                    outcome.failure = Some(failure);
                    break;
                }
            };

            outcome.pages += 1;
            outcome.items.extend(fetched.items);
            if outcome.items.len() >= cap {
                outcome.items.truncate(cap);
                break;
            }
            if fetched.scanned == 0 {
                break;
            }
            match fetched.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }

            if !self.page_pause.is_zero() {
                tokio::time::sleep(self.page_pause).await;
            }
        }

        outcome
    }
}
