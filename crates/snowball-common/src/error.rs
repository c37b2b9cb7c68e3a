//! Failure taxonomy for remote fetches.
//!
//! A [`FetchError`] describes one failed attempt. The retry policy turns the
//! attempts of one account into at most one terminal [`FetchFailure`], and the
//! collector folds those into [`FailureStats`] for the end-of-run report.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Longest message kept for unexpected failures.
pub const MAX_MESSAGE_CHARS: usize = 50;

/// One failed request attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Transport(String),

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("account unavailable (HTTP {status})")]
    Rejected { status: u16 },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FetchError {
    /// Builds an [`FetchError::Unexpected`] with its message truncated.
    pub fn unexpected(message: impl fmt::Display) -> Self {
        FetchError::Unexpected(truncate_message(&message.to_string()))
    }

    pub fn transport(message: impl fmt::Display) -> Self {
        FetchError::Transport(truncate_message(&message.to_string()))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Timeout | FetchError::Transport(_) => FailureKind::TransientNetwork,
            FetchError::RateLimited => FailureKind::RateLimited,
            FetchError::Server { .. } => FailureKind::ServerError,
            FetchError::Rejected { .. } => FailureKind::AccountUnavailable,
            FetchError::Unexpected(_) => FailureKind::Unexpected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

pub fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientNetwork,
    RateLimited,
    ServerError,
    AccountUnavailable,
    Unexpected,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::TransientNetwork | FailureKind::RateLimited | FailureKind::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::TransientNetwork => "transient network",
            FailureKind::RateLimited => "rate limited",
            FailureKind::ServerError => "server error",
            FailureKind::AccountUnavailable => "account unavailable",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket a terminal failure is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureCategory {
    /// Rejected by the API on the first try it was seen; never retried.
    AccountUnavailable,
    Unexpected,
    /// A retryable failure that kept happening past the retry budget.
    ExhaustedRetries(FailureKind),
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCategory::AccountUnavailable => f.write_str("account unavailable"),
            FailureCategory::Unexpected => f.write_str("unexpected"),
            FailureCategory::ExhaustedRetries(kind) => write!(f, "exhausted retries ({})", kind),
        }
    }
}

impl Serialize for FailureCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Terminal outcome of a fetch that gave up.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{category} after {tries} tries: {message}")]
pub struct FetchFailure {
    pub category: FailureCategory,
    pub tries: u32,
    pub message: String,
}

impl FetchFailure {
    /// Terminal failure for an error the policy does not retry.
    pub fn terminal(error: &FetchError, tries: u32) -> Self {
        let category = match error.kind() {
            FailureKind::AccountUnavailable => FailureCategory::AccountUnavailable,
            _ => FailureCategory::Unexpected,
        };
        Self { category, tries, message: error.to_string() }
    }

    /// Terminal failure for a retryable error that ran out of budget.
    pub fn exhausted(error: &FetchError, tries: u32) -> Self {
        Self {
            category: FailureCategory::ExhaustedRetries(error.kind()),
            tries,
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self.category {
            FailureCategory::AccountUnavailable => FailureKind::AccountUnavailable,
            FailureCategory::Unexpected => FailureKind::Unexpected,
            FailureCategory::ExhaustedRetries(kind) => kind,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.category, FailureCategory::ExhaustedRetries(_))
    }
}

/// Failure counters accumulated over a collection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureStats {
    pub by_category: BTreeMap<FailureCategory, usize>,
    /// Accounts that failed after yielding some items and were kept.
    pub partial: usize,
    /// Retries consumed across all accounts, rate-limit retries included.
    pub retries: u64,
    pub rate_limited_retries: u64,
}

impl FailureStats {
    pub fn record(&mut self, failure: &FetchFailure) {
        *self.by_category.entry(failure.category).or_default() += 1;
    }

    pub fn record_retries(&mut self, retries: u32, rate_limited: u32) {
        self.retries += u64::from(retries);
        self.rate_limited_retries += u64::from(rate_limited);
    }

    pub fn count(&self, category: FailureCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn total_failures(&self) -> usize {
        self.by_category.values().sum()
    }

    /// Categories ordered by count, most frequent first.
    pub fn ranked(&self) -> Vec<(FailureCategory, usize)> {
        let mut ranked: Vec<_> = self.by_category.iter().map(|(c, n)| (*c, *n)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    pub fn merge(&mut self, other: &FailureStats) {
        for (category, count) in &other.by_category {
            *self.by_category.entry(*category).or_default() += count;
        }
        self.partial += other.partial;
        self.retries += other.retries;
        self.rate_limited_retries += other.rate_limited_retries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(FetchError::Timeout.kind(), FailureKind::TransientNetwork);
        assert_eq!(FetchError::RateLimited.kind(), FailureKind::RateLimited);
        assert_eq!(FetchError::Server { status: 503 }.kind(), FailureKind::ServerError);
        assert_eq!(FetchError::Rejected { status: 404 }.kind(), FailureKind::AccountUnavailable);
        assert!(!FetchError::Rejected { status: 400 }.is_retryable());
        assert!(!FetchError::unexpected("boom").is_retryable());
        assert!(FetchError::transport("reset by peer").is_retryable());
    }

    #[test]
    fn test_unexpected_message_truncated() {
        let long = "x".repeat(200);
        match FetchError::unexpected(&long) {
            FetchError::Unexpected(msg) => assert_eq!(msg.chars().count(), MAX_MESSAGE_CHARS),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_failure_categories() {
        let rejected = FetchFailure::terminal(&FetchError::Rejected { status: 404 }, 0);
        assert_eq!(rejected.category, FailureCategory::AccountUnavailable);
        assert!(!rejected.is_exhausted());

        let exhausted = FetchFailure::exhausted(&FetchError::RateLimited, 6);
        assert_eq!(exhausted.category, FailureCategory::ExhaustedRetries(FailureKind::RateLimited));
        assert_eq!(exhausted.kind(), FailureKind::RateLimited);
        assert!(exhausted.is_exhausted());
    }

    #[test]
    fn test_stats_ranked_and_serialized() {
        let mut stats = FailureStats::default();
        let rejected = FetchFailure::terminal(&FetchError::Rejected { status: 404 }, 0);
        let timeout = FetchFailure::exhausted(&FetchError::Timeout, 6);
        stats.record(&rejected);
        stats.record(&rejected);
        stats.record(&timeout);
        stats.record_retries(6, 0);

        assert_eq!(stats.total_failures(), 3);
        assert_eq!(stats.ranked()[0], (FailureCategory::AccountUnavailable, 2));

        let json = serde_json::to_value(&stats).expect("Failed to serialize");
        assert_eq!(json["by_category"]["account unavailable"], 2);
        assert_eq!(json["by_category"]["exhausted retries (transient network)"], 1);
        assert_eq!(json["retries"], 6);
    }
}
