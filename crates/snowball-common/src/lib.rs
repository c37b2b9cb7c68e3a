use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

pub mod config;
pub mod error;

pub use error::{FailureCategory, FailureKind, FailureStats, FetchError, FetchFailure};

/// Sentinel the API returns in place of a handle it cannot resolve.
pub const INVALID_HANDLE: &str = "handle.invalid";

/// Account handle on the remote platform.
///
/// Handles are trimmed and lower-cased on construction, so two handles are
/// equal exactly when their normalized strings are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    /// Normalizes `raw`, returning `None` for empty or sentinel handles.
    pub fn parse(raw: impl AsRef<str>) -> Option<Self> {
        let handle = Self::new(raw);
        handle.is_valid().then_some(handle)
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0 != INVALID_HANDLE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Handle {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Handle {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl Borrow<str> for Handle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Breadth-first discovery distance from the seed accounts.
pub type Level = u32;

/// Account -> related items collected for one crawl level.
pub type RelationMap<T> = HashMap<Handle, Vec<T>>;

/// An original post (not a reply, not a repost) from an author feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub uri: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
}
