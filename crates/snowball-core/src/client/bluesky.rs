use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use snowball_common::config::AppConfig;
use snowball_common::{FetchError, Handle, Post};
use std::time::Duration;

use super::{Page, RelationSource};

pub const FOLLOWERS_ENDPOINT: &str = "xrpc/app.bsky.graph.getFollowers";
pub const AUTHOR_FEED_ENDPOINT: &str = "xrpc/app.bsky.feed.getAuthorFeed";
pub const POST_RECORD_TYPE: &str = "app.bsky.feed.post";
pub const FEED_FILTER: &str = "posts_no_replies";

#[derive(Debug, Clone, Deserialize)]
struct FollowersResponse {
    #[serde(default)]
    followers: Vec<ProfileView>,
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProfileView {
    handle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthorFeedResponse {
    #[serde(default)]
    feed: Vec<FeedViewPost>,
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FeedViewPost {
    post: Option<PostView>,
    /// Present when the entry is a repost of someone else's post.
    reason: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct PostView {
    #[serde(default)]
    uri: String,
    record: Option<PostRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct PostRecord {
    #[serde(rename = "$type")]
    kind: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
    reply: Option<serde_json::Value>,
}

impl FeedViewPost {
    fn into_post(self) -> Option<Post> {
        if self.reason.is_some() {
            return None;
        }
        let view = self.post?;
        let record = view.record?;
        if record.kind.as_deref() != Some(POST_RECORD_TYPE) || record.reply.is_some() {
            return None;
        }
        let created_at = record
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Some(Post { uri: view.uri, text: record.text, created_at })
    }
}

/// Client for the public Bluesky AppView XRPC API.
pub struct BlueskyClient {
    client: Client,
    base_url: String,
    host: String,
    page_size: u32,
}

impl BlueskyClient {
    pub fn new(
        base_url: impl Into<String>,
        page_size: u32,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let host = Url::parse(&base_url)?
            .host_str()
            .ok_or_else(|| anyhow!("API base URL has no host: {}", base_url))?
            .to_string();

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            host,
            page_size,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.api.base_url.clone(),
            config.api.page_size,
            config.request_timeout(),
            config.connect_timeout(),
        )
    }

    async fn get_page<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        actor: &Handle,
        cursor: Option<&str>,
        extra: &[(&str, &str)],
    ) -> Result<R, FetchError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let mut params: Vec<(&str, String)> = vec![
            ("actor", actor.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        params.extend(extra.iter().map(|(k, v)| (*k, v.to_string())));
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let res = self.client.get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = res.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }

        let body = res.text().await.map_err(|e| classify_transport(&e))?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::unexpected(format!("invalid response body: {}", e)))
    }
}

/// Maps an HTTP status to the failure it represents, `None` for success.
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchError::RateLimited)
    } else if status.is_server_error() {
        Some(FetchError::Server { status: status.as_u16() })
    } else if status.is_client_error() {
        Some(FetchError::Rejected { status: status.as_u16() })
    } else {
        Some(FetchError::unexpected(format!("HTTP {}", status)))
    }
}

fn classify_transport(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() {
        FetchError::unexpected(err)
    } else {
        FetchError::transport(err)
    }
}

#[async_trait]
impl RelationSource for BlueskyClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn followers_page(&self, actor: &Handle, cursor: Option<&str>) -> Result<Page<Handle>, FetchError> {
        let parsed: FollowersResponse = self.get_page(FOLLOWERS_ENDPOINT, actor, cursor, &[]).await?;
        let scanned = parsed.followers.len();
        let items = parsed.followers
            .into_iter()
            .filter_map(|profile| profile.handle.and_then(Handle::parse))
            .collect();
        Ok(Page::new(items, parsed.cursor, scanned))
    }

    async fn feed_page(&self, actor: &Handle, cursor: Option<&str>) -> Result<Page<Post>, FetchError> {
        let parsed: AuthorFeedResponse = self
            .get_page(AUTHOR_FEED_ENDPOINT, actor, cursor, &[("filter", FEED_FILTER)])
            .await?;
        let scanned = parsed.feed.len();
        let items = parsed.feed.into_iter().filter_map(FeedViewPost::into_post).collect();
        Ok(Page::new(items, parsed.cursor, scanned))
    }
}

#[cfg(test)]
#[path = "bluesky_tests.rs"]
mod bluesky_tests;
