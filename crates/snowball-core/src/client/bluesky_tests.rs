#[cfg(test)]
mod tests {
    use crate::client::bluesky::{BlueskyClient, AUTHOR_FEED_ENDPOINT, FOLLOWERS_ENDPOINT};
    use crate::client::RelationSource;
    use serde_json::json;
    use snowball_common::{FetchError, Handle};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> BlueskyClient {
        BlueskyClient::new(server.uri(), 100, Duration::from_secs(5), Duration::from_secs(5))
            .expect("Failed to build client")
    }

    fn followers_path() -> String {
        format!("/{}", FOLLOWERS_ENDPOINT)
    }

    fn feed_path() -> String {
        format!("/{}", AUTHOR_FEED_ENDPOINT)
    }

    #[tokio::test]
    async fn test_followers_page_parses_and_filters_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(followers_path()))
            .and(query_param("actor", "alice.bsky.social"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subject": { "handle": "alice.bsky.social" },
                "followers": [
                    { "did": "did:plc:1", "handle": "Bob.bsky.social" },
                    { "did": "did:plc:2", "handle": "handle.invalid" },
                    { "did": "did:plc:3", "handle": "carol.bsky.social" }
                ],
                "cursor": "page-2"
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let page = client
            .followers_page(&Handle::new("alice.bsky.social"), None)
            .await
            .expect("Failed to fetch page");

        assert_eq!(page.items, vec![Handle::new("bob.bsky.social"), Handle::new("carol.bsky.social")]);
        assert_eq!(page.cursor.as_deref(), Some("page-2"));
        assert_eq!(page.scanned, 3);
    }

    #[tokio::test]
    async fn test_followers_page_sends_cursor() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(followers_path()))
            .and(query_param("cursor", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "followers": [{ "handle": "dave.bsky.social" }]
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let page = client
            .followers_page(&Handle::new("alice.bsky.social"), Some("page-2"))
            .await
            .expect("Failed to fetch page");

        assert_eq!(page.items, vec![Handle::new("dave.bsky.social")]);
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            (404, FetchError::Rejected { status: 404 }),
            (400, FetchError::Rejected { status: 400 }),
            (429, FetchError::RateLimited),
            (503, FetchError::Server { status: 503 }),
        ];

        for (status, expected) in cases {
            let mock_server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(followers_path()))
                .respond_with(ResponseTemplate::new(status).set_body_string("{\"error\":\"x\"}"))
                .mount(&mock_server)
                .await;

            let client = client_for(&mock_server);
            let err = client
                .followers_page(&Handle::new("ghost.bsky.social"), None)
                .await
                .unwrap_err();
            assert_eq!(err, expected, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_unexpected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(followers_path()))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let err = client
            .followers_page(&Handle::new("alice.bsky.social"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Unexpected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(followers_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "followers": [] }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let client = BlueskyClient::new(
            mock_server.uri(),
            100,
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
        .expect("Failed to build client");

        let err = client
            .followers_page(&Handle::new("alice.bsky.social"), None)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Timeout);
    }

    #[tokio::test]
    async fn test_feed_page_keeps_only_original_posts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(feed_path()))
            .and(query_param("filter", "posts_no_replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "feed": [
                    { "post": { "uri": "at://a/1", "record": {
                        "$type": "app.bsky.feed.post",
                        "text": "hello world",
                        "createdAt": "2026-03-01T12:00:00.000Z"
                    }}},
                    { "post": { "uri": "at://a/2", "record": {
                        "$type": "app.bsky.feed.post",
                        "text": "a reply",
                        "reply": { "root": {}, "parent": {} }
                    }}},
                    { "post": { "uri": "at://b/3", "record": {
                        "$type": "app.bsky.feed.post",
                        "text": "someone else's"
                    }}, "reason": { "$type": "app.bsky.feed.defs#reasonRepost" } },
                    { "post": { "uri": "at://a/4", "record": {
                        "$type": "app.bsky.feed.like"
                    }}},
                    { "post": { "uri": "at://a/5", "record": {
                        "$type": "app.bsky.feed.post",
                        "text": "undated"
                    }}}
                ],
                "cursor": "next"
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let page = client
            .feed_page(&Handle::new("alice.bsky.social"), None)
            .await
            .expect("Failed to fetch feed");

        assert_eq!(page.scanned, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].uri, "at://a/1");
        assert_eq!(page.items[0].text, "hello world");
        assert!(page.items[0].created_at.is_some());
        assert_eq!(page.items[1].text, "undated");
        assert!(page.items[1].created_at.is_none());
        assert_eq!(page.cursor.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_empty_cursor_treated_as_end() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(feed_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "feed": [], "cursor": ""
            })))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let page = client
            .feed_page(&Handle::new("alice.bsky.social"), None)
            .await
            .expect("Failed to fetch feed");

        assert!(page.items.is_empty());
        assert!(page.cursor.is_none());
    }

    #[test]
    fn test_base_url_requires_host() {
        let result = BlueskyClient::new("not a url", 100, Duration::from_secs(1), Duration::from_secs(1));
        assert!(result.is_err());
    }
}
