//! Integration tests for the fetch-parse and update-merge pipelines.
//!
//! Each test runs against its own wiremock server.

use feedpipe::feed::{FeedFormat, ParseError};
use feedpipe::{Feed, FetchError, FetchOptions, Fetcher, FormatRegistry};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, title)| {
            format!("<item><guid>{guid}</guid><title>{title}</title><link>https://example.com/{guid}</link></item>")
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example</title><link>https://example.com/</link>{items}</channel></rss>"#
    )
}

fn fetcher(registry: FormatRegistry) -> Fetcher {
    Fetcher::new(Arc::new(registry), FetchOptions::default()).unwrap()
}

// ============================================================================
// Fetch
// ============================================================================

#[tokio::test]
async fn test_fetch_many_returns_parsed_feeds_with_provenance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"a1\"")
                .set_body_string(rss(&[("1", "First")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[])))
        .mount(&server)
        .await;

    let a = format!("{}/a.xml", server.uri());
    let b = format!("{}/b.xml", server.uri());
    let feeds = fetcher(FormatRegistry::new())
        .fetch_many([a.clone(), b.clone()], &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(feeds.len(), 2);
    assert_eq!(feeds[&a].source_url.as_deref(), Some(a.as_str()));
    assert_eq!(feeds[&a].etag.as_deref(), Some("\"a1\""));
    assert_eq!(feeds[&a].format, "rss");
    assert_eq!(feeds[&a].entries.len(), 1);
    assert_eq!(feeds[&b].etag, None);
    assert!(feeds[&b].entries.is_empty());
}

#[tokio::test]
async fn test_fetch_many_fails_on_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss(&[]))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.xml"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let result = fetcher(FormatRegistry::new())
        .fetch_many(
            [
                format!("{}/ok.xml", server.uri()),
                format!("{}/gone.xml", server.uri()),
            ],
            &FetchOptions::default(),
        )
        .await;

    match result {
        Err(FetchError::Http { status, url }) => {
            assert_eq!(status, 410);
            assert!(url.ends_with("/gone.xml"));
        }
        other => panic!("expected HTTP error, got {:?}", other.map(|m| m.len())),
    }
}

#[tokio::test]
async fn test_empty_batch_is_empty_map() {
    let feeds = fetcher(FormatRegistry::new())
        .fetch_many(Vec::<String>::new(), &FetchOptions::default())
        .await
        .unwrap();
    assert!(feeds.is_empty());
}

// ============================================================================
// Custom formats
// ============================================================================

/// Claims every document mentioning `<rss` and tags it with a fixed title.
struct HouseRss;

impl FeedFormat for HouseRss {
    fn name(&self) -> &str {
        "house-rss"
    }

    fn can_parse(&self, prefix: &[u8]) -> bool {
        String::from_utf8_lossy(prefix).contains("<rss")
    }

    fn parse(&self, _document: &[u8]) -> Result<Feed, ParseError> {
        Ok(Feed {
            title: Some("house".into()),
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn test_registered_format_takes_precedence_over_builtins() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss(&[("1", "x")])))
        .mount(&server)
        .await;

    let mut registry = FormatRegistry::new();
    registry.register(HouseRss);

    let feed = fetcher(registry)
        .fetch_one(&format!("{}/feed", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(feed.format, "house-rss");
    assert_eq!(feed.title.as_deref(), Some("house"));
    assert_eq!(feed.source_url, Some(format!("{}/feed", server.uri())));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn test_update_many_merges_in_place_and_skips_feeds_without_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.xml"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v2\"")
                .set_body_string(rss(&[("2", "Second"), ("1", "First")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/a.xml", server.uri());
    let client = fetcher(FormatRegistry::new());

    let mut tracked = Feed {
        title: Some("Example".into()),
        source_url: Some(url.clone()),
        etag: Some("\"v1\"".into()),
        entries: vec![feedpipe::Entry {
            id: "1".into(),
            title: Some("First".into()),
            ..Default::default()
        }],
        ..Default::default()
    };
    let mut detached = Feed {
        title: Some("Local only".into()),
        ..Default::default()
    };

    let updated = client
        .update_many([&mut tracked, &mut detached], &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(updated.len(), 1);
    let feed = &updated[&url];
    assert_eq!(feed.etag.as_deref(), Some("\"v2\""));
    let ids: Vec<&str> = feed.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1"]);
    assert_eq!(feed.new_entries.len(), 1);
    assert!(feed.has_new_entries());

    drop(updated);
    assert_eq!(tracked.entries.len(), 2);
    assert_eq!(
        detached,
        Feed {
            title: Some("Local only".into()),
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn test_update_one_not_modified_leaves_feed_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let mut feed = Feed {
        source_url: Some(format!("{}/feed", server.uri())),
        etag: Some("\"same\"".into()),
        ..Default::default()
    };
    let before = feed.clone();

    let err = fetcher(FormatRegistry::new())
        .update_one(&mut feed, &FetchOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_not_modified());
    assert_eq!(feed, before);
}
