use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use secrecy::ExposeSecret;
use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use super::decode::{decode, DecodeError};
use super::headers::{extract_etag, extract_last_modified, render_header_blob};
use super::options::{request_headers, FetchOptions};
use crate::feed::{Feed, FormatRegistry};

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and parsing a feed.
///
/// Every per-request variant carries the URL it concerns, so a failure
/// surfacing out of a batch still identifies its request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL could not be parsed or is not http(s)
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// An option produced a value that is not a legal header
    #[error("Invalid request header: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    /// The HTTP client could not be configured
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// HTTP response with non-2xx status code
    #[error("HTTP error from {url}: status {status}")]
    Http { url: String, status: u16 },
    /// Request exceeded the configured timeout
    #[error("Request to {url} timed out")]
    Timeout { url: String },
    /// Response body exceeded the 10MB size limit
    #[error("Response from {url} too large")]
    ResponseTooLarge { url: String },
    /// Declared transfer encoding could not be reversed
    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
    /// No registered format claimed the document
    #[error("No parser available for {url}")]
    NoParserAvailable { url: String },
    /// The claiming format failed to bind the document
    #[error("Failed to parse feed from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    /// URL of the request that failed, when the error concerns one request.
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::InvalidUrl { url, .. }
            | FetchError::Network { url, .. }
            | FetchError::Http { url, .. }
            | FetchError::Timeout { url }
            | FetchError::ResponseTooLarge { url }
            | FetchError::Decode { url, .. }
            | FetchError::NoParserAvailable { url }
            | FetchError::Parse { url, .. } => Some(url),
            FetchError::InvalidHeader(_) | FetchError::Client(_) => None,
        }
    }

    /// True for a `304 Not Modified` answer to a conditional request.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, FetchError::Http { status: 304, .. })
    }
}

/// A successful response with its body already decoded.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// URL as requested (before redirects)
    pub url: String,
    pub status: u16,
    /// Raw response head, see [`render_header_blob`]
    pub headers: String,
    /// Body with transfer compression reversed
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One request of a batch, ready to send.
struct PreparedRequest {
    url: String,
    headers: HeaderMap,
}

/// Concurrent feed fetcher.
///
/// Holds the HTTP client, the format registry used to parse responses and
/// the options the client was built with.
///
/// Batch operations come in two flavours. `fetch_many`, `fetch_raw_many`
/// and `update_many` are fail-fast: the first failing completion is
/// returned as the error and requests still in flight are abandoned.
/// `fetch_many_settled` always runs the whole batch and reports a result
/// per URL.
pub struct Fetcher {
    client: reqwest::Client,
    registry: Arc<FormatRegistry>,
    defaults: FetchOptions,
}

impl Fetcher {
    /// Builds a fetcher whose client follows `defaults.max_redirects` and
    /// `defaults.cookies`.
    pub fn new(registry: Arc<FormatRegistry>, defaults: FetchOptions) -> Result<Self, FetchError> {
        let client = build_client(&defaults)?;
        Ok(Self {
            client,
            registry,
            defaults,
        })
    }

    /// Uses a caller-configured client (allows custom TLS, proxies, ...).
    pub fn with_client(
        client: reqwest::Client,
        registry: Arc<FormatRegistry>,
        defaults: FetchOptions,
    ) -> Self {
        Self {
            client,
            registry,
            defaults,
        }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Options the client was built with.
    pub fn defaults(&self) -> &FetchOptions {
        &self.defaults
    }

    /// Fetches one URL and returns its decoded body.
    pub async fn fetch_raw_one(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<RawResponse, FetchError> {
        let client = self.client_for(options)?;
        let headers = request_headers(options)?;
        fetch_raw(&client, url, &headers, options).await
    }

    /// Fetches all URLs concurrently and returns their decoded bodies keyed by URL.
    ///
    /// Fails fast on the first failing request.
    pub async fn fetch_raw_many<I, S>(
        &self,
        urls: I,
        options: &FetchOptions,
    ) -> Result<HashMap<String, RawResponse>, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = prepare_batch(urls, options)?;
        let total = requests.len();
        let mut completions = pin!(completions(self.client_for(options)?, requests, options));

        let mut responses = HashMap::with_capacity(total);
        while let Some((url, result)) = completions.next().await {
            let raw = result.inspect_err(|e| log_abort(e, total, responses.len()))?;
            responses.insert(url, raw);
        }

        tracing::info!(requested = total, fetched = responses.len(), "Raw batch complete");
        Ok(responses)
    }

    /// Fetches and parses one feed.
    ///
    /// The returned feed carries `source_url = url` and the response's
    /// `ETag`/`Last-Modified` values.
    pub async fn fetch_one(&self, url: &str, options: &FetchOptions) -> Result<Feed, FetchError> {
        let raw = self.fetch_raw_one(url, options).await?;
        self.parse_response(raw)
    }

    /// Fetches and parses all URLs concurrently, keyed by URL.
    ///
    /// Fails fast: the first timeout, HTTP error or parse failure is
    /// returned and the rest of the batch is dropped, including responses
    /// that already arrived.
    pub async fn fetch_many<I, S>(
        &self,
        urls: I,
        options: &FetchOptions,
    ) -> Result<HashMap<String, Feed>, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = prepare_batch(urls, options)?;
        let total = requests.len();
        let mut completions = pin!(completions(self.client_for(options)?, requests, options));

        let mut feeds = HashMap::with_capacity(total);
        while let Some((url, result)) = completions.next().await {
            let feed = result
                .and_then(|raw| self.parse_response(raw))
                .inspect_err(|e| log_abort(e, total, feeds.len()))?;
            feeds.insert(url, feed);
        }

        tracing::info!(requested = total, fetched = feeds.len(), "Batch fetch complete");
        Ok(feeds)
    }

    /// Fetches and parses all URLs, recording a result or an error per URL.
    ///
    /// Unlike [`fetch_many`](Self::fetch_many), a failing request does not
    /// cancel its siblings; the map holds every requested URL. The outer
    /// error is reserved for options that make the whole batch unsendable.
    pub async fn fetch_many_settled<I, S>(
        &self,
        urls: I,
        options: &FetchOptions,
    ) -> Result<HashMap<String, Result<Feed, FetchError>>, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requests = prepare_batch(urls, options)?;
        let total = requests.len();
        let mut completions = pin!(completions(self.client_for(options)?, requests, options));

        let mut results = HashMap::with_capacity(total);
        while let Some((url, result)) = completions.next().await {
            let result = result.and_then(|raw| self.parse_response(raw));
            if let Err(e) = &result {
                tracing::warn!(url = %url, error = %e, "Feed fetch failed");
            }
            results.insert(url, result);
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        tracing::info!(requested = total, failed = failed, "Settled batch complete");
        Ok(results)
    }

    /// Re-fetches a feed's `source_url` and merges new content into it in place.
    ///
    /// A feed without `source_url` is left untouched. Conditional headers
    /// default to the feed's own `etag`/`last_modified`. Returns whether
    /// the merge changed the feed.
    pub async fn update_one(
        &self,
        feed: &mut Feed,
        options: &FetchOptions,
    ) -> Result<bool, FetchError> {
        let Some(url) = feed.source_url.clone() else {
            tracing::debug!("Skipping update of feed without source URL");
            return Ok(false);
        };

        let options = options.conditional_on(feed.etag.as_deref(), feed.last_modified);
        let fresh = self.fetch_one(&url, &options).await?;
        Ok(feed.merge_from(fresh))
    }

    /// Re-fetches every feed concurrently and merges each refresh into the
    /// caller's feed object, returning those handles keyed by source URL.
    ///
    /// Feeds without `source_url` are skipped. Merges happen as responses
    /// arrive, so on a fail-fast error the feeds that completed earlier are
    /// already updated.
    pub async fn update_many<'f, I>(
        &self,
        feeds: I,
        options: &FetchOptions,
    ) -> Result<HashMap<String, &'f mut Feed>, FetchError>
    where
        I: IntoIterator<Item = &'f mut Feed>,
    {
        let mut targets: HashMap<String, &'f mut Feed> = HashMap::new();
        let mut requests = Vec::new();
        let mut skipped = 0usize;

        for feed in feeds {
            let Some(url) = feed.source_url.clone() else {
                skipped += 1;
                continue;
            };
            if targets.contains_key(&url) {
                tracing::debug!(url = %url, "Duplicate source URL in update batch, skipping");
                continue;
            }
            let conditional = options.conditional_on(feed.etag.as_deref(), feed.last_modified);
            requests.push(PreparedRequest {
                url: url.clone(),
                headers: request_headers(&conditional)?,
            });
            targets.insert(url, feed);
        }

        if skipped > 0 {
            tracing::debug!(skipped = skipped, "Feeds without source URL skipped");
        }

        let total = requests.len();
        let mut completions = pin!(completions(self.client_for(options)?, requests, options));
        let mut merged = 0usize;

        while let Some((url, result)) = completions.next().await {
            let fresh = result
                .and_then(|raw| self.parse_response(raw))
                .inspect_err(|e| log_abort(e, total, merged))?;
            if let Some(feed) = targets.get_mut(&url) {
                let changed = feed.merge_from(fresh);
                tracing::debug!(
                    url = %url,
                    changed = changed,
                    new_entries = feed.new_entries.len(),
                    "Merged feed refresh"
                );
            }
            merged += 1;
        }

        tracing::info!(requested = total, merged = merged, "Batch update complete");
        Ok(targets)
    }

    /// Detects the format of a decoded response, parses it and stamps provenance.
    fn parse_response(&self, raw: RawResponse) -> Result<Feed, FetchError> {
        let descriptor =
            self.registry
                .detect(&raw.body)
                .ok_or_else(|| FetchError::NoParserAvailable {
                    url: raw.url.clone(),
                })?;

        let mut feed = descriptor
            .parse(&raw.body)
            .map_err(|e| FetchError::Parse {
                url: raw.url.clone(),
                message: e.to_string(),
            })?;

        tracing::debug!(
            url = %raw.url,
            format = %feed.format,
            entries = feed.entries.len(),
            "Parsed feed"
        );

        feed.source_url = Some(raw.url);
        feed.etag = raw.etag;
        feed.last_modified = raw.last_modified;
        Ok(feed)
    }

    /// Client honouring the redirect and cookie settings of `options`.
    fn client_for(&self, options: &FetchOptions) -> Result<reqwest::Client, FetchError> {
        if options.max_redirects == self.defaults.max_redirects
            && options.cookies == self.defaults.cookies
        {
            Ok(self.client.clone())
        } else {
            build_client(options)
        }
    }
}

/// Builds an HTTP client with the transport settings of `options`.
pub fn build_client(options: &FetchOptions) -> Result<reqwest::Client, FetchError> {
    let redirect = match options.max_redirects {
        0 => reqwest::redirect::Policy::none(),
        n => reqwest::redirect::Policy::limited(n),
    };
    reqwest::Client::builder()
        .redirect(redirect)
        .cookie_store(options.cookies)
        .build()
        .map_err(FetchError::Client)
}

fn unique_urls<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(Into::into)
        .filter(|url: &String| seen.insert(url.clone()))
        .collect()
}

fn prepare_batch<I, S>(urls: I, options: &FetchOptions) -> Result<Vec<PreparedRequest>, FetchError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let headers = request_headers(options)?;
    Ok(unique_urls(urls)
        .into_iter()
        .map(|url| PreparedRequest {
            url,
            headers: headers.clone(),
        })
        .collect())
}

/// Runs a batch, yielding `(url, result)` in completion order.
///
/// At most `options.max_concurrency` requests are in flight at once.
/// Dropping the stream abandons the requests still pending.
fn completions<'a>(
    client: reqwest::Client,
    requests: Vec<PreparedRequest>,
    options: &'a FetchOptions,
) -> impl Stream<Item = (String, Result<RawResponse, FetchError>)> + 'a {
    let limit = options.max_concurrency.max(1);
    stream::iter(requests)
        .map(move |request| {
            let client = client.clone();
            async move {
                let result = fetch_raw(&client, &request.url, &request.headers, options).await;
                (request.url, result)
            }
        })
        .buffer_unordered(limit)
}

fn log_abort(error: &FetchError, total: usize, completed: usize) {
    tracing::warn!(
        error = %error,
        completed = completed,
        abandoned = total.saturating_sub(completed + 1),
        "Batch aborted on first failure"
    );
}

/// Sends one request and classifies its completion.
///
/// 2xx responses are read, decoded and returned; the timeout elapsing
/// yields [`FetchError::Timeout`]; any other status yields
/// [`FetchError::Http`].
async fn fetch_raw(
    client: &reqwest::Client,
    url: &str,
    headers: &HeaderMap,
    options: &FetchOptions,
) -> Result<RawResponse, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }

    let mut request = client.get(parsed).headers(headers.clone());
    if let Some(auth) = &options.basic_auth {
        request = request.basic_auth(&auth.username, Some(auth.password.expose_secret()));
    }

    tracing::debug!(url = %url, "Requesting feed");

    // The timeout covers the whole exchange, body included
    let exchange = async {
        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        let status = response.status();

        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Non-success response");
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let blob = render_header_blob(response.version(), status, response.headers());
        let declared = declared_encoding(response.headers());
        let body = read_limited_bytes(url, response, MAX_FEED_SIZE).await?;
        Ok::<_, FetchError>((status, blob, declared, body))
    };

    let (status, blob, declared, body) = tokio::time::timeout(options.timeout, exchange)
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
        })??;

    let body = decode(body, declared.as_deref()).map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })?;

    tracing::debug!(url = %url, status = %status, bytes = body.len(), "Feed response received");

    Ok(RawResponse {
        url: url.to_string(),
        status: status.as_u16(),
        etag: extract_etag(&blob),
        last_modified: extract_last_modified(&blob),
        headers: blob,
        body,
    })
}

/// Encoding declaration of a response: `Content-Encoding`, else `Content-Type`.
fn declared_encoding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_ENCODING)
        .or_else(|| headers.get(CONTENT_TYPE))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn transport_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: error,
        }
    }
}

async fn read_limited_bytes(
    url: &str,
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge {
                url: url.to_string(),
            });
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(url, e))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge {
                url: url.to_string(),
            });
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
