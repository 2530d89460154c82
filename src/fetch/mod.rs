//! HTTP retrieval of feeds.
//!
//! - [`fetcher`] - concurrent batches, completion classification, update/merge
//! - [`options`] - per-call options and the request headers they produce
//! - [`headers`] - `ETag`/`Last-Modified` extraction from response header blobs
//! - [`decode`] - gzip/deflate transfer decoding

pub mod decode;
pub mod fetcher;
pub mod headers;
pub mod options;

pub use decode::{decode, DecodeError};
pub use fetcher::{build_client, FetchError, Fetcher, RawResponse};
pub use headers::{extract_etag, extract_last_modified, format_http_date, parse_http_date};
pub use options::{request_headers, BasicAuth, FetchOptions, DEFAULT_USER_AGENT};
