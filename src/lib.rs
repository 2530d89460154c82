//! # feedpipe
//!
//! Fetches RSS/Atom feeds over HTTP and parses them into one uniform
//! [`Feed`](feed::Feed) representation.
//!
//! ```text
//! URLs → Fetcher (concurrent, conditional) → decode → detect format → parse → Feed
//! ```
//!
//! - [`feed`]: format registry, detection, parsing and the feed model
//! - [`fetch`]: concurrent fetching, conditional requests and update/merge
//! - [`config`]: optional TOML configuration for fetch defaults
//! - [`util`]: text helpers

pub mod config;
pub mod feed;
pub mod fetch;
pub mod util;

pub use feed::{Entry, Feed, FormatRegistry};
pub use fetch::{FetchError, FetchOptions, Fetcher};
