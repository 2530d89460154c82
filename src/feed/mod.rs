//! Feed formats and the uniform feed model.
//!
//! This module turns syndication documents into [`Feed`] values:
//!
//! - **Detection**: pick a format by sniffing a bounded document prefix
//! - **Binding**: map the standard RSS/Atom fields with `feed-rs`
//! - **Extension**: bind extra elements registered for every format
//! - **Merging**: fold a refreshed copy of a feed into the original
//!
//! # Architecture
//!
//! - [`format`] - `FeedFormat` trait, schemas and the ordered `FormatRegistry`
//! - [`builtin`] - the built-in dialects and their sniffing rules
//! - `extensions` - custom element pass over the document with `quick-xml`
//! - [`model`] - `Feed`, `Entry` and the merge operation
//!
//! # Example
//!
//! ```
//! use feedpipe::feed::{ElementSpec, FormatRegistry};
//!
//! let mut registry = FormatRegistry::new();
//! registry.add_entry_element(ElementSpec::new("dc:creator").alias("creator"));
//!
//! let doc = br#"<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/"><channel>
//!   <title>Example</title>
//!   <item><guid>1</guid><title>Hi</title><dc:creator>Ann</dc:creator></item>
//! </channel></rss>"#;
//! let feed = registry.parse(doc).unwrap();
//! assert_eq!(feed.format, "rss");
//! assert_eq!(feed.entries[0].extensions["creator"], "Ann");
//! ```

pub mod builtin;
mod extensions;
pub mod format;
pub mod model;

pub use builtin::BuiltinFormat;
pub use format::{
    ElementSpec, FeedFormat, FormatDescriptor, FormatRegistry, ParseError, Schema,
    SNIFF_PREFIX_LEN,
};
pub use model::{Entry, Feed};
