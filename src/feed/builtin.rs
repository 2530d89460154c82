use feed_rs::parser;

use super::format::{ElementSpec, FeedFormat, ParseError, Schema};
use super::model::{Entry, Feed};
use crate::util::strip_control_chars;
use sha2::{Digest, Sha256};

const ATOM_NAMESPACES: [&str; 2] = ["http://www.w3.org/2005/Atom", "http://purl.org/atom/ns#"];
const YOUTUBE_NAMESPACE: &str = "http://www.youtube.com/xml/schemas/2015";
const ITUNES_NAMESPACE: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

/// Dialects understood out of the box.
///
/// Vendor-flavoured variants come before their generic parent so that a
/// FeedBurner Atom document is not claimed by plain Atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFormat {
    RssFeedBurner,
    AtomFeedBurner,
    AtomYoutube,
    Atom,
    ItunesRss,
    Rss,
}

impl BuiltinFormat {
    /// All built-ins in detection priority order.
    pub const ALL: [BuiltinFormat; 6] = [
        BuiltinFormat::RssFeedBurner,
        BuiltinFormat::AtomFeedBurner,
        BuiltinFormat::AtomYoutube,
        BuiltinFormat::Atom,
        BuiltinFormat::ItunesRss,
        BuiltinFormat::Rss,
    ];
}

impl FeedFormat for BuiltinFormat {
    fn name(&self) -> &str {
        match self {
            BuiltinFormat::RssFeedBurner => "rss-feedburner",
            BuiltinFormat::AtomFeedBurner => "atom-feedburner",
            BuiltinFormat::AtomYoutube => "atom-youtube",
            BuiltinFormat::Atom => "atom",
            BuiltinFormat::ItunesRss => "itunes-rss",
            BuiltinFormat::Rss => "rss",
        }
    }

    fn can_parse(&self, prefix: &[u8]) -> bool {
        let text = String::from_utf8_lossy(prefix);
        match self {
            BuiltinFormat::RssFeedBurner => is_rss(&text) && text.contains("feedburner"),
            BuiltinFormat::AtomFeedBurner => is_atom(&text) && text.contains("feedburner"),
            BuiltinFormat::AtomYoutube => {
                has_start_tag(&text, "feed") && text.contains(YOUTUBE_NAMESPACE)
            }
            BuiltinFormat::Atom => is_atom(&text),
            BuiltinFormat::ItunesRss => {
                let lower = text.to_lowercase();
                attribute_value(&lower, "xmlns:itunes") == Some(ITUNES_NAMESPACE)
            }
            BuiltinFormat::Rss => is_rss(&text),
        }
    }

    fn parse(&self, document: &[u8]) -> Result<Feed, ParseError> {
        let mut feed = bind_standard(document)?;
        feed.format = self.name().to_string();
        Ok(feed)
    }

    fn default_schemas(&self) -> (Schema, Schema) {
        match self {
            BuiltinFormat::RssFeedBurner | BuiltinFormat::AtomFeedBurner => (
                Schema::default(),
                Schema::with([ElementSpec::new("feedburner:origLink").alias("orig_link")]),
            ),
            BuiltinFormat::AtomYoutube => (
                Schema::default(),
                Schema::with([
                    ElementSpec::new("yt:videoId").alias("video_id"),
                    ElementSpec::new("yt:channelId").alias("channel_id"),
                    ElementSpec::new("media:thumbnail")
                        .alias("thumbnail")
                        .attribute("url"),
                ]),
            ),
            BuiltinFormat::ItunesRss => (
                Schema::with([
                    ElementSpec::new("itunes:author").alias("itunes_author"),
                    ElementSpec::new("itunes:explicit").alias("explicit"),
                    ElementSpec::new("itunes:summary").alias("itunes_summary"),
                ]),
                Schema::with([
                    ElementSpec::new("itunes:duration").alias("duration"),
                    ElementSpec::new("itunes:episode").alias("episode"),
                ]),
            ),
            BuiltinFormat::Atom | BuiltinFormat::Rss => (Schema::default(), Schema::default()),
        }
    }

    fn finish(&self, feed: &mut Feed) {
        if matches!(
            self,
            BuiltinFormat::RssFeedBurner | BuiltinFormat::AtomFeedBurner
        ) {
            // FeedBurner rewrites links through its proxy; prefer the origin
            for entry in &mut feed.entries {
                if let Some(orig) = entry.extensions.get("orig_link") {
                    entry.url = Some(orig.clone());
                }
            }
        }
    }
}

/// Binds the standard RSS/Atom fields of a document with `feed-rs`.
pub(crate) fn bind_standard(document: &[u8]) -> Result<Feed, ParseError> {
    let parsed = parser::parse(document).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let feed_url = parsed
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("self"))
        .map(|l| l.href.clone());
    let url = parsed
        .links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .map(|l| l.href.clone());

    let entries = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let url = entry
                .links
                .iter()
                .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            let title = entry
                .title
                .map(|t| strip_control_chars(&t.content).into_owned());
            let published = entry.published.or(entry.updated);

            let existing_id = if entry.id.is_empty() {
                None
            } else {
                Some(entry.id.as_str())
            };
            let id = generate_guid(
                existing_id,
                url.as_deref(),
                title.as_deref().unwrap_or(""),
                published.map(|dt| dt.timestamp()),
            );

            Entry {
                id,
                title,
                url,
                author: entry.authors.first().map(|p| p.name.clone()),
                summary: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
                published,
                updated: entry.updated,
                categories: entry.categories.into_iter().map(|c| c.term).collect(),
                extensions: Default::default(),
            }
        })
        .collect();

    Ok(Feed {
        title: parsed
            .title
            .map(|t| strip_control_chars(&t.content).into_owned()),
        url,
        feed_url,
        description: parsed
            .description
            .map(|d| strip_control_chars(&d.content).into_owned()),
        entries,
        ..Default::default()
    })
}

fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<i64>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

fn is_rss(text: &str) -> bool {
    has_start_tag(text, "rss") || text.contains("<rdf")
}

/// `<feed ...>` whose default namespace is Atom 1.0 or Atom 0.3.
fn is_atom(text: &str) -> bool {
    start_tags(text, "feed").any(|tag| {
        attribute_value(tag, "xmlns").is_some_and(|ns| ATOM_NAMESPACES.contains(&ns))
    })
}

fn has_start_tag(text: &str, name: &str) -> bool {
    start_tags(text, name).next().is_some()
}

/// Yields the text of each `<name ...>` start tag, up to and including `>`,
/// or to the end of the text when the tag is cut off by the prefix.
fn start_tags<'a>(text: &'a str, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    let open = format!("<{name}");
    let mut search_from = 0;
    std::iter::from_fn(move || {
        while let Some(pos) = text[search_from..].find(&open) {
            let start = search_from + pos;
            let after = start + open.len();
            search_from = after;
            let boundary = text[after..].chars().next();
            if !matches!(boundary, None | Some('>') | Some('/'))
                && !boundary.is_some_and(char::is_whitespace)
            {
                continue;
            }
            let end = text[after..]
                .find('>')
                .map(|p| after + p + 1)
                .unwrap_or(text.len());
            return Some(&text[start..end]);
        }
        None
    })
}

/// Extracts an attribute value, tolerating whitespace around `=` and either quote style.
fn attribute_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(pos) = tag[search_from..].find(name) {
        let start = search_from + pos;
        search_from = start + name.len();

        if !tag[..start].ends_with(char::is_whitespace) {
            continue;
        }
        let Some(rest) = tag[search_from..].trim_start().strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => continue,
        };
        let inner = &rest[1..];
        if let Some(end) = inner.find(quote) {
            return Some(&inner[..end]);
        }
    }
    None
}
