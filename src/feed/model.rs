use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// A parsed syndication document in the crate's uniform representation.
///
/// Produced by a [`FeedFormat`](super::FeedFormat) parser and stamped with
/// provenance (`source_url`, `etag`, `last_modified`) by the fetch pipeline.
/// After that the caller owns it; [`Feed::merge_from`] folds later refreshes
/// into the same object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Feed {
    /// Feed title, control characters stripped
    pub title: Option<String>,
    /// Link to the website the feed belongs to
    pub url: Option<String>,
    /// Self link advertised by the document (`rel="self"`)
    pub feed_url: Option<String>,
    pub description: Option<String>,
    /// Name of the format descriptor that parsed this document
    pub format: String,
    /// Entries, newest refresh first after merges
    pub entries: Vec<Entry>,
    /// Values of custom elements bound through the registry schema
    pub extensions: BTreeMap<String, String>,

    /// URL the document was requested from
    pub source_url: Option<String>,
    /// `ETag` response header of the fetch that produced this feed
    pub etag: Option<String>,
    /// `Last-Modified` response header of the fetch that produced this feed
    pub last_modified: Option<DateTime<Utc>>,

    /// Entries added by the most recent merge
    #[serde(skip)]
    pub new_entries: Vec<Entry>,
    /// Whether the most recent merge changed an attribute
    #[serde(skip)]
    pub updated: bool,
}

/// One item of a feed (an article, post or episode).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entry {
    /// Stable identity: the document's id/guid, or a SHA-256 of
    /// url, title and publish time when the document has none
    pub id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
    pub extensions: BTreeMap<String, String>,
}

impl Feed {
    /// Merges a freshly parsed copy of this feed into `self`.
    ///
    /// Entries of `fresh` whose id is not already present are prepended
    /// (keeping their order in `fresh`) and recorded in `new_entries`.
    /// `title`, `url` and `feed_url` are taken from `fresh` when it carries a
    /// different, non-empty value. `etag` and `last_modified` always come
    /// from `fresh`, so a response without validators clears them.
    ///
    /// Returns `true` if the merge added entries or changed an attribute.
    pub fn merge_from(&mut self, fresh: Feed) -> bool {
        let known: HashSet<&str> = self.entries.iter().map(|e| e.id.as_str()).collect();
        let mut seen_in_fresh = HashSet::new();
        let added: Vec<Entry> = fresh
            .entries
            .into_iter()
            .filter(|e| !known.contains(e.id.as_str()) && seen_in_fresh.insert(e.id.clone()))
            .collect();

        self.entries.splice(0..0, added.iter().cloned());
        self.new_entries = added;

        let mut updated = false;
        updated |= replace_if_changed(&mut self.title, fresh.title);
        updated |= replace_if_changed(&mut self.url, fresh.url);
        updated |= replace_if_changed(&mut self.feed_url, fresh.feed_url);
        // validators always describe the latest response, even when absent
        updated |= self.etag != fresh.etag || self.last_modified != fresh.last_modified;
        self.etag = fresh.etag;
        self.last_modified = fresh.last_modified;
        self.updated = updated;

        self.has_new_entries() || self.updated
    }

    /// True if the last merge added at least one entry.
    pub fn has_new_entries(&self) -> bool {
        !self.new_entries.is_empty()
    }

    /// True if the last merge changed an updatable attribute.
    pub fn is_updated(&self) -> bool {
        self.updated
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut Option<T>, fresh: Option<T>) -> bool {
    match fresh {
        Some(value) if slot.as_ref() != Some(&value) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> Entry {
        Entry {
            id: id.to_string(),
            title: Some(format!("Post {}", id)),
            ..Default::default()
        }
    }

    fn feed_with(ids: &[&str]) -> Feed {
        Feed {
            title: Some("Blog".into()),
            entries: ids.iter().map(|id| entry(id)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_prepends_only_unseen_entries() {
        let mut feed = feed_with(&["2", "1"]);
        let fresh = feed_with(&["4", "3", "2"]);

        assert!(feed.merge_from(fresh));

        let ids: Vec<&str> = feed.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3", "2", "1"]);
        let new_ids: Vec<&str> = feed.new_entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(new_ids, vec!["4", "3"]);
        assert!(!feed.is_updated());
    }

    #[test]
    fn test_merge_without_changes_reports_nothing() {
        let mut feed = feed_with(&["1"]);
        let fresh = feed_with(&["1"]);

        assert!(!feed.merge_from(fresh));
        assert!(!feed.has_new_entries());
        assert_eq!(feed.entries.len(), 1);
    }

    #[test]
    fn test_merge_updates_provenance_and_title() {
        let mut feed = feed_with(&["1"]);
        feed.etag = Some("\"old\"".into());

        let mut fresh = feed_with(&["1"]);
        fresh.title = Some("Renamed".into());
        fresh.etag = Some("\"new\"".into());

        assert!(feed.merge_from(fresh));
        assert!(feed.is_updated());
        assert_eq!(feed.title.as_deref(), Some("Renamed"));
        assert_eq!(feed.etag.as_deref(), Some("\"new\""));
    }

    #[test]
    fn test_merge_keeps_values_missing_from_fresh() {
        let mut feed = feed_with(&[]);
        feed.source_url = Some("https://example.com/feed".into());

        let fresh = Feed::default();
        feed.merge_from(fresh);

        assert_eq!(feed.title.as_deref(), Some("Blog"));
        assert_eq!(feed.source_url.as_deref(), Some("https://example.com/feed"));
    }

    #[test]
    fn test_merge_drops_validators_absent_from_fresh_response() {
        let mut feed = feed_with(&["1"]);
        feed.etag = Some("\"v1\"".into());
        feed.last_modified = Some(Utc::now());

        let mut fresh = feed_with(&["1"]);
        fresh.etag = None;
        fresh.last_modified = None;

        assert!(feed.merge_from(fresh));
        assert!(feed.is_updated());
        assert_eq!(feed.etag, None);
        assert_eq!(feed.last_modified, None);
    }

    #[test]
    fn test_merge_deduplicates_within_fresh_document() {
        let mut feed = feed_with(&[]);
        let fresh = feed_with(&["a", "a", "b"]);

        feed.merge_from(fresh);

        let ids: Vec<&str> = feed.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_second_merge_resets_new_entries() {
        let mut feed = feed_with(&["1"]);
        feed.merge_from(feed_with(&["2", "1"]));
        assert!(feed.has_new_entries());

        feed.merge_from(feed_with(&["2", "1"]));
        assert!(!feed.has_new_entries());
    }
}
