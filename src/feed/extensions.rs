//! Binds custom elements registered through the format schemas.
//!
//! The standard field mapping comes from `feed-rs`; this pass walks the same
//! document with `quick-xml` and copies the first value of every schema
//! element into `extensions`, at feed level outside entries and per entry
//! inside `<entry>`/`<item>`.
//!
//! `feed-rs` drops some items (RSS 1.0 items without a link, elements outside
//! the feed namespaces), so document order does not line up with the bound
//! entries. Each `<entry>`/`<item>` instead records identity hints (its
//! `id`/`guid`, `rdf:about`, links and title) and its values are attached to
//! the bound entry whose id, url or title matches one of them.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;

use super::format::Schema;
use super::model::Feed;

/// Schema element currently being captured.
struct Capture {
    key: String,
    depth: usize,
    text: String,
}

/// Everything seen inside one `<entry>`/`<item>`.
#[derive(Default)]
struct EntryCapture {
    depth: usize,
    hints: Vec<String>,
    values: BTreeMap<String, String>,
}

/// Direct children of an entry whose text identifies it.
const HINT_ELEMENTS: [&[u8]; 4] = [b"id", b"guid", b"link", b"title"];

/// Runs the custom element pass.
///
/// Stops once the root element closes. A reader error inside the root is
/// logged and ends the pass; the values bound so far are kept since the
/// standard binder already accepted the document.
pub(crate) fn bind_extensions(
    document: &[u8],
    feed_schema: &Schema,
    entry_schema: &Schema,
    feed: &mut Feed,
) {
    if feed_schema.is_empty() && entry_schema.is_empty() {
        return;
    }

    // SEC-002: quick-xml never expands DOCTYPE entity declarations
    let mut reader = Reader::from_reader(document);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut entry: Option<EntryCapture> = None;
    let mut finished: Vec<EntryCapture> = Vec::new();
    let mut capture: Option<Capture> = None;
    // (depth, text) of an identity element being read
    let mut hint: Option<(usize, String)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                depth += 1;
                if entry.is_none() && is_entry_element(&e) {
                    let mut started = EntryCapture {
                        depth,
                        ..Default::default()
                    };
                    if let Some(about) = attribute(&e, "rdf:about", &reader) {
                        started.hints.push(about.trim().to_string());
                    }
                    entry = Some(started);
                } else {
                    if let Some(current) = entry.as_mut() {
                        if depth == current.depth + 1 && is_hint_element(&e) {
                            if let Some(href) = attribute(&e, "href", &reader) {
                                current.hints.push(href.trim().to_string());
                            }
                            hint = Some((depth, String::new()));
                        }
                    }

                    if capture.is_none() {
                        let schema = if entry.is_some() { entry_schema } else { feed_schema };
                        if let Some(spec) = schema.find(e.name().as_ref()) {
                            match &spec.attribute {
                                Some(attr) => {
                                    if let Some(value) = attribute(&e, attr, &reader) {
                                        store(target(feed, &mut entry), spec.key(), value);
                                    }
                                }
                                None => {
                                    capture = Some(Capture {
                                        key: spec.key().to_string(),
                                        depth,
                                        text: String::new(),
                                    });
                                }
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(current) = entry.as_mut() {
                    if depth == current.depth && is_hint_element(&e) {
                        if let Some(href) = attribute(&e, "href", &reader) {
                            current.hints.push(href.trim().to_string());
                        }
                    }
                }

                let schema = if entry.is_some() { entry_schema } else { feed_schema };
                if let Some(spec) = schema.find(e.name().as_ref()) {
                    if let Some(value) = spec
                        .attribute
                        .as_deref()
                        .and_then(|attr| attribute(&e, attr, &reader))
                    {
                        store(target(feed, &mut entry), spec.key(), value);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if capture.is_some() || hint.is_some() {
                    let text = e
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                    append(&mut capture, &mut hint, &text);
                }
            }
            Ok(Event::CData(e)) => {
                if capture.is_some() || hint.is_some() {
                    append(&mut capture, &mut hint, &String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(_)) => {
                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let Some(done) = capture.take() {
                        store(target(feed, &mut entry), &done.key, done.text);
                    }
                }
                if hint.as_ref().is_some_and(|(d, _)| *d == depth) {
                    if let (Some((_, text)), Some(current)) = (hint.take(), entry.as_mut()) {
                        let text = text.trim();
                        if !text.is_empty() {
                            current.hints.push(text.to_string());
                        }
                    }
                }
                if entry.as_ref().is_some_and(|c| c.depth == depth) {
                    finished.extend(entry.take());
                }
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    // trailing bytes after the root are not part of the feed
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    position = reader.buffer_position(),
                    "Custom element pass stopped early"
                );
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    attach(feed, finished);
}

fn is_entry_element(e: &BytesStart<'_>) -> bool {
    matches!(e.local_name().as_ref(), b"entry" | b"item")
}

fn is_hint_element(e: &BytesStart<'_>) -> bool {
    HINT_ELEMENTS.contains(&e.local_name().as_ref())
}

fn attribute(e: &BytesStart<'_>, name: &str, reader: &Reader<&[u8]>) -> Option<String> {
    let attr = e.try_get_attribute(name).ok().flatten()?;
    attr.decode_and_unescape_value(reader.decoder())
        .ok()
        .map(|v| v.into_owned())
}

fn append(capture: &mut Option<Capture>, hint: &mut Option<(usize, String)>, text: &str) {
    if let Some(capture) = capture.as_mut() {
        capture.text.push_str(text);
    }
    if let Some((_, hint)) = hint.as_mut() {
        hint.push_str(text);
    }
}

fn target<'a>(
    feed: &'a mut Feed,
    entry: &'a mut Option<EntryCapture>,
) -> &'a mut BTreeMap<String, String> {
    match entry {
        Some(current) => &mut current.values,
        None => &mut feed.extensions,
    }
}

/// Keeps the first value seen for a key.
fn store(map: &mut BTreeMap<String, String>, key: &str, value: String) {
    map.entry(key.to_string()).or_insert(value);
}

/// Hands each entry capture to the bound entry it identifies.
///
/// Ids are tried first, then urls, then titles; a capture is used at most once.
fn attach(feed: &mut Feed, captures: Vec<EntryCapture>) {
    let mut pending: Vec<Option<EntryCapture>> = captures.into_iter().map(Some).collect();

    for bound in &mut feed.entries {
        let keys = [
            Some(bound.id.as_str()),
            bound.url.as_deref(),
            bound.title.as_deref().map(str::trim),
        ];
        let found = keys.iter().flatten().find_map(|key| {
            pending.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|c| c.hints.iter().any(|h| h.as_str() == *key))
            })
        });

        if let Some(capture) = found.and_then(|index| pending[index].take()) {
            for (key, value) in capture.values {
                bound.extensions.entry(key).or_insert(value);
            }
        }
    }

    let unmatched = pending
        .iter()
        .flatten()
        .filter(|c| !c.values.is_empty())
        .count();
    if unmatched > 0 {
        tracing::debug!(unmatched = unmatched, "Entry extensions without a bound entry");
    }
}
