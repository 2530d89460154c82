use std::sync::Arc;
use thiserror::Error;

use super::builtin::BuiltinFormat;
use super::extensions::bind_extensions;
use super::model::Feed;

/// Number of leading bytes a format's sniffing predicate may inspect.
///
/// Detection cost is bounded by this prefix regardless of document size.
pub const SNIFF_PREFIX_LEN: usize = 2000;

/// Errors produced while turning an in-memory document into a [`Feed`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// No registered format claimed the document
    #[error("no parser available for document")]
    NoParserAvailable,
    /// The claiming format could not bind the document
    #[error("malformed feed document: {0}")]
    Malformed(String),
}

/// A feed dialect: a sniffing predicate plus a parser.
///
/// Implement this to add a custom dialect, then hand it to
/// [`FormatRegistry::register`] so it is tried before the built-ins.
pub trait FeedFormat: Send + Sync {
    /// Identifier recorded in [`Feed::format`].
    fn name(&self) -> &str;

    /// Whether this format claims a document, judged on at most
    /// [`SNIFF_PREFIX_LEN`] leading bytes.
    fn can_parse(&self, prefix: &[u8]) -> bool;

    /// Binds the full document into a [`Feed`].
    fn parse(&self, document: &[u8]) -> Result<Feed, ParseError>;

    /// Custom elements bound for every document of this format,
    /// as `(feed-level, entry-level)` schemas.
    fn default_schemas(&self) -> (Schema, Schema) {
        (Schema::default(), Schema::default())
    }

    /// Hook run after the custom element pass.
    fn finish(&self, _feed: &mut Feed) {}
}

/// A custom element to bind beyond a format's standard mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    /// Qualified element name as written in documents, e.g. `dc:creator`
    pub tag: String,
    /// Key the value is stored under; defaults to `tag`
    pub alias: Option<String>,
    /// Bind this attribute's value instead of the element text
    pub attribute: Option<String>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            alias: None,
            attribute: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Key under which the bound value is stored in `extensions`.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.tag)
    }
}

/// The set of custom elements bound at one level (feed or entry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    elements: Vec<ElementSpec>,
}

impl Schema {
    pub fn with(elements: impl IntoIterator<Item = ElementSpec>) -> Self {
        let mut schema = Self::default();
        for element in elements {
            schema.extend_schema(element);
        }
        schema
    }

    /// Adds an element; an identical spec already present is not duplicated.
    pub fn extend_schema(&mut self, element: ElementSpec) {
        if !self.elements.contains(&element) {
            self.elements.push(element);
        }
    }

    pub fn elements(&self) -> &[ElementSpec] {
        &self.elements
    }

    /// Finds the spec for a qualified element name.
    pub fn find(&self, qname: &[u8]) -> Option<&ElementSpec> {
        self.elements.iter().find(|e| e.tag.as_bytes() == qname)
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// A registered format together with its feed schema and nested entry schema.
pub struct FormatDescriptor {
    format: Arc<dyn FeedFormat>,
    feed_schema: Schema,
    entry_schema: Schema,
}

impl FormatDescriptor {
    fn new(format: Arc<dyn FeedFormat>) -> Self {
        let (feed_schema, entry_schema) = format.default_schemas();
        Self {
            format,
            feed_schema,
            entry_schema,
        }
    }

    pub fn name(&self) -> &str {
        self.format.name()
    }

    pub fn can_parse(&self, prefix: &[u8]) -> bool {
        self.format.can_parse(prefix)
    }

    /// Parses `document` with this format, then binds custom elements.
    pub fn parse(&self, document: &[u8]) -> Result<Feed, ParseError> {
        let mut feed = self.format.parse(document)?;
        if feed.format.is_empty() {
            feed.format = self.name().to_string();
        }
        bind_extensions(document, &self.feed_schema, &self.entry_schema, &mut feed);
        self.format.finish(&mut feed);
        Ok(feed)
    }

    pub fn feed_schema(&self) -> &Schema {
        &self.feed_schema
    }

    pub fn entry_schema(&self) -> &Schema {
        &self.entry_schema
    }

    /// Adds a feed-level custom element to this descriptor.
    pub fn extend_schema(&mut self, element: ElementSpec) {
        self.feed_schema.extend_schema(element);
    }

    /// Nested entry schema, for entry-level extensions.
    pub fn entry_schema_mut(&mut self) -> &mut Schema {
        &mut self.entry_schema
    }
}

impl std::fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("name", &self.name())
            .field("feed_schema", &self.feed_schema)
            .field("entry_schema", &self.entry_schema)
            .finish()
    }
}

/// Ordered list of format descriptors, highest priority first.
///
/// Built once at startup, extended only through [`register`](Self::register)
/// and the `add_*_element` calls, then shared read-only (usually as
/// `Arc<FormatRegistry>`) with the fetcher.
#[derive(Debug)]
pub struct FormatRegistry {
    descriptors: Vec<FormatDescriptor>,
    feed_elements: Vec<ElementSpec>,
    entry_elements: Vec<ElementSpec>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    /// Registry holding the built-in dialects, most specific first.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.descriptors = BuiltinFormat::ALL
            .iter()
            .map(|f| FormatDescriptor::new(Arc::new(*f)))
            .collect();
        registry
    }

    /// Registry with no formats at all.
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
            feed_elements: Vec::new(),
            entry_elements: Vec::new(),
        }
    }

    /// Adds a format ahead of every previously registered one.
    ///
    /// Custom elements added earlier through `add_*_element` apply to it too.
    pub fn register<F: FeedFormat + 'static>(&mut self, format: F) {
        self.register_shared(Arc::new(format));
    }

    pub fn register_shared(&mut self, format: Arc<dyn FeedFormat>) {
        let mut descriptor = FormatDescriptor::new(format);
        for element in &self.feed_elements {
            descriptor.extend_schema(element.clone());
        }
        for element in &self.entry_elements {
            descriptor.entry_schema_mut().extend_schema(element.clone());
        }
        tracing::debug!(format = %descriptor.name(), "Registered feed format");
        self.descriptors.insert(0, descriptor);
    }

    /// Binds a feed-level element for every registered format.
    pub fn add_feed_element(&mut self, element: ElementSpec) {
        for descriptor in &mut self.descriptors {
            descriptor.extend_schema(element.clone());
        }
        self.feed_elements.push(element);
    }

    /// Binds an entry-level element for every registered format.
    pub fn add_entry_element(&mut self, element: ElementSpec) {
        for descriptor in &mut self.descriptors {
            descriptor.entry_schema_mut().extend_schema(element.clone());
        }
        self.entry_elements.push(element);
    }

    /// Returns the first format claiming the document's leading bytes.
    pub fn detect(&self, document: &[u8]) -> Option<&FormatDescriptor> {
        let prefix = &document[..document.len().min(SNIFF_PREFIX_LEN)];
        self.descriptors.iter().find(|d| d.can_parse(prefix))
    }

    /// Detects the document's format and parses it.
    pub fn parse(&self, document: &[u8]) -> Result<Feed, ParseError> {
        let descriptor = self.detect(document).ok_or(ParseError::NoParserAvailable)?;
        descriptor.parse(document)
    }

    /// Registered formats in priority order.
    pub fn descriptors(&self) -> impl Iterator<Item = &FormatDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
