//! Built-in tags and the registry the parser consults for tag names.

mod assign;
mod capture;
mod case;
mod comment;
mod conditional;
mod for_loop;
mod include;
mod inheritance;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

pub use assign::Assign;
pub use capture::Capture;
pub use case::{Case, When};
pub use conditional::Conditional;
pub use for_loop::For;
pub use include::Include;
pub use inheritance::{Block, Extends};
pub(crate) use inheritance::render_super;

use crate::ast::{Node, Render, Tag};
use crate::error::ParseErrorKind;

/// Creates a builder for one occurrence of a tag.
///
/// Implemented for closures taking the tag name and its markup (the text
/// after the name), so simple tags can be registered inline.
pub trait TagDefinition: Send + Sync {
    /// Validates `markup` and returns the builder that receives the tag's
    /// body. Syntax errors must be reported here or from
    /// [`TagBuilder::finish`], never at render time.
    fn open(&self, name: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind>;
}

impl<F> TagDefinition for F
where
    F: Fn(&str, &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> + Send + Sync,
{
    fn open(&self, name: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
        self(name, markup)
    }
}

/// Receives the body of a tag while the parser walks it.
///
/// The defaults describe a tag without a body.
pub trait TagBuilder {
    /// Block tags consume nodes until `end<name>`.
    fn is_block(&self) -> bool {
        false
    }

    /// Raw tags receive their body as source text through
    /// [`push_raw`](TagBuilder::push_raw) instead of parsed nodes.
    fn raw_body(&self) -> bool {
        false
    }

    /// The tag consumes every remaining fragment and has no end tag.
    fn runs_to_end(&self) -> bool {
        false
    }

    /// The tag must be the first markup of the template.
    fn must_lead(&self) -> bool {
        false
    }

    /// Whether `name` starts a new clause of this block (`else`, `when`, ...).
    fn accepts_clause(&self, _name: &str) -> bool {
        false
    }

    fn clause(&mut self, name: &str, _markup: &str) -> Result<(), ParseErrorKind> {
        Err(ParseErrorKind::UnknownTag(name.to_owned()))
    }

    fn push(&mut self, _node: Node) {}

    fn push_raw(&mut self, _source: &str) {}

    /// Produces the finished node, or nothing for tags such as `comment`.
    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind>;
}

/// A builder for a tag without a body that is already complete.
struct Leaf(Node);

impl TagBuilder for Leaf {
    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(self.0))
    }
}

/// Wraps an already built node as a bodiless tag.
pub fn leaf(node: Node) -> Box<dyn TagBuilder> {
    Box::new(Leaf(node))
}

/// Wraps a custom [`Render`] implementation as a bodiless tag.
pub fn custom<R: Render + 'static>(tag: R) -> Box<dyn TagBuilder> {
    leaf(Node::Tag(Tag::Custom(Box::new(tag))))
}

/// Maps tag names to their definitions.
#[derive(Clone, Default)]
pub struct TagRegistry {
    tags: HashMap<String, Arc<dyn TagDefinition>>,
}

static STANDARD: LazyLock<Arc<TagRegistry>> =
    LazyLock::new(|| Arc::new(TagRegistry::with_standard_tags()));

impl TagRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared registry of built-in tags.
    pub fn standard() -> Arc<Self> {
        Arc::clone(&STANDARD)
    }

    /// A fresh registry holding the built-in tags, ready for additions.
    pub fn with_standard_tags() -> Self {
        let mut registry = Self::new();
        registry
            .register("assign", assign::open)
            .register("capture", capture::open)
            .register("case", case::open)
            .register("comment", comment::open_comment)
            .register("raw", comment::open_raw)
            .register("if", conditional::open)
            .register("unless", conditional::open)
            .register("for", for_loop::open)
            .register("include", include::open)
            .register("extends", inheritance::open_extends)
            .register("block", inheritance::open_block);
        registry
    }

    pub fn register<N, D>(&mut self, name: N, definition: D) -> &mut Self
    where
        N: Into<String>,
        D: TagDefinition + 'static,
    {
        self.tags.insert(name.into(), Arc::new(definition));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TagDefinition>> {
        self.tags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tags.keys().collect();
        names.sort();
        f.debug_struct("TagRegistry").field("tags", &names).finish()
    }
}

/// The first word of tag markup when it is a plain identifier.
pub(crate) fn identifier(markup: &str) -> Option<&str> {
    let word = markup.trim();
    let valid = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(word)
}
