use std::fmt;

use crate::context::Context;
use crate::error::LiquidResult;
use crate::expression::FilteredExpression;
use crate::tags::{Assign, Block, Capture, Case, Conditional, Extends, For, Include};

/// A parsed node. Templates are immutable trees of these.
#[derive(Debug)]
pub enum Node {
    Literal(String),
    Output(FilteredExpression),
    Tag(Tag),
}

/// The built-in tags, plus custom tags registered by the host.
#[derive(Debug)]
pub enum Tag {
    Assign(Assign),
    Capture(Capture),
    Case(Case),
    For(For),
    /// `if` and `unless`.
    If(Conditional),
    Include(Include),
    Extends(Extends),
    Block(Block),
    /// `{{ block.super }}`: renders the next less-derived definition of the
    /// enclosing block.
    Super,
    Custom(Box<dyn Render>),
}

/// Rendering behaviour of a tag node.
///
/// Custom tags implement this and are stored as [`Tag::Custom`].
pub trait Render: fmt::Debug + Send + Sync {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()>;

    /// Child node lists, so `extends` can find `block` tags nested inside.
    fn children(&self) -> Vec<&[Node]> {
        Vec::new()
    }
}

impl Node {
    pub fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        match self {
            Self::Literal(text) => {
                out.push_str(text);
                Ok(())
            }
            Self::Output(filtered) => {
                context.evaluate_filtered(filtered)?.render_to(out);
                Ok(())
            }
            Self::Tag(tag) => tag.render(context, out),
        }
    }

    pub fn children(&self) -> Vec<&[Node]> {
        match self {
            Self::Literal(_) | Self::Output(_) => Vec::new(),
            Self::Tag(tag) => tag.children(),
        }
    }
}

impl Tag {
    fn as_render(&self) -> Option<&dyn Render> {
        let tag: &dyn Render = match self {
            Self::Assign(tag) => tag,
            Self::Capture(tag) => tag,
            Self::Case(tag) => tag,
            Self::For(tag) => tag,
            Self::If(tag) => tag,
            Self::Include(tag) => tag,
            Self::Extends(tag) => tag,
            Self::Block(tag) => tag,
            Self::Custom(tag) => tag.as_ref(),
            Self::Super => return None,
        };
        Some(tag)
    }

    pub fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        match self.as_render() {
            Some(tag) => tag.render(context, out),
            None => crate::tags::render_super(context, out),
        }
    }

    pub fn children(&self) -> Vec<&[Node]> {
        self.as_render().map(Render::children).unwrap_or_default()
    }
}

/// Renders `nodes` in order. A failing node is handed to the context's error
/// mode; the remaining nodes still render unless the error propagates.
pub fn render_all(nodes: &[Node], context: &mut Context, out: &mut String) -> LiquidResult<()> {
    for node in nodes {
        if let Err(error) = node.render(context, out) {
            context.handle_error(error, out)?;
        }
    }
    Ok(())
}

/// Walks `nodes` depth first, calling `visit` on every node.
pub fn walk<'n, F: FnMut(&'n Node)>(nodes: &'n [Node], visit: &mut F) {
    for node in nodes {
        visit(node);
        for child in node.children() {
            walk(child, visit);
        }
    }
}
