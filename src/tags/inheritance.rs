use std::sync::Arc;

use crate::ast::{Node, Render, Tag, render_all, walk};
use crate::context::{BlockFrame, Context};
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{Cursor, Expression, Lexeme};
use crate::tags::{TagBuilder, identifier};

/// `{% extends 'parent' %}`: renders the parent template, with this
/// template's `block`s overriding the parent's blocks of the same name.
///
/// Must be the first tag. Everything after it is parsed, but only `block`
/// bodies are used.
#[derive(Debug)]
pub struct Extends {
    parent: Expression,
    /// Every block in this template, outer blocks first. The first definition
    /// of a name wins.
    blocks: Vec<(String, Arc<[Node]>)>,
    body: Vec<Node>,
}

impl Extends {
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|(name, _)| name.as_str())
    }
}

/// `{% block name %}...{% endblock %}`: a slot templates extending this one
/// may override.
#[derive(Debug)]
pub struct Block {
    name: String,
    body: Arc<[Node]>,
}

impl Block {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &[Node] {
        &self.body
    }
}

struct ExtendsBuilder {
    parent: Expression,
    body: Vec<Node>,
}

struct BlockBuilder {
    name: String,
    body: Vec<Node>,
}

pub(super) fn open_extends(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, "{% extends [template] %}");
    let mut cursor = Cursor::new(markup)?;
    let parent = cursor.operand()?.ok_or_else(syntax)?;
    if !cursor.is_done() {
        return Err(syntax());
    }
    Ok(Box::new(ExtendsBuilder {
        parent,
        body: Vec::new(),
    }))
}

pub(super) fn open_block(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, "{% block [name] %}");
    let mut cursor = Cursor::new(markup)?;
    let name = match cursor.next_lexeme() {
        Some(Lexeme::Str(name)) => name,
        Some(Lexeme::Word(word)) => identifier(word).ok_or_else(syntax)?,
        _ => return Err(syntax()),
    };
    Ok(Box::new(BlockBuilder {
        name: name.to_owned(),
        body: Vec::new(),
    }))
}

impl TagBuilder for ExtendsBuilder {
    fn runs_to_end(&self) -> bool {
        true
    }

    fn must_lead(&self) -> bool {
        true
    }

    fn push(&mut self, node: Node) {
        self.body.push(node);
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        let mut blocks: Vec<(String, Arc<[Node]>)> = Vec::new();
        walk(&self.body, &mut |node| {
            if let Node::Tag(Tag::Block(block)) = node {
                if !blocks.iter().any(|(name, _)| *name == block.name) {
                    blocks.push((block.name.clone(), Arc::clone(&block.body)));
                }
            }
        });

        Ok(Some(Node::Tag(Tag::Extends(Extends {
            parent: self.parent,
            blocks,
            body: self.body,
        }))))
    }
}

impl TagBuilder for BlockBuilder {
    fn is_block(&self) -> bool {
        true
    }

    fn push(&mut self, node: Node) {
        self.body.push(node);
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(Node::Tag(Tag::Block(Block {
            name: self.name,
            body: Arc::from(self.body),
        }))))
    }
}

impl Render for Extends {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        let mut context = context.nested()?;
        let name = context.evaluate(&self.parent)?.to_output();
        let source = context.source();
        tracing::debug!(name, depth = context.depth(), "loading parent template");
        let parent = source.get_parsed(&context, &name)?;

        // Definitions closer to the rendered template come first.
        for (block, body) in &self.blocks {
            context
                .blocks
                .entry(block.clone())
                .or_default()
                .push(Arc::clone(body));
        }

        let result = render_all(parent.root(), &mut context, out);

        for (block, _) in &self.blocks {
            if let Some(chain) = context.blocks.get_mut(block) {
                chain.pop();
                if chain.is_empty() {
                    context.blocks.remove(block);
                }
            }
        }
        result
    }

    fn children(&self) -> Vec<&[Node]> {
        vec![&self.body]
    }
}

impl Render for Block {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        let mut chain = context.blocks.get(&self.name).cloned().unwrap_or_default();
        if !chain.iter().any(|body| Arc::ptr_eq(body, &self.body)) {
            chain.push(Arc::clone(&self.body));
        }
        let Some(first) = chain.first().map(Arc::clone) else {
            return Ok(());
        };

        context.block_frames.push(BlockFrame { chain, index: 0 });
        let result = render_all(&first, context, out);
        context.block_frames.pop();
        result
    }

    fn children(&self) -> Vec<&[Node]> {
        vec![&self.body]
    }
}

/// Renders the next less-derived definition of the block being rendered.
pub(crate) fn render_super(context: &mut Context, out: &mut String) -> LiquidResult<()> {
    let Some(frame) = context.block_frames.last() else {
        return Ok(());
    };
    let index = frame.index.saturating_add(1);
    let Some(body) = frame.chain.get(index).map(Arc::clone) else {
        return Ok(());
    };
    let chain = frame.chain.clone();

    context.block_frames.push(BlockFrame { chain, index });
    let result = render_all(&body, context, out);
    context.block_frames.pop();
    result
}
