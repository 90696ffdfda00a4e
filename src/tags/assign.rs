use crate::ast::{Node, Render, Tag};
use crate::context::Context;
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{FilteredExpression, parse_output};
use crate::tags::{TagBuilder, identifier, leaf};

const SYNTAX: &str = "{% assign [var] = [source] %}";

/// `{% assign name = value | filter %}`. Binds in the outermost scope, so
/// the value outlives the block it was assigned in.
#[derive(Debug)]
pub struct Assign {
    name: String,
    value: FilteredExpression,
}

impl Assign {
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(super) fn open(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, SYNTAX);
    let (target, source) = markup.split_once('=').ok_or_else(syntax)?;
    let name = identifier(target).ok_or_else(syntax)?;
    let value = parse_output(source)?.ok_or_else(syntax)?;
    Ok(leaf(Node::Tag(Tag::Assign(Assign {
        name: name.to_owned(),
        value,
    }))))
}

impl Render for Assign {
    fn render(&self, context: &mut Context, _out: &mut String) -> LiquidResult<()> {
        let value = context.evaluate_filtered(&self.value)?;
        context.assign(self.name.as_str(), value);
        Ok(())
    }
}
