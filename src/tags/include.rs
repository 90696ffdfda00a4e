use crate::ast::{Node, Render, Tag, render_all};
use crate::context::Context;
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{Cursor, Expression, Lexeme};
use crate::tags::{TagBuilder, identifier, leaf};
use crate::value::{Hash, Value};

const SYNTAX: &str = "{% include [template] [with|for] [object|collection] [key: value, ...] %}";

/// `{% include 'name' with value %}` renders another template in place.
///
/// The included template sees the current variables plus a scope holding
/// the `key: value` attributes and the `with`/`for` value, bound under the
/// template's own name. `for` renders once per element.
#[derive(Debug)]
pub struct Include {
    markup: String,
    template: Expression,
    variable: Option<Expression>,
    iterate: bool,
    attributes: Vec<(String, Expression)>,
}

pub(super) fn open(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, SYNTAX);
    let mut cursor = Cursor::new(markup)?;
    let template = cursor.operand()?.ok_or_else(syntax)?;

    let iterate = if cursor.eat_word("with") {
        Some(false)
    } else if cursor.eat_word("for") {
        Some(true)
    } else {
        None
    };
    let variable = match iterate {
        Some(_) => Some(cursor.operand()?.ok_or_else(syntax)?),
        None => None,
    };

    let mut attributes = Vec::new();
    while !cursor.is_done() {
        if cursor.eat(Lexeme::Comma) {
            continue;
        }
        let key = cursor.word().and_then(identifier).ok_or_else(syntax)?;
        if !cursor.eat(Lexeme::Colon) {
            return Err(syntax());
        }
        let value = cursor.operand()?.ok_or_else(syntax)?;
        attributes.push((key.to_owned(), value));
    }

    Ok(leaf(Node::Tag(Tag::Include(Include {
        markup: markup.trim().to_owned(),
        template,
        variable,
        iterate: iterate.unwrap_or(false),
        attributes,
    }))))
}

impl Render for Include {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        let mut context = context.nested()?;
        let source = context.source();

        let name = context.evaluate(&self.template)?;
        if name.is_nil() {
            return source.missing_name(&self.markup);
        }
        let name = name.to_output();
        tracing::debug!(name, depth = context.depth(), "including template");
        let template = source.get_parsed(&context, &name)?;

        let binding = name.rsplit('/').next().unwrap_or(&name).to_owned();
        let variable = match &self.variable {
            Some(expression) => context.evaluate(expression)?,
            None => context.get(&binding).cloned().unwrap_or_default(),
        };
        let mut attributes = Hash::new();
        for (key, expression) in &self.attributes {
            attributes.insert(key.clone(), context.evaluate(expression)?);
        }

        let mut scope = context.scoped_with(attributes);
        let items = match variable {
            Value::Array(items) if self.iterate => items,
            Value::Drop(drop) if self.iterate && drop.iterate().is_some() => {
                drop.iterate().unwrap_or_default()
            }
            single => vec![single],
        };
        for item in items {
            scope.set_local(binding.as_str(), item);
            render_all(template.root(), &mut scope, out)?;
        }
        Ok(())
    }
}
