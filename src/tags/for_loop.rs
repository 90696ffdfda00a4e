use crate::ast::{Node, Render, Tag, render_all};
use crate::context::{Context, int_range};
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{Cursor, Expression, Lexeme};
use crate::tags::{TagBuilder, identifier};
use crate::value::{Hash, Value};

const SYNTAX: &str = "{% for [item] in [collection] [limit: n] [offset: n] [reversed] %}";

/// `{% for item in collection %}...{% else %}...{% endfor %}`
///
/// The loop body runs inside one scope holding the loop variable and a
/// `forloop` object. `else` renders when the collection is empty.
#[derive(Debug)]
pub struct For {
    variable: String,
    collection: Expression,
    limit: Option<Expression>,
    offset: Option<Expression>,
    reversed: bool,
    body: Vec<Node>,
    else_body: Option<Vec<Node>>,
}

struct ForBuilder(For);

pub(super) fn open(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, SYNTAX);
    let mut cursor = Cursor::new(markup)?;

    let variable = cursor.word().and_then(identifier).ok_or_else(syntax)?;
    if !cursor.eat_word("in") {
        return Err(syntax());
    }
    let collection = cursor.operand()?.ok_or_else(syntax)?;

    let mut limit = None;
    let mut offset = None;
    let mut reversed = false;
    while !cursor.is_done() {
        match cursor.word() {
            Some("reversed") => reversed = true,
            Some(name @ ("limit" | "offset")) => {
                if !cursor.eat(Lexeme::Colon) {
                    return Err(syntax());
                }
                let value = cursor.operand()?.ok_or_else(syntax)?;
                if name == "limit" {
                    limit = Some(value);
                } else {
                    offset = Some(value);
                }
            }
            _ => return Err(syntax()),
        }
        cursor.eat(Lexeme::Comma);
    }

    Ok(Box::new(ForBuilder(For {
        variable: variable.to_owned(),
        collection,
        limit,
        offset,
        reversed,
        body: Vec::new(),
        else_body: None,
    })))
}

impl TagBuilder for ForBuilder {
    fn is_block(&self) -> bool {
        true
    }

    fn accepts_clause(&self, name: &str) -> bool {
        name == "else" && self.0.else_body.is_none()
    }

    fn clause(&mut self, _name: &str, _markup: &str) -> Result<(), ParseErrorKind> {
        self.0.else_body = Some(Vec::new());
        Ok(())
    }

    fn push(&mut self, node: Node) {
        match self.0.else_body.as_mut() {
            Some(body) => body.push(node),
            None => self.0.body.push(node),
        }
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(Node::Tag(Tag::For(self.0))))
    }
}

/// The elements a value iterates over. Hashes yield `[key, value]` pairs.
fn elements(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Hash(map) => map
            .into_iter()
            .map(|(key, value)| Value::Array(vec![Value::Str(key), value]))
            .collect(),
        Value::Drop(drop) => drop.iterate().unwrap_or_default(),
        Value::Nil => Vec::new(),
        other @ (Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)) => vec![other],
    }
}

fn as_count(value: &Value) -> usize {
    match value {
        Value::Int(i) => usize::try_from(*i).unwrap_or(0),
        Value::Str(s) => s.trim().parse().unwrap_or(0),
        Value::Nil
        | Value::Bool(_)
        | Value::Float(_)
        | Value::Array(_)
        | Value::Hash(_)
        | Value::Drop(_) => 0,
    }
}

/// Applies `offset` and `limit` to the bounds of an integer range, so only
/// the visited part is ever built.
fn window(start: i64, end: i64, offset: usize, limit: Option<usize>) -> (i64, i64) {
    let first = start.saturating_add(i64::try_from(offset).unwrap_or(i64::MAX));
    let last = match limit {
        Some(0) => return (first, first.saturating_sub(1)),
        Some(limit) => {
            let span = i64::try_from(limit.saturating_sub(1)).unwrap_or(i64::MAX);
            end.min(first.saturating_add(span))
        }
        None => end,
    };
    (first, last)
}

fn forloop(index: usize, length: usize) -> Value {
    let remaining = length.saturating_sub(index);
    let mut forloop = Hash::new();
    forloop.insert("length".into(), Value::from(length));
    forloop.insert("index".into(), Value::from(index.saturating_add(1)));
    forloop.insert("index0".into(), Value::from(index));
    forloop.insert("rindex".into(), Value::from(remaining));
    forloop.insert("rindex0".into(), Value::from(remaining.saturating_sub(1)));
    forloop.insert("first".into(), Value::Bool(index == 0));
    forloop.insert("last".into(), Value::Bool(remaining == 1));
    Value::Hash(forloop)
}

impl Render for For {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        let offset = match &self.offset {
            Some(offset) => as_count(&context.evaluate(offset)?),
            None => 0,
        };
        let limit = match &self.limit {
            Some(limit) => Some(as_count(&context.evaluate(limit)?)),
            None => None,
        };
        let mut items = if let Expression::Range(start, end) = &self.collection {
            let (start, end) = context.range_bounds(start, end)?;
            let (first, last) = window(start, end, offset, limit);
            int_range(first, last)?
        } else {
            elements(context.evaluate(&self.collection)?)
                .into_iter()
                .skip(offset)
                .take(limit.unwrap_or(usize::MAX))
                .collect()
        };
        if self.reversed {
            items.reverse();
        }

        let mut scope = context.scoped();
        if items.is_empty() {
            return match &self.else_body {
                Some(body) => render_all(body, &mut scope, out),
                None => Ok(()),
            };
        }

        let length = items.len();
        for (index, item) in items.into_iter().enumerate() {
            scope.set_local(self.variable.as_str(), item);
            scope.set_local("forloop", forloop(index, length));
            render_all(&self.body, &mut scope, out)?;
        }
        Ok(())
    }

    fn children(&self) -> Vec<&[Node]> {
        let mut children = vec![self.body.as_slice()];
        children.extend(self.else_body.as_deref());
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_forloop_fields() {
        let Value::Hash(last) = forloop(2, 3) else {
            panic!("forloop is a hash");
        };
        assert_eq!(last.get("index"), Some(&Value::Int(3)));
        assert_eq!(last.get("rindex0"), Some(&Value::Int(0)));
        assert_eq!(last.get("last"), Some(&Value::Bool(true)));
        assert_eq!(last.get("first"), Some(&Value::Bool(false)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_hash_iterates_pairs() {
        let items = elements(Value::from([("a", 1)]));
        assert_eq!(items, vec![Value::from(vec![Value::from("a"), Value::Int(1)])]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_range_window() {
        assert_eq!(window(1, 10, 0, None), (1, 10));
        assert_eq!(window(1, 10, 2, Some(3)), (3, 5));
        assert_eq!(window(1, 10, 8, Some(5)), (9, 10));
        assert_eq!(window(1, i64::MAX, 0, Some(2)), (1, 2));
        let (first, last) = window(1, 5, usize::MAX, None);
        assert!(last < first);
        let (first, last) = window(1, 10, 0, Some(0));
        assert!(last < first);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_markup_errors() {
        assert!(open("for", "item items").is_err());
        assert!(open("for", "in items").is_err());
        assert!(open("for", "item in items limit 2").is_err());
        assert!(open("for", "item in (1..3) reversed limit: 2 offset: 1").is_ok());
    }
}
