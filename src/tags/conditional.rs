use crate::ast::{Node, Render, Tag, render_all};
use crate::context::Context;
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{Condition, parse_condition};
use crate::tags::TagBuilder;

/// `if`/`unless` with optional `elsif` and `else` clauses. `unless` negates
/// only its own condition; `elsif` clauses behave as in `if`.
#[derive(Debug)]
pub struct Conditional {
    negate_first: bool,
    branches: Vec<(Condition, Vec<Node>)>,
    else_body: Option<Vec<Node>>,
}

impl Conditional {
    pub const fn is_unless(&self) -> bool {
        self.negate_first
    }
}

struct ConditionalBuilder(Conditional);

fn condition(tag: &str, markup: &str) -> Result<Condition, ParseErrorKind> {
    parse_condition(markup)?.ok_or_else(|| {
        ParseErrorKind::tag_syntax(tag, &format!("{{% {tag} [expression] [operator] [value] %}}"))
    })
}

pub(super) fn open(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    Ok(Box::new(ConditionalBuilder(Conditional {
        negate_first: tag == "unless",
        branches: vec![(condition(tag, markup)?, Vec::new())],
        else_body: None,
    })))
}

impl TagBuilder for ConditionalBuilder {
    fn is_block(&self) -> bool {
        true
    }

    fn accepts_clause(&self, name: &str) -> bool {
        matches!(name, "elsif" | "else")
    }

    fn clause(&mut self, name: &str, markup: &str) -> Result<(), ParseErrorKind> {
        if self.0.else_body.is_some() {
            return Err(ParseErrorKind::tag_syntax(
                name,
                "no clause may follow {% else %}",
            ));
        }
        if name == "elsif" {
            self.0.branches.push((condition(name, markup)?, Vec::new()));
        } else {
            self.0.else_body = Some(Vec::new());
        }
        Ok(())
    }

    fn push(&mut self, node: Node) {
        let body = match self.0.else_body.as_mut() {
            Some(body) => Some(body),
            None => self.0.branches.last_mut().map(|(_, body)| body),
        };
        if let Some(body) = body {
            body.push(node);
        }
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(Node::Tag(Tag::If(self.0))))
    }
}

impl Render for Conditional {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        for (index, (condition, body)) in self.branches.iter().enumerate() {
            let mut holds = context.evaluate_condition(condition)?;
            if index == 0 && self.negate_first {
                holds = !holds;
            }
            if holds {
                return render_all(body, context, out);
            }
        }
        match &self.else_body {
            Some(body) => render_all(body, context, out),
            None => Ok(()),
        }
    }

    fn children(&self) -> Vec<&[Node]> {
        self.branches
            .iter()
            .map(|(_, body)| body.as_slice())
            .chain(self.else_body.as_deref())
            .collect()
    }
}
