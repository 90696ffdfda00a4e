use crate::ast::{Node, Render, Tag, render_all};
use crate::context::Context;
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{Cursor, Expression, Lexeme};
use crate::tags::TagBuilder;

/// One `when` clause: matches if any of its values equals the subject.
#[derive(Debug)]
pub struct When {
    values: Vec<Expression>,
    body: Vec<Node>,
}

/// `{% case subject %}{% when a, b or c %}...{% else %}...{% endcase %}`
///
/// The first matching `when` renders; `else` renders only when none match.
/// Content before the first clause is dropped.
#[derive(Debug)]
pub struct Case {
    subject: Expression,
    whens: Vec<When>,
    else_body: Option<Vec<Node>>,
}

impl Case {
    pub fn whens(&self) -> &[When] {
        &self.whens
    }

    pub const fn has_else(&self) -> bool {
        self.else_body.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    /// Before the first `when`.
    None,
    When,
    Else,
}

struct CaseBuilder {
    case: Case,
    current: Clause,
}

pub(super) fn open(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, "{% case [condition] %}");
    let mut cursor = Cursor::new(markup)?;
    let subject = cursor.operand()?.ok_or_else(syntax)?;
    Ok(Box::new(CaseBuilder {
        case: Case {
            subject,
            whens: Vec::new(),
            else_body: None,
        },
        current: Clause::None,
    }))
}

fn parse_when(markup: &str) -> Result<Vec<Expression>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax("when", "{% when [condition] [or condition2...] %}");
    let mut cursor = Cursor::new(markup)?;
    let mut values = Vec::new();
    loop {
        values.push(cursor.operand()?.ok_or_else(syntax)?);
        if !(cursor.eat(Lexeme::Comma) || cursor.eat_word("or")) {
            break;
        }
    }
    if !cursor.is_done() {
        return Err(syntax());
    }
    Ok(values)
}

impl TagBuilder for CaseBuilder {
    fn is_block(&self) -> bool {
        true
    }

    fn accepts_clause(&self, name: &str) -> bool {
        matches!(name, "when" | "else")
    }

    fn clause(&mut self, name: &str, markup: &str) -> Result<(), ParseErrorKind> {
        if name == "when" {
            self.case.whens.push(When {
                values: parse_when(markup)?,
                body: Vec::new(),
            });
            self.current = Clause::When;
            return Ok(());
        }

        if !markup.trim().is_empty() || self.case.else_body.is_some() {
            return Err(ParseErrorKind::tag_syntax(
                "else",
                "{% else %}, at most once per case",
            ));
        }
        self.case.else_body = Some(Vec::new());
        self.current = Clause::Else;
        Ok(())
    }

    fn push(&mut self, node: Node) {
        let body = match self.current {
            Clause::None => None,
            Clause::When => self.case.whens.last_mut().map(|when| &mut when.body),
            Clause::Else => self.case.else_body.as_mut(),
        };
        if let Some(body) = body {
            body.push(node);
        }
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(Node::Tag(Tag::Case(self.case))))
    }
}

impl Render for Case {
    fn render(&self, context: &mut Context, out: &mut String) -> LiquidResult<()> {
        let mut scope = context.scoped();
        let subject = scope.evaluate(&self.subject)?;

        for when in &self.whens {
            for value in &when.values {
                if scope.evaluate(value)?.liquid_eq(&subject) {
                    return render_all(&when.body, &mut scope, out);
                }
            }
        }

        match &self.else_body {
            Some(body) => render_all(body, &mut scope, out),
            None => Ok(()),
        }
    }

    fn children(&self) -> Vec<&[Node]> {
        self.whens
            .iter()
            .map(|when| when.body.as_slice())
            .chain(self.else_body.as_deref())
            .collect()
    }
}
