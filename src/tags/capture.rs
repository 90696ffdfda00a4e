use crate::ast::{Node, Render, Tag, render_all};
use crate::context::Context;
use crate::error::{LiquidResult, ParseErrorKind};
use crate::expression::{Cursor, Lexeme};
use crate::tags::{TagBuilder, identifier};

const SYNTAX: &str = "{% capture [var] %}";

/// `{% capture name %}...{% endcapture %}`: renders the body into a buffer
/// and binds the text in the innermost scope instead of writing it out.
#[derive(Debug)]
pub struct Capture {
    name: String,
    body: Vec<Node>,
}

impl Capture {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct CaptureBuilder(Capture);

pub(super) fn open(tag: &str, markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    let syntax = || ParseErrorKind::tag_syntax(tag, SYNTAX);
    let mut cursor = Cursor::new(markup)?;
    let name = match cursor.next_lexeme() {
        Some(Lexeme::Str(name)) => name,
        Some(Lexeme::Word(word)) => identifier(word).ok_or_else(syntax)?,
        _ => return Err(syntax()),
    };
    if !cursor.is_done() {
        return Err(syntax());
    }
    Ok(Box::new(CaptureBuilder(Capture {
        name: name.to_owned(),
        body: Vec::new(),
    })))
}

impl TagBuilder for CaptureBuilder {
    fn is_block(&self) -> bool {
        true
    }

    fn push(&mut self, node: Node) {
        self.0.body.push(node);
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(Node::Tag(Tag::Capture(self.0))))
    }
}

impl Render for Capture {
    fn render(&self, context: &mut Context, _out: &mut String) -> LiquidResult<()> {
        let mut buffer = String::new();
        {
            let mut scope = context.scoped();
            render_all(&self.body, &mut scope, &mut buffer)?;
        }
        context.set_local(self.name.as_str(), buffer);
        Ok(())
    }

    fn children(&self) -> Vec<&[Node]> {
        vec![&self.body]
    }
}
