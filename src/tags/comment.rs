use crate::ast::Node;
use crate::error::ParseErrorKind;
use crate::tags::TagBuilder;

/// `{% comment %}`: the body is skipped without being parsed.
struct Comment;

impl TagBuilder for Comment {
    fn raw_body(&self) -> bool {
        true
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(None)
    }
}

/// `{% raw %}`: the body is output exactly as written.
#[derive(Default)]
struct Raw(String);

impl TagBuilder for Raw {
    fn raw_body(&self) -> bool {
        true
    }

    fn push_raw(&mut self, source: &str) {
        self.0.push_str(source);
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(Some(Node::Literal(self.0)))
    }
}

pub(super) fn open_comment(_tag: &str, _markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    Ok(Box::new(Comment))
}

pub(super) fn open_raw(_tag: &str, _markup: &str) -> Result<Box<dyn TagBuilder>, ParseErrorKind> {
    Ok(Box::new(Raw::default()))
}
