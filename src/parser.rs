use std::sync::Arc;

use crate::ast::{Node, Tag};
use crate::error::{ParseError, ParseErrorKind};
use crate::expression::parse_output;
use crate::lexer::{Token, TokenKind, Tokenizer};
use crate::member_cache::NamingConvention;
use crate::tags::{TagBuilder, TagRegistry};

type ParseResult<T> = Result<T, ParseError>;

/// Settings chosen at parse time and carried by the template, so templates
/// loaded by `include` and `extends` parse the same way.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub tags: Arc<TagRegistry>,
    /// Maps drop member names to the names templates use.
    pub naming: NamingConvention,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            tags: TagRegistry::standard(),
            naming: NamingConvention::default(),
        }
    }
}

impl ParseOptions {
    #[must_use]
    pub fn with_tags(mut self, tags: TagRegistry) -> Self {
        self.tags = Arc::new(tags);
        self
    }

    #[must_use]
    pub const fn with_naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }
}

/// Collects the top level of a document.
#[derive(Default)]
struct Root {
    nodes: Vec<Node>,
}

impl TagBuilder for Root {
    fn is_block(&self) -> bool {
        true
    }

    fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    fn finish(self: Box<Self>) -> Result<Option<Node>, ParseErrorKind> {
        Ok(None)
    }
}

struct Parser<'a, 'o> {
    tokens: Tokenizer<'a>,
    options: &'o ParseOptions,
    /// How many block bodies enclose the current position.
    depth: usize,
    /// Whether anything other than whitespace appeared at the top level.
    seen_content: bool,
}

/// Splits tag markup into the tag name and the rest.
fn split_tag(markup: &str) -> (&str, &str) {
    let markup = markup.trim_start();
    let len = markup
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(markup.len());
    let (name, rest) = markup.split_at(len);
    (name, rest)
}

impl<'a> Parser<'a, '_> {
    /// Feeds nodes into `builder` until `end<tag>` for the given opening tag,
    /// or until the end of input when `opening` is `None`.
    fn parse_body(
        &mut self,
        builder: &mut dyn TagBuilder,
        opening: Option<(&str, &Token<'a>)>,
    ) -> ParseResult<()> {
        while let Some(token) = self.tokens.next() {
            let token = token?;
            match token.kind {
                TokenKind::Literal => {
                    if self.depth == 0 && !token.source.trim().is_empty() {
                        self.seen_content = true;
                    }
                    builder.push(Node::Literal(token.source.to_owned()));
                }
                TokenKind::Variable => {
                    self.seen_content |= self.depth == 0;
                    if token.markup.trim() == "block.super" {
                        builder.push(Node::Tag(Tag::Super));
                    } else if let Some(output) =
                        parse_output(token.markup).map_err(|kind| token.error(kind))?
                    {
                        builder.push(Node::Output(output));
                    }
                }
                TokenKind::Tag => {
                    let (name, markup) = split_tag(token.markup);
                    if name.is_empty() {
                        builder.push(Node::Literal(token.source.to_owned()));
                        continue;
                    }
                    if opening.is_some_and(|(tag, _)| name.strip_prefix("end") == Some(tag)) {
                        return Ok(());
                    }
                    if builder.accepts_clause(name) {
                        builder
                            .clause(name, markup)
                            .map_err(|kind| token.error(kind))?;
                        continue;
                    }
                    if self.options.tags.contains(name) {
                        if let Some(node) = self.parse_tag(name, markup, &token)? {
                            builder.push(node);
                        }
                        continue;
                    }
                    let kind = match opening {
                        Some((tag, _)) if name.starts_with("end") => ParseErrorKind::UnexpectedEndTag {
                            tag: tag.to_owned(),
                            found: name.to_owned(),
                        },
                        _ => ParseErrorKind::UnknownTag(name.to_owned()),
                    };
                    return Err(token.error(kind));
                }
            }
        }

        match opening {
            Some((tag, token)) => Err(token.error(ParseErrorKind::UnclosedBlock {
                tag: tag.to_owned(),
            })),
            None => Ok(()),
        }
    }

    /// Opens a registered tag and parses its body.
    fn parse_tag(&mut self, name: &str, markup: &str, token: &Token<'a>) -> ParseResult<Option<Node>> {
        let Some(definition) = self.options.tags.get(name).map(Arc::clone) else {
            return Err(token.error(ParseErrorKind::UnknownTag(name.to_owned())));
        };
        let mut builder = definition
            .open(name, markup)
            .map_err(|kind| token.error(kind))?;

        if builder.must_lead() && (self.depth > 0 || self.seen_content) {
            return Err(token.error(ParseErrorKind::MisplacedTag {
                tag: name.to_owned(),
            }));
        }
        self.seen_content |= self.depth == 0;

        if builder.raw_body() {
            self.parse_raw(builder.as_mut(), name, token)?;
        } else if builder.runs_to_end() || builder.is_block() {
            let opening = if builder.runs_to_end() {
                None
            } else {
                Some((name, token))
            };
            self.depth = self.depth.saturating_add(1);
            let result = self.parse_body(builder.as_mut(), opening);
            self.depth = self.depth.saturating_sub(1);
            result?;
        }

        builder.finish().map_err(|kind| token.error(kind))
    }

    /// Hands fragments to a raw tag verbatim until its end tag.
    fn parse_raw(&mut self, builder: &mut dyn TagBuilder, tag: &str, opening: &Token<'a>) -> ParseResult<()> {
        while let Some(token) = self.tokens.next() {
            let token = token?;
            if token.kind == TokenKind::Tag && split_tag(token.markup).0.strip_prefix("end") == Some(tag) {
                return Ok(());
            }
            builder.push_raw(token.source);
        }
        Err(opening.error(ParseErrorKind::UnclosedBlock {
            tag: tag.to_owned(),
        }))
    }
}

/// Parses template source into its top-level nodes.
///
/// A template that uses `extends` is reduced to the single extends node: the
/// parent's layout renders in its place.
pub(crate) fn parse(source: &str, options: &ParseOptions) -> ParseResult<Vec<Node>> {
    let mut parser = Parser {
        tokens: Tokenizer::new(source),
        options,
        depth: 0,
        seen_content: false,
    };
    let mut root = Root::default();
    parser.parse_body(&mut root, None)?;

    let mut nodes = root.nodes;
    if let Some(position) = nodes
        .iter()
        .position(|node| matches!(node, Node::Tag(Tag::Extends(_))))
    {
        let extends = nodes.swap_remove(position);
        nodes = vec![extends];
    }

    tracing::debug!(nodes = nodes.len(), "parsed template");
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_default(source: &str) -> ParseResult<Vec<Node>> {
        parse(source, &ParseOptions::default())
    }

    fn error_kind(source: &str) -> ParseErrorKind {
        parse_default(source).unwrap_err().kind
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert!(parse_default("").unwrap().is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_output_and_tag() {
        let nodes = parse_default("Hi {{ name }}{% if x %}!{% endif %}").unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes.first(), Some(Node::Literal(text)) if text == "Hi "));
        assert!(matches!(nodes.get(1), Some(Node::Output(_))));
        assert!(matches!(nodes.get(2), Some(Node::Tag(Tag::If(_)))));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_markup_is_lenient() {
        let nodes = parse_default("a{{}}b{%%}c").unwrap();
        let literals: Vec<_> = nodes
            .iter()
            .filter_map(|node| match node {
                Node::Literal(text) => Some(text.as_str()),
                Node::Output(_) | Node::Tag(_) => None,
            })
            .collect();
        assert_eq!(literals, vec!["a", "b", "{%%}", "c"]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_block_names_the_tag() {
        assert_eq!(
            error_kind("{% if x %}never closed"),
            ParseErrorKind::UnclosedBlock { tag: "if".into() }
        );
        assert_eq!(
            error_kind("{% capture x %}{% for a in b %}{% endfor %}"),
            ParseErrorKind::UnclosedBlock {
                tag: "capture".into()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_mismatched_end_tag() {
        assert_eq!(
            error_kind("{% if x %}{% endfor %}"),
            ParseErrorKind::UnexpectedEndTag {
                tag: "if".into(),
                found: "endfor".into()
            }
        );
        assert_eq!(error_kind("{% endif %}"), ParseErrorKind::UnknownTag("endif".into()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unknown_tag_position() {
        let err = parse_default("line one\n  {% nope %}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownTag("nope".into()));
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_variable_errors_carry_fragment() {
        assert_eq!(
            error_kind("{{ x[[] }}"),
            ParseErrorKind::VariableNotTerminated("[".into())
        );
        assert_eq!(
            error_kind("{{ $x }}"),
            ParseErrorKind::VariableNotTerminated("$x".into())
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_raw_keeps_markup() {
        let nodes = parse_default("{% raw %}{{ x }}{% if %}{% endraw %}").unwrap();
        assert!(matches!(nodes.as_slice(), [Node::Literal(text)] if text == "{{ x }}{% if %}"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_extends_must_lead() {
        assert!(parse_default("  {% extends 'base' %}").is_ok());
        assert_eq!(
            error_kind("text{% extends 'base' %}"),
            ParseErrorKind::MisplacedTag {
                tag: "extends".into()
            }
        );
        assert_eq!(
            error_kind("{% if a %}{% extends 'base' %}{% endif %}"),
            ParseErrorKind::MisplacedTag {
                tag: "extends".into()
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_extends_replaces_root() {
        let nodes = parse_default("{% extends 'base' %} ignored {% block a %}x{% endblock %}").unwrap();
        assert!(matches!(nodes.as_slice(), [Node::Tag(Tag::Extends(_))]));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_super_output() {
        let nodes = parse_default("{% block a %}{{ block.super }}{% endblock %}").unwrap();
        let Some(Node::Tag(Tag::Block(block))) = nodes.first() else {
            panic!("expected a block: {nodes:?}");
        };
        assert!(matches!(block.body(), [Node::Tag(Tag::Super)]));
    }
}
