use crate::error::{ParseError, ParseErrorKind};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Literal,
    Variable,
    Tag,
}

/// One fragment of template source.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub kind: TokenKind,
    /// Text between the delimiters for markup, or the text itself for literals.
    pub markup: &'a str,
    /// The fragment exactly as it appeared in the source, delimiters included.
    pub source: &'a str,
    pub line: usize,
    pub column: usize,
}

impl Token<'_> {
    pub(crate) fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.column,
            kind,
        }
    }
}

/// Splits template source into literal, `{{ variable }}` and `{% tag %}`
/// fragments. Quotes inside markup are tracked, so delimiters inside string
/// literals do not end the fragment.
///
/// The iterator is lazy and ends after the first error.
pub(crate) struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    failed: bool,
}

impl<'a> Tokenizer<'a> {
    pub(crate) const fn new(input: &'a str) -> Self {
        Tokenizer {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            failed: false,
        }
    }

    #[inline]
    const fn current_column(&self) -> usize {
        self.pos.saturating_sub(self.line_start_pos).saturating_add(1)
    }

    /// Moves to `end`, keeping line and column tracking in step with any
    /// newlines consumed on the way.
    fn advance_to(&mut self, end: usize) {
        let consumed = self.input.get(self.pos..end).unwrap_or_default();
        for (offset, byte) in consumed.bytes().enumerate() {
            if byte == b'\n' {
                self.line = self.line.saturating_add(1);
                self.line_start_pos = self.pos.saturating_add(offset).saturating_add(1);
            }
        }
        self.pos = end;
    }

    fn next_markup_start(&self) -> Option<usize> {
        let rest = self.input.get(self.pos..)?;
        let bytes = rest.as_bytes();
        let mut i = 0;
        while let Some(&b) = bytes.get(i) {
            if b == b'{' && matches!(bytes.get(i.saturating_add(1)), Some(b'{' | b'%')) {
                return Some(self.pos.saturating_add(i));
            }
            i = i.saturating_add(1);
        }
        None
    }

    /// Finds the byte offset just past the closing delimiter of the markup
    /// that opens at `start`.
    fn markup_end(&self, start: usize, close: &[u8; 2]) -> Option<usize> {
        let bytes = self.input.as_bytes();
        let mut i = start.saturating_add(2);
        while let Some(&b) = bytes.get(i) {
            if b == b'\'' || b == b'"' {
                let closing = bytes
                    .get(i.saturating_add(1)..)
                    .and_then(|rest| rest.iter().position(|&c| c == b));
                if let Some(offset) = closing {
                    i = i.saturating_add(offset).saturating_add(2);
                    continue;
                }
            }
            if b == close[0] && bytes.get(i.saturating_add(1)) == Some(&close[1]) {
                return Some(i.saturating_add(2));
            }
            i = i.saturating_add(1);
        }
        None
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.input.len() {
            return None;
        }

        let line = self.line;
        let column = self.current_column();
        let start = self.pos;

        let markup_start = self.next_markup_start();
        if markup_start != Some(start) {
            let end = markup_start.unwrap_or(self.input.len());
            let text = self.input.get(start..end)?;
            self.advance_to(end);
            return Some(Ok(Token {
                kind: TokenKind::Literal,
                markup: text,
                source: text,
                line,
                column,
            }));
        }

        let is_variable = self.input.as_bytes().get(start.saturating_add(1)) == Some(&b'{');
        let (kind, close, error) = if is_variable {
            (TokenKind::Variable, b"}}", ParseErrorKind::UnterminatedVariable)
        } else {
            (TokenKind::Tag, b"%}", ParseErrorKind::UnterminatedTag)
        };

        let Some(end) = self.markup_end(start, close) else {
            self.failed = true;
            return Some(Err(ParseError {
                line,
                column,
                kind: error,
            }));
        };

        let source = self.input.get(start..end)?;
        let markup = self
            .input
            .get(start.saturating_add(2)..end.saturating_sub(2))
            .unwrap_or_default();
        self.advance_to(end);

        Some(Ok(Token {
            kind,
            markup,
            source,
            line,
            column,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<(TokenKind, &str)> {
        Tokenizer::new(input)
            .map(|t| t.unwrap())
            .map(|t| (t.kind, t.markup))
            .collect()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert!(tokens("").is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_variable_and_tag() {
        assert_eq!(
            tokens("Hello {{ name }}{% if x %}!{% endif %}"),
            vec![
                (TokenKind::Literal, "Hello "),
                (TokenKind::Variable, " name "),
                (TokenKind::Tag, " if x "),
                (TokenKind::Literal, "!"),
                (TokenKind::Tag, " endif "),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_css_braces_stay_literal() {
        let text = " div { font-weight: bold; } ";
        assert_eq!(tokens(text), vec![(TokenKind::Literal, text)]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_delimiters_inside_quotes_are_ignored() {
        assert_eq!(
            tokens("{{ '{{ {% %} }}' }}"),
            vec![(TokenKind::Variable, " '{{ {% %} }}' ")]
        );
        assert_eq!(
            tokens(r#"{% assign x = "%}" %}"#),
            vec![(TokenKind::Tag, r#" assign x = "%}" "#)]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_shorthand_braces() {
        assert_eq!(
            tokens("{{{}}}"),
            vec![(TokenKind::Variable, "{"), (TokenKind::Literal, "}")]
        );
        assert_eq!(tokens("{##}"), vec![(TokenKind::Literal, "{##}")]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_variable_is_error() {
        let err = Tokenizer::new("text {{method} oh nos!")
            .find_map(Result::err)
            .unwrap();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedVariable);
        assert_eq!((err.line, err.column), (1, 6));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_tag_is_error() {
        let err = Tokenizer::new("TEST {% ").find_map(Result::err).unwrap();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedTag);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_positions_track_newlines() {
        let toks: Vec<_> = Tokenizer::new("a\nbc{{ x }}\n{% y %}")
            .map(|t| t.unwrap())
            .collect();
        assert_eq!((toks[1].line, toks[1].column), (2, 3));
        assert_eq!((toks[3].line, toks[3].column), (3, 1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_iteration_stops_after_error() {
        let mut tokenizer = Tokenizer::new("{{ a }}{{ b");
        assert!(tokenizer.next().unwrap().is_ok());
        assert!(tokenizer.next().unwrap().is_err());
        assert!(tokenizer.next().is_none());
    }
}
