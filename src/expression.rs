use std::cmp::Ordering;

use crate::error::ParseErrorKind;
use crate::value::Value;

type MarkupResult<T> = Result<T, ParseErrorKind>;

/// A parsed value reference: a literal, a range or a variable path.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// `(start..end)`, inclusive on both ends.
    Range(Box<Expression>, Box<Expression>),
    Path(VariablePath),
}

/// A dotted/indexed variable reference such as `products[0].title`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariablePath {
    pub(crate) source: String,
    pub(crate) segments: Vec<Segment>,
}

impl VariablePath {
    /// The path as written in the template.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The last plain name in the path, used by `include` to name the bound
    /// `with` value.
    pub fn last_name(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            Segment::Name(name) => Some(name.as_str()),
            Segment::Index(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Name(String),
    /// `[expr]`; the inner expression is evaluated before indexing.
    Index(Expression),
}

/// `name: arg, arg` in a filter chain.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<Expression>,
}

/// An expression followed by zero or more `| filter` calls.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredExpression {
    pub expression: Expression,
    pub filters: Vec<FilterCall>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Contains,
}

impl Operator {
    fn from_symbol(symbol: &str) -> MarkupResult<Self> {
        Ok(match symbol {
            "==" => Self::Equal,
            "!=" | "<>" => Self::NotEqual,
            "<" => Self::Less,
            ">" => Self::Greater,
            "<=" => Self::LessOrEqual,
            ">=" => Self::GreaterOrEqual,
            "contains" => Self::Contains,
            other => return Err(ParseErrorKind::UnknownOperator(other.to_owned())),
        })
    }

    pub fn apply(self, left: &Value, right: &Value) -> bool {
        let ordering = || left.liquid_cmp(right);
        match self {
            Self::Equal => left.liquid_eq(right),
            Self::NotEqual => !left.liquid_eq(right),
            Self::Less => ordering() == Some(Ordering::Less),
            Self::Greater => ordering() == Some(Ordering::Greater),
            Self::LessOrEqual => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            Self::GreaterOrEqual => {
                matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))
            }
            Self::Contains => left.contains(right),
        }
    }
}

/// A boolean condition as used by `if`, `elsif` and `unless`.
///
/// `and`/`or` chains nest to the right, so `a or b and c` evaluates as
/// `a or (b and c)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        left: Expression,
        comparison: Option<(Operator, Expression)>,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lexeme<'a> {
    /// A quoted string, quotes removed.
    Str(&'a str),
    Word(&'a str),
    Comparison(&'a str),
    Comma,
    Colon,
    Pipe,
    Open,
    Close,
}

const fn is_word_stop(c: char) -> bool {
    matches!(c, ',' | '|' | ':' | '=' | '!' | '<' | '>' | '(' | ')')
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Byte offset of the quote closing the one at the start of `s`, if any.
fn closing_quote(s: &str) -> Option<usize> {
    let mut chars = s.char_indices();
    let (_, quote) = chars.next()?;
    chars.find(|&(_, c)| c == quote).map(|(i, _)| i)
}

/// Splits tag or output markup into lexemes.
pub(crate) fn lex(markup: &str) -> MarkupResult<Vec<Lexeme<'_>>> {
    let mut lexemes = Vec::new();
    let mut rest = markup.trim_start();

    while let Some(c) = rest.chars().next() {
        let (lexeme, len) = match c {
            '\'' | '"' => {
                let end = closing_quote(rest)
                    .ok_or_else(|| ParseErrorKind::VariableNotTerminated(markup.trim().to_owned()))?;
                (Lexeme::Str(rest.get(1..end).unwrap_or_default()), end.saturating_add(1))
            }
            ',' => (Lexeme::Comma, 1),
            ':' => (Lexeme::Colon, 1),
            '|' => (Lexeme::Pipe, 1),
            '(' => (Lexeme::Open, 1),
            ')' => (Lexeme::Close, 1),
            '=' | '!' | '<' | '>' => {
                let len = rest
                    .find(|c: char| !matches!(c, '=' | '!' | '<' | '>'))
                    .unwrap_or(rest.len());
                (Lexeme::Comparison(rest.get(..len).unwrap_or_default()), len)
            }
            _ => {
                let len = word_len(rest);
                (Lexeme::Word(rest.get(..len).unwrap_or_default().trim_end()), len)
            }
        };
        lexemes.push(lexeme);
        rest = rest.get(len..).unwrap_or_default().trim_start();
    }

    Ok(lexemes)
}

/// Length of the word at the start of `s`. Brackets nest, and quoted text
/// inside brackets may contain anything.
fn word_len(s: &str) -> usize {
    let mut depth = 0_usize;
    let mut iter = s.char_indices();
    while let Some((i, c)) = iter.next() {
        match c {
            '[' => depth = depth.saturating_add(1),
            ']' => depth = depth.saturating_sub(1),
            '\'' | '"' if depth > 0 => {
                if let Some(end) = s.get(i..).and_then(closing_quote) {
                    let target = i.saturating_add(end);
                    for (j, _) in iter.by_ref() {
                        if j >= target {
                            break;
                        }
                    }
                }
            }
            c if depth == 0 && (c.is_whitespace() || is_word_stop(c) || c == '\'' || c == '"') => {
                if i > 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    s.len()
}

/// Finds the `]` closing the `[` at the start of `s`. Falls back to the first
/// `]` outside quotes when the brackets do not balance.
fn bracket_end(s: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut first_close = None;
    let mut i = 0;
    while let Some(c) = s.get(i..).and_then(|r| r.chars().next()) {
        match c {
            '\'' | '"' => {
                if let Some(end) = s.get(i..).and_then(closing_quote) {
                    i = i.saturating_add(end).saturating_add(1);
                    continue;
                }
            }
            '[' => depth = depth.saturating_add(1),
            ']' => {
                first_close.get_or_insert(i);
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i = i.saturating_add(c.len_utf8());
    }
    first_close
}

/// Parses a variable path. Any malformed segment fails with the whole text
/// handed to this call, or with the inner fragment when a nested bracket is
/// the culprit.
pub fn parse_path(text: &str) -> MarkupResult<VariablePath> {
    let not_terminated = || ParseErrorKind::VariableNotTerminated(text.to_owned());
    let mut segments = Vec::new();
    let mut rest = text;
    let mut expect_name = true;

    loop {
        match rest.chars().next() {
            Some('[') => {
                let end = bracket_end(rest).ok_or_else(not_terminated)?;
                let inner = rest.get(1..end).unwrap_or_default().trim();
                if inner.is_empty() {
                    return Err(not_terminated());
                }
                let index = if inner.starts_with(['\'', '"']) {
                    match lex(inner) {
                        Ok(lexemes) if lexemes.len() == 1 => match lexemes.first() {
                            Some(Lexeme::Str(s)) => Expression::Literal(Value::from(*s)),
                            _ => return Err(not_terminated()),
                        },
                        _ => return Err(not_terminated()),
                    }
                } else {
                    match literal(inner) {
                        Some(expression) => expression,
                        None => Expression::Path(parse_path(inner)?),
                    }
                };
                segments.push(Segment::Index(index));
                rest = rest.get(end.saturating_add(1)..).unwrap_or_default();
            }
            Some(c) if expect_name && is_name_char(c) => {
                let len = rest.find(|c: char| !is_name_char(c)).unwrap_or(rest.len());
                segments.push(Segment::Name(rest.get(..len).unwrap_or_default().to_owned()));
                rest = rest.get(len..).unwrap_or_default();
            }
            _ => return Err(not_terminated()),
        }

        match rest.chars().next() {
            None => break,
            Some('.') => {
                rest = rest.get(1..).unwrap_or_default();
                expect_name = true;
                if !rest.starts_with(is_name_char) {
                    return Err(not_terminated());
                }
            }
            Some('[') => expect_name = false,
            Some(_) => return Err(not_terminated()),
        }
    }

    Ok(VariablePath {
        source: text.to_owned(),
        segments,
    })
}

/// Literal keywords and numbers. `None` when `word` is not a literal.
fn literal(word: &str) -> Option<Expression> {
    let value = match word {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "nil" | "null" => Value::Nil,
        _ => {
            let numeric = word
                .strip_prefix('-')
                .unwrap_or(word)
                .starts_with(|c: char| c.is_ascii_digit());
            if !numeric {
                return None;
            }
            if let Ok(i) = word.parse::<i64>() {
                Value::Int(i)
            } else {
                Value::Float(word.parse::<f64>().ok()?)
            }
        }
    };
    Some(Expression::Literal(value))
}

/// Parses a single word: literal, `a..b` range body or variable path.
pub fn parse_word(word: &str) -> MarkupResult<Expression> {
    if let Some(expression) = literal(word) {
        return Ok(expression);
    }
    parse_path(word).map(Expression::Path)
}

/// A cursor over lexed markup with the small helpers every tag parser needs.
pub(crate) struct Cursor<'a> {
    lexemes: Vec<Lexeme<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(markup: &'a str) -> MarkupResult<Self> {
        Ok(Self {
            lexemes: lex(markup)?,
            pos: 0,
        })
    }

    pub(crate) fn peek(&self) -> Option<Lexeme<'a>> {
        self.lexemes.get(self.pos).copied()
    }

    pub(crate) fn next_lexeme(&mut self) -> Option<Lexeme<'a>> {
        let lexeme = self.peek();
        if lexeme.is_some() {
            self.pos = self.pos.saturating_add(1);
        }
        lexeme
    }

    pub(crate) fn is_done(&self) -> bool {
        self.pos >= self.lexemes.len()
    }

    /// Consumes `lexeme` if it is next.
    pub(crate) fn eat(&mut self, lexeme: Lexeme<'_>) -> bool {
        if self.peek() == Some(lexeme) {
            self.pos = self.pos.saturating_add(1);
            true
        } else {
            false
        }
    }

    /// Consumes the keyword `word` if it is next.
    pub(crate) fn eat_word(&mut self, word: &str) -> bool {
        self.eat(Lexeme::Word(word))
    }

    pub(crate) fn word(&mut self) -> Option<&'a str> {
        match self.peek() {
            Some(Lexeme::Word(word)) => {
                self.pos = self.pos.saturating_add(1);
                Some(word)
            }
            _ => None,
        }
    }

    /// Parses one operand: a string, a word or a parenthesised range.
    /// Returns `None` when no operand starts here.
    pub(crate) fn operand(&mut self) -> MarkupResult<Option<Expression>> {
        match self.peek() {
            Some(Lexeme::Str(s)) => {
                self.pos = self.pos.saturating_add(1);
                Ok(Some(Expression::Literal(Value::from(s))))
            }
            Some(Lexeme::Word(word)) => {
                self.pos = self.pos.saturating_add(1);
                parse_word(word).map(Some)
            }
            Some(Lexeme::Open) => {
                let range = match (
                    self.lexemes.get(self.pos.saturating_add(1)),
                    self.lexemes.get(self.pos.saturating_add(2)),
                ) {
                    (Some(Lexeme::Word(body)), Some(Lexeme::Close)) => body.split_once(".."),
                    _ => None,
                };
                let Some((start, end)) = range else {
                    return Ok(None);
                };
                self.pos = self.pos.saturating_add(3);
                Ok(Some(Expression::Range(
                    Box::new(parse_word(start.trim())?),
                    Box::new(parse_word(end.trim())?),
                )))
            }
            Some(
                Lexeme::Comparison(_) | Lexeme::Comma | Lexeme::Colon | Lexeme::Pipe | Lexeme::Close,
            )
            | None => Ok(None),
        }
    }

    /// Parses `| name: arg, arg | name` segments until the end of markup.
    /// Empty segments are skipped.
    pub(crate) fn filters(&mut self) -> MarkupResult<Vec<FilterCall>> {
        let mut filters = Vec::new();
        while self.eat(Lexeme::Pipe) {
            let Some(name) = self.word() else {
                continue;
            };
            let mut args = Vec::new();
            if self.eat(Lexeme::Colon) {
                loop {
                    if let Some(arg) = self.operand()? {
                        args.push(arg);
                    }
                    if !self.eat(Lexeme::Comma) {
                        break;
                    }
                }
            }
            filters.push(FilterCall {
                name: name.to_owned(),
                args,
            });
            // Anything else before the next pipe is ignored.
            while !matches!(self.peek(), Some(Lexeme::Pipe) | None) {
                self.pos = self.pos.saturating_add(1);
            }
        }
        Ok(filters)
    }

    /// Skips grouping parentheses, which conditions ignore.
    fn skip_parens(&mut self) {
        while matches!(self.peek(), Some(Lexeme::Close)) {
            self.pos = self.pos.saturating_add(1);
        }
        while matches!(self.peek(), Some(Lexeme::Open)) && self.operand_is_not_range() {
            self.pos = self.pos.saturating_add(1);
        }
    }

    fn operand_is_not_range(&self) -> bool {
        !matches!(
            (
                self.lexemes.get(self.pos.saturating_add(1)),
                self.lexemes.get(self.pos.saturating_add(2)),
            ),
            (Some(Lexeme::Word(body)), Some(Lexeme::Close)) if body.contains("..")
        )
    }

    /// Parses `a op b (and|or) ...`. A token where `and`/`or` is expected that
    /// is neither ends the condition; the rest of the markup is ignored.
    pub(crate) fn condition(&mut self) -> MarkupResult<Option<Condition>> {
        self.skip_parens();
        let Some(left) = self.operand()? else {
            return Ok(None);
        };

        let operator = match self.peek() {
            Some(Lexeme::Comparison(symbol)) => Some(Operator::from_symbol(symbol)?),
            Some(Lexeme::Word("contains")) => Some(Operator::Contains),
            _ => None,
        };
        let comparison = match operator {
            Some(operator) => {
                self.pos = self.pos.saturating_add(1);
                self.skip_parens();
                let right = self
                    .operand()?
                    .unwrap_or(Expression::Literal(Value::Nil));
                Some((operator, right))
            }
            None => None,
        };
        let compare = Condition::Compare { left, comparison };

        self.skip_parens();
        let is_and = match self.peek() {
            Some(Lexeme::Word("and")) => true,
            Some(Lexeme::Word("or")) => false,
            _ => {
                self.pos = self.lexemes.len();
                return Ok(Some(compare));
            }
        };
        self.pos = self.pos.saturating_add(1);
        let Some(rest) = self.condition()? else {
            return Ok(Some(compare));
        };
        let (left, right) = (Box::new(compare), Box::new(rest));
        Ok(Some(if is_and {
            Condition::And(left, right)
        } else {
            Condition::Or(left, right)
        }))
    }
}

/// Parses output markup: `expr | filter: arg`. Empty markup yields `None`.
pub fn parse_output(markup: &str) -> MarkupResult<Option<FilteredExpression>> {
    let mut cursor = Cursor::new(markup)?;
    let Some(expression) = cursor.operand()? else {
        return Ok(None);
    };
    while !matches!(cursor.peek(), Some(Lexeme::Pipe) | None) {
        cursor.next_lexeme();
    }
    let filters = cursor.filters()?;
    Ok(Some(FilteredExpression {
        expression,
        filters,
    }))
}

/// Parses a condition. Empty markup yields `None`.
pub fn parse_condition(markup: &str) -> MarkupResult<Option<Condition>> {
    Cursor::new(markup)?.condition()
}
