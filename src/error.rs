use thiserror::Error;

pub type LiquidResult<T> = std::result::Result<T, LiquidError>;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ParseErrorKind {
    #[error("Variable '{{{{' was not properly terminated with '}}}}'")]
    UnterminatedVariable,
    #[error("Tag '{{%' was not properly terminated with '%}}'")]
    UnterminatedTag,
    /// A variable path or bracket segment that could not be tokenized. Carries
    /// the exact fragment that failed.
    #[error("Variable '{0}' was not properly terminated")]
    VariableNotTerminated(String),
    #[error("Unknown tag '{0}'")]
    UnknownTag(String),
    #[error("'{tag}' tag was never closed")]
    UnclosedBlock { tag: String },
    #[error("'{found}' is not a valid delimiter for {tag} tags. use end{tag}")]
    UnexpectedEndTag { tag: String, found: String },
    #[error("Syntax Error in '{tag}' - Valid syntax: {usage}")]
    TagSyntax { tag: String, usage: String },
    #[error("'{tag}' must be the first tag in the template")]
    MisplacedTag { tag: String },
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),
}

impl ParseErrorKind {
    pub fn tag_syntax(tag: &str, usage: &str) -> Self {
        Self::TagSyntax {
            tag: tag.to_owned(),
            usage: usage.to_owned(),
        }
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Liquid syntax error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum LiquidError {
    #[error(transparent)]
    Syntax(#[from] ParseError),
    #[error("Template already exists: {name}")]
    TemplateExists { name: String },
    #[error("Template not found: {name}")]
    SourceNotFound { name: String },
    #[error("Nesting too deep: include/extends exceeded {limit} levels")]
    RecursionLimit { limit: usize },
    #[error("Variable '{path}' is undefined")]
    Undefined { path: String },
    #[error("Missing property. Did you mean '{suggestion}'?")]
    MissingProperty { suggestion: String },
    #[error("Unknown filter '{0}'")]
    UnknownFilter(String),
    #[error("Error in filter '{name}': {message}")]
    Filter { name: String, message: String },
    #[error("Rendering error: {0}")]
    Render(String),
}

impl LiquidError {
    /// Fatal errors abort the render whatever the error mode.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::RecursionLimit { .. })
    }

    pub fn not_found<T: Into<String>>(name: T) -> Self {
        Self::SourceNotFound { name: name.into() }
    }
}
