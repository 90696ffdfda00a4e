mod ast;
mod context;
mod drop;
mod engine;
mod error;
mod expression;
mod filters;
mod lexer;
mod member_cache;
mod parser;
mod source;
mod tags;
mod template;
mod value;

// Public exports.
pub use ast::{Node, Render, Tag, render_all, walk};
pub use context::{
    Context, DEFAULT_ERROR_MARKER, DEFAULT_MAX_DEPTH, DepthGuard, ErrorMode, MAX_RANGE_LEN,
    Registers, RenderOptions, ScopeGuard,
};
pub use drop::{DropValue, LiquidDrop, Members};
pub use engine::Engine;
pub use error::{LiquidError, LiquidResult, ParseError, ParseErrorKind};
pub use expression::{
    Condition, Expression, FilterCall, FilteredExpression, Operator, Segment, VariablePath,
    parse_condition, parse_output, parse_path,
};
pub use filters::{FilterFn, Filters};
pub use member_cache::{Member, MemberCache, MemberKind, NamingConvention, TypeTable, ruby_member_name};
pub use parser::ParseOptions;
pub use source::{BlankSource, CachingSource, LocalFileSystem, TemplateSource};
pub use tags::{
    Assign, Block, Capture, Case, Conditional, Extends, For, Include, TagBuilder, TagDefinition,
    TagRegistry, When, custom, leaf,
};
pub use template::Template;
pub use value::{Hash, Value};
