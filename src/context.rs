use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::ast::Node;
use crate::error::{LiquidError, LiquidResult, ParseError};
use crate::expression::{Condition, Expression, FilteredExpression, Segment, VariablePath, parse_path};
use crate::filters::Filters;
use crate::member_cache::NamingConvention;
use crate::parser::ParseOptions;
use crate::source::{BlankSource, TemplateSource};
use crate::value::{Hash, Value};

/// Nesting limit for `include` and `extends` unless configured otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Most elements a `(a..b)` range may produce once `offset` and `limit`
/// are applied.
pub const MAX_RANGE_LEN: usize = 1_000_000;

/// Text written before an error rendered inline.
pub const DEFAULT_ERROR_MARKER: &str = "Liquid error: ";

/// What happens to an error raised while rendering a node.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum ErrorMode {
    /// Abort the render and return the error.
    Rethrow,
    /// Write the error marker and message in place of the node, record the
    /// error and carry on.
    #[default]
    Inline,
    /// Record the error and carry on without output.
    Suppress,
}

/// Host-injected state for one render.
#[derive(Clone, Default)]
pub struct Registers {
    /// Overrides the template's own source for `include` and `extends`.
    pub file_system: Option<Arc<dyn TemplateSource>>,
    /// Named values, consulted after scopes and locals during resolution.
    pub values: Hash,
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registers")
            .field("file_system", &self.file_system.is_some())
            .field("values", &self.values)
            .finish()
    }
}

/// Per-render configuration.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Read-only top-level bindings.
    pub locals: Hash,
    pub registers: Registers,
    pub filters: Arc<Filters>,
    pub error_mode: ErrorMode,
    pub error_marker: String,
    /// Fail with [`LiquidError::Undefined`] when a variable does not exist.
    pub strict_variables: bool,
    pub max_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            locals: Hash::new(),
            registers: Registers::default(),
            filters: Arc::new(Filters::default()),
            error_mode: ErrorMode::default(),
            error_marker: DEFAULT_ERROR_MARKER.to_owned(),
            strict_variables: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl RenderOptions {
    pub fn new(locals: Hash) -> Self {
        Self {
            locals,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_error_mode(mut self, error_mode: ErrorMode) -> Self {
        self.error_mode = error_mode;
        self
    }

    #[must_use]
    pub fn with_error_marker<M: Into<String>>(mut self, marker: M) -> Self {
        self.error_marker = marker.into();
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = Arc::new(filters);
        self
    }

    #[must_use]
    pub fn with_file_system(mut self, source: Arc<dyn TemplateSource>) -> Self {
        self.registers.file_system = Some(source);
        self
    }

    #[must_use]
    pub fn with_register<K: Into<String>, V: Into<Value>>(mut self, name: K, value: V) -> Self {
        self.registers.values.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub const fn strict(mut self, strict_variables: bool) -> Self {
        self.strict_variables = strict_variables;
        self
    }

    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// The definitions of one block name, most-derived first, and which of them
/// is rendering.
#[derive(Debug)]
pub(crate) struct BlockFrame {
    pub(crate) chain: Vec<Arc<[Node]>>,
    pub(crate) index: usize,
}

/// A key into a value: a member name or a numeric index.
#[derive(Debug, Clone, Copy)]
enum Key<'k> {
    Name(&'k str),
    Index(i64),
}

/// The state of one render call.
///
/// Variables resolve through the scope stack (innermost first), then the
/// read-only locals, then register values. The stack always holds at least
/// one scope.
pub struct Context {
    scopes: Vec<Hash>,
    environment: Hash,
    registers: Registers,
    filters: Arc<Filters>,
    parse_options: ParseOptions,
    default_source: Option<Arc<dyn TemplateSource>>,
    error_mode: ErrorMode,
    error_marker: String,
    strict_variables: bool,
    max_depth: usize,
    depth: usize,
    errors: Vec<LiquidError>,
    pub(crate) blocks: HashMap<String, Vec<Arc<[Node]>>>,
    pub(crate) block_frames: Vec<BlockFrame>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scopes", &self.scopes)
            .field("environment", &self.environment)
            .field("registers", &self.registers)
            .field("error_mode", &self.error_mode)
            .field("depth", &self.depth)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(options: RenderOptions) -> Self {
        Self::with_parse_options(options, ParseOptions::default(), None)
    }

    /// A context whose `include`/`extends` fall back to `default_source` and
    /// parse loaded templates with `parse_options`.
    pub fn with_parse_options(
        options: RenderOptions,
        parse_options: ParseOptions,
        default_source: Option<Arc<dyn TemplateSource>>,
    ) -> Self {
        Self {
            scopes: vec![Hash::new()],
            environment: options.locals,
            registers: options.registers,
            filters: options.filters,
            parse_options,
            default_source,
            error_mode: options.error_mode,
            error_marker: options.error_marker,
            strict_variables: options.strict_variables,
            max_depth: options.max_depth,
            depth: 0,
            errors: Vec::new(),
            blocks: HashMap::new(),
            block_frames: Vec::new(),
        }
    }

    /// Number of scopes on the stack: 1 plus the number of active block
    /// bodies that pushed one.
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Current `include`/`extends` nesting.
    pub const fn depth(&self) -> usize {
        self.depth
    }

    pub const fn registers(&self) -> &Registers {
        &self.registers
    }

    pub const fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub const fn parse_options(&self) -> &ParseOptions {
        &self.parse_options
    }

    pub const fn naming(&self) -> NamingConvention {
        self.parse_options.naming
    }

    pub const fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    /// Errors recorded by the `Inline` and `Suppress` modes.
    pub fn errors(&self) -> &[LiquidError] {
        &self.errors
    }

    /// Pushes an empty scope, popped when the guard drops.
    pub fn scoped(&mut self) -> ScopeGuard<'_> {
        self.scoped_with(Hash::new())
    }

    /// Pushes `scope`, popped when the guard drops.
    pub fn scoped_with(&mut self, scope: Hash) -> ScopeGuard<'_> {
        self.scopes.push(scope);
        ScopeGuard { context: self }
    }

    /// Enters one level of `include`/`extends` nesting.
    pub fn nested(&mut self) -> LiquidResult<DepthGuard<'_>> {
        if self.depth >= self.max_depth {
            tracing::warn!(limit = self.max_depth, "template nesting limit reached");
            return Err(LiquidError::RecursionLimit {
                limit: self.max_depth,
            });
        }
        self.depth = self.depth.saturating_add(1);
        Ok(DepthGuard { context: self })
    }

    /// Binds `name` in the innermost scope.
    pub fn set_local<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value.into());
        }
    }

    /// Binds `name` in the outermost scope, where it outlives every block.
    pub fn assign<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) {
        if let Some(scope) = self.scopes.first_mut() {
            scope.insert(name.into(), value.into());
        }
    }

    /// Looks up a top-level name through scopes, locals and registers.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.environment.get(name))
            .or_else(|| self.registers.values.get(name))
    }

    /// Parses and resolves a path such as `products[0].title`.
    pub fn resolve_path(&self, path: &str) -> LiquidResult<Value> {
        let path = parse_path(path).map_err(|kind| {
            LiquidError::Syntax(ParseError {
                line: 1,
                column: 1,
                kind,
            })
        })?;
        self.resolve(&path)
    }

    pub fn resolve(&self, path: &VariablePath) -> LiquidResult<Value> {
        let mut segments = path.segments.iter();
        let root = match segments.next() {
            Some(Segment::Name(name)) => self.get(name),
            Some(Segment::Index(expression)) => {
                let key = self.evaluate(expression)?;
                key.as_str().and_then(|name| self.get(name))
            }
            None => None,
        };
        let Some(root) = root else {
            if self.strict_variables {
                return Err(LiquidError::Undefined {
                    path: path.source.clone(),
                });
            }
            return Ok(Value::Nil);
        };

        let mut current = Cow::Borrowed(root);
        for segment in segments {
            current = match segment {
                Segment::Name(name) => self.step(current, Key::Name(name))?,
                Segment::Index(expression) => {
                    let key = self.evaluate(expression)?;
                    match &key {
                        Value::Int(i) => self.step(current, Key::Index(*i))?,
                        Value::Str(name) => self.step(current, Key::Name(name))?,
                        Value::Nil
                        | Value::Bool(_)
                        | Value::Float(_)
                        | Value::Array(_)
                        | Value::Hash(_)
                        | Value::Drop(_) => Cow::Owned(Value::Nil),
                    }
                }
            };
        }
        Ok(current.into_owned())
    }

    fn step<'v>(&self, current: Cow<'v, Value>, key: Key<'_>) -> LiquidResult<Cow<'v, Value>> {
        Ok(match current {
            Cow::Borrowed(value) => match Self::child(value, key) {
                Some(child) => Cow::Borrowed(child),
                None => Cow::Owned(self.computed(value, key)?),
            },
            Cow::Owned(value) => Cow::Owned(match Self::child(&value, key) {
                Some(child) => child.clone(),
                None => self.computed(&value, key)?,
            }),
        })
    }

    /// Children stored inside the value itself.
    fn child<'v>(value: &'v Value, key: Key<'_>) -> Option<&'v Value> {
        match (value, key) {
            (Value::Hash(map), Key::Name(name)) => map.get(name),
            (Value::Hash(map), Key::Index(i)) => map.get(&i.to_string()),
            (Value::Array(items), Key::Index(i)) => index_array(items, i),
            (Value::Array(items), Key::Name("first")) => items.first(),
            (Value::Array(items), Key::Name("last")) => items.last(),
            (Value::Array(items), Key::Name(name)) => {
                name.parse::<i64>().ok().and_then(|i| index_array(items, i))
            }
            _ => None,
        }
    }

    /// Members computed on demand: drop members and the reserved `size`.
    fn computed(&self, value: &Value, key: Key<'_>) -> LiquidResult<Value> {
        match (value, key) {
            (Value::Drop(drop), Key::Name(name)) => drop.resolve(name, self),
            (Value::Drop(drop), Key::Index(i)) => drop.resolve(&i.to_string(), self),
            (_, Key::Name("size")) => Ok(value.size().map_or(Value::Nil, Value::from)),
            _ => Ok(Value::Nil),
        }
    }

    pub fn evaluate(&self, expression: &Expression) -> LiquidResult<Value> {
        match expression {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Path(path) => self.resolve(path),
            Expression::Range(start, end) => {
                let (first, last) = self.range_bounds(start, end)?;
                int_range(first, last).map(Value::Array)
            }
        }
    }

    /// The inclusive integer bounds of a `(start..end)` range.
    pub(crate) fn range_bounds(&self, start: &Expression, end: &Expression) -> LiquidResult<(i64, i64)> {
        Ok((
            range_bound(&self.evaluate(start)?),
            range_bound(&self.evaluate(end)?),
        ))
    }

    /// Evaluates the expression, then runs it through its filter chain.
    pub fn evaluate_filtered(&self, filtered: &FilteredExpression) -> LiquidResult<Value> {
        let mut value = self.evaluate(&filtered.expression)?;
        for call in &filtered.filters {
            let args = call
                .args
                .iter()
                .map(|arg| self.evaluate(arg))
                .collect::<LiquidResult<Vec<_>>>()?;
            value = self.filters.apply(&call.name, &value, &args)?;
        }
        Ok(value)
    }

    pub fn evaluate_condition(&self, condition: &Condition) -> LiquidResult<bool> {
        match condition {
            Condition::Compare { left, comparison } => {
                let left = self.evaluate(left)?;
                match comparison {
                    Some((operator, right)) => Ok(operator.apply(&left, &self.evaluate(right)?)),
                    None => Ok(left.is_truthy()),
                }
            }
            Condition::And(left, right) => {
                Ok(self.evaluate_condition(left)? && self.evaluate_condition(right)?)
            }
            Condition::Or(left, right) => {
                Ok(self.evaluate_condition(left)? || self.evaluate_condition(right)?)
            }
        }
    }

    /// The source `include` and `extends` load from: the register override,
    /// then the template's own source.
    pub(crate) fn source(&self) -> Arc<dyn TemplateSource> {
        self.registers
            .file_system
            .as_ref()
            .or(self.default_source.as_ref())
            .map_or_else(|| Arc::new(BlankSource) as Arc<dyn TemplateSource>, Arc::clone)
    }

    /// Applies the error mode to a failed node. Fatal errors always
    /// propagate.
    pub(crate) fn handle_error(&mut self, error: LiquidError, out: &mut String) -> LiquidResult<()> {
        if error.is_fatal() {
            return Err(error);
        }
        match self.error_mode {
            ErrorMode::Rethrow => Err(error),
            ErrorMode::Inline => {
                tracing::warn!(%error, "rendering error inline");
                out.push_str(&self.error_marker);
                out.push_str(&error.to_string());
                self.errors.push(error);
                Ok(())
            }
            ErrorMode::Suppress => {
                self.errors.push(error);
                Ok(())
            }
        }
    }
}

fn index_array(items: &[Value], index: i64) -> Option<&Value> {
    let index = if index < 0 {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        items.len().checked_sub(back)?
    } else {
        usize::try_from(index).ok()?
    };
    items.get(index)
}

/// Builds the integers `first..=last`. Empty when `last < first`; fails
/// past [`MAX_RANGE_LEN`] elements.
pub(crate) fn int_range(first: i64, last: i64) -> LiquidResult<Vec<Value>> {
    if last < first {
        return Ok(Vec::new());
    }
    let len = last
        .checked_sub(first)
        .and_then(|span| usize::try_from(span).ok())
        .and_then(|span| span.checked_add(1))
        .filter(|len| *len <= MAX_RANGE_LEN);
    if len.is_none() {
        return Err(LiquidError::Render(format!(
            "range ({first}..{last}) exceeds {MAX_RANGE_LEN} elements"
        )));
    }
    Ok((first..=last).map(Value::Int).collect())
}

fn range_bound(value: &Value) -> i64 {
    match value {
        Value::Int(i) => *i,
        Value::Float(f) => f.trunc() as i64,
        Value::Str(s) => s.trim().parse().unwrap_or(0),
        Value::Nil | Value::Bool(_) | Value::Array(_) | Value::Hash(_) | Value::Drop(_) => 0,
    }
}

/// Pops the scope it pushed when dropped, on every exit path.
pub struct ScopeGuard<'c> {
    context: &'c mut Context,
}

impl Deref for ScopeGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.context
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.context
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.context.scopes.len() > 1 {
            self.context.scopes.pop();
        }
    }
}

/// Leaves one level of `include`/`extends` nesting when dropped.
pub struct DepthGuard<'c> {
    context: &'c mut Context,
}

impl Deref for DepthGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.context
    }
}

impl DerefMut for DepthGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.context
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.context.depth = self.context.depth.saturating_sub(1);
    }
}
