use std::fmt;
use std::sync::Arc;

use crate::ast::{Node, render_all};
use crate::context::{Context, RenderOptions};
use crate::error::LiquidResult;
use crate::parser::{self, ParseOptions};
use crate::source::TemplateSource;
use crate::value::Hash;

/// A parsed template, ready to render any number of times.
///
/// Parsing is deterministic and the tree is immutable, so a template can be
/// shared between threads and rendered concurrently, each render with its
/// own [`Context`].
///
/// # Example
///
/// ```rust
/// use liquette::{Hash, Template, Value};
///
/// let template = Template::parse("Hello, {{ name }}!").unwrap();
///
/// let mut vars = Hash::new();
/// vars.insert("name".into(), Value::from("World"));
///
/// assert_eq!(template.render(&vars).unwrap(), "Hello, World!");
/// ```
pub struct Template {
    root: Vec<Node>,
    options: ParseOptions,
    source: Option<Arc<dyn TemplateSource>>,
    /// Defaults for the render locals. Locals of the same name win.
    assigns: Hash,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("has_source", &self.source.is_some())
            .field("assigns", &self.assigns)
            .finish()
    }
}

impl Template {
    /// Parses `text` with the standard tags and Ruby member naming.
    ///
    /// # Errors
    ///
    /// Returns [`LiquidError::Syntax`](crate::LiquidError::Syntax) with the
    /// line and column of the first malformed construct.
    pub fn parse(text: &str) -> LiquidResult<Self> {
        Self::parse_with(text, &ParseOptions::default())
    }

    /// Parses `text` with custom tags or naming.
    ///
    /// # Errors
    ///
    /// See [`Template::parse`].
    pub fn parse_with(text: &str, options: &ParseOptions) -> LiquidResult<Self> {
        let root = parser::parse(text, options)?;
        Ok(Self {
            root,
            options: options.clone(),
            source: None,
            assigns: Hash::new(),
        })
    }

    /// Sets where `include` and `extends` load templates from when the render
    /// registers don't name a file system.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn TemplateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Presets variables for every render of this template. Locals passed
    /// to a render shadow them, and assignments made while rendering never
    /// change them.
    ///
    /// ```
    /// use liquette::{Hash, Template, Value};
    ///
    /// let mut assigns = Hash::new();
    /// assigns.insert("greeting".into(), Value::from("Goodbye"));
    /// let template = Template::parse("{{ greeting }} {{ name }}")
    ///     .unwrap()
    ///     .with_assigns(assigns);
    ///
    /// let mut locals = Hash::new();
    /// locals.insert("name".into(), Value::from("Brian"));
    /// assert_eq!(template.render(&locals).unwrap(), "Goodbye Brian");
    /// ```
    #[must_use]
    pub fn with_assigns(mut self, assigns: Hash) -> Self {
        self.assigns = assigns;
        self
    }

    pub const fn assigns(&self) -> &Hash {
        &self.assigns
    }

    pub fn root(&self) -> &[Node] {
        &self.root
    }

    pub const fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Renders with `locals` as the read-only environment and default
    /// options otherwise.
    ///
    /// # Errors
    ///
    /// With the default [`ErrorMode::Inline`](crate::ErrorMode::Inline) only
    /// [`LiquidError::RecursionLimit`](crate::LiquidError::RecursionLimit)
    /// surfaces here.
    pub fn render(&self, locals: &Hash) -> LiquidResult<String> {
        self.render_with(RenderOptions::new(locals.clone()))
    }

    /// Renders with a fresh context built from `options`.
    ///
    /// # Errors
    ///
    /// See [`Template::render`]. With
    /// [`ErrorMode::Rethrow`](crate::ErrorMode::Rethrow) every error
    /// surfaces.
    pub fn render_with(&self, mut options: RenderOptions) -> LiquidResult<String> {
        if !self.assigns.is_empty() {
            let mut locals = self.assigns.clone();
            locals.append(&mut options.locals);
            options.locals = locals;
        }
        let mut context =
            Context::with_parse_options(options, self.options.clone(), self.source.clone());
        self.render_context(&mut context)
    }

    /// Renders into an existing context, keeping any variables the template
    /// assigns and errors it records.
    ///
    /// # Errors
    ///
    /// See [`Template::render_with`].
    pub fn render_context(&self, context: &mut Context) -> LiquidResult<String> {
        let mut out = String::new();
        render_all(&self.root, context, &mut out)?;
        Ok(out)
    }
}
