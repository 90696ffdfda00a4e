use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::{Context, RenderOptions};
use crate::error::{LiquidError, LiquidResult};
use crate::parser::ParseOptions;
use crate::source::TemplateSource;
use crate::template::Template;
use crate::value::Hash;

/// Named templates, shared between the engine and the renders it starts.
#[derive(Debug, Default)]
struct Library {
    templates: RwLock<HashMap<String, (String, Arc<Template>)>>,
}

impl TemplateSource for Library {
    fn read(&self, _context: &Context, name: &str) -> LiquidResult<String> {
        self.templates
            .read()
            .get(name)
            .map(|(text, _)| text.clone())
            .ok_or_else(|| LiquidError::not_found(name))
    }

    fn get_parsed(&self, _context: &Context, name: &str) -> LiquidResult<Arc<Template>> {
        self.templates
            .read()
            .get(name)
            .map(|(_, template)| Arc::clone(template))
            .ok_or_else(|| LiquidError::not_found(name))
    }
}

/// `Engine` keeps a set of named templates that can `include` and `extend`
/// each other by name.
///
/// Templates are parsed once, when added. Rendering takes `&self`, so an
/// engine behind an `Arc` serves any number of threads.
///
/// # Examples
///
/// ```
/// use liquette::{Engine, Hash, Value};
///
/// // Create a new engine
/// let mut engine = Engine::new();
///
/// // Add templates
/// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
/// engine.add_template("page", "<p>{% include 'greeting' %}</p>").unwrap();
///
/// // Setup variables
/// let mut vars = Hash::new();
/// vars.insert("name".into(), Value::from("World"));
///
/// // Render template
/// let output = engine.render("page", &vars).unwrap();
/// assert_eq!(output, "<p>Hello, World!</p>");
/// ```
#[derive(Debug, Default)]
pub struct Engine {
    options: ParseOptions,
    library: Arc<Library>,
}

impl Engine {
    /// Creates an engine with the standard tags and Ruby member naming.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine that parses its templates with `options`.
    pub fn with_options(options: ParseOptions) -> Self {
        Self {
            options,
            library: Arc::default(),
        }
    }

    pub const fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Parses and stores a template under `name`.
    ///
    /// # Errors
    ///
    /// * [`LiquidError::TemplateExists`] if `name` is already taken
    /// * [`LiquidError::Syntax`] if the text does not parse
    ///
    /// # Examples
    ///
    /// ```
    /// use liquette::{Engine, LiquidError};
    ///
    /// let mut engine = Engine::new();
    /// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
    ///
    /// let again = engine.add_template("greeting", "Hi!");
    /// assert!(matches!(again, Err(LiquidError::TemplateExists { .. })));
    /// ```
    pub fn add_template<N: Into<String>, T: AsRef<str>>(
        &mut self,
        name: N,
        text: T,
    ) -> LiquidResult<()> {
        let name = name.into();
        if self.library.templates.read().contains_key(&name) {
            return Err(LiquidError::TemplateExists { name });
        }

        let text = text.as_ref();
        let template = Template::parse_with(text, &self.options)?;
        tracing::debug!(name, "added template");
        self.library
            .templates
            .write()
            .insert(name, (text.to_owned(), Arc::new(template)));
        Ok(())
    }

    pub fn template(&self, name: &str) -> Option<Arc<Template>> {
        self.library
            .templates
            .read()
            .get(name)
            .map(|(_, template)| Arc::clone(template))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.library.templates.read().contains_key(name)
    }

    /// Renders the template called `name` with `locals`.
    ///
    /// # Errors
    ///
    /// * [`LiquidError::SourceNotFound`] if no template is called `name`
    /// * Otherwise as [`Template::render`]
    pub fn render(&self, name: &str, locals: &Hash) -> LiquidResult<String> {
        self.render_with(name, RenderOptions::new(locals.clone()))
    }

    /// Renders the template called `name` with custom options. Unless the
    /// options name a file system, `include` and `extends` load from this
    /// engine.
    ///
    /// # Errors
    ///
    /// See [`Engine::render`].
    pub fn render_with(&self, name: &str, mut options: RenderOptions) -> LiquidResult<String> {
        let template = self.template(name).ok_or_else(|| LiquidError::not_found(name))?;
        if options.registers.file_system.is_none() {
            let library: Arc<Library> = Arc::clone(&self.library);
            let library: Arc<dyn TemplateSource> = library;
            options.registers.file_system = Some(library);
        }
        template.render_with(options)
    }
}
