use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::context::Context;
use crate::error::{LiquidError, LiquidResult};
use crate::template::Template;

/// Loads templates by name for `include` and `extends`.
///
/// Implementors only need [`read`](TemplateSource::read). Sources that can
/// keep parsed templates around override
/// [`get_parsed`](TemplateSource::get_parsed), which the tags prefer.
pub trait TemplateSource: Send + Sync {
    /// Returns the raw text of the template called `name`.
    fn read(&self, context: &Context, name: &str) -> LiquidResult<String>;

    /// Returns the parsed template called `name`. The default reads and
    /// parses on every call, using the parse options of the render in
    /// progress.
    fn get_parsed(&self, context: &Context, name: &str) -> LiquidResult<Arc<Template>> {
        let text = self.read(context, name)?;
        let template = Template::parse_with(&text, context.parse_options())?;
        Ok(Arc::new(template))
    }

    /// Called when an include names a template through a variable that
    /// resolved to nothing. Returning `Ok` renders nothing.
    fn missing_name(&self, _markup: &str) -> LiquidResult<()> {
        Ok(())
    }
}

impl<S: TemplateSource + ?Sized> TemplateSource for Arc<S> {
    fn read(&self, context: &Context, name: &str) -> LiquidResult<String> {
        (**self).read(context, name)
    }

    fn get_parsed(&self, context: &Context, name: &str) -> LiquidResult<Arc<Template>> {
        (**self).get_parsed(context, name)
    }

    fn missing_name(&self, markup: &str) -> LiquidResult<()> {
        (**self).missing_name(markup)
    }
}

/// A source with no templates. Every read fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlankSource;

impl TemplateSource for BlankSource {
    fn read(&self, _context: &Context, name: &str) -> LiquidResult<String> {
        Err(LiquidError::not_found(name))
    }
}

/// Reads `_name.liquid` files below a root directory. `dir/name` maps to
/// `root/dir/_name.liquid`.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
    pattern: (&'static str, &'static str),
}

impl LocalFileSystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            pattern: ("_", ".liquid"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names start with neither `.` nor `/` and contain only ASCII
    /// alphanumerics, `_` and `/`.
    fn is_valid_name(name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        let body_ok = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '/';
        first != '.' && first != '/' && body_ok(first) && name.len() > 1 && chars.all(body_ok)
    }

    /// Maps a template name onto a file path below the root.
    pub fn full_path(&self, name: &str) -> LiquidResult<PathBuf> {
        if !Self::is_valid_name(name) {
            return Err(LiquidError::Render(format!("Illegal template name '{name}'")));
        }
        let (dir, file) = name.rsplit_once('/').unwrap_or(("", name));
        let (prefix, suffix) = self.pattern;
        let mut path = self.root.clone();
        if !dir.is_empty() {
            path.push(dir);
        }
        path.push(format!("{prefix}{file}{suffix}"));
        Ok(path)
    }
}

impl TemplateSource for LocalFileSystem {
    fn read(&self, _context: &Context, name: &str) -> LiquidResult<String> {
        let path = self.full_path(name)?;
        tracing::debug!(name, path = %path.display(), "reading template file");
        std::fs::read_to_string(&path).map_err(|_| LiquidError::not_found(name))
    }

    fn missing_name(&self, markup: &str) -> LiquidResult<()> {
        Err(LiquidError::Render(format!(
            "Illegal template name '{}'",
            markup.trim()
        )))
    }
}

/// Wraps a source and parses each template at most once. Parsed templates
/// are shared between renders and threads.
pub struct CachingSource<S> {
    inner: S,
    templates: RwLock<HashMap<String, Arc<Template>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<S: TemplateSource> CachingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            templates: RwLock::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Lookups served from the cache.
    pub fn cache_hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to read and parse.
    pub fn cache_misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.templates.write().clear();
    }
}

impl<S: TemplateSource> TemplateSource for CachingSource<S> {
    fn read(&self, context: &Context, name: &str) -> LiquidResult<String> {
        self.inner.read(context, name)
    }

    fn get_parsed(&self, context: &Context, name: &str) -> LiquidResult<Arc<Template>> {
        let cached = self.templates.read().get(name).map(Arc::clone);
        if let Some(template) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(template);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(name, "template cache miss");
        let template = self.inner.get_parsed(context, name)?;

        let mut templates = self.templates.write();
        Ok(Arc::clone(
            templates.entry(name.to_owned()).or_insert(template),
        ))
    }

    fn missing_name(&self, markup: &str) -> LiquidResult<()> {
        self.inner.missing_name(markup)
    }
}

impl<S: fmt::Debug> fmt::Debug for CachingSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingSource")
            .field("inner", &self.inner)
            .field("cached", &self.templates.read().len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}
