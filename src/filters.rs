use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{LiquidError, LiquidResult};
use crate::value::Value;

/// A filter receives the piped value and its evaluated arguments.
pub type FilterFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Host-registered filters, looked up by name when a `| filter` runs.
///
/// No filters are built in.
///
/// ```
/// use liquette::{Filters, Hash, RenderOptions, Template, Value};
///
/// let mut filters = Filters::new();
/// filters.register("upcase", |input, _args| Ok(Value::from(input.to_output().to_uppercase())));
///
/// let template = Template::parse("{{ 'hi' | upcase }}").unwrap();
/// let options = RenderOptions::new(Hash::new()).with_filters(filters);
/// assert_eq!(template.render_with(options).unwrap(), "HI");
/// ```
#[derive(Clone, Default)]
pub struct Filters {
    filters: HashMap<String, FilterFn>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `filter` under `name`, replacing any previous filter of that
    /// name.
    pub fn register<N, F>(&mut self, name: N, filter: F) -> &mut Self
    where
        N: Into<String>,
        F: Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub(crate) fn apply(&self, name: &str, input: &Value, args: &[Value]) -> LiquidResult<Value> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| LiquidError::UnknownFilter(name.to_owned()))?;
        filter(input, args).map_err(|message| LiquidError::Filter {
            name: name.to_owned(),
            message,
        })
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("Filters").field("names", &names).finish()
    }
}
