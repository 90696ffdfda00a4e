use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{LiquidError, LiquidResult};
use crate::member_cache::{MemberCache, MemberFn, MemberKind, NamingConvention, TypeTable};
use crate::value::Value;

/// A host object exposed to templates through registered members only.
///
/// A drop never renders itself: `{{ product }}` outputs nothing, while
/// `{{ product.title }}` calls the member registered as `title`.
///
/// ```
/// use liquette::{Hash, LiquidDrop, Members, Template, Value};
///
/// #[derive(Debug)]
/// struct Product {
///     title: String,
/// }
///
/// impl LiquidDrop for Product {
///     fn members(members: &mut Members<Self>) {
///         members.readable("Title", |p| Value::from(p.title.as_str()));
///     }
/// }
///
/// let template = Template::parse("{{ product }}|{{ product.title }}").unwrap();
/// let mut vars = Hash::new();
/// vars.insert("product".into(), Value::from_drop(Product { title: "Board".into() }));
/// assert_eq!(template.render(&vars).unwrap(), "|Board");
/// ```
pub trait LiquidDrop: fmt::Debug + Send + Sync + 'static {
    /// Registers the members of this type. Runs once per type and naming
    /// convention; the result is kept in the [`MemberCache`].
    fn members(members: &mut Members<Self>)
    where
        Self: Sized;

    /// Consulted when no registered member matches `name`.
    fn catch_all(&self, _name: &str, _context: &Context) -> Option<Value> {
        None
    }

    /// Elements to iterate when this drop is used as a `for` source.
    fn iterate(&self) -> Option<Vec<Value>> {
        None
    }
}

pub(crate) struct MemberEntry {
    pub(crate) native_name: &'static str,
    pub(crate) kind: MemberKind,
    pub(crate) declaring_type: TypeId,
    pub(crate) declaring_type_name: &'static str,
    /// 0 for members declared by the registering type, +1 per inheritance step.
    pub(crate) depth: usize,
    pub(crate) invoke: MemberFn,
}

/// Member registration for one drop type.
pub struct Members<D> {
    entries: Vec<MemberEntry>,
    protected: Vec<&'static str>,
    _marker: PhantomData<fn(&D)>,
}

impl<D: LiquidDrop> Members<D> {
    pub(crate) fn collect() -> Self {
        let mut members = Self {
            entries: Vec::new(),
            protected: Vec::new(),
            _marker: PhantomData,
        };
        D::members(&mut members);
        members
    }

    fn push(&mut self, name: &'static str, kind: MemberKind, invoke: MemberFn) -> &mut Self {
        self.entries.push(MemberEntry {
            native_name: name,
            kind,
            declaring_type: TypeId::of::<D>(),
            declaring_type_name: std::any::type_name::<D>(),
            depth: 0,
            invoke,
        });
        self
    }

    /// A property-like member.
    pub fn readable(&mut self, name: &'static str, get: fn(&D) -> Value) -> &mut Self {
        self.push(
            name,
            MemberKind::Readable,
            Arc::new(move |target: &dyn Any, _context: &Context| {
                target.downcast_ref::<D>().map(get)
            }),
        )
    }

    /// A method-like member. It sees the active context for the duration of
    /// the call.
    pub fn callable(&mut self, name: &'static str, call: fn(&D, &Context) -> Value) -> &mut Self {
        self.push(
            name,
            MemberKind::Callable,
            Arc::new(move |target: &dyn Any, context: &Context| {
                target.downcast_ref::<D>().map(|d| call(d, context))
            }),
        )
    }

    /// Excludes `name` from the member table, including any inherited member
    /// of that name.
    pub fn protect(&mut self, name: &'static str) -> &mut Self {
        self.protected.push(name);
        self
    }

    /// Pulls in the members of a base drop reachable through `upcast`.
    /// Members registered by `D` shadow base members that map to the same
    /// template name.
    pub fn inherit<B: LiquidDrop>(&mut self, upcast: fn(&D) -> &B) -> &mut Self {
        let (base_entries, base_protected) = Members::<B>::collect().into_parts();
        for entry in base_entries {
            if base_protected.contains(&entry.native_name) {
                continue;
            }
            let base_invoke = entry.invoke;
            let invoke: MemberFn = Arc::new(move |target: &dyn Any, context: &Context| {
                let derived = target.downcast_ref::<D>()?;
                base_invoke(upcast(derived), context)
            });
            self.entries.push(MemberEntry {
                depth: entry.depth.saturating_add(1),
                invoke,
                ..entry
            });
        }
        self
    }

    pub(crate) fn into_parts(self) -> (Vec<MemberEntry>, Vec<&'static str>) {
        (self.entries, self.protected)
    }
}

trait ErasedDrop: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn table(&self, naming: NamingConvention) -> Arc<TypeTable>;
    fn catch_all(&self, name: &str, context: &Context) -> Option<Value>;
    fn iterate(&self) -> Option<Vec<Value>>;
}

impl<D: LiquidDrop> ErasedDrop for D {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn table(&self, naming: NamingConvention) -> Arc<TypeTable> {
        MemberCache::global().table_for::<D>(naming)
    }

    fn catch_all(&self, name: &str, context: &Context) -> Option<Value> {
        LiquidDrop::catch_all(self, name, context)
    }

    fn iterate(&self) -> Option<Vec<Value>> {
        LiquidDrop::iterate(self)
    }
}

/// A shared handle to a drop.
#[derive(Clone)]
pub struct DropValue(Arc<dyn ErasedDrop>);

impl DropValue {
    pub fn new<D: LiquidDrop>(drop: D) -> Self {
        Self(Arc::new(drop))
    }

    pub fn downcast_ref<D: LiquidDrop>(&self) -> Option<&D> {
        self.0.as_any().downcast_ref::<D>()
    }

    pub fn member_table(&self, naming: NamingConvention) -> Arc<TypeTable> {
        self.0.table(naming)
    }

    pub fn iterate(&self) -> Option<Vec<Value>> {
        self.0.iterate()
    }

    /// Resolves `name` against this drop: registered members first, then the
    /// reserved `size` of iterable drops, then the catch-all hook.
    pub(crate) fn resolve(&self, name: &str, context: &Context) -> LiquidResult<Value> {
        let naming = context.naming();
        let table = self.member_table(naming);

        if let Some(member) = table.get(name) {
            return Ok(member.invoke(self.0.as_any(), context));
        }
        if name == "size" {
            if let Some(items) = self.0.iterate() {
                return Ok(Value::from(items.len()));
            }
        }
        if let Some(value) = self.0.catch_all(name, context) {
            return Ok(value);
        }

        let suggestion = naming.member_name(name);
        if suggestion != name && table.get(&suggestion).is_some() {
            return Err(LiquidError::MissingProperty { suggestion });
        }
        Ok(Value::Nil)
    }
}

impl fmt::Debug for DropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DropValue").field(&self.0).finish()
    }
}

impl PartialEq for DropValue {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}
