use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::context::Context;
use crate::drop::{LiquidDrop, Members};
use crate::value::Value;

pub(crate) type MemberFn = Arc<dyn Fn(&dyn Any, &Context) -> Option<Value> + Send + Sync>;

/// Maps a member's declared name to the name templates use for it.
///
/// The transform is a plain function so conventions are cheap to copy and
/// compare. Two conventions are equal when both the name and the transform
/// function match.
#[derive(Clone, Copy)]
pub struct NamingConvention {
    name: &'static str,
    transform: fn(&str) -> String,
}

impl NamingConvention {
    /// `ProductID` becomes `product_id`, `GetClassName` becomes
    /// `get_class_name`.
    pub const RUBY: Self = Self::new("ruby", ruby_member_name);
    /// Names are used as declared.
    pub const VERBATIM: Self = Self::new("verbatim", verbatim_member_name);

    pub const fn new(name: &'static str, transform: fn(&str) -> String) -> Self {
        Self { name, transform }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn member_name(&self, native: &str) -> String {
        (self.transform)(native)
    }
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::RUBY
    }
}

impl fmt::Debug for NamingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NamingConvention").field(&self.name).finish()
    }
}

impl PartialEq for NamingConvention {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && std::ptr::fn_addr_eq(self.transform, other.transform)
    }
}

impl Eq for NamingConvention {}

impl Hash for NamingConvention {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.transform.hash(state);
    }
}

fn verbatim_member_name(native: &str) -> String {
    native.to_owned()
}

/// Converts PascalCase or camelCase to snake_case. Runs of capitals are kept
/// together, so `HTMLParser` becomes `html_parser`.
pub fn ruby_member_name(native: &str) -> String {
    let chars: Vec<char> = native.chars().collect();
    let mut out = String::with_capacity(native.len().saturating_add(4));
    let mut prev: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let next = chars.get(i.saturating_add(1));
            let boundary = prev.is_some_and(|p| {
                p != '_'
                    && (p.is_lowercase()
                        || p.is_ascii_digit()
                        || (p.is_uppercase() && next.is_some_and(|n| n.is_lowercase())))
            });
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemberKind {
    Callable,
    Readable,
}

/// One resolvable member of a drop type.
#[derive(Clone)]
pub struct Member {
    kind: MemberKind,
    declaring_type: TypeId,
    declaring_type_name: &'static str,
    depth: usize,
    invoke: MemberFn,
}

impl Member {
    pub const fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The type that registered this member. For inherited members this is
    /// the base type.
    pub const fn declaring_type(&self) -> TypeId {
        self.declaring_type
    }

    pub const fn declaring_type_name(&self) -> &'static str {
        self.declaring_type_name
    }

    pub(crate) fn invoke(&self, target: &dyn Any, context: &Context) -> Value {
        (self.invoke)(target, context).unwrap_or_default()
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("kind", &self.kind)
            .field("declaring_type", &self.declaring_type_name)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// The member table of one drop type under one naming convention.
#[derive(Debug)]
pub struct TypeTable {
    type_name: &'static str,
    callables: HashMap<String, Member>,
    readables: HashMap<String, Member>,
}

impl TypeTable {
    fn build<D: LiquidDrop>(naming: NamingConvention) -> Self {
        let (entries, protected) = Members::<D>::collect().into_parts();
        let mut table = Self {
            type_name: std::any::type_name::<D>(),
            callables: HashMap::new(),
            readables: HashMap::new(),
        };

        for entry in entries {
            if protected.contains(&entry.native_name) {
                continue;
            }
            let name = naming.member_name(entry.native_name);
            let member = Member {
                kind: entry.kind,
                declaring_type: entry.declaring_type,
                declaring_type_name: entry.declaring_type_name,
                depth: entry.depth,
                invoke: entry.invoke,
            };
            let map = match member.kind {
                MemberKind::Callable => &mut table.callables,
                MemberKind::Readable => &mut table.readables,
            };
            match map.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(member);
                }
                Entry::Occupied(mut slot) => {
                    if member.depth < slot.get().depth {
                        slot.insert(member);
                    }
                }
            }
        }

        tracing::trace!(
            type_name = table.type_name,
            convention = naming.name(),
            callables = table.callables.len(),
            readables = table.readables.len(),
            "built member table"
        );
        table
    }

    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Looks `name` up in both maps. When both hold it, the member declared
    /// closest to the concrete type wins; callables win ties.
    pub fn get(&self, name: &str) -> Option<&Member> {
        match (self.callables.get(name), self.readables.get(name)) {
            (Some(callable), Some(readable)) => Some(if readable.depth < callable.depth {
                readable
            } else {
                callable
            }),
            (callable, readable) => callable.or(readable),
        }
    }

    pub fn callable(&self, name: &str) -> Option<&Member> {
        self.callables.get(name)
    }

    pub fn readable(&self, name: &str) -> Option<&Member> {
        self.readables.get(name)
    }

    /// Which type owns the member that `name` resolves to.
    pub fn declaring_type(&self, name: &str) -> Option<TypeId> {
        self.get(name).map(Member::declaring_type)
    }

    pub fn callable_names(&self) -> impl Iterator<Item = &str> {
        self.callables.keys().map(String::as_str)
    }

    pub fn readable_names(&self) -> impl Iterator<Item = &str> {
        self.readables.keys().map(String::as_str)
    }
}

type TableKey = (TypeId, NamingConvention);

/// Process-wide cache of member tables, keyed by concrete type and naming
/// convention. Reads take a shared lock; a table is built outside any lock
/// and published once, so racing first uses all observe the same table.
#[derive(Default)]
pub struct MemberCache {
    tables: RwLock<HashMap<TableKey, Arc<TypeTable>>>,
}

static GLOBAL: OnceLock<MemberCache> = OnceLock::new();

impl MemberCache {
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::default)
    }

    pub fn table_for<D: LiquidDrop>(&self, naming: NamingConvention) -> Arc<TypeTable> {
        let key = (TypeId::of::<D>(), naming);

        // Fast path: already built
        let cached = self.tables.read().get(&key).map(Arc::clone);
        if let Some(table) = cached {
            return table;
        }

        let built = Arc::new(TypeTable::build::<D>(naming));

        let mut tables = self.tables.write();
        Arc::clone(tables.entry(key).or_insert(built))
    }

    pub fn resolve_member<D: LiquidDrop>(
        &self,
        naming: NamingConvention,
        name: &str,
    ) -> Option<Member> {
        self.table_for::<D>(naming).get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

impl fmt::Debug for MemberCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberCache")
            .field("tables", &self.len())
            .finish()
    }
}
