use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::drop::{DropValue, LiquidDrop};

/// A mapping from names to values. Used for scopes, locals and hash values.
pub type Hash = BTreeMap<String, Value>;

/// Any value a template can see.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Hash(Hash),
    /// A host object exposing only registered members. Never renders itself.
    Drop(DropValue),
}

impl Value {
    /// Wraps a host object as a drop value.
    pub fn from_drop<D: LiquidDrop>(drop: D) -> Self {
        Self::Drop(DropValue::new(drop))
    }

    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Only `nil` and `false` are falsy.
    pub const fn is_truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Bool(false))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Nil
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Array(_)
            | Self::Hash(_)
            | Self::Drop(_) => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Nil
            | Self::Bool(_)
            | Self::Float(_)
            | Self::Str(_)
            | Self::Array(_)
            | Self::Hash(_)
            | Self::Drop(_) => None,
        }
    }

    pub const fn as_drop(&self) -> Option<&DropValue> {
        match self {
            Self::Drop(d) => Some(d),
            Self::Nil
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Str(_)
            | Self::Array(_)
            | Self::Hash(_) => None,
        }
    }

    /// The element count used by the reserved `size` member.
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.chars().count()),
            Self::Array(items) => Some(items.len()),
            Self::Hash(map) => Some(map.len()),
            Self::Drop(d) => d.iterate().map(|items| items.len()),
            Self::Nil | Self::Bool(_) | Self::Int(_) | Self::Float(_) => None,
        }
    }

    /// Appends the output form of this value. Drops, hashes and nil render as
    /// nothing; arrays render each element in turn.
    pub fn render_to(&self, out: &mut String) {
        match self {
            Self::Nil | Self::Hash(_) | Self::Drop(_) => {}
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(i) => out.push_str(&i.to_string()),
            Self::Float(f) => {
                out.push_str(&f.to_string());
                if f.is_finite() && f.fract() == 0.0 {
                    out.push_str(".0");
                }
            }
            Self::Str(s) => out.push_str(s),
            Self::Array(items) => {
                for item in items {
                    item.render_to(out);
                }
            }
        }
    }

    pub fn to_output(&self) -> String {
        let mut out = String::new();
        self.render_to(&mut out);
        out
    }

    /// Equality as used by `==`, `case` and `when`.
    pub fn liquid_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.liquid_eq(y))
            }
            (Self::Hash(a), Self::Hash(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.liquid_eq(vb))
            }
            (Self::Drop(a), Self::Drop(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering used by `<`, `>`, `<=` and `>=`. Values of unrelated kinds do
    /// not compare.
    pub fn liquid_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// The `contains` operator: substring, element or key membership.
    pub fn contains(&self, needle: &Self) -> bool {
        match self {
            Self::Str(s) => needle.as_str().is_some_and(|n| s.contains(n)),
            Self::Array(items) => items.iter().any(|item| item.liquid_eq(needle)),
            Self::Hash(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
            Self::Nil
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Drop(_) => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.liquid_eq(other)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Hash> for Value {
    fn from(value: Hash) -> Self {
        Self::Hash(value)
    }
}

impl From<DropValue> for Value {
    fn from(value: DropValue) -> Self {
        Self::Drop(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Value {
    fn from(pairs: [(K, V); N]) -> Self {
        Self::Hash(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<T: Into<Value>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Array(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use std::fmt;

    use serde::de::{self, MapAccess, SeqAccess, Visitor};
    use serde::ser::{SerializeMap, SerializeSeq};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{Hash, Value};

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Nil | Self::Drop(_) => serializer.serialize_unit(),
                Self::Bool(b) => serializer.serialize_bool(*b),
                Self::Int(i) => serializer.serialize_i64(*i),
                Self::Float(f) => serializer.serialize_f64(*f),
                Self::Str(s) => serializer.serialize_str(s),
                Self::Array(items) => {
                    let mut seq = serializer.serialize_seq(Some(items.len()))?;
                    for item in items {
                        seq.serialize_element(item)?;
                    }
                    seq.end()
                }
                Self::Hash(map) => {
                    let mut out = serializer.serialize_map(Some(map.len()))?;
                    for (k, v) in map {
                        out.serialize_entry(k, v)?;
                    }
                    out.end()
                }
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("any template value")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
            Ok(Value::Bool(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
            Ok(Value::Int(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
            Ok(i64::try_from(v).map_or(Value::Float(v as f64), Value::Int))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
            Ok(Value::Float(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
            Ok(Value::Str(v.to_owned()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
            Ok(Value::Str(v))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
            Ok(Value::Nil)
        }

        fn visit_none<E: de::Error>(self) -> Result<Value, E> {
            Ok(Value::Nil)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
            Deserialize::deserialize(deserializer)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
            let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(Value::Array(items))
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
            let mut hash = Hash::new();
            while let Some((k, v)) = map.next_entry::<String, Value>()? {
                hash.insert(k, v);
            }
            Ok(Value::Hash(hash))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
