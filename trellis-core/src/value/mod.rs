//! The dynamic value model.
//!
//! Reactive wrappers work over [`Value`]s: scalars, strings and shared
//! [`Composite`] containers, plus the handle types the runtime hands out
//! (wrappers, refs and computed values) so they can be stored inside
//! composites and unwrapped on read.

mod composite;
mod equality;
mod slot;

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

pub(crate) use composite::length_from;
pub use composite::{
    ArrayData, Composite, Container, ContainerKind, ObjectData, OwnerId, SlotAccess,
    MAX_ARRAY_LENGTH,
};
pub use equality::{has_changed, ReactiveValue, SameValue};
pub use slot::Slot;

use crate::reactive::{Computed, Reactive, Ref};

/// Coarse classification of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Null, booleans, numbers, strings and raw composites.
    Plain,
    /// A reactive or read-only wrapper.
    Wrapper,
    /// A ref cell.
    Cell,
    /// A computed value.
    Computed,
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Composite(Composite),
    Reactive(Reactive),
    Ref(Ref<Value>),
    Computed(Computed<Value>),
}

impl Value {
    /// Build an object-like composite value.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Composite(Composite::object(entries))
    }

    /// Build an array-like composite value.
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Composite(Composite::array(items))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Reactive(_) => ValueKind::Wrapper,
            Value::Ref(_) => ValueKind::Cell,
            Value::Computed(_) => ValueKind::Computed,
            _ => ValueKind::Plain,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The underlying composite, looking through a wrapper.
    pub fn as_composite(&self) -> Option<Composite> {
        match self {
            Value::Composite(composite) => Some(composite.clone()),
            Value::Reactive(wrapper) => Some(wrapper.raw()),
            _ => None,
        }
    }

    /// Whether this is a mutable reactive wrapper.
    pub fn is_reactive(&self) -> bool {
        matches!(self, Value::Reactive(wrapper) if !wrapper.is_readonly())
    }

    /// Whether this is a read-only wrapper.
    pub fn is_readonly(&self) -> bool {
        matches!(self, Value::Reactive(wrapper) if wrapper.is_readonly())
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(wrapper) => Some(wrapper),
            _ => None,
        }
    }

    /// Strip reactive wrapping, yielding the raw composite for wrappers and
    /// the value itself otherwise.
    pub fn to_raw(&self) -> Value {
        match self {
            Value::Reactive(wrapper) => Value::Composite(wrapper.raw()),
            other => other.clone(),
        }
    }

    /// Read through refs and computed values (tracked); other values are
    /// returned as they are.
    pub fn unref(&self) -> Value {
        match self {
            Value::Ref(cell) => cell.get(),
            Value::Computed(computed) => computed.get(),
            other => other.clone(),
        }
    }

    /// Parse a JSON document into plain values and fresh composites.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s.as_str().into()),
            serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from_json)),
            serde_json::Value::Object(entries) => Value::object(
                entries
                    .iter()
                    .map(|(key, value)| (key.as_str(), Value::from_json(value))),
            ),
        }
    }

    /// Untracked JSON snapshot. Refs and computed values are read through,
    /// cycles become `null` and non-finite numbers become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_within(&mut HashSet::new())
    }

    pub(crate) fn to_json_within(&self, path: &mut HashSet<OwnerId>) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Composite(composite) => composite.to_json_within(path),
            Value::Reactive(wrapper) => wrapper.raw().to_json_within(path),
            Value::Ref(cell) => cell.get_untracked().to_json_within(path),
            Value::Computed(computed) => computed.get_untracked().to_json_within(path),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Composite(composite) => fmt::Debug::fmt(composite, f),
            Value::Reactive(wrapper) => fmt::Debug::fmt(wrapper, f),
            Value::Ref(_) => f.write_str("Ref(..)"),
            Value::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

macro_rules! number_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

number_from!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Composite> for Value {
    fn from(composite: Composite) -> Self {
        Value::Composite(composite)
    }
}

impl From<Reactive> for Value {
    fn from(wrapper: Reactive) -> Self {
        Value::Reactive(wrapper)
    }
}

impl From<Ref<Value>> for Value {
    fn from(cell: Ref<Value>) -> Self {
        Value::Ref(cell)
    }
}

impl From<Computed<Value>> for Value {
    fn from(computed: Computed<Value>) -> Self {
        Value::Computed(computed)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::from(None::<i32>).is_null());
        assert_eq!(Value::default(), Value::Null);
    }

    #[test]
    fn kinds() {
        assert_eq!(Value::from(1).kind(), ValueKind::Plain);
        assert_eq!(Value::object([("a", Value::Null)]).kind(), ValueKind::Plain);
    }

    #[test]
    fn json_round_trip_keeps_shape() {
        let json = serde_json::json!({ "user": { "name": "ada", "tags": ["x", "y"] }, "n": 1.5 });
        let value = Value::from_json(&json);
        let user = value.as_composite().unwrap().get("user").unwrap();
        assert_eq!(user.as_composite().unwrap().get("name").unwrap(), Value::from("ada"));
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn non_finite_numbers_serialize_as_null() {
        assert_eq!(Value::from(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
