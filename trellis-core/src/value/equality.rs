//! Change detection.
//!
//! Writes only notify subscribers when the new value differs from the old one
//! under same-value comparison: NaN equals NaN, while `+0.0` and `-0.0` are
//! different values. Composite values compare by identity, never by content.

use std::rc::Rc;

use super::Value;
use crate::reactive::{Reactive, Runtime};

/// Same-value comparison.
pub trait SameValue {
    /// Whether `self` and `other` are the same value.
    fn same_value(&self, other: &Self) -> bool;
}

/// `true` when writing `new` over `old` counts as a change.
pub fn has_changed<T: SameValue + ?Sized>(new: &T, old: &T) -> bool {
    !new.same_value(old)
}

macro_rules! same_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_by_eq!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, String, str,
    &'static str, Rc<str>
);

impl SameValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        if self.is_nan() {
            return other.is_nan();
        }
        self == other && self.is_sign_negative() == other.is_sign_negative()
    }
}

impl SameValue for f32 {
    fn same_value(&self, other: &Self) -> bool {
        if self.is_nan() {
            return other.is_nan();
        }
        self == other && self.is_sign_negative() == other.is_sign_negative()
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_value(b),
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl SameValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.same_value(b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Composite(a), Value::Composite(b)) => a.ptr_eq(b),
            (Value::Reactive(a), Value::Reactive(b)) => Reactive::ptr_eq(a, b),
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            (Value::Computed(a), Value::Computed(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Values that can live inside a [`Ref`](crate::Ref) or a
/// [`Computed`](crate::Computed).
///
/// `to_raw` strips reactive wrapping so comparisons see the underlying owner;
/// `to_reactive` re-applies deep wrapping when a deep ref stores the value.
/// Both default to a plain clone, which is right for every non-composite type.
/// Values reporting `is_readonly_view` are stored as given.
pub trait ReactiveValue: SameValue + Clone + 'static {
    fn to_raw(&self) -> Self {
        self.clone()
    }

    fn is_readonly_view(&self) -> bool {
        false
    }

    fn to_reactive(&self, _rt: &Runtime) -> Self {
        self.clone()
    }
}

macro_rules! plain_reactive_value {
    ($($ty:ty),* $(,)?) => {
        $(impl ReactiveValue for $ty {})*
    };
}

plain_reactive_value!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str, Rc<str>
);

impl<T: ReactiveValue> ReactiveValue for Option<T> {
    fn to_raw(&self) -> Self {
        self.as_ref().map(T::to_raw)
    }

    fn to_reactive(&self, rt: &Runtime) -> Self {
        self.as_ref().map(|value| value.to_reactive(rt))
    }

    fn is_readonly_view(&self) -> bool {
        self.as_ref().is_some_and(T::is_readonly_view)
    }
}

impl<T: ReactiveValue> ReactiveValue for Vec<T> {
    fn to_raw(&self) -> Self {
        self.iter().map(T::to_raw).collect()
    }

    fn to_reactive(&self, rt: &Runtime) -> Self {
        self.iter().map(|value| value.to_reactive(rt)).collect()
    }
}

impl ReactiveValue for Value {
    fn to_raw(&self) -> Self {
        Value::to_raw(self)
    }

    fn is_readonly_view(&self) -> bool {
        self.is_readonly()
    }

    fn to_reactive(&self, rt: &Runtime) -> Self {
        match self {
            Value::Composite(composite) => Value::Reactive(rt.reactive(composite)),
            other => other.clone(),
        }
    }
}
