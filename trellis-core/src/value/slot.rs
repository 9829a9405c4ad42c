//! Slots: the addressable parts of a composite value.

use std::fmt;
use std::rc::Rc;

/// One addressable location inside a composite.
///
/// `Length` and `Iterate` are synthetic: nobody stores a value under
/// `Iterate`, but effects that enumerate a container subscribe to it so that
/// adding or removing keys re-runs them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A named property of an object-like container.
    Key(Rc<str>),
    /// A position in an array-like container.
    Index(usize),
    /// The length of an array-like container.
    Length,
    /// Enumeration of an object-like container's keys.
    Iterate,
}

impl Slot {
    /// Build a key slot.
    pub fn key(name: impl Into<Rc<str>>) -> Self {
        Slot::Key(name.into())
    }

    /// The index this slot addresses, if it is an index or a canonical
    /// integer key such as `"3"` (but not `"03"` or `"-1"`).
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Slot::Index(index) => Some(*index),
            Slot::Key(key) => key
                .parse::<usize>()
                .ok()
                .filter(|index| index.to_string() == **key),
            Slot::Length | Slot::Iterate => None,
        }
    }

    /// Whether this is one of the synthetic slots.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Slot::Length | Slot::Iterate)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Key(key) => f.write_str(key),
            Slot::Index(index) => write!(f, "{index}"),
            Slot::Length => f.write_str("length"),
            Slot::Iterate => f.write_str("[[iterate]]"),
        }
    }
}

impl From<&str> for Slot {
    fn from(key: &str) -> Self {
        Slot::Key(key.into())
    }
}

impl From<String> for Slot {
    fn from(key: String) -> Self {
        Slot::Key(key.into())
    }
}

impl From<Rc<str>> for Slot {
    fn from(key: Rc<str>) -> Self {
        Slot::Key(key)
    }
}

impl From<usize> for Slot {
    fn from(index: usize) -> Self {
        Slot::Index(index)
    }
}

impl From<&Slot> for Slot {
    fn from(slot: &Slot) -> Self {
        slot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_integer_keys_are_indices() {
        assert_eq!(Slot::from("3").as_index(), Some(3));
        assert_eq!(Slot::from("0").as_index(), Some(0));
        assert_eq!(Slot::from("03").as_index(), None);
        assert_eq!(Slot::from("-1").as_index(), None);
        assert_eq!(Slot::from("NaN").as_index(), None);
        assert_eq!(Slot::Length.as_index(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Slot::from("name").to_string(), "name");
        assert_eq!(Slot::Index(4).to_string(), "4");
        assert_eq!(Slot::Length.to_string(), "length");
        assert!(Slot::Iterate.is_synthetic());
    }
}
