//! Attribute values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed integer interval with optional open ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntRange {
    /// Lower bound, `None` for unbounded.
    pub from: Option<i64>,
    /// Upper bound, `None` for unbounded.
    pub to: Option<i64>,
}

impl IntRange {
    /// Creates a range from `from` to `to`, both inclusive.
    #[must_use]
    pub const fn new(from: Option<i64>, to: Option<i64>) -> Self {
        Self { from, to }
    }

    /// Effective lower bound.
    #[must_use]
    pub fn start(&self) -> i64 {
        self.from.unwrap_or(i64::MIN)
    }

    /// Effective upper bound.
    #[must_use]
    pub fn end(&self) -> i64 {
        self.to.unwrap_or(i64::MAX)
    }

    /// Returns `true` when this range shares at least one point with `[from, to]`.
    #[must_use]
    pub fn overlaps(&self, from: i64, to: i64) -> bool {
        self.start() <= to && self.end() >= from
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |b: Option<i64>| b.map(|v| v.to_string()).unwrap_or_default();
        write!(f, "[{},{}]", bound(self.from), bound(self.to))
    }
}

/// A value stored in an attribute, reference attribute or associated data slot.
///
/// Values are totally ordered so they can key sort and filter indices.
/// Floats are not supported; decimal quantities are stored as scaled integers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// UTF-8 text.
    String(String),
    /// Integer interval.
    IntRange(IntRange),
    /// Multiple scalar values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Iterates the scalar values: the elements of an array, or the value itself.
    pub fn scalars(&self) -> impl Iterator<Item = &AttributeValue> {
        let slice = match self {
            Self::Array(items) => items.as_slice(),
            other => std::slice::from_ref(other),
        };
        slice.iter()
    }

    /// Returns the integer when this is an `Int`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text when this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::IntRange(v) => write!(f, "{v}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<IntRange> for AttributeValue {
    fn from(v: IntRange) -> Self {
        Self::IntRange(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_overlap_respects_open_ends() {
        let bounded = IntRange::new(Some(10), Some(20));
        assert!(bounded.overlaps(20, 30));
        assert!(!bounded.overlaps(21, 30));

        let open_start = IntRange::new(None, Some(5));
        assert!(open_start.overlaps(i64::MIN, -100));
        assert!(!open_start.overlaps(6, 6));
    }

    #[test]
    fn scalars_flatten_arrays_only() {
        let array = AttributeValue::Array(vec!["a".into(), "b".into()]);
        assert_eq!(array.scalars().count(), 2);
        let single = AttributeValue::from(7);
        assert_eq!(single.scalars().collect::<Vec<_>>(), vec![&AttributeValue::Int(7)]);
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(AttributeValue::from("A").to_string(), "A");
        assert_eq!(AttributeValue::Array(vec![1.into(), 2.into()]).to_string(), "[1, 2]");
        assert_eq!(AttributeValue::from(IntRange::new(None, Some(3))).to_string(), "[,3]");
    }
}
