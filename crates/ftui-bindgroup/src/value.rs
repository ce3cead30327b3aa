#![forbid(unsafe_code)]

//! Dynamically typed field values.
//!
//! A [`Value`] is what travels between a bound UI field and a property of a
//! data item: the raw text a user typed, the converted value a binding
//! produced, or the current value read back from the source.

use core::fmt;

/// A field value moved between UI targets and data items.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl Value {
    /// Whether this is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if any.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Display length in characters (text) or of the rendered form.
    #[must_use]
    pub fn char_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Text(s) => s.chars().count(),
            other => other.to_string().chars().count(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_payload() {
        assert_eq!(Value::from("Ada").to_string(), "Ada");
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(true).to_string(), "true");
    }

    #[test]
    fn char_len_counts_chars_not_bytes() {
        assert_eq!(Value::from("héllo").char_len(), 5);
        assert_eq!(Value::from(1234).char_len(), 4);
        assert_eq!(Value::Null.char_len(), 0);
    }

    #[test]
    fn option_conversion_maps_none_to_null() {
        let none: Option<i64> = None;
        assert!(Value::from(none).is_null());
        assert_eq!(Value::from(Some(7_i64)), Value::Int(7));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from("x").as_text(), Some("x"));
        assert_eq!(Value::from(3).as_int(), Some(3));
        assert_eq!(Value::from(false).as_bool(), Some(false));
        assert_eq!(Value::from(3).as_text(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_untagged_round_trip() {
        let json = serde_json::to_string(&Value::from("Ada")).unwrap();
        assert_eq!(json, "\"Ada\"");
        let back: Value = serde_json::from_str("17").unwrap();
        assert_eq!(back, Value::Int(17));
    }
}
