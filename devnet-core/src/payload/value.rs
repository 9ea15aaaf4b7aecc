use std::fmt::{self, Display};
use thiserror::Error as ThisError;

/// A single value carried in a [`Payload`](super::Payload).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Text(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
}

impl Value {
    /// Get the contained text.
    pub fn to_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Get the contained `bool`.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the contained `i64`.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the contained `u64`.
    pub fn to_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the contained text.
    pub fn ok_text(&self) -> Result<&str, ValueError> {
        match self {
            Self::Text(value) => Ok(value),
            other => Err(ValueError::WrongKind {
                expected: ValueKind::Text,
                actual: other.kind(),
            }),
        }
    }

    /// Get the contained `bool`.
    pub fn ok_bool(&self) -> Result<bool, ValueError> {
        match self {
            Self::Bool(value) => Ok(*value),
            other => Err(ValueError::WrongKind {
                expected: ValueKind::Bool,
                actual: other.kind(),
            }),
        }
    }

    /// Get the contained `i64`.
    pub fn ok_int(&self) -> Result<i64, ValueError> {
        match self {
            Self::Int(value) => Ok(*value),
            other => Err(ValueError::WrongKind {
                expected: ValueKind::Int,
                actual: other.kind(),
            }),
        }
    }

    /// Get the contained `u64`.
    pub fn ok_uint(&self) -> Result<u64, ValueError> {
        match self {
            Self::UInt(value) => Ok(*value),
            other => Err(ValueError::WrongKind {
                expected: ValueKind::UInt,
                actual: other.kind(),
            }),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::UInt(_) => ValueKind::UInt,
        }
    }

    /// The length this value counts against the entry limit. Only text is
    /// measured; typed values are always short.
    pub(crate) fn measured_len(&self) -> usize {
        match self {
            Self::Text(value) => value.chars().count(),
            _ => 0,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::UInt(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Bool,
    Int,
    UInt,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
        };
        f.write_str(name)
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Payload key missing")]
    Missing,
    #[error("Expected a {expected} value but found {actual}")]
    WrongKind {
        expected: ValueKind,
        actual: ValueKind,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_check_kind() {
        let value = Value::from("ping");
        assert_eq!(value.to_text(), Some("ping"));
        assert_eq!(value.to_bool(), None);
        assert_eq!(
            value.ok_uint(),
            Err(ValueError::WrongKind {
                expected: ValueKind::UInt,
                actual: ValueKind::Text,
            })
        );
        assert_eq!(Value::from(7u32).ok_uint(), Ok(7));
        assert_eq!(Value::from(-3).ok_int(), Ok(-3));
    }

    #[test]
    fn only_text_is_measured() {
        assert_eq!(Value::from("héllo").measured_len(), 5);
        assert_eq!(Value::from(u64::MAX).measured_len(), 0);
    }
}
