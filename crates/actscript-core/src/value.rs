//! Typed values stored in context memory and produced by argument parsers

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::RuntimeError;

/// Opaque handle to an actor owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// A value held in memory or passed as an argument
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Actor(ActorId),
    /// Host-specific object the runtime only passes around
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Name of the variant, used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Actor(_) => "actor",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Infer a value from untyped literal text
    pub fn infer(text: &str) -> Value {
        match text {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(i) = text.parse::<i64>() {
            return Value::Int(i);
        }
        // Words like `nan` or `inf` stay strings
        if let Ok(f) = text.parse::<f64>() {
            if f.is_finite() {
                return Value::Float(f);
            }
        }
        Value::Str(text.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Downcast an opaque value to a concrete host type
    pub fn downcast_opaque<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Opaque(any) => any.clone().downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
                self.as_f64() == other.as_f64()
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Actor(a), Value::Actor(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Actor(a) => write!(f, "Actor({})", a.0),
            Value::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Actor(a) => write!(f, "{a}"),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ActorId> for Value {
    fn from(a: ActorId) -> Self {
        Value::Actor(a)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Typed read out of a [`Value`]
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, RuntimeError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Int(i) => Ok(i),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl FromValue for usize {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        let i = i64::from_value(value)?;
        usize::try_from(i).map_err(|_| {
            RuntimeError::type_mismatch("non-negative int", "int", format!("{i} is negative"))
        })
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromValue for Vec<Value> {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::List(items) => Ok(items),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl FromValue for ActorId {
    fn from_value(value: Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Actor(a) => Ok(a),
            other => Err(mismatch("actor", &other)),
        }
    }
}

fn mismatch(expected: &'static str, found: &Value) -> RuntimeError {
    RuntimeError::type_mismatch(expected, found.type_name(), found.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_literals() {
        assert_eq!(Value::infer("true"), Value::Bool(true));
        assert_eq!(Value::infer("42"), Value::Int(42));
        assert_eq!(Value::infer("-1.5"), Value::Float(-1.5));
        assert_eq!(Value::infer("hello"), Value::Str("hello".into()));
    }

    #[test]
    fn test_infer_keeps_non_finite_words_as_strings() {
        for word in ["nan", "NaN", "inf", "-inf", "infinity", "1e999"] {
            assert_eq!(Value::infer(word), Value::Str(word.into()), "{word}");
        }
    }

    #[test]
    fn test_numeric_equality_widens() {
        assert_eq!(Value::Int(5), Value::Float(5.0));
        assert_ne!(Value::Int(5), Value::Str("5".into()));
    }

    #[test]
    fn test_typed_read_mismatch_is_reported() {
        let err = bool::from_value(Value::Int(1)).unwrap_err();
        match err {
            RuntimeError::Type {
                expected, found, ..
            } => {
                assert_eq!(expected, "bool");
                assert_eq!(found, "int");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_opaque_downcast() {
        #[derive(Debug, PartialEq)]
        struct Door(u8);

        let value = Value::Opaque(Arc::new(Door(3)));
        assert_eq!(*value.downcast_opaque::<Door>().unwrap(), Door(3));
        assert!(value.downcast_opaque::<String>().is_none());
    }

    #[test]
    fn test_negative_usize_rejected() {
        assert!(usize::from_value(Value::Int(-2)).is_err());
        assert_eq!(usize::from_value(Value::Int(2)).unwrap(), 2);
    }
}
