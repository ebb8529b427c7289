//! Parameter schema and compiled argument slots
//!
//! Each statement argument is bound to a [`CompiledParameter`] when the script
//! is compiled. Literal arguments are parsed once at compile time and the
//! value is cached on the slot; variable arguments are looked up in context
//! memory and converted to the declared type every time they are read.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::RuntimeError;
use crate::value::{ActorId, Value};

/// Prefix marking an argument as a reference to a memory variable
pub const VARIABLE_PREFIX: char = '$';

/// Parses argument text and validates values read from memory
pub trait ValueParser: Send + Sync {
    /// Human readable name of the produced type
    fn type_name(&self) -> &'static str;

    /// Parse literal argument text
    fn parse(&self, text: &str) -> Result<Value, String>;

    /// Convert a value read from memory into this parser's type
    fn accept(&self, value: Value) -> Result<Value, RuntimeError> {
        match value {
            Value::Str(text) => self.parse(&text).map_err(|reason| {
                RuntimeError::type_mismatch(self.type_name(), "string", reason)
            }),
            other => Ok(other),
        }
    }
}

/// Declared type of a parameter
#[derive(Clone)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    List,
    Actor,
    Any,
    /// Host supplied parser
    Custom(Arc<dyn ValueParser>),
}

impl ParamType {
    /// Build the parser for this type
    pub fn parser(&self) -> Arc<dyn ValueParser> {
        match self {
            ParamType::Custom(parser) => parser.clone(),
            builtin => Arc::new(Builtin(builtin.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Bool => "bool",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Str => "string",
            ParamType::List => "list",
            ParamType::Actor => "actor",
            ParamType::Any => "any",
            ParamType::Custom(parser) => parser.type_name(),
        }
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Builtin(ParamType);

impl ValueParser for Builtin {
    fn type_name(&self) -> &'static str {
        self.0.name()
    }

    fn parse(&self, text: &str) -> Result<Value, String> {
        match self.0 {
            ParamType::Bool => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err("expected true or false".to_string()),
            },
            ParamType::Int => text
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| e.to_string()),
            ParamType::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| e.to_string()),
            ParamType::List => {
                if text.trim().is_empty() {
                    return Ok(Value::List(Vec::new()));
                }
                Ok(Value::List(
                    text.split(',').map(|item| Value::infer(item.trim())).collect(),
                ))
            }
            ParamType::Actor => text
                .trim_start_matches('#')
                .parse::<u64>()
                .map(|id| Value::Actor(ActorId(id)))
                .map_err(|e| e.to_string()),
            ParamType::Any => Ok(Value::infer(text)),
            ParamType::Str | ParamType::Custom(_) => Ok(Value::Str(text.to_string())),
        }
    }

    fn accept(&self, value: Value) -> Result<Value, RuntimeError> {
        let found = value.type_name();
        let reject = |value: &Value| {
            Err(RuntimeError::type_mismatch(
                self.type_name(),
                found,
                value.to_string(),
            ))
        };

        match (&self.0, value) {
            (ParamType::Any, value) => Ok(value),
            (_, Value::Str(text)) if !matches!(self.0, ParamType::Str) => self
                .parse(&text)
                .map_err(|reason| RuntimeError::type_mismatch(self.type_name(), found, reason)),
            (ParamType::Bool, value @ Value::Bool(_)) => Ok(value),
            (ParamType::Int, value @ Value::Int(_)) => Ok(value),
            (ParamType::Float, value @ Value::Float(_)) => Ok(value),
            (ParamType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ParamType::Str, value @ Value::Str(_)) => Ok(value),
            (
                ParamType::Str,
                value @ (Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Actor(_)),
            ) => Ok(Value::Str(value.to_string())),
            (ParamType::List, value @ Value::List(_)) => Ok(value),
            (ParamType::Actor, value @ Value::Actor(_)) => Ok(value),
            (ParamType::Actor, Value::Int(i)) if i >= 0 => Ok(Value::Actor(ActorId(i as u64))),
            (_, value) => reject(&value),
        }
    }
}

/// Describes one positional parameter of an action
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    pub ty: ParamType,
    /// Argument text bound when the statement leaves this slot out
    pub default: Option<String>,
    /// Position in the action's schema, assigned on registration
    pub index: usize,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ty,
            default: None,
            index: 0,
        }
    }

    /// Make the parameter optional
    ///
    /// `text` is compiled as if it had been written in the statement, so
    /// `"$result"` reads the default output variable.
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default = Some(text.into());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }
}

/// Whether an argument slot holds literal text or names a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Literal,
    Variable,
}

/// One bound argument slot of a compiled action
pub struct CompiledParameter {
    /// Literal text, or the variable name without its prefix
    raw: String,
    kind: ArgKind,
    ty: ParamType,
    parser: OnceLock<Arc<dyn ValueParser>>,
    literal: OnceLock<Value>,
}

impl CompiledParameter {
    pub(crate) fn new(raw: impl Into<String>, kind: ArgKind, ty: ParamType) -> Self {
        Self {
            raw: raw.into(),
            kind,
            ty,
            parser: OnceLock::new(),
            literal: OnceLock::new(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> ArgKind {
        self.kind
    }

    pub fn param_type(&self) -> &ParamType {
        &self.ty
    }

    /// The literal value, if this slot is a literal that has been parsed
    pub fn cached_literal(&self) -> Option<&Value> {
        self.literal.get()
    }

    fn parser(&self) -> &Arc<dyn ValueParser> {
        self.parser.get_or_init(|| self.ty.parser())
    }

    /// Parse a literal slot and cache the value
    ///
    /// Called by the compiler; variable slots are left untouched.
    pub(crate) fn prime(&self) -> Result<(), String> {
        if self.kind == ArgKind::Literal && self.literal.get().is_none() {
            let value = self.parser().parse(&self.raw)?;
            let _ = self.literal.set(value);
        }
        Ok(())
    }

    /// Produce the slot's value, reading variables through `lookup`
    pub fn resolve<F>(&self, lookup: F) -> Result<Value, RuntimeError>
    where
        F: FnOnce(&str) -> Option<Value>,
    {
        match self.kind {
            ArgKind::Literal => {
                if let Some(value) = self.literal.get() {
                    return Ok(value.clone());
                }
                let value = self.parser().parse(&self.raw).map_err(|reason| {
                    RuntimeError::type_mismatch(self.ty.name(), "string", reason)
                })?;
                let _ = self.literal.set(value.clone());
                Ok(value)
            }
            ArgKind::Variable => {
                let value = lookup(&self.raw)
                    .ok_or_else(|| RuntimeError::UndefinedVariable(self.raw.clone()))?;
                self.parser().accept(value)
            }
        }
    }

    /// Source form of the slot, quoted when needed
    pub fn to_source(&self) -> String {
        match self.kind {
            ArgKind::Variable => format!("{VARIABLE_PREFIX}{}", self.raw),
            ArgKind::Literal => crate::lexer::quote_if_needed(&self.raw),
        }
    }
}

impl fmt::Debug for CompiledParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledParameter")
            .field("raw", &self.raw)
            .field("kind", &self.kind)
            .field("ty", &self.ty)
            .field("literal", &self.literal.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl ValueParser for Counting {
        fn type_name(&self) -> &'static str {
            "counted"
        }

        fn parse(&self, text: &str) -> Result<Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Str(text.to_uppercase()))
        }
    }

    #[test]
    fn test_literal_parsed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slot = CompiledParameter::new(
            "abc",
            ArgKind::Literal,
            ParamType::Custom(Arc::new(Counting(calls.clone()))),
        );

        slot.prime().unwrap();
        for _ in 0..3 {
            assert_eq!(slot.resolve(|_| None).unwrap(), Value::Str("ABC".into()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_variable_converted_to_declared_type() {
        let slot = CompiledParameter::new("n", ArgKind::Variable, ParamType::Float);
        let value = slot.resolve(|_| Some(Value::Int(3))).unwrap();
        assert_eq!(value, Value::Float(3.0));
    }

    #[test]
    fn test_variable_string_is_parsed() {
        let slot = CompiledParameter::new("flag", ArgKind::Variable, ParamType::Bool);
        let value = slot.resolve(|_| Some(Value::Str("TRUE".into()))).unwrap();
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn test_missing_variable() {
        let slot = CompiledParameter::new("gone", ArgKind::Variable, ParamType::Int);
        assert_eq!(
            slot.resolve(|_| None).unwrap_err(),
            RuntimeError::UndefinedVariable("gone".into())
        );
    }

    #[test]
    fn test_variable_type_mismatch() {
        let slot = CompiledParameter::new("x", ArgKind::Variable, ParamType::Bool);
        let err = slot.resolve(|_| Some(Value::List(vec![]))).unwrap_err();
        assert!(matches!(err, RuntimeError::Type { expected: "bool", .. }));
    }

    #[test]
    fn test_invalid_literal_reports_reason() {
        let slot = CompiledParameter::new("soon", ArgKind::Literal, ParamType::Int);
        assert!(slot.prime().is_err());
    }

    #[test]
    fn test_list_literal() {
        let slot = CompiledParameter::new("1, two,3.5", ArgKind::Literal, ParamType::List);
        slot.prime().unwrap();
        assert_eq!(
            slot.cached_literal().unwrap(),
            &Value::List(vec![
                Value::Int(1),
                Value::Str("two".into()),
                Value::Float(3.5)
            ])
        );
    }
}
