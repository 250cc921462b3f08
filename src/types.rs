//! Core value and type model shared by the translator, compiler and runtime

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::naming::QualifiedName;
use crate::translator::numbers;

/* ===================== Semantic Types ===================== */

/// The four primitive types expressions can compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Integer,
    Decimal,
    Boolean,
    String,
}

impl PrimitiveKind {
    /// Human-readable type name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Integer => "Integer",
            PrimitiveKind::Decimal => "Decimal",
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::String => "String",
        }
    }

    /// Operand symbols legal between two values of this kind
    pub fn operands(self) -> &'static [&'static str] {
        match self {
            PrimitiveKind::Integer | PrimitiveKind::Decimal => &["+", "-", "*", "/"],
            PrimitiveKind::Boolean => &["&&", "||"],
            PrimitiveKind::String => &["+"],
        }
    }

    /// Coercion call name in target code (`int(...)`, `.int()`)
    pub fn coercion(self) -> &'static str {
        match self {
            PrimitiveKind::Integer => "int",
            PrimitiveKind::Decimal => "dec",
            PrimitiveKind::Boolean => "bool",
            PrimitiveKind::String => "str",
        }
    }
}

/// Declared type of a variable or record field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticType {
    Integer,
    Decimal,
    Boolean,
    String,
    Array,
    Record(QualifiedName),
}

impl SemanticType {
    /// Resolve a type name as written in scripts and field specs.
    ///
    /// Anything that is not a primitive name is taken as a record type name;
    /// whether that record type exists is for the caller to check.
    pub fn from_type_name(name: &str) -> SemanticType {
        match name.trim() {
            "Integer" | "Number" => SemanticType::Integer,
            "Decimal" => SemanticType::Decimal,
            "Boolean" => SemanticType::Boolean,
            "String" => SemanticType::String,
            "Array" => SemanticType::Array,
            other => SemanticType::Record(QualifiedName::record(other)),
        }
    }

    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            SemanticType::Integer => Some(PrimitiveKind::Integer),
            SemanticType::Decimal => Some(PrimitiveKind::Decimal),
            SemanticType::Boolean => Some(PrimitiveKind::Boolean),
            SemanticType::String => Some(PrimitiveKind::String),
            SemanticType::Array | SemanticType::Record(_) => None,
        }
    }

    /// Whether an expression of `kind` may be stored in a slot of this type
    pub fn accepts(&self, kind: ResultKind) -> bool {
        match (self, kind) {
            (_, ResultKind::Null) => true,
            (SemanticType::Decimal, ResultKind::Integer) => true,
            (SemanticType::Array | SemanticType::Record(_), ResultKind::Reference) => true,
            (ty, kind) => ty.primitive().map(ResultKind::from) == Some(kind),
        }
    }

    /// Convert a value into this type, the way input values are bound
    pub fn coerce(&self, value: Value) -> Result<Value, CoercionError> {
        let fail = |value: &Value| CoercionError {
            value: value.to_string(),
            type_name: self.to_string(),
        };

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (SemanticType::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
            (SemanticType::Integer, Value::String(s)) if numbers::is_integer(s.trim()) => {
                let parsed = s.trim().parse::<i64>();
                parsed.map(Value::Integer).map_err(|_| fail(&Value::String(s)))
            }
            (SemanticType::Decimal, Value::Decimal(v)) => Ok(Value::Decimal(v)),
            (SemanticType::Decimal, Value::Integer(v)) => Ok(Value::Decimal(v as f64)),
            (SemanticType::Decimal, Value::String(s))
                if numbers::is_decimal(s.trim()) || numbers::is_integer(s.trim()) =>
            {
                let parsed = s.trim().parse::<f64>();
                parsed.map(Value::Decimal).map_err(|_| fail(&Value::String(s)))
            }
            (SemanticType::Boolean, Value::Boolean(v)) => Ok(Value::Boolean(v)),
            (SemanticType::Boolean, Value::String(s)) if s == "true" || s == "false" => {
                Ok(Value::Boolean(s == "true"))
            }
            (SemanticType::String, Value::String(s)) => Ok(Value::String(s)),
            (
                SemanticType::String,
                v @ (Value::Integer(_) | Value::Decimal(_) | Value::Boolean(_)),
            ) => Ok(Value::String(v.to_string())),
            (SemanticType::Array, Value::Array(items)) => Ok(Value::Array(items)),
            (SemanticType::Record(expected), Value::Record(record))
                if record.type_name == *expected =>
            {
                Ok(Value::Record(record))
            }
            (_, other) => Err(fail(&other)),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::Integer => write!(f, "Integer"),
            SemanticType::Decimal => write!(f, "Decimal"),
            SemanticType::Boolean => write!(f, "Boolean"),
            SemanticType::String => write!(f, "String"),
            SemanticType::Array => write!(f, "Array"),
            SemanticType::Record(name) => write!(f, "{}", name.human_name()),
        }
    }
}

/// Result type of a translated expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    Integer,
    Decimal,
    Boolean,
    String,
    /// Record or array access, no operands allowed
    Reference,
    Null,
}

impl From<PrimitiveKind> for ResultKind {
    fn from(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Integer => ResultKind::Integer,
            PrimitiveKind::Decimal => ResultKind::Decimal,
            PrimitiveKind::Boolean => ResultKind::Boolean,
            PrimitiveKind::String => ResultKind::String,
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::Integer => "Integer",
            ResultKind::Decimal => "Decimal",
            ResultKind::Boolean => "Boolean",
            ResultKind::String => "String",
            ResultKind::Reference => "Reference",
            ResultKind::Null => "Null",
        };
        f.write_str(name)
    }
}

/* ===================== Values ===================== */

/// Runtime value held by a variable. `Null` doubles as "not assigned yet".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    String(String),
    Array(Vec<Value>),
    Record(RecordValue),
}

/// Instance of a user-defined record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordValue {
    pub type_name: QualifiedName,
    pub fields: BTreeMap<String, Value>,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build a value from JSON input. Objects carry no record type and are rejected.
    pub fn from_json(json: serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Boolean(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::Integer(i)),
                None => n.as_f64().map(Value::Decimal),
            },
            serde_json::Value::String(s) => Some(Value::String(s)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            serde_json::Value::Object(_) => None,
        }
    }

    /// Plain JSON rendering for reports
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::json!(i),
            Value::Decimal(d) => serde_json::json!(d),
            Value::Boolean(b) => serde_json::json!(b),
            Value::String(s) => serde_json::json!(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Record(record) => serde_json::Value::Object(
                record
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Record(record) => {
                write!(f, "{}{{", record.type_name.human_name())?;
                for (i, (name, value)) in record.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}={}", name, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{value}] is not a value of type {type_name}")]
pub struct CoercionError {
    pub value: String,
    pub type_name: String,
}
