//! Tagged value model shared by live objects and node trees.
//!
//! Objects never hold language references to each other: an object field
//! pointing at another object stores its [`ObjectId`] handle into the owning
//! [`ObjectGraph`](crate::ObjectGraph). Containers are explicit variants, so
//! nothing has to be inspected at runtime to decide "is this a collection?".

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable handle of an object inside an [`ObjectGraph`](crate::ObjectGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub usize);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type tag carried by every scalar leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Integer,
    Float,
    String,
    Boolean,
    Null,
    Date,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::String => "string",
            ScalarType::Boolean => "boolean",
            ScalarType::Null => "null",
            ScalarType::Date => "date",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "integer" | "int" => Some(ScalarType::Integer),
            "float" | "double" => Some(ScalarType::Float),
            "string" => Some(ScalarType::String),
            "boolean" | "bool" => Some(ScalarType::Boolean),
            "null" => Some(ScalarType::Null),
            "date" | "datetime" => Some(ScalarType::Date),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a collection entry: list position or map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl Key {
    /// Wire tag: `i;<n>` for positions, `s;<key>` for names.
    pub fn tag(&self) -> String {
        match self {
            Key::Index(i) => format!("i;{}", i),
            Key::Name(s) => format!("s;{}", s),
        }
    }

    pub fn parse_tag(tag: &str) -> Option<Self> {
        if let Some(rest) = tag.strip_prefix("i;") {
            rest.parse().ok().map(Key::Index)
        } else {
            tag.strip_prefix("s;").map(|rest| Key::Name(rest.to_string()))
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Name(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Name(s)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    Object(ObjectId),
    List(Vec<Value>),
    Map(Vec<(Key, Value)>),
}

impl Value {
    /// Scalar tag of this value, `None` for objects and containers.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Null => Some(ScalarType::Null),
            Value::Bool(_) => Some(ScalarType::Boolean),
            Value::Integer(_) => Some(ScalarType::Integer),
            Value::Float(_) => Some(ScalarType::Float),
            Value::String(_) => Some(ScalarType::String),
            Value::Date(_) => Some(ScalarType::Date),
            Value::Object(_) | Value::List(_) | Value::Map(_) => None,
        }
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.scalar_type().is_some()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Object(_) => "object",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            other => other.scalar_type().map(|t| t.as_str()).unwrap_or("unknown"),
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view used by the `NUM_*` filter operators.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Textual form of a scalar as written on the wire.
    pub fn to_wire_string(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Object(_) | Value::List(_) | Value::Map(_) => None,
        }
    }

    /// Parse wire text back into a scalar of the given type.
    pub fn parse_scalar(scalar: ScalarType, text: &str) -> Option<Value> {
        match scalar {
            ScalarType::Null => Some(Value::Null),
            ScalarType::Integer => text.trim().parse().ok().map(Value::Integer),
            ScalarType::Float => text.trim().parse().ok().map(Value::Float),
            ScalarType::String => Some(Value::String(text.to_string())),
            ScalarType::Boolean => match text.trim() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" | "" => Some(Value::Bool(false)),
                _ => None,
            },
            ScalarType::Date => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|d| Value::Date(d.with_timezone(&Utc))),
        }
    }

    /// Best-effort conversion of a scalar into another scalar type.
    ///
    /// Null stays null; non-scalars and lossy conversions yield `None`.
    pub fn coerce(&self, target: ScalarType) -> Option<Value> {
        if self.is_null() || self.scalar_type() == Some(target) {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::Integer(i), ScalarType::Float) => Some(Value::Float(*i as f64)),
            (Value::Float(f), ScalarType::Integer) if f.fract() == 0.0 => {
                Some(Value::Integer(*f as i64))
            }
            (Value::Integer(i), ScalarType::Boolean) => Some(Value::Bool(*i != 0)),
            (Value::Bool(b), ScalarType::Integer) => Some(Value::Integer(i64::from(*b))),
            (_, ScalarType::String) => self.to_wire_string().map(Value::String),
            (Value::String(s), other) => Value::parse_scalar(other, s),
            _ => None,
        }
    }

    /// Pull a typed field value out, used by `Entity::set_field` impls.
    pub fn extract<T: FromValue>(self) -> Result<T, FieldError> {
        T::from_value(self)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// Rejections raised by `Entity::set_field` and [`FromValue`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("unknown field '{0}'")]
    Unknown(String),

    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl FieldError {
    fn mismatch(expected: &'static str, found: &Value) -> Self {
        FieldError::TypeMismatch {
            expected,
            found: found.kind_name(),
        }
    }
}

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, FieldError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        Ok(value)
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(FieldError::mismatch("string", &other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(FieldError::mismatch("integer", &other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(FieldError::mismatch("float", &other)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(FieldError::mismatch("boolean", &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Date(d) => Ok(d),
            other => Err(FieldError::mismatch("date", &other)),
        }
    }
}

impl FromValue for ObjectId {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Object(id) => Ok(id),
            other => Err(FieldError::mismatch("object", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, FieldError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            Value::Map(entries) => entries.into_iter().map(|(_, v)| T::from_value(v)).collect(),
            other => Err(FieldError::mismatch("list", &other)),
        }
    }
}
