use std::collections::BTreeMap;

/// Ordered field map backing every document and nested object.
///
/// Field order is not semantic; a `BTreeMap` keeps iteration deterministic,
/// which the object comparison in [`crate::compare`] relies on.
pub type Document = BTreeMap<String, Value>;

/// A document value.
///
/// `Undefined` is deliberately not a variant: a missing field or a dot-path
/// miss surfaces as `Option::None` at the call sites where it can arise, and
/// is never stored or serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Array(Vec<Value>),
    Object(Document),
}

impl Value {
    pub fn as_object(&self) -> Option<&Document> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(map: Document) -> Self {
        Value::Object(map)
    }
}

/// Build a [`Document`] literal.
///
/// ```
/// use vellum_document::{doc, Value};
/// let d = doc! { "name": "Alice", "age": 30 };
/// assert_eq!(d.get("age"), Some(&Value::Number(30.0)));
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($key:literal : $val:expr),+ $(,)?) => {{
        let mut map = $crate::Document::new();
        $( map.insert($key.to_string(), $crate::Value::from($val)); )+
        map
    }};
}

/// Build a [`Value::Array`] literal, converting each element with `Value::from`.
#[macro_export]
macro_rules! arr {
    () => { $crate::Value::Array(Vec::new()) };
    ($($val:expr),+ $(,)?) => {
        $crate::Value::Array(vec![ $( $crate::Value::from($val) ),+ ])
    };
}
