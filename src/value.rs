//! Decoded field values and per-subset output.

use crate::descriptor::Descriptor;
use std::fmt;

/// A single decoded value.
#[derive(Debug, Clone)]
pub enum Value {
    /// Physical value after unscaling. `missing` is set when every data bit was 1;
    /// `value` is meaningless in that case.
    Numeric { value: f64, missing: bool },
    Text(String),
    /// Raw code or flag table entry.
    CodeTable(u32),
}

impl Value {
    pub fn number(value: f64) -> Self {
        Value::Numeric { value, missing: false }
    }

    pub fn missing() -> Self {
        Value::Numeric { value: f64::NAN, missing: true }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Numeric { missing: true, .. })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Numeric { value, missing: false } => Some(*value),
            Value::CodeTable(c) => Some(*c as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<u32> {
        match self {
            Value::CodeTable(c) => Some(*c),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Missing values compare equal regardless of payload.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Numeric { missing: true, .. }, Value::Numeric { missing: true, .. }) => true,
            (
                Value::Numeric { value: a, missing: false },
                Value::Numeric { value: b, missing: false },
            ) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::CodeTable(a), Value::CodeTable(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Numeric { missing: true, .. } => write!(f, "MISSING"),
            Value::Numeric { value, .. } => write!(f, "{}", value),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::CodeTable(c) => write!(f, "code {}", c),
        }
    }
}

/// One decoded field: its descriptor, tree path and value.
///
/// Paths are `/`-joined descriptor segments; replication iterations carry their
/// index (`1-01-000[2]`) and associated fields end in `.associated`.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub descriptor: Descriptor,
    pub path: String,
    pub value: Value,
}

/// All fields of one subset, in tree order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Subset {
    pub index: usize,
    pub fields: Vec<Field>,
}

impl Subset {
    pub fn new(index: usize) -> Self {
        Subset { index, fields: Vec::new() }
    }

    /// First field whose path ends with `suffix`.
    pub fn get(&self, suffix: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.path.ends_with(suffix)).map(|f| &f.value)
    }

    /// All values of a descriptor, in order.
    pub fn values_of(&self, d: Descriptor) -> impl Iterator<Item = &Value> + '_ {
        self.fields.iter().filter(move |f| f.descriptor == d).map(|f| &f.value)
    }

    /// `(path, value)` pairs, for comparing layouts.
    pub fn pairs(&self) -> Vec<(&str, &Value)> {
        self.fields.iter().map(|f| (f.path.as_str(), &f.value)).collect()
    }
}
