//! Decoder seam: anything that can turn a record file into typed messages.
//! The pipeline never looks at the binary format itself.

use anyhow::Result;
use std::path::Path;
use time::OffsetDateTime;

/// A decoded field value, reduced to what the summarizer needs.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Timestamp(OffsetDateTime),
    Int(i64),
    Float(f64),
    Text(String),
    /// Enumerated value; `name` is the symbolic name when the decoder knows it.
    Enum { raw: i64, name: Option<String> },
    Null,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(n) => Some(*n as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Enum { raw, .. } => Some(*raw as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<OffsetDateTime> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Symbolic name for enums, otherwise the plain string form.
    pub fn symbol(&self) -> Option<String> {
        match self {
            FieldValue::Enum { name: Some(n), .. } => Some(n.clone()),
            FieldValue::Enum { raw, name: None } => Some(raw.to_string()),
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Int(n) => Some(n.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Timestamp(ts) => Some(crate::date::format_timestamp(*ts)),
            FieldValue::Null => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

/// One message of a record file (`session`, `record`, `lap`, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct TypedMessage {
    pub kind: String,
    pub fields: Vec<Field>,
}

impl TypedMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), fields: Vec::new() }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push(Field { name: name.into(), value });
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

/// External record-decoding capability. Implementations must be shareable
/// across pool threads; a failure is reported as `Err`, a panic is tolerated
/// by the thread-isolated pool.
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Vec<TypedMessage>>;
}
