//! Raw telemetry snapshot model
//!
//! A robotling publishes one nested JSON document per message on `<root>/raw`.
//! The document is decoded into [`Snapshot`], a tagged tree that keeps object
//! keys in the order the robot sent them (column alignment in positional mode
//! depends on it).

use serde_json::{Number, Value};
use std::fmt;

/// Errors raised while turning a raw payload into a [`Snapshot`]
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("payload is not a JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal value of a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

/// One decoded telemetry document
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Scalar(Scalar),
    Sequence(Vec<Snapshot>),
    /// Key/value pairs in arrival order
    Object(Vec<(String, Snapshot)>),
}

impl Snapshot {
    /// Parse a UTF-8 payload text into a snapshot
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(value))
    }

    /// Children of an object node, empty for anything else
    pub fn entries(&self) -> &[(String, Snapshot)] {
        match self {
            Snapshot::Object(entries) => entries,
            _ => &[],
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Snapshot::Object(_))
    }
}

impl From<Value> for Snapshot {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Snapshot::Scalar(Scalar::Null),
            Value::Bool(b) => Snapshot::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Snapshot::Scalar(Scalar::Number(n)),
            Value::String(s) => Snapshot::Scalar(Scalar::Text(s)),
            Value::Array(items) => Snapshot::Sequence(items.into_iter().map(Snapshot::from).collect()),
            // serde_json is built with `preserve_order`, so this walks keys in document order
            Value::Object(map) => Snapshot::Object(
                map.into_iter().map(|(k, v)| (k, Snapshot::from(v))).collect(),
            ),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// Text rendering used when a leaf is stored as a single text column.
/// Strings nested in sequences or objects are quoted, top-level text is not.
impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Snapshot::Scalar(scalar) => write!(f, "{scalar}"),
            Snapshot::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_nested(f, item)?;
                }
                f.write_str("]")
            }
            Snapshot::Object(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: ")?;
                    write_nested(f, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, item: &Snapshot) -> fmt::Result {
    match item {
        Snapshot::Scalar(Scalar::Text(s)) => write!(f, "{s:?}"),
        other => write!(f, "{other}"),
    }
}
