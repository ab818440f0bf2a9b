//! Decoded value trees: the structured output of the dynamic codec.
//!
//! Values form a recursive sum type with an explicit error variant so
//! decode failures stay local to the field they occurred on. Message
//! fields keep wire/declaration order; JSON rendering re-keys them as an
//! object with a `$type` tag when the message type is known.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map as JsonMap, Number, Value as JsonValue};

/// Largest integer magnitude exactly representable in an f64 / JSON
/// number (2^53 − 1). Values outside render as decimal strings.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Map keys are restricted to the protobuf map key types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    UInt(u64),
    String(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Bool(v) => write!(f, "{}", v),
            MapKey::Int(v) => write!(f, "{}", v),
            MapKey::UInt(v) => write!(f, "{}", v),
            MapKey::String(v) => f.write_str(v),
        }
    }
}

/// A decoded message: ordered field name → value pairs plus the message
/// type when a descriptor was available.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageValue {
    pub type_name: Option<String>,
    pub fields: Vec<(String, DecodedValue)>,
}

impl MessageValue {
    pub fn new(type_name: Option<String>) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Insert respecting singular last-value-wins semantics.
    pub fn set(&mut self, name: &str, value: DecodedValue) {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name.to_string(), value));
        }
    }

    /// Append a map entry, creating the map on first use. Duplicate keys
    /// take the last value, mirroring singular field semantics.
    pub fn push_map_entry(&mut self, name: &str, key: MapKey, value: DecodedValue) {
        if let Some((_, existing)) = self.fields.iter_mut().find(|(n, _)| n == name) {
            if let DecodedValue::Map(entries) = existing {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                } else {
                    entries.push((key, value));
                }
                return;
            }
            *existing = DecodedValue::Map(vec![(key, value)]);
        } else {
            self.fields
                .push((name.to_string(), DecodedValue::Map(vec![(key, value)])));
        }
    }

    /// Append to a repeated field, creating the sequence on first use.
    pub fn push_repeated(&mut self, name: &str, value: DecodedValue) {
        if let Some((_, existing)) = self.fields.iter_mut().find(|(n, _)| n == name) {
            match existing {
                DecodedValue::Repeated(items) => items.push(value),
                other => {
                    let prior = std::mem::replace(other, DecodedValue::Repeated(Vec::new()));
                    if let DecodedValue::Repeated(items) = other {
                        items.push(prior);
                        items.push(value);
                    }
                }
            }
        } else {
            self.fields
                .push((name.to_string(), DecodedValue::Repeated(vec![value])));
        }
    }
}

/// The decoded value sum type.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Bool(bool),
    /// Signed integers (int32/64, sint, sfixed).
    Int(i64),
    /// Unsigned integers (uint32/64, fixed).
    UInt(u64),
    /// float and double, widened.
    Double(f64),
    String(String),
    /// Bytes from a declared bytes (or unreadable string) field,
    /// preserved exactly; rendered as base64 in JSON.
    Bytes(Vec<u8>),
    /// Length-delimited payload no schema could interpret (blind decode,
    /// unknown fields); rendered as lowercase hex in JSON.
    RawBytes(Vec<u8>),
    /// Enum value with the resolved name when the number is known.
    Enum { number: i64, name: Option<String> },
    Repeated(Vec<DecodedValue>),
    /// Ordered map (entry order preserved; canonicalization sorts keys).
    Map(Vec<(MapKey, DecodedValue)>),
    Message(MessageValue),
    /// Decode failure local to this field.
    Error { kind: String, message: String },
}

impl DecodedValue {
    pub fn message(type_name: Option<&str>) -> Self {
        DecodedValue::Message(MessageValue::new(type_name.map(str::to_string)))
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        DecodedValue::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn as_message(&self) -> Option<&MessageValue> {
        match self {
            DecodedValue::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DecodedValue::Error { .. })
    }

    /// Proto3 default check, used when canonicalizing round-trip trees.
    pub fn is_default(&self) -> bool {
        match self {
            DecodedValue::Bool(v) => !v,
            DecodedValue::Int(v) => *v == 0,
            DecodedValue::UInt(v) => *v == 0,
            DecodedValue::Double(v) => *v == 0.0,
            DecodedValue::String(v) => v.is_empty(),
            DecodedValue::Bytes(v) | DecodedValue::RawBytes(v) => v.is_empty(),
            DecodedValue::Enum { number, .. } => *number == 0,
            DecodedValue::Repeated(v) => v.is_empty(),
            DecodedValue::Map(v) => v.is_empty(),
            DecodedValue::Message(_) | DecodedValue::Error { .. } => false,
        }
    }

    /// Canonical form for comparisons: map keys sorted, defaulted
    /// message fields dropped, recursively.
    pub fn canonicalize(&self) -> DecodedValue {
        match self {
            DecodedValue::Repeated(items) => {
                DecodedValue::Repeated(items.iter().map(DecodedValue::canonicalize).collect())
            }
            DecodedValue::Map(entries) => {
                let mut entries: Vec<(MapKey, DecodedValue)> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.canonicalize()))
                    .collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                DecodedValue::Map(entries)
            }
            DecodedValue::Message(m) => {
                let fields = m
                    .fields
                    .iter()
                    .map(|(n, v)| (n.clone(), v.canonicalize()))
                    .filter(|(_, v)| !v.is_default())
                    .collect();
                DecodedValue::Message(MessageValue {
                    type_name: m.type_name.clone(),
                    fields,
                })
            }
            other => other.clone(),
        }
    }

    /// Render as JSON for the UI/CLI contract. 64-bit integers outside
    /// the safe range become decimal strings; declared bytes fields
    /// become base64 while schema-less byte payloads become lowercase
    /// hex; non-finite doubles become strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            DecodedValue::Bool(v) => JsonValue::Bool(*v),
            DecodedValue::Int(v) => {
                if v.unsigned_abs() <= MAX_SAFE_INTEGER {
                    JsonValue::Number((*v).into())
                } else {
                    JsonValue::String(v.to_string())
                }
            }
            DecodedValue::UInt(v) => {
                if *v <= MAX_SAFE_INTEGER {
                    JsonValue::Number((*v).into())
                } else {
                    JsonValue::String(v.to_string())
                }
            }
            DecodedValue::Double(v) => match Number::from_f64(*v) {
                Some(n) => JsonValue::Number(n),
                None => JsonValue::String(v.to_string()),
            },
            DecodedValue::String(v) => JsonValue::String(v.clone()),
            DecodedValue::Bytes(v) => JsonValue::String(BASE64.encode(v)),
            DecodedValue::RawBytes(v) => JsonValue::String(hex_string(v)),
            DecodedValue::Enum { number, name } => match name {
                Some(n) => JsonValue::String(n.clone()),
                None => JsonValue::Number((*number).into()),
            },
            DecodedValue::Repeated(items) => {
                JsonValue::Array(items.iter().map(DecodedValue::to_json).collect())
            }
            DecodedValue::Map(entries) => {
                let mut obj = JsonMap::new();
                for (key, value) in entries {
                    obj.insert(key.to_string(), value.to_json());
                }
                JsonValue::Object(obj)
            }
            DecodedValue::Message(m) => {
                let mut obj = JsonMap::new();
                if let Some(type_name) = &m.type_name {
                    obj.insert("$type".to_string(), JsonValue::String(type_name.clone()));
                }
                for (name, value) in &m.fields {
                    obj.insert(name.clone(), value.to_json());
                }
                JsonValue::Object(obj)
            }
            DecodedValue::Error { kind, message } => {
                json!({ "_error": { "kind": kind, "message": message } })
            }
        }
    }
}

impl serde::Serialize for DecodedValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Lowercase hex rendering of an opaque byte sequence.
pub fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
