//! Record values - the structured data stored in a repository

use super::Cid;
use crate::codec;
use crate::{Error, Result};
use bytes::Bytes;
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use std::collections::BTreeMap;

/// A structured record value
///
/// Maps are `BTreeMap`s so iteration is already in canonical key order.
///
/// Equality follows the canonical encoding: two values are equal exactly
/// when they encode to the same bytes. Floats therefore compare by their
/// normalised bit pattern, so NaN equals NaN and `-0.0` equals `0.0`.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Bytes),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Link(Cid),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => {
                codec::canonical_float_bits(*a) == codec::canonical_float_bits(*b)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Link(a), Value::Link(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Check that the value can be stored and read back
    ///
    /// The decoder refuses arrays and maps nested more than
    /// [`MAX_DEPTH`](codec::MAX_DEPTH) deep, so such values are rejected
    /// before they are ever written.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        fn check<'a>(children: impl Iterator<Item = &'a Value>, depth: usize) -> Result<()> {
            if depth >= codec::MAX_DEPTH {
                return Err(Error::InvalidValue(format!(
                    "nested deeper than {} levels",
                    codec::MAX_DEPTH
                )));
            }
            for child in children {
                child.validate_at(depth + 1)?;
            }
            Ok(())
        }

        match self {
            Value::Array(items) => check(items.iter(), depth),
            Value::Map(map) => check(map.values(), depth),
            _ => Ok(()),
        }
    }

    /// Build a map value from key/value pairs
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<Cid> {
        match self {
            Value::Link(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Convert from JSON, recognising `{"$link": ..}` and `{"$bytes": ..}`
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        Ok(match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            JsonValue::Object(obj) => {
                if obj.len() == 1 {
                    if let Some(JsonValue::String(s)) = obj.get("$link") {
                        return Ok(Value::Link(s.parse()?));
                    }
                    if let Some(JsonValue::String(s)) = obj.get("$bytes") {
                        let raw = hex::decode(s)
                            .map_err(|e| Error::InvalidValue(format!("invalid $bytes: {}", e)))?;
                        return Ok(Value::Bytes(Bytes::from(raw)));
                    }
                }
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), Value::from_json(v)?);
                }
                Value::Map(map)
            }
        })
    }

    /// Convert to JSON. Non-finite floats become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => {
                let mut obj = JsonMap::new();
                obj.insert("$bytes".into(), JsonValue::String(hex::encode(b)));
                JsonValue::Object(obj)
            }
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Link(cid) => {
                let mut obj = JsonMap::new();
                obj.insert("$link".into(), JsonValue::String(cid.to_string()));
                JsonValue::Object(obj)
            }
        }
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Cid> for Value {
    fn from(c: Cid) -> Self {
        Value::Link(c)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(b))
    }
}
