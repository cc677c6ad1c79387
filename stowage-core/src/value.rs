/*!
Dynamic value model carried through codecs, adapters and stores.

`Value` is a superset of JSON: besides the JSON shapes it carries dates,
regular expressions, ordered maps with arbitrary keys, sets, raw byte buffers
and shared nodes. Shared nodes are the only way to alias a subtree, and
therefore the only way to build a cycle.
*/

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::serialization::composite;
use crate::{Result, StowageError};

/// Maximum nesting depth accepted by the structural walkers. Each level of a
/// composite tree takes two JSON levels, which keeps encoded payloads under
/// the JSON parser recursion limit.
pub const MAX_DEPTH: usize = 60;

/// A dynamically typed value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Date(DateTime<Utc>),
    RegExp { source: String, flags: String },
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Bytes(Bytes),
    Shared(SharedValue),
}

/// A reference-counted, mutable value node.
///
/// Cloning a `SharedValue` clones the handle, not the value.
#[derive(Clone, Default)]
pub struct SharedValue(Arc<RwLock<Value>>);

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl SharedValue {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Snapshot of the current inner value (inner shared handles are kept)
    pub fn get(&self) -> Value {
        self.0.read_recursive().clone()
    }

    /// Replace the inner value
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Identity of the node, stable for its lifetime
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:#x})", self.id())
    }
}

impl Value {
    /// Date value
    pub fn date(at: DateTime<Utc>) -> Self {
        Value::Date(at)
    }

    /// Regular expression value
    pub fn regexp<S1: Into<String>, S2: Into<String>>(source: S1, flags: S2) -> Self {
        Value::RegExp {
            source: source.into(),
            flags: flags.into(),
        }
    }

    /// Wrap a value in a new shared node
    pub fn shared(value: Value) -> Self {
        Value::Shared(SharedValue::new(value))
    }

    /// Build an object from key/value pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Name of the value's shape, as used in error messages and type tags
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Date(_) => "date",
            Value::RegExp { .. } => "regexp",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Bytes(_) => "arraybuffer",
            Value::Shared(_) => "shared",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a field of an object value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Consume an object value and take one of its fields
    pub fn take_field(self, key: &str) -> Option<Value> {
        match self {
            Value::Object(mut map) => map.remove(key),
            _ => None,
        }
    }

    /// Whether the graph is pure JSON data: no special types and no cycles
    pub fn is_plain(&self) -> bool {
        let mut path = Vec::new();
        is_plain_inner(self, &mut path, 0)
    }

    /// Convert to JSON, flattening special types.
    ///
    /// Dates become RFC 3339 strings, regular expressions `/source/flags`,
    /// maps arrays of `[key, value]` pairs, sets arrays, byte buffers base64
    /// strings. Use the composite serializer when the types must survive.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut path = Vec::new();
        to_json_inner(self, &mut path, 0)
    }
}

fn is_plain_inner(value: &Value, path: &mut Vec<usize>, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(|v| is_plain_inner(v, path, depth + 1)),
        Value::Object(map) => map.values().all(|v| is_plain_inner(v, path, depth + 1)),
        Value::Shared(node) => {
            if path.contains(&node.id()) {
                return false;
            }
            path.push(node.id());
            let plain = is_plain_inner(&node.get(), path, depth + 1);
            path.pop();
            plain
        }
        _ => false,
    }
}

fn to_json_inner(
    value: &Value,
    path: &mut Vec<usize>,
    depth: usize,
) -> Result<serde_json::Value> {
    if depth > MAX_DEPTH {
        return Err(StowageError::serialization(
            "json",
            format!("nesting deeper than {MAX_DEPTH} levels"),
        ));
    }
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Value::Number(n.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| to_json_inner(v, path, depth + 1))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_json_inner(v, path, depth + 1)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Date(at) => {
            serde_json::Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        }
        Value::RegExp { source, flags } => serde_json::Value::String(format!("/{source}/{flags}")),
        Value::Map(entries) => serde_json::Value::Array(
            entries
                .iter()
                .map(|(k, v)| {
                    Ok(serde_json::Value::Array(vec![
                        to_json_inner(k, path, depth + 1)?,
                        to_json_inner(v, path, depth + 1)?,
                    ]))
                })
                .collect::<Result<_>>()?,
        ),
        Value::Set(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|v| to_json_inner(v, path, depth + 1))
                .collect::<Result<_>>()?,
        ),
        Value::Bytes(bytes) => serde_json::Value::String(BASE64.encode(bytes)),
        Value::Shared(node) => {
            if path.contains(&node.id()) {
                return Err(StowageError::CyclicStructure {
                    path: format!("depth {depth}"),
                });
            }
            path.push(node.id());
            let json = to_json_inner(&node.get(), path, depth + 1);
            path.pop();
            json?
        }
    };
    Ok(json)
}

/// Structural equality. Shared nodes compare by their contents, so a decoded
/// copy equals the graph it was encoded from. Comparing cyclic graphs does not
/// terminate.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Shared(a), Value::Shared(b)) if a.ptr_eq(b) => true,
            (Value::Shared(a), b) => a.get() == *b,
            (a, Value::Shared(b)) => *a == b.get(),
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (
                Value::RegExp {
                    source: s1,
                    flags: f1,
                },
                Value::RegExp {
                    source: s2,
                    flags: f2,
                },
            ) => s1 == s2 && f1 == f2,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

/// Non-finite floats have no JSON representation and become `Null`.
impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(at: DateTime<Utc>) -> Self {
        Value::Date(at)
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

/// Serializes as the composite tagged tree, so special types survive any
/// serde round trip.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        composite::encode_tree(self)
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tree = serde_json::Value::deserialize(deserializer)?;
        composite::decode_tree(&tree).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_from_json_is_structural() {
        let json = serde_json::json!({"name": "cart", "items": [1, 2.5, null, true]});
        let value = Value::from(json.clone());

        assert_eq!(value.get("name").and_then(Value::as_str), Some("cart"));
        assert!(value.is_plain());
        assert_eq!(value.to_json().unwrap(), json);
    }

    #[test]
    fn test_to_json_flattens_special_types() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let value = Value::object([
            ("at", Value::date(at)),
            ("pattern", Value::regexp("^a+$", "gi")),
            ("raw", Value::Bytes(Bytes::from_static(b"hi"))),
        ]);

        assert!(!value.is_plain());
        let json = value.to_json().unwrap();
        assert_eq!(json["at"], "2024-03-01T12:00:00Z");
        assert_eq!(json["pattern"], "/^a+$/gi");
        assert_eq!(json["raw"], "aGk=");
    }

    #[test]
    fn test_shared_nodes_compare_by_content() {
        let shared = Value::shared(Value::from("x"));
        assert_eq!(shared, Value::from("x"));
        assert_eq!(Value::from("x"), shared);
        assert_ne!(shared, Value::from("y"));
    }

    #[test]
    fn test_to_json_rejects_cycles() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::Array(vec![Value::Shared(node.clone())]));

        let err = Value::Shared(node.clone()).to_json().unwrap_err();
        assert!(matches!(err, StowageError::CyclicStructure { .. }));
        assert!(!Value::Shared(node.clone()).is_plain());

        // break the cycle so the Arc can be freed
        node.set(Value::Null);
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }

    #[test]
    fn test_serde_round_trip_keeps_special_types() {
        let at = Utc.with_ymd_and_hms(2023, 7, 4, 9, 30, 15).unwrap();
        let value = Value::object([
            ("when", Value::date(at)),
            (
                "tags",
                Value::Set(vec![Value::from("a"), Value::from("b")]),
            ),
        ]);

        let json = serde_json::to_string(&value).unwrap();
        let restored: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, value);
    }
}
