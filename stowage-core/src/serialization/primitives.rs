/*!
Serializers for single value shapes.
*/

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::ValueSerializer;
use crate::{Result, StowageError, Value};

fn mismatch(serializer: &str, value: &Value) -> StowageError {
    StowageError::serialization(
        serializer,
        format!("cannot handle value of type {}", value.type_name()),
    )
}

/// Plain JSON data: no special types, no cycles
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn can_handle(&self, value: &Value) -> bool {
        value.is_plain()
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        if !self.can_handle(value) {
            return Err(mismatch(self.name(), value));
        }
        Ok(serde_json::to_string(&value.to_json()?)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let json: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        Ok(Value::from(json))
    }
}

/// Raw strings, stored as-is
#[derive(Debug, Clone, Default)]
pub struct StringSerializer;

impl ValueSerializer for StringSerializer {
    fn name(&self) -> &str {
        "string"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::String(_))
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        Ok(Value::String(data.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NumberSerializer;

impl ValueSerializer for NumberSerializer {
    fn name(&self) -> &str {
        "number"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Number(_))
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Number(n) => Ok(n.to_string()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let number: serde_json::Number = serde_json::from_str(data).map_err(|e| {
            StowageError::serialization(self.name(), format!("invalid number '{data}': {e}"))
        })?;
        Ok(Value::Number(number))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BooleanSerializer;

impl ValueSerializer for BooleanSerializer {
    fn name(&self) -> &str {
        "boolean"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Bool(_))
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        match data {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(StowageError::serialization(
                self.name(),
                format!("invalid boolean '{other}'"),
            )),
        }
    }
}

/// Dates as RFC 3339 (ISO-8601) strings in UTC, full sub-second precision
#[derive(Debug, Clone, Default)]
pub struct DateSerializer;

impl ValueSerializer for DateSerializer {
    fn name(&self) -> &str {
        "date"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Date(_))
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Date(at) => Ok(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let at = DateTime::parse_from_rfc3339(data).map_err(|e| {
            StowageError::serialization(self.name(), format!("invalid date '{data}': {e}"))
        })?;
        Ok(Value::Date(at.with_timezone(&Utc)))
    }
}

#[derive(Serialize, Deserialize)]
struct RegExpParts {
    source: String,
    flags: String,
}

/// Regular expressions as `{"source": .., "flags": ..}`
#[derive(Debug, Clone, Default)]
pub struct RegExpSerializer;

impl ValueSerializer for RegExpSerializer {
    fn name(&self) -> &str {
        "regexp"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::RegExp { .. })
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::RegExp { source, flags } => Ok(serde_json::to_string(&RegExpParts {
                source: source.clone(),
                flags: flags.clone(),
            })?),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let parts: RegExpParts = serde_json::from_str(data)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        Ok(Value::RegExp {
            source: parts.source,
            flags: parts.flags,
        })
    }
}

/// Maps of plain keys and values, as an array of `[key, value]` entries
#[derive(Debug, Clone, Default)]
pub struct MapSerializer;

impl ValueSerializer for MapSerializer {
    fn name(&self) -> &str {
        "map"
    }

    fn can_handle(&self, value: &Value) -> bool {
        match value {
            Value::Map(entries) => entries.iter().all(|(k, v)| k.is_plain() && v.is_plain()),
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        if !self.can_handle(value) {
            return Err(mismatch(self.name(), value));
        }
        let Value::Map(entries) = value else {
            return Err(mismatch(self.name(), value));
        };
        let json = entries
            .iter()
            .map(|(k, v)| Ok(serde_json::Value::Array(vec![k.to_json()?, v.to_json()?])))
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string(&json)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let entries: Vec<(serde_json::Value, serde_json::Value)> = serde_json::from_str(data)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        Ok(Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::from(k), Value::from(v)))
                .collect(),
        ))
    }
}

/// Sets of plain items, as an array
#[derive(Debug, Clone, Default)]
pub struct SetSerializer;

impl ValueSerializer for SetSerializer {
    fn name(&self) -> &str {
        "set"
    }

    fn can_handle(&self, value: &Value) -> bool {
        match value {
            Value::Set(items) => items.iter().all(Value::is_plain),
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        if !self.can_handle(value) {
            return Err(mismatch(self.name(), value));
        }
        let Value::Set(items) = value else {
            return Err(mismatch(self.name(), value));
        };
        let json = items
            .iter()
            .map(Value::to_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string(&json)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let items: Vec<serde_json::Value> = serde_json::from_str(data)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        Ok(Value::Set(items.into_iter().map(Value::from).collect()))
    }
}

/// Raw byte buffers, base64 encoded
#[derive(Debug, Clone, Default)]
pub struct ArrayBufferSerializer;

impl ValueSerializer for ArrayBufferSerializer {
    fn name(&self) -> &str {
        "arraybuffer"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::Bytes(_))
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Bytes(bytes) => Ok(BASE64.encode(bytes)),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let bytes = BASE64
            .decode(data)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        Ok(Value::Bytes(Bytes::from(bytes)))
    }
}

/// Text carried as bytes: UTF-8 encode, then base64
#[derive(Debug, Clone, Default)]
pub struct BinarySerializer;

impl ValueSerializer for BinarySerializer {
    fn name(&self) -> &str {
        "binary"
    }

    fn can_handle(&self, value: &Value) -> bool {
        matches!(value, Value::String(_))
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(BASE64.encode(s.as_bytes())),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let bytes = BASE64
            .decode(data)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| StowageError::serialization(self.name(), e.to_string()))?;
        Ok(Value::String(text))
    }
}
