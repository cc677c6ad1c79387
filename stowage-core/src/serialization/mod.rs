/*!
Type-preserving serializers.

A serializer turns a [`Value`] into a string and back, and declares which
values it can handle. The composite serializer walks arbitrary graphs and
delegates leaves to the specialized serializers, so dates, regular
expressions, maps, sets and byte buffers survive a round trip.
*/

pub mod composite;
pub mod manager;
pub mod primitives;

use serde::{Deserialize, Serialize};

use crate::registry::codec_kind;
use crate::{Result, Value};

pub use composite::CompositeSerializer;
pub use manager::SerializerManager;
pub use primitives::{
    ArrayBufferSerializer, BinarySerializer, BooleanSerializer, DateSerializer, JsonSerializer,
    MapSerializer, NumberSerializer, RegExpSerializer, SetSerializer, StringSerializer,
};

codec_kind!(
    /// Built-in serializer kinds
    SerializerKind {
        Date => "date",
        RegExp => "regexp",
        Map => "map",
        Set => "set",
        ArrayBuffer => "arraybuffer",
        String => "string",
        Number => "number",
        Boolean => "boolean",
        Json => "json",
        Binary => "binary",
        Composite => "composite",
    }
);

/// Serialization abstraction for stored values
///
/// For every value `v` with `can_handle(v)`, `deserialize(serialize(v)) == v`.
pub trait ValueSerializer: Send + Sync {
    /// Name written into [`SerializationResult::kind`]
    fn name(&self) -> &str;

    /// Whether this serializer round-trips the value
    fn can_handle(&self, value: &Value) -> bool;

    fn serialize(&self, value: &Value) -> Result<String>;

    fn deserialize(&self, data: &str) -> Result<Value>;
}

/// Output of a serializer, carrying what is needed to invert it
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerializationResult {
    pub serialized: String,
    #[serde(rename = "type")]
    pub kind: SerializerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SerializationResult {
    pub fn new(kind: SerializerKind, serialized: String) -> Self {
        Self {
            serialized,
            kind,
            metadata: None,
        }
    }
}
