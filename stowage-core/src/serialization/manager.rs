/*!
Serializer registry.
*/

use std::sync::Arc;
use tracing::debug;

use super::{
    ArrayBufferSerializer, BinarySerializer, BooleanSerializer, CompositeSerializer,
    DateSerializer, JsonSerializer, MapSerializer, NumberSerializer, RegExpSerializer,
    SerializationResult, SerializerKind, SetSerializer, StringSerializer, ValueSerializer,
};
use crate::registry::Registry;
use crate::{Result, StowageError, Value};

/// Kind-keyed serializer lookup with a mutable default
pub struct SerializerManager {
    registry: Registry<SerializerKind, dyn ValueSerializer>,
}

impl Default for SerializerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializerManager {
    /// Manager with every built-in serializer registered, in priority order,
    /// and `json` as the default
    pub fn new() -> Self {
        let manager = Self::empty(SerializerKind::Json);
        manager.register(SerializerKind::Date, Arc::new(DateSerializer));
        manager.register(SerializerKind::RegExp, Arc::new(RegExpSerializer));
        manager.register(SerializerKind::Map, Arc::new(MapSerializer));
        manager.register(SerializerKind::Set, Arc::new(SetSerializer));
        manager.register(SerializerKind::ArrayBuffer, Arc::new(ArrayBufferSerializer));
        manager.register(SerializerKind::String, Arc::new(StringSerializer));
        manager.register(SerializerKind::Number, Arc::new(NumberSerializer));
        manager.register(SerializerKind::Boolean, Arc::new(BooleanSerializer));
        manager.register(SerializerKind::Json, Arc::new(JsonSerializer));
        manager.register(SerializerKind::Binary, Arc::new(BinarySerializer));
        manager.register(SerializerKind::Composite, Arc::new(CompositeSerializer::new()));
        manager
    }

    /// Manager with nothing registered
    pub fn empty(default: SerializerKind) -> Self {
        Self {
            registry: Registry::new("serializer", default),
        }
    }

    pub fn register(&self, kind: SerializerKind, serializer: Arc<dyn ValueSerializer>) {
        self.registry.register(kind, serializer);
    }

    pub fn unregister(&self, kind: &SerializerKind) -> Option<Arc<dyn ValueSerializer>> {
        self.registry.unregister(kind)
    }

    pub fn get_serializer(&self, kind: &SerializerKind) -> Option<Arc<dyn ValueSerializer>> {
        self.registry.get(kind)
    }

    pub fn set_default(&self, kind: SerializerKind) -> Result<()> {
        self.registry.set_default(kind)
    }

    pub fn default_kind(&self) -> SerializerKind {
        self.registry.default_kind()
    }

    pub fn get_all_serializers(&self) -> Vec<SerializerKind> {
        self.registry.kinds()
    }

    /// First registered serializer that can handle the value
    pub fn find_best_serializer(
        &self,
        value: &Value,
    ) -> Option<(SerializerKind, Arc<dyn ValueSerializer>)> {
        self.registry
            .entries()
            .into_iter()
            .find(|(_, serializer)| serializer.can_handle(value))
    }

    /// Serialize with an explicit kind, or with the default. An explicit kind
    /// that cannot handle the value is an error; the default falls back to
    /// the best registered fit.
    pub fn serialize(
        &self,
        value: &Value,
        kind: Option<&SerializerKind>,
    ) -> Result<SerializationResult> {
        let (kind, serializer) = match kind {
            Some(kind) => {
                let serializer = self.registry.require(kind)?;
                if !serializer.can_handle(value) {
                    return Err(StowageError::serialization(
                        kind.as_str(),
                        format!("cannot handle value of type {}", value.type_name()),
                    ));
                }
                (kind.clone(), serializer)
            }
            None => {
                let (kind, serializer) = self.registry.resolve(None)?;
                if serializer.can_handle(value) {
                    (kind, serializer)
                } else {
                    let (best, serializer) = self.find_best_serializer(value).ok_or_else(|| {
                        StowageError::serialization(
                            kind.as_str(),
                            format!("no serializer can handle value of type {}", value.type_name()),
                        )
                    })?;
                    debug!(default = %kind, fallback = %best, "Default serializer cannot handle value");
                    (best, serializer)
                }
            }
        };

        let serialized = serializer.serialize(value)?;
        Ok(SerializationResult::new(kind, serialized))
    }

    /// Invert a serialization result using the serializer it names
    pub fn deserialize(&self, result: &SerializationResult) -> Result<Value> {
        let serializer = self.registry.require(&result.kind)?;
        serializer.deserialize(&result.serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_default_is_json() {
        let manager = SerializerManager::new();
        let value = Value::from(serde_json::json!({"a": [1, 2]}));

        let result = manager.serialize(&value, None).unwrap();
        assert_eq!(result.kind, SerializerKind::Json);
        assert_eq!(result.serialized, r#"{"a":[1,2]}"#);
        assert_eq!(manager.deserialize(&result).unwrap(), value);
    }

    #[test]
    fn test_default_falls_back_to_best_fit() {
        let manager = SerializerManager::new();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        let result = manager.serialize(&Value::date(at), None).unwrap();
        assert_eq!(result.kind, SerializerKind::Date);

        let graph = Value::object([("at", Value::date(at))]);
        let result = manager.serialize(&graph, None).unwrap();
        assert_eq!(result.kind, SerializerKind::Composite);
        assert_eq!(manager.deserialize(&result).unwrap(), graph);
    }

    #[test]
    fn test_explicit_kind_must_handle_value() {
        let manager = SerializerManager::new();
        let err = manager
            .serialize(&Value::from(1i64), Some(&SerializerKind::Date))
            .unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");

        let result = manager
            .serialize(&Value::from("hi"), Some(&SerializerKind::Binary))
            .unwrap();
        assert_eq!(result.serialized, "aGk=");
    }

    #[test]
    fn test_priority_order() {
        let manager = SerializerManager::new();
        let kinds = manager.get_all_serializers();
        assert_eq!(kinds.first(), Some(&SerializerKind::Date));
        assert_eq!(kinds.last(), Some(&SerializerKind::Composite));

        let (kind, _) = manager.find_best_serializer(&Value::from("s")).unwrap();
        assert_eq!(kind, SerializerKind::String);
    }

    #[test]
    fn test_custom_serializer_registration() {
        struct Upper;
        impl ValueSerializer for Upper {
            fn name(&self) -> &str {
                "upper"
            }
            fn can_handle(&self, value: &Value) -> bool {
                value.as_str().is_some_and(|s| s == s.to_uppercase())
            }
            fn serialize(&self, value: &Value) -> Result<String> {
                Ok(value.as_str().unwrap_or_default().to_lowercase())
            }
            fn deserialize(&self, data: &str) -> Result<Value> {
                Ok(Value::from(data.to_uppercase()))
            }
        }

        let manager = SerializerManager::new();
        let kind = SerializerKind::from("upper");
        manager.register(kind.clone(), Arc::new(Upper));

        let result = manager.serialize(&Value::from("LOUD"), Some(&kind)).unwrap();
        assert_eq!(result.serialized, "loud");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""type":"upper""#));
        assert_eq!(manager.deserialize(&result).unwrap(), Value::from("LOUD"));

        manager.unregister(&kind);
        assert_eq!(manager.deserialize(&result).unwrap_err().code(), "UNKNOWN_CODEC");
    }
}
