/*!
Composite serializer for arbitrary value graphs.

Every leaf is written as `{"__type": <serializer>, "value": <serialized>}`
using the first leaf serializer that handles it. Containers are tagged
structurally as `array`, `object`, `map` or `set`, with their children
encoded recursively. Shared nodes are followed; a node that is reached again
while it is still being encoded is a cycle and fails fast.
*/

use once_cell::sync::Lazy;
use serde_json::{json, Map as JsonMap};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::primitives::{
    ArrayBufferSerializer, BooleanSerializer, DateSerializer, JsonSerializer, NumberSerializer,
    RegExpSerializer, StringSerializer,
};
use super::ValueSerializer;
use crate::value::MAX_DEPTH;
use crate::{Result, StowageError, Value};

const TYPE_TAG: &str = "__type";
const VALUE_TAG: &str = "value";

static DEFAULT_COMPOSITE: Lazy<CompositeSerializer> = Lazy::new(CompositeSerializer::new);

/// Encode a value as a composite tagged tree with the default leaf serializers
pub fn encode_tree(value: &Value) -> Result<serde_json::Value> {
    DEFAULT_COMPOSITE.encode(value)
}

/// Decode a composite tagged tree with the default leaf serializers
pub fn decode_tree(tree: &serde_json::Value) -> Result<Value> {
    DEFAULT_COMPOSITE.decode(tree)
}

/// Serializer that walks containers and delegates leaves
#[derive(Clone)]
pub struct CompositeSerializer {
    leaves: Vec<Arc<dyn ValueSerializer>>,
    fallback: Arc<dyn ValueSerializer>,
}

impl Default for CompositeSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompositeSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.leaves.iter().map(|s| s.name()).collect();
        f.debug_struct("CompositeSerializer")
            .field("leaves", &names)
            .finish()
    }
}

struct Walk {
    nodes: Vec<usize>,
    path: Vec<String>,
}

impl Walk {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            path: vec!["$".to_string()],
        }
    }

    fn render(&self) -> String {
        self.path.concat()
    }
}

impl CompositeSerializer {
    /// Composite over the built-in leaf serializers
    pub fn new() -> Self {
        Self::with_leaves(vec![
            Arc::new(DateSerializer),
            Arc::new(RegExpSerializer),
            Arc::new(ArrayBufferSerializer),
            Arc::new(StringSerializer),
            Arc::new(NumberSerializer),
            Arc::new(BooleanSerializer),
        ])
    }

    /// Composite trying the given leaf serializers in order
    pub fn with_leaves(leaves: Vec<Arc<dyn ValueSerializer>>) -> Self {
        Self {
            leaves,
            fallback: Arc::new(JsonSerializer),
        }
    }

    /// Encode a value as a tagged JSON tree
    pub fn encode(&self, value: &Value) -> Result<serde_json::Value> {
        let mut walk = Walk::new();
        self.encode_inner(value, &mut walk, 0)
    }

    /// Decode a tagged JSON tree
    pub fn decode(&self, tree: &serde_json::Value) -> Result<Value> {
        self.decode_inner(tree, 0)
    }

    fn encode_inner(
        &self,
        value: &Value,
        walk: &mut Walk,
        depth: usize,
    ) -> Result<serde_json::Value> {
        if depth > MAX_DEPTH {
            return Err(StowageError::serialization(
                "composite",
                format!("nesting deeper than {MAX_DEPTH} levels at {}", walk.render()),
            ));
        }

        match value {
            Value::Array(items) => {
                let encoded = self.encode_items(items, walk, depth)?;
                Ok(tagged("array", serde_json::Value::Array(encoded)))
            }
            Value::Set(items) => {
                let encoded = self.encode_items(items, walk, depth)?;
                Ok(tagged("set", serde_json::Value::Array(encoded)))
            }
            Value::Object(map) => {
                let mut encoded = JsonMap::new();
                for (key, child) in map {
                    walk.path.push(format!(".{key}"));
                    let child = self.encode_inner(child, walk, depth + 1);
                    walk.path.pop();
                    encoded.insert(key.clone(), child?);
                }
                Ok(tagged("object", serde_json::Value::Object(encoded)))
            }
            Value::Map(entries) => {
                let mut encoded = Vec::with_capacity(entries.len());
                for (index, (key, child)) in entries.iter().enumerate() {
                    walk.path.push(format!("<key {index}>"));
                    let key = self.encode_inner(key, walk, depth + 2);
                    walk.path.pop();
                    walk.path.push(format!("<value {index}>"));
                    let child = self.encode_inner(child, walk, depth + 2);
                    walk.path.pop();
                    encoded.push(serde_json::Value::Array(vec![key?, child?]));
                }
                Ok(tagged("map", serde_json::Value::Array(encoded)))
            }
            Value::Shared(node) => {
                if walk.nodes.contains(&node.id()) {
                    return Err(StowageError::CyclicStructure { path: walk.render() });
                }
                walk.nodes.push(node.id());
                let encoded = self.encode_inner(&node.get(), walk, depth + 1);
                walk.nodes.pop();
                encoded
            }
            leaf => self.encode_leaf(leaf),
        }
    }

    fn encode_items(
        &self,
        items: &[Value],
        walk: &mut Walk,
        depth: usize,
    ) -> Result<Vec<serde_json::Value>> {
        let mut encoded = Vec::with_capacity(items.len());
        for (index, child) in items.iter().enumerate() {
            walk.path.push(format!("[{index}]"));
            let child = self.encode_inner(child, walk, depth + 1);
            walk.path.pop();
            encoded.push(child?);
        }
        Ok(encoded)
    }

    fn encode_leaf(&self, value: &Value) -> Result<serde_json::Value> {
        let serializer = self
            .leaves
            .iter()
            .find(|s| s.can_handle(value))
            .unwrap_or(&self.fallback);
        let serialized = serializer.serialize(value)?;
        Ok(tagged(serializer.name(), serde_json::Value::String(serialized)))
    }

    fn decode_inner(&self, tree: &serde_json::Value, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(StowageError::serialization(
                "composite",
                format!("nesting deeper than {MAX_DEPTH} levels"),
            ));
        }

        let (tag, inner) = untag(tree)?;
        match (tag, inner) {
            ("array", serde_json::Value::Array(items)) => Ok(Value::Array(
                self.decode_items(items, depth)?,
            )),
            ("set", serde_json::Value::Array(items)) => {
                Ok(Value::Set(self.decode_items(items, depth)?))
            }
            ("object", serde_json::Value::Object(map)) => {
                let mut decoded = BTreeMap::new();
                for (key, child) in map {
                    decoded.insert(key.clone(), self.decode_inner(child, depth + 1)?);
                }
                Ok(Value::Object(decoded))
            }
            ("map", serde_json::Value::Array(entries)) => {
                let mut decoded = Vec::with_capacity(entries.len());
                for entry in entries {
                    match entry.as_array().map(Vec::as_slice) {
                        Some([key, child]) => decoded.push((
                            self.decode_inner(key, depth + 2)?,
                            self.decode_inner(child, depth + 2)?,
                        )),
                        _ => {
                            return Err(StowageError::serialization(
                                "composite",
                                "map entry is not a [key, value] pair",
                            ))
                        }
                    }
                }
                Ok(Value::Map(decoded))
            }
            (name, serde_json::Value::String(serialized)) => {
                let serializer = self
                    .leaves
                    .iter()
                    .chain(std::iter::once(&self.fallback))
                    .find(|s| s.name() == name)
                    .ok_or_else(|| {
                        StowageError::serialization(
                            "composite",
                            format!("unknown type tag '{name}'"),
                        )
                    })?;
                serializer.deserialize(serialized)
            }
            (name, _) => Err(StowageError::serialization(
                "composite",
                format!("malformed payload for type tag '{name}'"),
            )),
        }
    }

    fn decode_items(&self, items: &[serde_json::Value], depth: usize) -> Result<Vec<Value>> {
        items
            .iter()
            .map(|child| self.decode_inner(child, depth + 1))
            .collect()
    }
}

fn tagged(name: &str, value: serde_json::Value) -> serde_json::Value {
    json!({ TYPE_TAG: name, VALUE_TAG: value })
}

fn untag(tree: &serde_json::Value) -> Result<(&str, &serde_json::Value)> {
    let tag = tree.get(TYPE_TAG).and_then(serde_json::Value::as_str);
    let inner = tree.get(VALUE_TAG);
    match (tag, inner) {
        (Some(tag), Some(inner)) => Ok((tag, inner)),
        _ => Err(StowageError::serialization(
            "composite",
            "node is missing its __type/value tags",
        )),
    }
}

impl ValueSerializer for CompositeSerializer {
    fn name(&self) -> &str {
        "composite"
    }

    /// Anything without cycles and within the depth limit
    fn can_handle(&self, value: &Value) -> bool {
        self.encode(value).is_ok()
    }

    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(&self.encode(value)?)?)
    }

    fn deserialize(&self, data: &str) -> Result<Value> {
        let tree: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| StowageError::serialization("composite", e.to_string()))?;
        self.decode(&tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SharedValue;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    fn sample_graph() -> Value {
        let created = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        Value::object([
            ("id", Value::from(7i64)),
            ("label", Value::from("café ☕")),
            ("created", Value::date(created)),
            ("filter", Value::regexp("^job-\\d+$", "i")),
            ("avatar", Value::Bytes(Bytes::from_static(&[1, 2, 3, 254]))),
            ("nothing", Value::Null),
            (
                "lookup",
                Value::Map(vec![
                    (Value::from(1i64), Value::date(created)),
                    (
                        Value::object([("nested", Value::from(true))]),
                        Value::Set(vec![Value::from("x"), Value::from(2.5)]),
                    ),
                ]),
            ),
            (
                "history",
                Value::Array(vec![Value::from(false), Value::Array(vec![])]),
            ),
        ])
    }

    #[test]
    fn test_graph_round_trip() {
        let serializer = CompositeSerializer::new();
        let value = sample_graph();

        let encoded = serializer.serialize(&value).unwrap();
        let decoded = serializer.deserialize(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_leaf_tags() {
        let tree = encode_tree(&Value::object([
            ("n", Value::from(3i64)),
            ("s", Value::from("3")),
            ("z", Value::Null),
        ]))
        .unwrap();

        assert_eq!(tree["__type"], "object");
        assert_eq!(tree["value"]["n"], json!({"__type": "number", "value": "3"}));
        assert_eq!(tree["value"]["s"], json!({"__type": "string", "value": "3"}));
        assert_eq!(tree["value"]["z"], json!({"__type": "json", "value": "null"}));
    }

    #[test]
    fn test_cycle_fails_fast_with_path() {
        let node = SharedValue::new(Value::Null);
        node.set(Value::object([(
            "children",
            Value::Array(vec![Value::Shared(node.clone())]),
        )]));

        let err = encode_tree(&Value::Shared(node.clone())).unwrap_err();
        match err {
            StowageError::CyclicStructure { path } => assert_eq!(path, "$.children[0]"),
            other => panic!("Expected CyclicStructure, got {other:?}"),
        }
        assert!(!CompositeSerializer::new().can_handle(&Value::Shared(node.clone())));

        node.set(Value::Null);
    }

    #[test]
    fn test_aliases_are_copied() {
        let shared = Value::shared(Value::from("same"));
        let value = Value::Array(vec![shared.clone(), shared]);

        let decoded = decode_tree(&encode_tree(&value).unwrap()).unwrap();
        assert_eq!(
            decoded,
            Value::Array(vec![Value::from("same"), Value::from("same")])
        );
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Value::from(0i64);
        for _ in 0..(MAX_DEPTH + 5) {
            value = Value::Array(vec![value]);
        }
        let err = encode_tree(&value).unwrap_err();
        assert_eq!(err.code(), "SERIALIZATION_ERROR");
    }

    #[test]
    fn test_deepest_allowed_tree_parses() {
        let mut value = Value::from("leaf");
        for _ in 0..MAX_DEPTH {
            value = Value::Array(vec![value]);
        }
        let serializer = CompositeSerializer::new();
        let encoded = serializer.serialize(&value).unwrap();
        assert_eq!(serializer.deserialize(&encoded).unwrap(), value);
    }

    #[test]
    fn test_malformed_trees_are_rejected() {
        assert!(decode_tree(&json!({"value": "1"})).is_err());
        assert!(decode_tree(&json!({"__type": "mystery", "value": "1"})).is_err());
        assert!(decode_tree(&json!({"__type": "map", "value": [[1]]})).is_err());
        assert!(decode_tree(&json!({"__type": "array", "value": "oops"})).is_err());
    }
}
