/*!
Storage adapters.

Two layers live here. A [`StorageBackend`] is a raw string key-value store:
a hash map, a browser-style storage area, an append-only device log or a
directory of record files. A [`StorageAdapter`] is the uniform async contract
over [`Value`]s that stores and callers use; [`PipelineAdapter`] implements
it on top of any backend by adding a key prefix, the codec pipeline and TTL
envelopes.
*/

pub mod adapter;
pub mod device;
pub mod indexed;
pub mod memory;
pub mod pipeline;
pub mod web;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::{Result, Value};

pub use adapter::{AdapterOptions, PipelineAdapter};
pub use device::DeviceBackend;
pub use indexed::IndexedBackend;
pub use memory::MemoryBackend;
pub use pipeline::CodecPipeline;
pub use web::{StorageArea, WebStorageBackend, DEFAULT_AREA_QUOTA};

/// In-memory adapter; clones of the backend share their contents
pub type MemoryStorage = PipelineAdapter<MemoryBackend>;
/// Persistent browser-style storage area
pub type LocalStorage = PipelineAdapter<WebStorageBackend>;
/// Process-lifetime browser-style storage area
pub type SessionStorage = PipelineAdapter<WebStorageBackend>;
/// Append-only log file on the device
pub type DeviceStorage = PipelineAdapter<DeviceBackend>;
/// One record file per key
pub type IndexedStorage = PipelineAdapter<IndexedBackend>;

/// Raw string key-value store under an adapter
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name used in logs and metrics
    fn name(&self) -> &str;

    async fn read(&self, key: &str) -> Result<Option<String>>;

    async fn write(&self, key: &str, value: String) -> Result<()>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }
}

/// Uniform async key-value contract over [`Value`]s
///
/// Writes are last-write-wins; nothing locks across operations.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Adapter name used in logs and metrics
    fn name(&self) -> &str;

    /// Read a key. Expired entries read as `None`.
    async fn try_get(&self, key: &str) -> Result<Option<Value>>;

    /// Read a key, logging failures and degrading them to `None`
    async fn get(&self, key: &str) -> Option<Value> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(adapter = self.name(), key = key, error = %e, "Read failed, treating key as absent");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Write with a per-entry TTL overriding the adapter default
    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key this adapter owns
    async fn clear(&self) -> Result<()>;

    /// Keys this adapter owns, without its prefix
    async fn keys(&self) -> Result<Vec<String>>;

    /// Whether a live entry exists
    async fn has(&self, key: &str) -> Result<bool>;
}

/// Typed helpers over any adapter
#[async_trait]
pub trait StorageAdapterExt: StorageAdapter {
    /// Read a key and deserialize its JSON form into `T`
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.try_get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value.to_json()?)?)),
            None => Ok(None),
        }
    }

    async fn set_as<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let json = serde_json::to_value(value)?;
        self.set(key, Value::from(json)).await
    }
}

impl<A: StorageAdapter + ?Sized> StorageAdapterExt for A {}

/// TTL envelope around a stored value
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry<T = Value> {
    pub value: T,
    /// Write time, epoch milliseconds
    pub timestamp: i64,
    /// Per-entry TTL in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, timestamp: i64, ttl: Option<Duration>) -> Self {
        Self {
            value,
            timestamp,
            ttl: ttl.map(ttl_millis),
        }
    }

    /// Live iff `now - timestamp <= (entry ttl ?? default ttl)`; no TTL at
    /// all means live forever
    pub fn is_live(&self, now_ms: i64, default_ttl: Option<Duration>) -> bool {
        let ttl = self.ttl.or_else(|| default_ttl.map(ttl_millis));
        match ttl {
            Some(ttl) => {
                now_ms.saturating_sub(self.timestamp) <= i64::try_from(ttl).unwrap_or(i64::MAX)
            }
            None => true,
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

impl CacheEntry<Value> {
    /// The entry as an object value, ready for the codec pipeline
    pub fn into_value(self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("value".to_string(), self.value);
        map.insert("timestamp".to_string(), Value::from(self.timestamp));
        if let Some(ttl) = self.ttl {
            map.insert("ttl".to_string(), Value::from(ttl));
        }
        Value::Object(map)
    }

    /// Recognize an entry written by [`CacheEntry::into_value`]; anything
    /// else is handed back unchanged
    pub fn from_value(value: Value) -> std::result::Result<Self, Value> {
        let recognized = match &value {
            Value::Object(map) => {
                map.keys()
                    .all(|k| matches!(k.as_str(), "value" | "timestamp" | "ttl"))
                    && map.contains_key("value")
                    && map.get("timestamp").and_then(Value::as_i64).is_some()
                    && map.get("ttl").map_or(true, |ttl| ttl.as_u64().is_some())
            }
            _ => false,
        };
        if !recognized {
            return Err(value);
        }

        let Value::Object(mut map) = value else {
            return Err(value);
        };
        let timestamp = map.get("timestamp").and_then(Value::as_i64).unwrap_or_default();
        let ttl = map.get("ttl").and_then(Value::as_u64);
        let value = map.remove("value").unwrap_or_default();
        Ok(Self {
            value,
            timestamp,
            ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_boundaries() {
        let entry = CacheEntry::new(Value::from("v"), 1_000, None);
        let ttl = Some(Duration::from_millis(1_000));

        assert!(entry.is_live(1_500, ttl));
        assert!(entry.is_live(2_000, ttl));
        assert!(!entry.is_live(2_001, ttl));
        assert!(entry.is_live(1_000_000, None));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let entry = CacheEntry::new(Value::from("v"), 1_000, Some(Duration::MAX));
        assert!(entry.is_live(i64::MAX, None));

        let entry = CacheEntry::new(Value::from("v"), 1_000, None);
        assert!(entry.is_live(1_000 + (1 << 40), Some(Duration::from_millis(1 << 63))));
    }

    #[test]
    fn test_entry_ttl_overrides_default() {
        let entry = CacheEntry::new(Value::from("v"), 0, Some(Duration::from_millis(100)));
        assert!(!entry.is_live(500, Some(Duration::from_secs(60))));
    }

    #[test]
    fn test_entry_value_round_trip() {
        let entry = CacheEntry::new(Value::from(42i64), 7, Some(Duration::from_millis(30)));
        let restored = CacheEntry::from_value(entry.clone().into_value()).unwrap();
        assert_eq!(restored, entry);

        let plain = Value::object([("value", Value::from(1i64)), ("other", Value::Null)]);
        assert_eq!(CacheEntry::from_value(plain.clone()).unwrap_err(), plain);
    }
}
