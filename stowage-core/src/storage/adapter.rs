/*!
Generic adapter over a raw backend.
*/

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{CacheEntry, CodecPipeline, StorageAdapter, StorageBackend};
use crate::clock::{Clock, SystemClock};
use crate::observability::OperationTimer;
use crate::{Result, StowageError, Value};

/// Per-adapter policy: key prefix, TTL, size limit and codec pipeline
#[derive(Clone)]
pub struct AdapterOptions {
    pub name: Option<String>,
    pub prefix: String,
    /// Default TTL; when set every value is written in a [`CacheEntry`]
    pub ttl: Option<Duration>,
    /// Largest encoded payload accepted, in bytes
    pub max_size: Option<usize>,
    pub pipeline: CodecPipeline,
    pub clock: Arc<dyn Clock>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            name: None,
            prefix: String::new(),
            ttl: None,
            max_size: None,
            pipeline: CodecPipeline::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for AdapterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterOptions")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl AdapterOptions {
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_pipeline(mut self, pipeline: CodecPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// [`StorageAdapter`] over any [`StorageBackend`]
pub struct PipelineAdapter<B> {
    backend: Arc<B>,
    options: AdapterOptions,
    name: String,
}

impl<B: StorageBackend> PipelineAdapter<B> {
    /// Adapter with no prefix, no TTL and plain JSON payloads
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, AdapterOptions::default())
    }

    pub fn with_options(backend: B, options: AdapterOptions) -> Self {
        Self::from_shared(Arc::new(backend), options)
    }

    /// Adapter over a backend that other adapters may also use
    pub fn from_shared(backend: Arc<B>, options: AdapterOptions) -> Self {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| backend.name().to_string());
        Self {
            backend,
            options,
            name,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    pub fn prefix(&self) -> &str {
        &self.options.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.options.prefix, key)
    }

    async fn write_value(&self, key: &str, value: Value) -> Result<()> {
        let full_key = self.full_key(key);
        let timer = OperationTimer::start(&self.name, "write");

        let outcome = async {
            let payload = self.options.pipeline.encode(&value)?;
            if let Some(limit) = self.options.max_size {
                if payload.len() > limit {
                    return Err(StowageError::QuotaExceeded {
                        key: key.to_string(),
                        size: payload.len(),
                        limit,
                    });
                }
            }
            let size = payload.len();
            self.backend.write(&full_key, payload).await?;
            Ok(size)
        }
        .await
        .map_err(|e| e.for_key(key));

        match outcome {
            Ok(size) => {
                timer.finish(Some(size));
                debug!(adapter = %self.name, key, size, "Stored value");
                Ok(())
            }
            Err(e) => {
                timer.finish_with_error();
                error!(adapter = %self.name, key, error = %e, "Failed to store value");
                Err(e)
            }
        }
    }

    async fn read_value(&self, key: &str) -> Result<Option<Value>> {
        let full_key = self.full_key(key);
        let Some(payload) = self.backend.read(&full_key).await? else {
            return Ok(None);
        };
        let value = self.options.pipeline.decode(&payload)?;

        if self.options.ttl.is_none() {
            return Ok(Some(value));
        }
        match CacheEntry::from_value(value) {
            Ok(entry) => {
                if entry.is_live(self.options.clock.now_ms(), self.options.ttl) {
                    return Ok(Some(entry.value));
                }
                debug!(adapter = %self.name, key, "Entry expired, removing");
                if let Err(e) = self.backend.delete(&full_key).await {
                    warn!(adapter = %self.name, key, error = %e, "Failed to remove expired entry");
                }
                Ok(None)
            }
            // written before the adapter had a TTL policy
            Err(raw) => Ok(Some(raw)),
        }
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> StorageAdapter for PipelineAdapter<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_get(&self, key: &str) -> Result<Option<Value>> {
        let timer = OperationTimer::start(&self.name, "read");
        match self.read_value(key).await {
            Ok(value) => {
                timer.finish(None);
                Ok(value)
            }
            Err(e) => {
                timer.finish_with_error();
                Err(e.for_key(key))
            }
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let value = match self.options.ttl {
            Some(_) => CacheEntry::new(value, self.options.clock.now_ms(), None).into_value(),
            None => value,
        };
        self.write_value(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        if self.options.ttl.is_none() {
            return Err(StowageError::validation(format!(
                "adapter '{}' has no TTL policy; configure a default TTL to use per-entry TTLs",
                self.name
            )));
        }
        let entry = CacheEntry::new(value, self.options.clock.now_ms(), Some(ttl));
        self.write_value(key, entry.into_value()).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let timer = OperationTimer::start(&self.name, "remove");
        match self.backend.delete(&self.full_key(key)).await {
            Ok(()) => {
                timer.finish(None);
                Ok(())
            }
            Err(e) => {
                timer.finish_with_error();
                let e = e.for_key(key);
                error!(adapter = %self.name, key, error = %e, "Failed to remove value");
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        let timer = OperationTimer::start(&self.name, "clear");
        let outcome = async {
            let mut removed = 0;
            for full_key in self.backend.keys().await? {
                if full_key.starts_with(&self.options.prefix) {
                    self.backend.delete(&full_key).await?;
                    removed += 1;
                }
            }
            Ok::<_, StowageError>(removed)
        }
        .await;

        match outcome {
            Ok(removed) => {
                timer.finish(None);
                debug!(adapter = %self.name, prefix = %self.options.prefix, removed, "Cleared adapter");
                Ok(())
            }
            Err(e) => {
                timer.finish_with_error();
                error!(adapter = %self.name, error = %e, "Failed to clear adapter");
                Err(e)
            }
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let prefix = &self.options.prefix;
        Ok(self
            .backend
            .keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        if self.options.ttl.is_some() {
            return Ok(self.try_get(key).await?.is_some());
        }
        self.backend
            .contains(&self.full_key(key))
            .await
            .map_err(|e| e.for_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryBackend, MemoryStorage, StorageAdapterExt};
    use serde::{Deserialize, Serialize};

    fn ttl_adapter(clock: &ManualClock) -> MemoryStorage {
        PipelineAdapter::with_options(
            MemoryBackend::new(),
            AdapterOptions::default()
                .with_ttl(Duration::from_millis(1_000))
                .with_clock(Arc::new(clock.clone())),
        )
    }

    #[tokio::test]
    async fn test_ttl_liveness() {
        let clock = ManualClock::new(10_000);
        let adapter = ttl_adapter(&clock);
        adapter.set("session", Value::from("token")).await.unwrap();

        clock.advance(Duration::from_millis(500));
        assert_eq!(adapter.get("session").await, Some(Value::from("token")));

        clock.advance(Duration::from_millis(1_000));
        assert_eq!(adapter.get("session").await, None);
        assert!(!adapter.has("session").await.unwrap());
        // the stale payload was removed on read
        assert!(adapter.backend().is_empty());
    }

    #[tokio::test]
    async fn test_per_entry_ttl() {
        let clock = ManualClock::new(0);
        let adapter = ttl_adapter(&clock);
        adapter
            .set_with_ttl("short", Value::from(1i64), Duration::from_millis(100))
            .await
            .unwrap();
        adapter.set("long", Value::from(2i64)).await.unwrap();

        clock.advance(Duration::from_millis(200));
        assert!(!adapter.has("short").await.unwrap());
        assert!(adapter.has("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_with_ttl_requires_policy() {
        let adapter = MemoryStorage::new(MemoryBackend::new());
        let err = adapter
            .set_with_ttl("k", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_prefix_isolation() {
        let backend = Arc::new(MemoryBackend::new());
        let cart = MemoryStorage::from_shared(
            backend.clone(),
            AdapterOptions::default().with_prefix("cart:"),
        );
        let auth = MemoryStorage::from_shared(
            backend.clone(),
            AdapterOptions::default().with_prefix("auth:"),
        );

        cart.set("items", Value::from(3i64)).await.unwrap();
        cart.set("total", Value::from(42i64)).await.unwrap();
        auth.set("token", Value::from("abc")).await.unwrap();
        assert_eq!(cart.keys().await.unwrap(), vec!["items", "total"]);

        cart.clear().await.unwrap();
        assert!(cart.keys().await.unwrap().is_empty());
        assert_eq!(auth.keys().await.unwrap(), vec!["token"]);
        assert_eq!(auth.get("token").await, Some(Value::from("abc")));
    }

    #[tokio::test]
    async fn test_max_size_rejects_before_write() {
        let adapter = MemoryStorage::with_options(
            MemoryBackend::new(),
            AdapterOptions::default().with_max_size(16),
        );
        let err = adapter
            .set("big", Value::from("x".repeat(64)))
            .await
            .unwrap_err();
        assert_eq!(err.key(), Some("big"));
        assert!(matches!(err, StowageError::QuotaExceeded { limit: 16, .. }));
        assert!(!adapter.has("big").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_degrades_corrupt_payload_to_none() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write("broken", "{not json".to_string()).await.unwrap();
        let adapter = MemoryStorage::from_shared(backend, AdapterOptions::default());

        assert!(adapter.try_get("broken").await.is_err());
        assert_eq!(adapter.get("broken").await, None);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Profile {
            name: String,
            skills: Vec<String>,
        }

        let adapter = MemoryStorage::new(MemoryBackend::new());
        let profile = Profile {
            name: "Ada".into(),
            skills: vec!["rust".into(), "sql".into()],
        };
        adapter.set_as("profile", &profile).await.unwrap();

        let restored: Option<Profile> = adapter.get_as("profile").await.unwrap();
        assert_eq!(restored, Some(profile));
        let missing: Option<Profile> = adapter.get_as("nobody").await.unwrap();
        assert!(missing.is_none());
    }
}
