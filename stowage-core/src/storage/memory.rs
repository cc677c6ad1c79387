/*!
In-memory backend.
*/

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::StorageBackend;
use crate::Result;

/// `HashMap` backend. Clones share the same map, so several adapters (for
/// example with different prefixes) can sit on one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, across every prefix
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_contents() {
        let backend = MemoryBackend::new();
        let other = backend.clone();

        backend.write("a", "1".to_string()).await.unwrap();
        assert_eq!(other.read("a").await.unwrap().as_deref(), Some("1"));
        assert!(other.contains("a").await.unwrap());

        other.delete("a").await.unwrap();
        other.delete("missing").await.unwrap();
        assert!(backend.is_empty());
    }
}
