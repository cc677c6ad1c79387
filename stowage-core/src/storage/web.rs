/*!
Browser-style storage areas.

A local area and a session area behave the same way: a flat string map
with an area-wide quota. The session area lives as long as the process. The
local area can be mirrored to a JSON file so it survives restarts.
*/

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::StorageBackend;
use crate::{Result, StowageError};

/// Default area quota, 5 MiB
pub const DEFAULT_AREA_QUOTA: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    Local,
    Session,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Local => "local",
            StorageArea::Session => "session",
        }
    }
}

#[derive(Debug)]
pub struct WebStorageBackend {
    area: StorageArea,
    data: RwLock<BTreeMap<String, String>>,
    quota: usize,
    mirror: Option<PathBuf>,
    // one mutation at a time, so mirror snapshots land in order
    mirror_lock: tokio::sync::Mutex<()>,
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

impl WebStorageBackend {
    fn with_area(area: StorageArea, data: BTreeMap<String, String>, mirror: Option<PathBuf>) -> Self {
        Self {
            area,
            data: RwLock::new(data),
            quota: DEFAULT_AREA_QUOTA,
            mirror,
            mirror_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Local area kept in memory only
    pub fn local() -> Self {
        Self::with_area(StorageArea::Local, BTreeMap::new(), None)
    }

    /// Local area mirrored to a JSON file, loading what the file holds
    pub async fn local_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                StowageError::storage("", format!("corrupt local area file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), keys = data.len(), "Opened local storage area");
        Ok(Self::with_area(StorageArea::Local, data, Some(path)))
    }

    /// Session area, gone when the process exits
    pub fn session() -> Self {
        Self::with_area(StorageArea::Session, BTreeMap::new(), None)
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    pub fn area(&self) -> StorageArea {
        self.area
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    /// Bytes in use: every key plus every value
    pub fn usage(&self) -> usize {
        self.data
            .read()
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum()
    }

    /// Write the area as it will look after a change; callers hold `mirror_lock`
    async fn write_mirror(&self, next: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = &self.mirror else {
            return Ok(());
        };
        let snapshot = serde_json::to_string(next)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, snapshot).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Mirrored local storage area");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for WebStorageBackend {
    fn name(&self) -> &str {
        self.area.as_str()
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        // the map only changes once the mirror holds the new state
        let _guard = self.mirror_lock.lock().await;
        let next = {
            let data = self.data.read();
            let current: usize = data.iter().map(|(k, v)| entry_size(k, v)).sum();
            let replaced = data.get(key).map_or(0, |old| entry_size(key, old));
            let projected = current - replaced + entry_size(key, &value);
            if projected > self.quota {
                return Err(StowageError::QuotaExceeded {
                    key: key.to_string(),
                    size: projected,
                    limit: self.quota,
                });
            }
            self.mirror.as_ref().map(|_| {
                let mut next = (*data).clone();
                next.insert(key.to_string(), value.clone());
                next
            })
        };
        if let Some(next) = &next {
            self.write_mirror(next).await?;
        }
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.mirror_lock.lock().await;
        let next = {
            let data = self.data.read();
            if !data.contains_key(key) {
                return Ok(());
            }
            self.mirror.as_ref().map(|_| {
                let mut next = (*data).clone();
                next.remove(key);
                next
            })
        };
        if let Some(next) = &next {
            self.write_mirror(next).await?;
        }
        self.data.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.data.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_area_quota() {
        let backend = WebStorageBackend::session().with_quota(16);
        backend.write("k", "12345".to_string()).await.unwrap();
        assert_eq!(backend.usage(), 6);

        let err = backend.write("other", "1234567890".to_string()).await.unwrap_err();
        match err {
            StowageError::QuotaExceeded { key, size, limit } => {
                assert_eq!(key, "other");
                assert_eq!(size, 21);
                assert_eq!(limit, 16);
            }
            other => panic!("Expected QuotaExceeded, got {other:?}"),
        }

        // replacing a value only counts the difference
        backend.write("k", "123456789012345".to_string()).await.unwrap();
        assert_eq!(backend.usage(), 16);
    }

    #[tokio::test]
    async fn test_local_area_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("areas/local.json");

        let backend = WebStorageBackend::local_at(&path).await.unwrap();
        backend.write("theme", "\"dark\"".to_string()).await.unwrap();
        backend.write("gone", "1".to_string()).await.unwrap();
        backend.delete("gone").await.unwrap();
        drop(backend);

        let reopened = WebStorageBackend::local_at(&path).await.unwrap();
        assert_eq!(reopened.keys().await.unwrap(), vec!["theme".to_string()]);
        assert_eq!(reopened.read("theme").await.unwrap().as_deref(), Some("\"dark\""));
    }

    #[tokio::test]
    async fn test_failed_mirror_write_leaves_area_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("areas/local.json");
        let backend = WebStorageBackend::local_at(&path).await.unwrap();
        backend.write("theme", "\"dark\"".to_string()).await.unwrap();

        // a directory where the temp file goes makes every mirror write fail
        let blocker = path.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(backend.write("theme", "\"light\"".to_string()).await.is_err());
        assert!(backend.write("lang", "\"en\"".to_string()).await.is_err());
        assert!(backend.delete("theme").await.is_err());
        assert_eq!(backend.keys().await.unwrap(), vec!["theme".to_string()]);
        assert_eq!(backend.read("theme").await.unwrap().as_deref(), Some("\"dark\""));

        std::fs::remove_dir(&blocker).unwrap();
        backend.write("lang", "\"en\"".to_string()).await.unwrap();
        drop(backend);

        let reopened = WebStorageBackend::local_at(&path).await.unwrap();
        assert_eq!(
            reopened.keys().await.unwrap(),
            vec!["lang".to_string(), "theme".to_string()]
        );
        assert_eq!(reopened.read("theme").await.unwrap().as_deref(), Some("\"dark\""));
    }

    #[tokio::test]
    async fn test_corrupt_mirror_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("local.json");
        std::fs::write(&path, "not json").unwrap();

        let err = WebStorageBackend::local_at(&path).await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
