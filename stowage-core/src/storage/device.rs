/*!
Append-only device log backend.

Every mutation appends one JSON line to the log file; the in-memory index is
rebuilt by replaying the log on open. [`DeviceBackend::compact`] rewrites the
log with one record per live key.
*/

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use stowage_retry::{with_backoff, BoxFuture, RetryError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::StorageBackend;
use crate::{Result, StowageError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogRecord {
    Set { key: String, value: String },
    Delete { key: String },
}

impl LogRecord {
    fn key(&self) -> &str {
        match self {
            LogRecord::Set { key, .. } | LogRecord::Delete { key } => key,
        }
    }
}

/// Record counts before and after a compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    pub records_before: usize,
    pub records_after: usize,
}

#[derive(Debug)]
pub struct DeviceBackend {
    path: PathBuf,
    index: RwLock<BTreeMap<String, String>>,
    records: AtomicUsize,
    // one appender or compactor at a time
    log_lock: tokio::sync::Mutex<()>,
}

impl DeviceBackend {
    /// Open a log, creating it if missing, and rebuild the index from it
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut index = BTreeMap::new();
        let mut records = 0;
        let mut skipped = 0;
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(LogRecord::Set { key, value }) => {
                    index.insert(key, value);
                }
                Ok(LogRecord::Delete { key }) => {
                    index.remove(&key);
                }
                Err(e) => {
                    // usually a torn final write
                    warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping unreadable log record");
                    skipped += 1;
                    continue;
                }
            }
            records += 1;
        }

        // appends must start on a fresh line
        if !contents.is_empty() && !contents.ends_with('\n') {
            let mut file = tokio::fs::OpenOptions::new().append(true).open(&path).await?;
            file.write_all(b"\n").await?;
            debug!(path = %path.display(), "Terminated unfinished final log line");
        }

        info!(
            path = %path.display(),
            records,
            skipped,
            keys = index.len(),
            "Opened device log"
        );
        Ok(Self {
            path,
            index: RwLock::new(index),
            records: AtomicUsize::new(records),
            log_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records currently in the log file, live or superseded
    pub fn record_count(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }

    /// Append one record; callers hold `log_lock` until the index matches the log
    async fn append_locked(&self, record: &LogRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = self.path.clone();
        with_backoff("device_append", move |_attempt| {
            let path = path.clone();
            let line = line.clone();
            let attempt: BoxFuture<'_, ()> = Box::pin(async move {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|e| RetryError::from_io("device_append", e))?;
                file.write_all(line.as_bytes())
                    .await
                    .map_err(|e| RetryError::from_io("device_append", e))?;
                file.sync_data()
                    .await
                    .map_err(|e| RetryError::from_io("device_append", e))?;
                Ok(())
            });
            attempt
        })
        .await
        .map_err(|e| StowageError::storage(record.key(), e.to_string()))?;

        self.records.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Rewrite the log with one `set` record per live key
    pub async fn compact(&self) -> Result<CompactionStats> {
        let _guard = self.log_lock.lock().await;
        let records_before = self.record_count();

        let mut contents = String::new();
        let snapshot: Vec<(String, String)> = self
            .index
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in snapshot {
            contents.push_str(&serde_json::to_string(&LogRecord::Set { key, value })?);
            contents.push('\n');
        }
        let records_after = contents.lines().count();

        let tmp = self.path.with_extension("compact");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        self.records.store(records_after, Ordering::SeqCst);

        info!(path = %self.path.display(), records_before, records_after, "Compacted device log");
        Ok(CompactionStats {
            records_before,
            records_after,
        })
    }
}

#[async_trait]
impl StorageBackend for DeviceBackend {
    fn name(&self) -> &str {
        "device"
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.index.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        let record = LogRecord::Set {
            key: key.to_string(),
            value: value.clone(),
        };
        let _guard = self.log_lock.lock().await;
        self.append_locked(&record).await?;
        self.index.write().insert(key.to_string(), value);
        debug!(key, "Appended set record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.log_lock.lock().await;
        if !self.index.read().contains_key(key) {
            return Ok(());
        }
        self.append_locked(&LogRecord::Delete {
            key: key.to_string(),
        })
        .await?;
        self.index.write().remove(key);
        debug!(key, "Appended delete record");
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.index.read().keys().cloned().collect())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.index.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_index_rebuilt_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("device/store.log");

        let backend = DeviceBackend::open(&path).await.unwrap();
        backend.write("a", "1".to_string()).await.unwrap();
        backend.write("b", "2".to_string()).await.unwrap();
        backend.write("a", "3".to_string()).await.unwrap();
        backend.delete("b").await.unwrap();
        assert_eq!(backend.record_count(), 4);
        drop(backend);

        let reopened = DeviceBackend::open(&path).await.unwrap();
        assert_eq!(reopened.keys().await.unwrap(), vec!["a".to_string()]);
        assert_eq!(reopened.read("a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(reopened.record_count(), 4);
    }

    #[tokio::test]
    async fn test_compact_keeps_live_keys() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.log");

        let backend = DeviceBackend::open(&path).await.unwrap();
        for i in 0..10 {
            backend.write("counter", i.to_string()).await.unwrap();
        }
        backend.write("gone", "x".to_string()).await.unwrap();
        backend.delete("gone").await.unwrap();

        let stats = backend.compact().await.unwrap();
        assert_eq!(
            stats,
            CompactionStats {
                records_before: 12,
                records_after: 1
            }
        );

        backend.write("after", "y".to_string()).await.unwrap();
        drop(backend);

        let reopened = DeviceBackend::open(&path).await.unwrap();
        assert_eq!(reopened.read("counter").await.unwrap().as_deref(), Some("9"));
        assert_eq!(reopened.read("after").await.unwrap().as_deref(), Some("y"));
        assert_eq!(reopened.record_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writes_during_compaction_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.log");
        let backend = std::sync::Arc::new(DeviceBackend::open(&path).await.unwrap());

        let writers: Vec<_> = (0..8)
            .map(|w| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    for i in 0..20 {
                        backend.write(&format!("w{w}-{i}"), i.to_string()).await?;
                        backend.write("shared", format!("{w}-{i}")).await?;
                    }
                    Ok::<_, StowageError>(())
                })
            })
            .collect();
        let compactor = {
            let backend = backend.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    backend.compact().await?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, StowageError>(())
            })
        };
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        compactor.await.unwrap().unwrap();

        let in_memory_shared = backend.read("shared").await.unwrap();
        let in_memory_keys = backend.keys().await.unwrap();
        drop(backend);

        let reopened = DeviceBackend::open(&path).await.unwrap();
        assert_eq!(reopened.keys().await.unwrap(), in_memory_keys);
        assert_eq!(in_memory_keys.len(), 8 * 20 + 1);
        assert_eq!(reopened.read("shared").await.unwrap(), in_memory_shared);
    }

    #[tokio::test]
    async fn test_torn_final_record_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.log");
        std::fs::write(
            &path,
            "{\"op\":\"set\",\"key\":\"ok\",\"value\":\"1\"}\n{\"op\":\"set\",\"ke",
        )
        .unwrap();

        let backend = DeviceBackend::open(&path).await.unwrap();
        assert_eq!(backend.keys().await.unwrap(), vec!["ok".to_string()]);

        backend.write("next", "2".to_string()).await.unwrap();
        drop(backend);
        let reopened = DeviceBackend::open(&path).await.unwrap();
        assert_eq!(reopened.read("next").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_deleting_missing_key_appends_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let backend = DeviceBackend::open(temp_dir.path().join("store.log"))
            .await
            .unwrap();
        backend.delete("never-written").await.unwrap();
        assert_eq!(backend.record_count(), 0);
    }
}
