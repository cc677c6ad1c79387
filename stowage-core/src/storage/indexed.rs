/*!
Indexed record-file backend.

Stores one record file per key in a directory. File names are the SHA-256
of the key, so any key is a safe file name; the record keeps the original
key so the directory can be listed.
*/

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use stowage_retry::{with_backoff, BoxFuture, RetryError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::StorageBackend;
use crate::{Result, StowageError};

const RECORD_EXTENSION: &str = "rec";

#[derive(Serialize, Deserialize, Debug)]
struct Record {
    key: String,
    value: String,
}

/// Directory of record files
#[derive(Debug, Clone)]
pub struct IndexedBackend {
    base_dir: PathBuf,
}

impl IndexedBackend {
    /// Open a record directory, creating it if necessary
    pub async fn open<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir).await.map_err(|e| {
            StowageError::storage(
                "",
                format!("Failed to create directory {}: {e}", base_dir.display()),
            )
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the record file for a key
    fn resolve_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.base_dir.join(format!("{name}.{RECORD_EXTENSION}"))
    }

    async fn read_record(path: &Path) -> Result<Option<Record>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for IndexedBackend {
    fn name(&self) -> &str {
        "indexed"
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let full_path = self.resolve_path(key);
        let record = Self::read_record(&full_path).await.map_err(|e| {
            StowageError::storage(
                key,
                format!("Failed to read record from {}: {e}", full_path.display()),
            )
        })?;

        match record {
            Some(record) if record.key == key => Ok(Some(record.value)),
            Some(record) => Err(StowageError::storage(
                key,
                format!("record file holds key '{}'", record.key),
            )),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, value: String) -> Result<()> {
        let full_path = self.resolve_path(key);
        let contents = serde_json::to_string(&Record {
            key: key.to_string(),
            value,
        })?;

        with_backoff("indexed_write", move |_attempt| {
            let full_path = full_path.clone();
            let contents = contents.clone();
            let attempt: BoxFuture<'_, ()> = Box::pin(async move {
                // write then rename, so readers never see a partial record;
                // each attempt gets its own temp file so writers of one key
                // never share it
                let tmp = full_path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
                let written = match tokio::fs::write(&tmp, contents).await {
                    Ok(()) => tokio::fs::rename(&tmp, &full_path).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(RetryError::from_io("indexed_write", e));
                }
                Ok(())
            });
            attempt
        })
        .await
        .map_err(|e| StowageError::storage(key, e.to_string()))?;

        debug!(key, "Wrote record file");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_path(key);
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StowageError::storage(
                key,
                format!("Failed to delete record {}: {e}", full_path.display()),
            )),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) => keys.push(record.key),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record file")
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve_path(key)).await?)
    }
}
