/*!
Synchronization extension points.

Stowage does not talk to any network. A store can carry [`SyncOptions`] and
a [`SyncHook`]; the hook is called after each successful local write so an
external replicator can push the value somewhere else. Hook failures are
logged by the store and never undo the local write.
*/

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Result, Value};

/// How a replicator should settle a remote/local disagreement
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    LastWriteWins,
    LocalWins,
    RemoteWins,
    Manual,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SyncOptions {
    pub endpoint: Option<String>,
    /// Interval between background syncs, in milliseconds
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

impl SyncOptions {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ReplicationOptions {
    pub targets: Vec<String>,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

/// Called by a store after each write has reached its adapter
#[async_trait]
pub trait SyncHook: Send + Sync {
    /// `version` is the envelope version the value was written at.
    /// Return [`crate::StowageError::Sync`] on failure.
    async fn after_write(&self, key: &str, version: u32, value: &Value) -> Result<()>;
}
