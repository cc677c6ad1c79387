/*!
# Stowage Core Engine

Pluggable key-value persistence: versioned stores with migrations, on top of
interchangeable storage adapters that run an optional
serialize → compress → encrypt pipeline.

This crate provides:

- A dynamic [`Value`] model that keeps dates, regular expressions, maps,
  sets, byte buffers and shared (even cyclic) nodes
- Serializer, compressor and cipher registries with configurable defaults
- Storage adapters over in-memory, browser-style, append-only log and
  record-directory backends, with key prefixes, TTL envelopes and size limits
- [`PersistentStore`]: one versioned value with migration on load and
  debounced or throttled saves
- [`MigrationManager`]: forward and rollback migration chains

The ciphers in [`encryption`] are weak and only obscure data at rest. Do not
rely on them for confidentiality.

## Architecture

Codecs and backends are adapters behind traits:
- [`serialization::ValueSerializer`], [`compression::Compressor`] and
  [`encryption::Encryptor`] are pure string transforms held by kind-keyed
  managers
- [`storage::StorageBackend`] is a raw string store; [`storage::PipelineAdapter`]
  turns any backend into a [`StorageAdapter`]
- [`StorageContext`] wires the managers and named adapters together from a
  [`StowageConfig`]; there is no global state

## Usage

```rust,no_run
use std::sync::Arc;
use std::time::Duration;
use stowage_core::storage::{AdapterOptions, MemoryBackend, MemoryStorage};
use stowage_core::{Migration, PersistentStore, SaveOptions, StoreOptions, Value};

# async fn run() -> stowage_core::Result<()> {
let adapter = Arc::new(MemoryStorage::with_options(
    MemoryBackend::new(),
    AdapterOptions::default().with_prefix("cart:"),
));

let options = StoreOptions::new(2)
    .with_migration(Migration::new(1, Ok))
    .with_migration(Migration::new(2, |data| Ok(Value::object([("items", data)]))));
let cart: PersistentStore<Value> = PersistentStore::new(adapter, "state", options);

cart.save_with(
    &Value::object([("items", Value::Array(vec![]))]),
    SaveOptions::debounce(Duration::from_millis(200)),
)
.await?;
cart.flush().await?;
let restored = cart.load().await?;
# Ok(())
# }
```
*/

pub mod clock;
pub mod compression;
pub mod config;
pub mod context;
pub mod encryption;
pub mod error;
pub mod manager;
pub mod migration;
pub mod observability;
mod registry;
pub mod serialization;
pub mod storage;
pub mod store;
pub mod sync;
pub mod value;


pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionKind, CompressionManager, CompressionResult, Compressor};
pub use config::{AdapterConfig, BackendKind, StowageConfig};
pub use context::{CodecRegistries, StorageContext};
pub use encryption::{EncryptionKind, EncryptionManager, EncryptionResult, Encryptor};
pub use error::{Result, StowageError};
pub use manager::StorageManager;
pub use migration::{Migration, MigrationContext, MigrationManager, MigrationRecord};
pub use observability::{init_default_observability, init_observability};
pub use serialization::{SerializationResult, SerializerKind, SerializerManager, ValueSerializer};
pub use storage::{CacheEntry, StorageAdapter, StorageAdapterExt};
pub use store::{PersistentStore, SaveOptions, StoreOptions};
pub use sync::{ReplicationOptions, SyncHook, SyncOptions};
pub use value::{SharedValue, Value};

#[cfg(feature = "metrics")]
pub use observability::StowageMetrics;
