/*!
The storage context: codec managers plus named adapters, built once.

```rust,no_run
use stowage_core::{StorageContext, StowageConfig, StoreOptions};

# async fn run() -> stowage_core::Result<()> {
let config = StowageConfig::from_json_file("stowage.json")?;
let context = StorageContext::from_config(&config).await?;

let store = context
    .storage()
    .create_store::<Vec<String>>("saved_jobs", None, StoreOptions::new(2))?;
store.save(&vec!["job-42".to_string()]).await?;
# Ok(())
# }
```
*/

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::compression::CompressionManager;
use crate::config::{AdapterConfig, BackendKind, StowageConfig};
use crate::encryption::EncryptionManager;
use crate::manager::StorageManager;
use crate::serialization::SerializerManager;
use crate::storage::{
    AdapterOptions, CodecPipeline, DeviceBackend, IndexedBackend, MemoryBackend, PipelineAdapter,
    StorageAdapter, WebStorageBackend, DEFAULT_AREA_QUOTA,
};
use crate::{Result, StowageError};

/// The three codec managers, shared by every adapter pipeline
#[derive(Clone)]
pub struct CodecRegistries {
    pub serializers: Arc<SerializerManager>,
    pub compressors: Arc<CompressionManager>,
    pub encryptors: Arc<EncryptionManager>,
}

impl std::fmt::Debug for CodecRegistries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistries")
            .field("serializers", &self.serializers.get_all_serializers())
            .field("compressors", &self.compressors.get_all_compressors())
            .field("encryptors", &self.encryptors.get_all_algorithms())
            .finish()
    }
}

impl Default for CodecRegistries {
    fn default() -> Self {
        Self {
            serializers: Arc::new(SerializerManager::new()),
            compressors: Arc::new(CompressionManager::new()),
            encryptors: Arc::new(EncryptionManager::new()),
        }
    }
}

impl CodecRegistries {
    /// Every built-in codec, with the given compression threshold
    pub fn with_threshold(threshold: usize) -> Self {
        let registries = Self::default();
        registries.compressors.set_threshold(threshold);
        registries
    }

    /// Pipeline for an adapter configuration; unknown codec kinds fail here
    pub fn pipeline_for(&self, config: &AdapterConfig) -> Result<CodecPipeline> {
        let mut pipeline = CodecPipeline::new();

        if let Some(kind) = &config.serializer {
            if self.serializers.get_serializer(kind).is_none() {
                return Err(unknown("serializer", kind));
            }
            pipeline = pipeline.with_serializer(self.serializers.clone(), Some(kind.clone()));
        }
        if let Some(kind) = &config.compression {
            if self.compressors.get_compressor(kind).is_none() {
                return Err(unknown("compressor", kind));
            }
            pipeline = pipeline.with_compression(self.compressors.clone(), Some(kind.clone()));
        }
        if let Some(kind) = &config.encryption {
            if self.encryptors.get_encryptor(kind).is_none() {
                return Err(unknown("encryptor", kind));
            }
            let key = config.key.clone().unwrap_or_default();
            if !self.encryptors.validate_key(&key, Some(kind))? {
                return Err(StowageError::validation(format!(
                    "Adapter '{}': key is not valid for {kind}",
                    config.name
                )));
            }
            pipeline = pipeline.with_encryption(self.encryptors.clone(), Some(kind.clone()), key);
        }
        Ok(pipeline)
    }
}

fn unknown(family: &'static str, kind: &impl std::fmt::Display) -> StowageError {
    StowageError::UnknownCodec {
        family,
        name: kind.to_string(),
    }
}

/// Codecs and adapters for one application
///
/// There is no global state; build one context at startup and pass it where
/// stores are created.
#[derive(Debug)]
pub struct StorageContext {
    codecs: CodecRegistries,
    storage: StorageManager,
}

impl StorageContext {
    /// Context with the built-in codecs and no adapters
    pub fn new(codecs: CodecRegistries) -> Self {
        Self {
            codecs,
            storage: StorageManager::new(),
        }
    }

    pub async fn from_config(config: &StowageConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Build every configured adapter; TTL timestamps come from `clock`
    pub async fn from_config_with_clock(
        config: &StowageConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let context = Self::new(CodecRegistries::with_threshold(config.compression_threshold));
        for adapter_config in &config.adapters {
            let adapter = context.build_adapter(adapter_config, clock.clone()).await?;
            context
                .storage
                .register_adapter(adapter_config.name.clone(), adapter);
        }
        if let Some(name) = config.default_adapter_name() {
            context.storage.set_default_adapter(name)?;
        }

        info!(
            adapters = config.adapters.len(),
            default = ?config.default_adapter_name(),
            "Storage context ready"
        );
        Ok(context)
    }

    pub fn codecs(&self) -> &CodecRegistries {
        &self.codecs
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Open the backend an adapter configuration names and wrap it
    pub async fn build_adapter(
        &self,
        config: &AdapterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn StorageAdapter>> {
        config.validate()?;

        let mut options = AdapterOptions::default()
            .with_name(config.name.clone())
            .with_prefix(config.prefix.clone())
            .with_pipeline(self.codecs.pipeline_for(config)?)
            .with_clock(clock);
        options.ttl = config.ttl();
        options.max_size = config.max_size;

        let quota = config.quota.unwrap_or(DEFAULT_AREA_QUOTA);
        let adapter: Arc<dyn StorageAdapter> = match config.backend {
            BackendKind::Memory => {
                Arc::new(PipelineAdapter::with_options(MemoryBackend::new(), options))
            }
            BackendKind::Session => Arc::new(PipelineAdapter::with_options(
                WebStorageBackend::session().with_quota(quota),
                options,
            )),
            BackendKind::Local => {
                let backend = match &config.path {
                    Some(path) => WebStorageBackend::local_at(path).await?,
                    None => WebStorageBackend::local(),
                };
                Arc::new(PipelineAdapter::with_options(backend.with_quota(quota), options))
            }
            BackendKind::Device => {
                let path = required_path(config)?;
                Arc::new(PipelineAdapter::with_options(
                    DeviceBackend::open(path).await?,
                    options,
                ))
            }
            BackendKind::Indexed => {
                let path = required_path(config)?;
                Arc::new(PipelineAdapter::with_options(
                    IndexedBackend::open(path).await?,
                    options,
                ))
            }
        };
        Ok(adapter)
    }
}

fn required_path(config: &AdapterConfig) -> Result<&std::path::Path> {
    config.path.as_deref().ok_or_else(|| {
        StowageError::validation(format!(
            "Adapter '{}': {} backend requires a path",
            config.name,
            config.backend.as_str()
        ))
    })
}
