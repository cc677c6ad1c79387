//! Configuration for adapters and the storage context
//!
//! A [`StowageConfig`] lists named adapters, each described by an
//! [`AdapterConfig`]: which backend it sits on, its key prefix, TTL and size
//! limits, and which codecs its pipeline runs. Configurations are plain
//! serde structures and are usually loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compression::{CompressionKind, DEFAULT_COMPRESSION_THRESHOLD};
use crate::encryption::EncryptionKind;
use crate::serialization::SerializerKind;
use crate::{Result, StowageError};

/// Backends an adapter can sit on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process hash map
    Memory,
    /// Browser-style local area, optionally mirrored to a file
    Local,
    /// Browser-style session area
    Session,
    /// Append-only log file
    Device,
    /// Directory of record files
    Indexed,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Local => "local",
            BackendKind::Session => "session",
            BackendKind::Device => "device",
            BackendKind::Indexed => "indexed",
        }
    }

    /// Whether the backend reads `path`
    fn uses_path(&self) -> bool {
        matches!(
            self,
            BackendKind::Local | BackendKind::Device | BackendKind::Indexed
        )
    }

    fn requires_path(&self) -> bool {
        matches!(self, BackendKind::Device | BackendKind::Indexed)
    }
}

/// Configuration for one named adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Name the adapter is registered under
    pub name: String,
    pub backend: BackendKind,
    /// Key prefix, e.g. `cart:`
    #[serde(default)]
    pub prefix: String,
    /// File or directory for file-backed backends
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Default TTL in milliseconds; enables TTL envelopes
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Largest encoded payload accepted, in bytes
    #[serde(default)]
    pub max_size: Option<usize>,
    /// Area quota in bytes for local/session backends
    #[serde(default)]
    pub quota: Option<usize>,
    #[serde(default)]
    pub serializer: Option<SerializerKind>,
    #[serde(default)]
    pub compression: Option<CompressionKind>,
    #[serde(default)]
    pub encryption: Option<EncryptionKind>,
    /// Encryption key; required when `encryption` is set
    #[serde(default)]
    pub key: Option<String>,
}

impl AdapterConfig {
    pub fn new<S: Into<String>>(name: S, backend: BackendKind) -> Self {
        Self {
            name: name.into(),
            backend,
            prefix: String::new(),
            path: None,
            ttl_ms: None,
            max_size: None,
            quota: None,
            serializer: None,
            compression: None,
            encryption: None,
            key: None,
        }
    }

    /// Parse a backend URI
    ///
    /// Supports formats:
    /// - `memory://` and `session://`
    /// - `local://` for an in-memory local area, `local://<path>` for one
    ///   mirrored to a file
    /// - `device://<path>` for an append-only log file
    /// - `indexed://<path>` for a record directory
    pub fn from_uri<S: Into<String>>(name: S, uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StowageError::validation(format!("Invalid adapter URI '{uri}': missing scheme")))?;

        let backend = match scheme {
            "memory" => BackendKind::Memory,
            "local" => BackendKind::Local,
            "session" => BackendKind::Session,
            "device" => BackendKind::Device,
            "indexed" => BackendKind::Indexed,
            other => {
                return Err(StowageError::validation(format!(
                    "Invalid adapter URI '{uri}': unknown scheme '{other}'"
                )))
            }
        };

        let mut config = Self::new(name, backend);
        if !rest.is_empty() {
            if !backend.uses_path() {
                return Err(StowageError::validation(format!(
                    "Invalid adapter URI '{uri}': {} adapters take no path",
                    backend.as_str()
                )));
            }
            config.path = Some(PathBuf::from(rest));
        } else if backend.requires_path() {
            return Err(StowageError::validation(format!(
                "Invalid adapter URI '{uri}': missing path"
            )));
        }
        Ok(config)
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_serializer(mut self, kind: SerializerKind) -> Self {
        self.serializer = Some(kind);
        self
    }

    pub fn with_compression(mut self, kind: CompressionKind) -> Self {
        self.compression = Some(kind);
        self
    }

    pub fn with_encryption<S: Into<String>>(mut self, kind: EncryptionKind, key: S) -> Self {
        self.encryption = Some(kind);
        self.key = Some(key.into());
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StowageError::validation("Adapter name must not be empty"));
        }
        let name = &self.name;

        if self.backend.requires_path() && self.path.is_none() {
            return Err(StowageError::validation(format!(
                "Adapter '{name}': {} backend requires a path",
                self.backend.as_str()
            )));
        }
        if self.path.is_some() && !self.backend.uses_path() {
            return Err(StowageError::validation(format!(
                "Adapter '{name}': {} backend takes no path",
                self.backend.as_str()
            )));
        }
        if self.quota.is_some() && !matches!(self.backend, BackendKind::Local | BackendKind::Session) {
            return Err(StowageError::validation(format!(
                "Adapter '{name}': quota only applies to local and session backends"
            )));
        }
        if self.ttl_ms == Some(0) {
            return Err(StowageError::validation(format!(
                "Adapter '{name}': ttl_ms must be positive"
            )));
        }
        if self.max_size == Some(0) {
            return Err(StowageError::validation(format!(
                "Adapter '{name}': max_size must be positive"
            )));
        }

        let has_key = self.key.as_deref().is_some_and(|k| !k.is_empty());
        match (&self.encryption, has_key) {
            (Some(kind), false) => Err(StowageError::validation(format!(
                "Adapter '{name}': {kind} encryption requires a key"
            ))),
            (None, true) => Err(StowageError::validation(format!(
                "Adapter '{name}': key is set but no encryption is configured"
            ))),
            _ => Ok(()),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StowageConfig {
    /// Default adapter; the first adapter when unset
    #[serde(default)]
    pub default_adapter: Option<String>,
    /// Inputs shorter than this many bytes are stored uncompressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    pub adapters: Vec<AdapterConfig>,
}

fn default_compression_threshold() -> usize {
    DEFAULT_COMPRESSION_THRESHOLD
}

impl Default for StowageConfig {
    /// A single in-memory adapter named `memory`
    fn default() -> Self {
        Self {
            default_adapter: None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            adapters: vec![AdapterConfig::new("memory", BackendKind::Memory)],
        }
    }
}

impl StowageConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StowageError::validation(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Name of the default adapter, if any adapter exists
    pub fn default_adapter_name(&self) -> Option<&str> {
        self.default_adapter
            .as_deref()
            .or_else(|| self.adapters.first().map(|a| a.name.as_str()))
    }

    pub fn adapter(&self, name: &str) -> Option<&AdapterConfig> {
        self.adapters.iter().find(|a| a.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.adapters.is_empty() {
            return Err(StowageError::validation("At least one adapter must be configured"));
        }

        let mut names = HashSet::new();
        for adapter in &self.adapters {
            adapter.validate()?;
            if !names.insert(adapter.name.as_str()) {
                return Err(StowageError::validation(format!(
                    "Adapter name '{}' is used more than once",
                    adapter.name
                )));
            }
        }

        if let Some(default) = &self.default_adapter {
            if !names.contains(default.as_str()) {
                return Err(StowageError::validation(format!(
                    "Default adapter '{default}' is not configured"
                )));
            }
        }
        Ok(())
    }
}
