/*!
Error types for the Stowage core engine.
*/

use thiserror::Error;

/// Result type used throughout the Stowage core.
pub type Result<T> = std::result::Result<T, StowageError>;

/// Errors that can occur in codecs, adapters, stores and migrations.
#[derive(Error, Debug)]
pub enum StowageError {
    /// I/O errors during file-backed operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A serializer could not encode or decode a value
    #[error("Serialization error ({serializer}): {message}")]
    Serialization { serializer: String, message: String },

    /// The value graph contains a reference cycle
    #[error("Cannot serialize cyclic structure at {path}")]
    CyclicStructure { path: String },

    /// Compression/decompression errors
    #[error("Compression error ({algorithm}): {message}")]
    Compression { algorithm: String, message: String },

    /// Encryption/decryption errors, including missing or wrong keys
    #[error("Encryption error ({algorithm}): {message}")]
    Encryption { algorithm: String, message: String },

    /// A migration plan was aborted
    #[error("Migration from version {from_version} to {to_version} failed: {source}")]
    Migration {
        from_version: u32,
        to_version: u32,
        #[source]
        source: Box<StowageError>,
    },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A payload exceeded the adapter or area size limit
    #[error("Quota exceeded for key '{key}': {size} bytes exceeds limit of {limit} bytes")]
    QuotaExceeded {
        key: String,
        size: usize,
        limit: usize,
    },

    /// Sync hook failures
    #[error("Sync error: {0}")]
    Sync(String),

    /// Storage backend errors
    #[error("Storage error for key '{key}': {message}")]
    Storage { key: String, message: String },

    /// No codec is registered under the requested kind
    #[error("No {family} registered as '{name}'")]
    UnknownCodec { family: &'static str, name: String },
}

impl StowageError {
    /// Create a new serialization error
    pub fn serialization<S1: Into<String>, S2: Into<String>>(serializer: S1, msg: S2) -> Self {
        Self::Serialization {
            serializer: serializer.into(),
            message: msg.into(),
        }
    }

    /// Create a new compression error
    pub fn compression<S1: Into<String>, S2: Into<String>>(algorithm: S1, msg: S2) -> Self {
        Self::Compression {
            algorithm: algorithm.into(),
            message: msg.into(),
        }
    }

    /// Create a new encryption error
    pub fn encryption<S1: Into<String>, S2: Into<String>>(algorithm: S1, msg: S2) -> Self {
        Self::Encryption {
            algorithm: algorithm.into(),
            message: msg.into(),
        }
    }

    /// Create a new storage error
    pub fn storage<S1: Into<String>, S2: Into<String>>(key: S1, msg: S2) -> Self {
        Self::Storage {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new sync error
    pub fn sync<S: Into<String>>(msg: S) -> Self {
        Self::Sync(msg.into())
    }

    /// Wrap a failure as a migration error between two versions
    pub fn migration(from_version: u32, to_version: u32, cause: StowageError) -> Self {
        Self::Migration {
            from_version,
            to_version,
            source: Box::new(cause),
        }
    }

    /// Stable, operation-specific error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::CyclicStructure { .. } => "CYCLIC_STRUCTURE",
            Self::Compression { .. } => "COMPRESSION_ERROR",
            Self::Encryption { .. } => "ENCRYPTION_ERROR",
            Self::Migration { .. } => "MIGRATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::Sync(_) => "SYNC_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::UnknownCodec { .. } => "UNKNOWN_CODEC",
        }
    }

    /// The storage key the error relates to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::QuotaExceeded { key, .. } | Self::Storage { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Attach a key to a backend failure that was raised without one
    pub(crate) fn for_key(self, key: &str) -> Self {
        match self {
            Self::Io(e) => Self::storage(key, e.to_string()),
            Self::Storage { key: k, message } if k.is_empty() => Self::Storage {
                key: key.to_string(),
                message,
            },
            other => other,
        }
    }
}
