/*!
Encode/decode pipeline shared by every adapter.

Write: serialize, compress, encrypt. Read: decrypt, decompress, deserialize.
Each stage is optional and each stage's result record is written as JSON,
so a payload carries everything needed to invert it except the key.
*/

use std::sync::Arc;
use tracing::debug;

use crate::compression::{CompressionKind, CompressionManager, CompressionResult};
use crate::encryption::{EncryptionKind, EncryptionManager, EncryptionResult};
use crate::serialization::{SerializationResult, SerializerKind, SerializerManager};
use crate::{Result, StowageError, Value};

#[derive(Clone)]
struct SerializeStage {
    manager: Arc<SerializerManager>,
    kind: Option<SerializerKind>,
}

#[derive(Clone)]
struct CompressStage {
    manager: Arc<CompressionManager>,
    kind: Option<CompressionKind>,
}

#[derive(Clone)]
struct EncryptStage {
    manager: Arc<EncryptionManager>,
    kind: Option<EncryptionKind>,
    key: String,
}

/// Optional serialize → compress → encrypt stages
#[derive(Clone, Default)]
pub struct CodecPipeline {
    serialize: Option<SerializeStage>,
    compress: Option<CompressStage>,
    encrypt: Option<EncryptStage>,
}

impl std::fmt::Debug for CodecPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecPipeline")
            .field("serializer", &self.serialize.as_ref().map(|s| s.kind.clone()))
            .field("compression", &self.compress.as_ref().map(|s| s.kind.clone()))
            .field("encryption", &self.encrypt.as_ref().map(|s| s.kind.clone()))
            .finish()
    }
}

impl CodecPipeline {
    /// Plain JSON, no stages
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize through the manager; `None` picks the manager's default
    pub fn with_serializer(
        mut self,
        manager: Arc<SerializerManager>,
        kind: Option<SerializerKind>,
    ) -> Self {
        self.serialize = Some(SerializeStage { manager, kind });
        self
    }

    pub fn with_compression(
        mut self,
        manager: Arc<CompressionManager>,
        kind: Option<CompressionKind>,
    ) -> Self {
        self.compress = Some(CompressStage { manager, kind });
        self
    }

    pub fn with_encryption<S: Into<String>>(
        mut self,
        manager: Arc<EncryptionManager>,
        kind: Option<EncryptionKind>,
        key: S,
    ) -> Self {
        self.encrypt = Some(EncryptStage {
            manager,
            kind,
            key: key.into(),
        });
        self
    }

    pub fn is_plain(&self) -> bool {
        self.serialize.is_none() && self.compress.is_none() && self.encrypt.is_none()
    }

    /// Value to stored payload
    pub fn encode(&self, value: &Value) -> Result<String> {
        let mut payload = match &self.serialize {
            Some(stage) => {
                let result = stage.manager.serialize(value, stage.kind.as_ref())?;
                debug!(serializer = %result.kind, "Serialized value");
                serde_json::to_string(&result)?
            }
            None => serde_json::to_string(&value.to_json()?)?,
        };

        if let Some(stage) = &self.compress {
            let result = stage.manager.compress(&payload, stage.kind.as_ref())?;
            debug!(
                algorithm = %result.algorithm,
                ratio = result.ratio,
                "Compression stage finished"
            );
            payload = serde_json::to_string(&result)?;
        }

        if let Some(stage) = &self.encrypt {
            let result = stage
                .manager
                .encrypt(&payload, &stage.key, stage.kind.as_ref())?;
            debug!(algorithm = %result.algorithm, "Encrypted payload");
            payload = serde_json::to_string(&result)?;
        }

        Ok(payload)
    }

    /// Stored payload to value
    pub fn decode(&self, payload: &str) -> Result<Value> {
        let mut payload = payload.to_string();

        if let Some(stage) = &self.encrypt {
            let result: EncryptionResult = serde_json::from_str(&payload).map_err(|e| {
                StowageError::encryption("pipeline", format!("payload is not an encryption record: {e}"))
            })?;
            payload = stage.manager.decrypt(&result, &stage.key)?;
        }

        if let Some(stage) = &self.compress {
            let result: CompressionResult = serde_json::from_str(&payload).map_err(|e| {
                StowageError::compression("pipeline", format!("payload is not a compression record: {e}"))
            })?;
            payload = stage.manager.decompress(&result)?;
        }

        match &self.serialize {
            Some(stage) => {
                let result: SerializationResult = serde_json::from_str(&payload).map_err(|e| {
                    StowageError::serialization(
                        "pipeline",
                        format!("payload is not a serialization record: {e}"),
                    )
                })?;
                stage.manager.deserialize(&result)
            }
            None => {
                let json: serde_json::Value = serde_json::from_str(&payload)?;
                Ok(Value::from(json))
            }
        }
    }
}
