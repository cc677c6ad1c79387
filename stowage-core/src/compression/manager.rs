/*!
Compression registry with a size threshold and brute-force best fit.
*/

use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    Base64Compressor, CompressionKind, CompressionResult, Compressor, GzipCompressor,
    HuffmanCompressor, LzCompressor, LzwCompressor, RleCompressor,
};
use crate::registry::Registry;
use crate::Result;

/// Inputs shorter than this many bytes are stored uncompressed
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 100;

pub struct CompressionManager {
    registry: Registry<CompressionKind, dyn Compressor>,
    threshold: AtomicUsize,
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionManager {
    /// Manager with every built-in compressor and `lz` as the default
    pub fn new() -> Self {
        let manager = Self::empty(CompressionKind::Lz);
        manager.register(CompressionKind::Lz, Arc::new(LzCompressor));
        manager.register(CompressionKind::Rle, Arc::new(RleCompressor));
        manager.register(CompressionKind::Lzw, Arc::new(LzwCompressor));
        manager.register(CompressionKind::Huffman, Arc::new(HuffmanCompressor));
        manager.register(CompressionKind::Base64, Arc::new(Base64Compressor));
        manager.register(CompressionKind::Gzip, Arc::new(GzipCompressor::new()));
        manager
    }

    pub fn empty(default: CompressionKind) -> Self {
        Self {
            registry: Registry::new("compressor", default),
            threshold: AtomicUsize::new(DEFAULT_COMPRESSION_THRESHOLD),
        }
    }

    pub fn with_threshold(self, threshold: usize) -> Self {
        self.set_threshold(threshold);
        self
    }

    pub fn register(&self, kind: CompressionKind, compressor: Arc<dyn Compressor>) {
        self.registry.register(kind, compressor);
    }

    pub fn unregister(&self, kind: &CompressionKind) -> Option<Arc<dyn Compressor>> {
        self.registry.unregister(kind)
    }

    pub fn get_compressor(&self, kind: &CompressionKind) -> Option<Arc<dyn Compressor>> {
        self.registry.get(kind)
    }

    pub fn set_default(&self, kind: CompressionKind) -> Result<()> {
        self.registry.set_default(kind)
    }

    pub fn default_kind(&self) -> CompressionKind {
        self.registry.default_kind()
    }

    pub fn get_all_compressors(&self) -> Vec<CompressionKind> {
        self.registry.kinds()
    }

    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: usize) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    /// Compress with an explicit algorithm or the default.
    ///
    /// Inputs under the threshold, and outputs exactly as long as the input,
    /// are returned unchanged with `ratio == 1.0`.
    pub fn compress(
        &self,
        data: &str,
        kind: Option<&CompressionKind>,
    ) -> Result<CompressionResult> {
        let (kind, compressor) = self.registry.resolve(kind)?;
        if data.len() < self.threshold() {
            debug!(algorithm = %kind, size = data.len(), "Payload under compression threshold");
            return Ok(CompressionResult::uncompressed(data, kind));
        }
        Self::run(data, kind, compressor.as_ref())
    }

    /// Invert a compression result; uncompressed payloads pass through
    pub fn decompress(&self, result: &CompressionResult) -> Result<String> {
        if !result.is_compressed() {
            return Ok(result.compressed.clone());
        }
        let compressor = self.registry.require(&result.algorithm)?;
        compressor.decompress(&result.compressed)
    }

    /// Run every registered compressor and keep the smallest output. Falls
    /// back to the uncompressed payload when nothing shrinks it.
    pub fn find_best_compression(&self, data: &str) -> CompressionResult {
        self.get_all_compression_results(data)
            .into_iter()
            .filter(|result| result.compressed_size < result.original_size)
            .min_by_key(|result| result.compressed_size)
            .unwrap_or_else(|| CompressionResult::uncompressed(data, self.default_kind()))
    }

    /// Results of every registered compressor, in registration order.
    /// Compressors that fail are logged and left out.
    pub fn get_all_compression_results(&self, data: &str) -> Vec<CompressionResult> {
        self.registry
            .entries()
            .into_par_iter()
            .filter_map(|(kind, compressor)| {
                match Self::run(data, kind.clone(), compressor.as_ref()) {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(algorithm = %kind, error = %e, "Compressor failed during probe");
                        None
                    }
                }
            })
            .collect()
    }

    fn run(data: &str, kind: CompressionKind, compressor: &dyn Compressor) -> Result<CompressionResult> {
        let compressed = compressor.compress(data)?;
        if compressed.len() == data.len() {
            return Ok(CompressionResult::uncompressed(data, kind));
        }
        let ratio = compressor.compression_ratio(data, &compressed);
        debug!(algorithm = %kind, original = data.len(), compressed = compressed.len(), ratio, "Compressed payload");
        Ok(CompressionResult {
            original_size: data.len(),
            compressed_size: compressed.len(),
            compressed,
            ratio,
            algorithm: kind,
        })
    }
}
