/*!
Compression codecs for stored payloads.

Every compressor maps a string to a string, so compressed payloads can be
stored by any string backend and wrapped in further pipeline stages. The
architecture allows plugging in new algorithms through the [`Compressor`]
trait and registering them with the [`CompressionManager`].
*/

pub mod huffman;
pub mod lz;
pub mod lzw;
pub mod manager;
pub mod rle;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::registry::codec_kind;
use crate::{Result, StowageError};

pub use huffman::HuffmanCompressor;
pub use lz::LzCompressor;
pub use lzw::LzwCompressor;
pub use manager::{CompressionManager, DEFAULT_COMPRESSION_THRESHOLD};
pub use rle::RleCompressor;

codec_kind!(
    /// Built-in compression algorithms
    CompressionKind {
        Lz => "lz",
        Rle => "rle",
        Lzw => "lzw",
        Huffman => "huffman",
        Base64 => "base64",
        Gzip => "gzip",
    }
);

/// Compression abstraction for stored payloads
///
/// `decompress(compress(s)) == s` for every string, including `""` and single
/// characters. Corrupt input is a `Compression` error, never a panic.
pub trait Compressor: Send + Sync {
    /// Name of the compression algorithm
    fn name(&self) -> &str;

    fn compress(&self, data: &str) -> Result<String>;

    fn decompress(&self, data: &str) -> Result<String>;

    /// Compressed size over original size, in bytes. Below 1 means smaller.
    fn compression_ratio(&self, original: &str, compressed: &str) -> f64 {
        if original.is_empty() {
            return 1.0;
        }
        compressed.len() as f64 / original.len() as f64
    }
}

/// Output of the compression stage
///
/// `ratio == 1.0` marks a payload stored uncompressed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub compressed: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
    pub algorithm: CompressionKind,
}

impl CompressionResult {
    /// A payload kept as-is
    pub fn uncompressed(data: &str, algorithm: CompressionKind) -> Self {
        Self {
            compressed: data.to_string(),
            original_size: data.len(),
            compressed_size: data.len(),
            ratio: 1.0,
            algorithm,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.ratio != 1.0
    }
}

/// Base64 encoding. Never smaller than its input; useful to make arbitrary
/// text transport-safe.
#[derive(Debug, Clone, Default)]
pub struct Base64Compressor;

impl Compressor for Base64Compressor {
    fn name(&self) -> &str {
        "base64"
    }

    fn compress(&self, data: &str) -> Result<String> {
        Ok(BASE64.encode(data.as_bytes()))
    }

    fn decompress(&self, data: &str) -> Result<String> {
        let bytes = BASE64
            .decode(data)
            .map_err(|e| StowageError::compression(self.name(), e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| StowageError::compression(self.name(), e.to_string()))
    }
}

/// Largest payload a gzip record may inflate to, 256 MiB
pub const MAX_INFLATED_SIZE: usize = 256 * 1024 * 1024;

/// Gzip compressor
///
/// DEFLATE (gzip) over the UTF-8 bytes, base64-wrapped so the output stays a
/// string. Gives the best ratio of the built-ins on most real payloads.
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
    max_output: usize,
}

impl GzipCompressor {
    /// Create a new gzip compressor with default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
            max_output: MAX_INFLATED_SIZE,
        }
    }

    /// Create a new gzip compressor with the specified compression level
    /// (0-9, where 0 is no compression and 9 is maximum)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
            max_output: MAX_INFLATED_SIZE,
        }
    }

    /// Cap on decompressed bytes; larger payloads are rejected as corrupt
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    /// Create a compressor for fast compression (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Create a compressor for maximum compression (level 9)
    pub fn max() -> Self {
        Self::with_level(9)
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &str {
        "gzip"
    }

    fn compress(&self, data: &str) -> Result<String> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);

        encoder.write_all(data.as_bytes()).map_err(|e| {
            StowageError::compression(
                self.name(),
                format!("Failed to write data for compression: {e}"),
            )
        })?;

        let compressed = encoder.finish().map_err(|e| {
            StowageError::compression(self.name(), format!("Failed to finish compression: {e}"))
        })?;
        Ok(BASE64.encode(compressed))
    }

    fn decompress(&self, data: &str) -> Result<String> {
        let compressed = BASE64
            .decode(data)
            .map_err(|e| StowageError::compression(self.name(), e.to_string()))?;
        let limit = u64::try_from(self.max_output).unwrap_or(u64::MAX);
        let mut decoder = GzDecoder::new(compressed.as_slice()).take(limit.saturating_add(1));
        let mut decompressed = String::new();

        decoder.read_to_string(&mut decompressed).map_err(|e| {
            StowageError::compression(self.name(), format!("Failed to decompress data: {e}"))
        })?;
        if decompressed.len() > self.max_output {
            return Err(StowageError::compression(
                self.name(),
                format!("payload inflates past {} bytes", self.max_output),
            ));
        }

        Ok(decompressed)
    }
}
