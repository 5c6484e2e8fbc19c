//! Value codecs
//!
//! Values are stored and shipped between nodes in codec-encoded form. The
//! codec is injectable; lz4 and zstd compression are provided alongside the
//! identity codec.

use crate::core::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Encodes values before storage and decodes them on read
pub trait ValueCodec: Send + Sync {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn name(&self) -> &'static str;
}

/// Codec selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Store raw bytes
    #[default]
    None,
    /// LZ4 - fast compression/decompression
    Lz4,
    /// Zstandard - better compression ratio
    Zstd,
}

/// Build the codec for a configured kind
pub fn build_codec(kind: CodecKind, zstd_level: i32) -> Arc<dyn ValueCodec> {
    match kind {
        CodecKind::None => Arc::new(IdentityCodec),
        CodecKind::Lz4 => Arc::new(Lz4Codec),
        CodecKind::Zstd => Arc::new(ZstdCodec { level: zstd_level }),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl ValueCodec for IdentityCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Codec;

impl ValueCodec for Lz4Codec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(4)
            .build(Vec::new())
            .map_err(|e| CacheError::Codec(e.to_string()))?;

        encoder
            .write_all(data)
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        let (compressed, result) = encoder.finish();
        result.map_err(|e| CacheError::Codec(e.to_string()))?;

        debug!("LZ4 encoded: {} → {} bytes", data.len(), compressed.len());
        Ok(compressed)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = lz4::Decoder::new(data).map_err(|e| CacheError::Codec(e.to_string()))?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        Ok(decompressed)
    }

    fn name(&self) -> &'static str {
        "lz4"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    /// Compression level (1-22)
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ValueCodec for ZstdCodec {
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed =
            zstd::encode_all(data, self.level).map_err(|e| CacheError::Codec(e.to_string()))?;
        debug!("Zstd encoded: {} → {} bytes", data.len(), compressed.len());
        Ok(compressed)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "zstd"
    }
}
