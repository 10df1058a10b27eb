//! Block compression for SSTable payloads
//!
//! Each block records the codec it was written with, so tables built under
//! different settings can be read side by side.

use crate::{KvError, Result};
use serde::{Deserialize, Serialize};

/// Compression codec applied to a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionType {
    /// Stored as-is
    None = 0,
    /// LZ4 with the uncompressed size prepended
    #[default]
    Lz4 = 1,
}

impl TryFrom<u8> for CompressionType {
    type Error = KvError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Lz4),
            _ => Err(KvError::InvalidFormat(format!(
                "Unknown compression type: {}",
                value
            ))),
        }
    }
}

/// Compress `data`, falling back to `None` when LZ4 does not shrink it.
pub fn compress(data: &[u8], codec: CompressionType) -> (CompressionType, Vec<u8>) {
    match codec {
        CompressionType::None => (CompressionType::None, data.to_vec()),
        CompressionType::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(data);
            if compressed.len() < data.len() {
                (CompressionType::Lz4, compressed)
            } else {
                (CompressionType::None, data.to_vec())
            }
        }
    }
}

pub fn decompress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| KvError::Compression(e.to_string())),
    }
}
