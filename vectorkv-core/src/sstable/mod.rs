//! SSTable (Sorted String Table) implementation
//!
//! Immutable on-disk storage for sorted records with:
//! - Prefix-compressed data blocks, optionally LZ4 compressed
//! - A block index keyed by each block's first internal key
//! - A bloom filter over user keys
//! - A properties block describing the table contents
//!
//! File layout:
//!
//! ```text
//! [data block]* [filter block]? [index block] [properties block] [footer]
//! ```
//!
//! Every block is followed by a 5 byte trailer (compression type, CRC32).

mod block;
mod bloom;
mod builder;
mod cache;
mod iterator;
mod properties;
mod reader;
mod store;

pub use block::{Block, BlockBuilder, BlockHandle, BLOCK_TRAILER_SIZE};
pub use bloom::BloomFilter;
pub use builder::SSTableBuilder;
pub use cache::{BlockCache, CacheStats};
pub use iterator::TableIter;
pub use properties::TableProperties;
pub use reader::SSTableReader;
pub use store::{open_table_store, LocalTableStore, RandomAccessFile, StoreBackend, TableFile, TableStore};

use crate::compression::CompressionType;
use crate::SequenceNumber;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// SSTable file format version
pub const FORMAT_VERSION: u32 = 1;

/// Trailing magic number ("VKVT")
pub const TABLE_MAGIC: u32 = 0x564b_5654;

/// Fixed footer size: three block handles, version, magic
pub const FOOTER_SIZE: usize = 6 * 8 + 4 + 4;

/// SSTable metadata, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SSTableMeta {
    /// Unique file number
    pub id: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Number of records
    pub entry_count: u64,
    /// Smallest user key
    pub smallest_key: Bytes,
    /// Largest user key
    pub largest_key: Bytes,
    pub smallest_seq: SequenceNumber,
    pub largest_seq: SequenceNumber,
}

impl SSTableMeta {
    /// Check if the table's key range contains `key`
    pub fn may_contain_key(&self, key: &[u8]) -> bool {
        key >= self.smallest_key.as_ref() && key <= self.largest_key.as_ref()
    }

    /// Check if the table overlaps the inclusive user-key range
    /// `[start, end]`; `None` is unbounded.
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let before = matches!(end, Some(end) if self.smallest_key.as_ref() > end);
        let after = matches!(start, Some(start) if self.largest_key.as_ref() < start);
        !before && !after
    }
}

/// SSTable configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SSTableConfig {
    /// Block size in bytes
    pub block_size: usize,
    /// Keys between restart points inside a block
    pub block_restart_interval: usize,
    /// Block compression
    pub compression: CompressionType,
    /// Bloom filter bits per key, 0 disables the filter
    pub bloom_bits_per_key: usize,
    /// Compaction splits output files at this size
    pub target_file_size: u64,
    /// Shared block cache capacity in bytes, 0 disables caching
    pub block_cache_capacity: usize,
}

impl Default for SSTableConfig {
    fn default() -> Self {
        Self {
            block_size: crate::config::BLOCK_SIZE,
            block_restart_interval: crate::config::BLOCK_RESTART_INTERVAL,
            compression: CompressionType::default(),
            bloom_bits_per_key: crate::config::BLOOM_BITS_PER_KEY,
            target_file_size: crate::config::TARGET_FILE_SIZE,
            block_cache_capacity: crate::config::BLOCK_CACHE_CAPACITY,
        }
    }
}
