//! VectorKV Core - Embedded LSM-Tree Key-Value Storage Engine
//!
//! A single-node, embeddable key-value store built on log-structured
//! merge-tree principles.
//!
//! # Architecture
//!
//! - **WAL (Write-Ahead Log)**: every write is checksummed and synced before it is acknowledged
//! - **MemTable**: lock-free skip list holding recent writes in key order
//! - **SSTable**: immutable sorted files with block index and bloom filter
//! - **Manifest / Version set**: the live set of tables per level, logged as edits
//! - **Compaction**: background merging that bounds read amplification and reclaims deletes
//!
//! ```no_run
//! use vectorkv_core::storage::{Engine, StorageConfig};
//!
//! # fn main() -> vectorkv_core::Result<()> {
//! let engine = Engine::open("/tmp/vectorkv", StorageConfig::default())?;
//! engine.put(b"hello", b"world")?;
//! assert_eq!(engine.get(b"hello")?.as_deref(), Some(&b"world"[..]));
//! for item in engine.scan(b"a", b"z")? {
//!     let (key, value) = item?;
//!     println!("{:?} => {:?}", key, value);
//! }
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod compression;
pub mod iterator;
pub mod memtable;
pub mod sstable;
pub mod storage;
pub mod version;
pub mod wal;

mod error;
mod types;
mod util;

pub use error::{KvError, Result};
pub use storage::{Engine, EngineStats, ScanIter, Snapshot, StorageConfig};
pub use types::*;
pub use wal::WriteBatch;

/// VectorKV version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Maximum MemTable size before it is frozen for flush (64MB)
    pub const MEMTABLE_SIZE_LIMIT: usize = 64 * 1024 * 1024;

    /// Frozen MemTables allowed to queue before writers stall
    pub const MAX_IMMUTABLE_MEMTABLES: usize = 4;

    /// SSTable block size (4KB)
    pub const BLOCK_SIZE: usize = 4 * 1024;

    /// Keys between prefix-compression restart points
    pub const BLOCK_RESTART_INTERVAL: usize = 16;

    /// Bloom filter bits per key (~1% false positives)
    pub const BLOOM_BITS_PER_KEY: usize = 10;

    /// Compaction output file size (2MB)
    pub const TARGET_FILE_SIZE: u64 = 2 * 1024 * 1024;

    /// Shared block cache capacity (8MB)
    pub const BLOCK_CACHE_CAPACITY: usize = 8 * 1024 * 1024;

    /// Maximum SSTables in L0 before compaction
    pub const L0_COMPACTION_TRIGGER: usize = 4;

    /// Size ratio between levels
    pub const LEVEL_SIZE_RATIO: u64 = 10;

    /// Target size of L1 (64MB)
    pub const BASE_LEVEL_SIZE: u64 = 64 * 1024 * 1024;

    /// Number of LSM levels
    pub const MAX_LEVELS: usize = 7;

    /// Manifest size that triggers a rewrite (4MB)
    pub const MAX_MANIFEST_FILE_SIZE: u64 = 4 * 1024 * 1024;

    /// Retries for a failing flush or compaction
    pub const MAX_BACKGROUND_RETRIES: u32 = 3;

    /// First retry delay, doubled on each attempt
    pub const RETRY_BACKOFF_MS: u64 = 100;

    pub const MAX_KEY_SIZE: usize = 64 * 1024;
    pub const MAX_VALUE_SIZE: usize = 256 * 1024 * 1024;

    /// Largest write batch; its WAL frame length must fit in a u32
    pub const MAX_BATCH_SIZE: usize = 1024 * 1024 * 1024;
}
