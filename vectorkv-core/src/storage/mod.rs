//! Storage engine - coordinates all storage components

mod engine;
mod flush;
mod recovery;
mod scan;
mod snapshot;
mod state;
mod worker;

pub use engine::{Engine, EngineStats};
pub use scan::ScanIter;
pub use snapshot::Snapshot;

use crate::compaction::CompactionConfig;
use crate::sstable::{SSTableConfig, StoreBackend};
use crate::wal::WalConfig;
use crate::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the optional per-database configuration file
pub const CONFIG_FILE: &str = "config.json";

/// Storage engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// WAL configuration
    pub wal: WalConfig,
    /// SSTable configuration
    pub sstable: SSTableConfig,
    /// Compaction thresholds and background retries
    pub compaction: CompactionConfig,
    /// MemTable size limit in bytes
    pub memtable_size_limit: usize,
    /// Frozen memtables allowed to wait for flush before writers stall
    pub max_immutable_memtables: usize,
    /// Manifest size that triggers a fresh manifest
    pub max_manifest_file_size: u64,
    /// Create the database if the directory holds none
    pub create_if_missing: bool,
    /// Where table files live
    pub store_backend: StoreBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            wal: WalConfig::default(),
            sstable: SSTableConfig::default(),
            compaction: CompactionConfig::default(),
            memtable_size_limit: crate::config::MEMTABLE_SIZE_LIMIT,
            max_immutable_memtables: crate::config::MAX_IMMUTABLE_MEMTABLES,
            max_manifest_file_size: crate::config::MAX_MANIFEST_FILE_SIZE,
            create_if_missing: true,
            store_backend: StoreBackend::default(),
        }
    }
}

impl StorageConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// `<dir>/config.json` if it exists, otherwise `base`
    pub fn load_or(dir: impl AsRef<Path>, base: StorageConfig) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE);
        if path.exists() {
            tracing::info!("Loading configuration from {:?}", path);
            Self::from_json_file(path)
        } else {
            Ok(base)
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sstable.block_size == 0 {
            return Err(KvError::Config("block_size must be positive".into()));
        }
        if self.sstable.block_restart_interval == 0 {
            return Err(KvError::Config("block_restart_interval must be positive".into()));
        }
        if self.memtable_size_limit == 0 {
            return Err(KvError::Config("memtable_size_limit must be positive".into()));
        }
        if self.max_immutable_memtables == 0 {
            return Err(KvError::Config("max_immutable_memtables must be positive".into()));
        }
        self.compaction.validate()
    }
}
