//! Manifest records

use crate::sstable::SSTableMeta;
use crate::{Result, SequenceNumber};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A change to the live table set, applied atomically.
///
/// Flush adds one L0 file and advances the log number; compaction deletes
/// its inputs and adds its outputs in a single edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdit {
    /// Oldest WAL still needed for recovery
    pub log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    /// Where the next size-triggered compaction of a level starts
    pub compact_pointers: Vec<(usize, Bytes)>,
    pub deleted_files: Vec<(usize, u64)>,
    pub new_files: Vec<(usize, SSTableMeta)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, level: usize, meta: SSTableMeta) {
        self.new_files.push((level, meta));
    }

    pub fn delete_file(&mut self, level: usize, id: u64) {
        self.deleted_files.push((level, id));
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: Bytes) {
        self.compact_pointers.push((level, key));
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
