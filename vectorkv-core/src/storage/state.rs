//! The state cell readers clone out of the engine

use crate::memtable::{ImmutableMemTable, MemTable};
use crate::version::Version;
use crate::{Record, Result, SequenceNumber};
use std::sync::Arc;

/// Everything a read needs: the active memtable, frozen memtables waiting
/// for flush (newest first), and the current Version.
///
/// Never mutated; the engine installs a new one for every memtable switch,
/// flush, or compaction.
#[derive(Clone)]
pub(crate) struct EngineState {
    pub memtable: Arc<MemTable>,
    pub immutables: Vec<ImmutableMemTable>,
    pub version: Arc<Version>,
}

impl EngineState {
    pub fn new(memtable: Arc<MemTable>, version: Arc<Version>) -> Self {
        Self {
            memtable,
            immutables: Vec::new(),
            version,
        }
    }

    /// Newest record for `key` visible at `read_seq`, tombstones included
    pub fn get(&self, key: &[u8], read_seq: SequenceNumber) -> Result<Option<Record>> {
        if let Some(record) = self.memtable.get(key, read_seq) {
            return Ok(Some(record));
        }
        for imm in &self.immutables {
            if let Some(record) = imm.get(key, read_seq) {
                return Ok(Some(record));
            }
        }
        self.version.get(key, read_seq)
    }

    /// Freeze the active memtable behind `memtable`
    pub fn with_new_memtable(&self, memtable: Arc<MemTable>) -> Self {
        let mut immutables = Vec::with_capacity(self.immutables.len() + 1);
        immutables.push(ImmutableMemTable::new(Arc::clone(&self.memtable)));
        immutables.extend(self.immutables.iter().cloned());
        Self {
            memtable,
            immutables,
            version: Arc::clone(&self.version),
        }
    }

    /// Drop the flushed memtable `id` and adopt `version`
    pub fn with_flushed(&self, id: u64, version: Arc<Version>) -> Self {
        Self {
            memtable: Arc::clone(&self.memtable),
            immutables: self
                .immutables
                .iter()
                .filter(|imm| imm.id() != id)
                .cloned()
                .collect(),
            version,
        }
    }

    pub fn with_version(&self, version: Arc<Version>) -> Self {
        Self {
            memtable: Arc::clone(&self.memtable),
            immutables: self.immutables.clone(),
            version,
        }
    }

    /// Oldest frozen memtable, the next to flush
    pub fn oldest_immutable(&self) -> Option<&ImmutableMemTable> {
        self.immutables.last()
    }

    /// WAL number of the memtable that follows frozen memtable `id`
    pub fn next_log_number(&self, id: u64) -> u64 {
        let pos = self.immutables.iter().position(|imm| imm.id() == id);
        match pos {
            Some(pos) if pos > 0 => self.immutables[pos - 1].log_number(),
            _ => self.memtable.log_number(),
        }
    }
}
