//! Manifest and version set
//!
//! A [`Version`] is an immutable snapshot of the live tables per level.
//! Every flush or compaction logs a [`VersionEdit`] to the manifest and
//! installs a new Version; readers keep using the Version they started
//! with. Tables are shared between Versions through [`TableHandle`]s, and
//! a table's file is deleted once it has been compacted away and the last
//! handle is dropped.

mod edit;
mod manifest;
mod set;

pub use edit::VersionEdit;
pub use manifest::{manifest_path, read_current, read_manifest, set_current, ManifestWriter, CURRENT_FILE};
pub use set::VersionSet;

use crate::sstable::{BlockCache, SSTableMeta, SSTableReader, TableIter, TableStore};
use crate::{KvError, Record, Result, SequenceNumber};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reference-counted handle to one live table.
///
/// The reader is opened on first use, so a damaged table only fails the
/// reads that touch it.
pub struct TableHandle {
    meta: SSTableMeta,
    store: Arc<dyn TableStore>,
    cache: Option<Arc<BlockCache>>,
    reader: Mutex<Option<Arc<SSTableReader>>>,
    obsolete: AtomicBool,
}

impl TableHandle {
    pub fn new(
        meta: SSTableMeta,
        store: Arc<dyn TableStore>,
        cache: Option<Arc<BlockCache>>,
    ) -> Self {
        Self {
            meta,
            store,
            cache,
            reader: Mutex::new(None),
            obsolete: AtomicBool::new(false),
        }
    }

    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Open (once) and return the table reader
    pub fn reader(&self) -> Result<Arc<SSTableReader>> {
        let mut slot = self.reader.lock();
        if let Some(reader) = slot.as_ref() {
            return Ok(Arc::clone(reader));
        }

        let file = self.store.open(self.meta.id)?;
        let reader = SSTableReader::open(self.meta.id, file, self.cache.clone()).map_err(|e| {
            if e.is_corruption() {
                KvError::Corruption(format!("table {}: {}", self.meta.id, e))
            } else {
                e
            }
        })?;
        let reader = Arc::new(reader);
        *slot = Some(Arc::clone(&reader));
        Ok(reader)
    }

    pub fn get(&self, key: &[u8], read_seq: SequenceNumber) -> Result<Option<Record>> {
        if !self.meta.may_contain_key(key) || self.meta.smallest_seq > read_seq {
            return Ok(None);
        }
        self.reader()?.get(key, read_seq)
    }

    pub fn iter(&self) -> Result<TableIter> {
        Ok(self.reader()?.iter())
    }

    /// Schedule the file for deletion once no Version references it
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            match self.store.remove(self.meta.id) {
                Ok(()) => debug!("Deleted obsolete table {}", self.meta.id),
                Err(e) => warn!("Failed to delete obsolete table {}: {}", self.meta.id, e),
            }
        }
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("meta", &self.meta)
            .field("obsolete", &self.obsolete.load(Ordering::Relaxed))
            .finish()
    }
}

/// Immutable set of live tables per level.
///
/// L0 is ordered newest first and may overlap; every deeper level is sorted
/// by smallest key with disjoint ranges.
#[derive(Debug, Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<TableHandle>>>,
}

impl Version {
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &[Arc<TableHandle>] {
        &self.levels[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.levels[level].len()
    }

    pub fn total_files(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Total file bytes in a level
    pub fn level_size(&self, level: usize) -> u64 {
        self.levels[level].iter().map(|t| t.meta().file_size).sum()
    }

    /// Ids of every table in this Version
    pub fn live_files(&self) -> HashSet<u64> {
        self.levels.iter().flatten().map(|t| t.id()).collect()
    }

    /// Look `key` up newest-first: L0 in order, then one candidate per level.
    /// The first record found decides, tombstones included.
    pub fn get(&self, key: &[u8], read_seq: SequenceNumber) -> Result<Option<Record>> {
        for table in &self.levels[0] {
            if let Some(record) = table.get(key, read_seq)? {
                return Ok(Some(record));
            }
        }

        for level in &self.levels[1..] {
            let idx = level.partition_point(|t| t.meta().largest_key.as_ref() < key);
            if let Some(table) = level.get(idx) {
                if let Some(record) = table.get(key, read_seq)? {
                    return Ok(Some(record));
                }
            }
        }

        Ok(None)
    }

    /// Tables in `level` overlapping the inclusive range `[start, end]`
    pub fn overlapping(
        &self,
        level: usize,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<TableHandle>> {
        self.levels[level]
            .iter()
            .filter(|t| t.meta().overlaps(start, end))
            .cloned()
            .collect()
    }

    /// Whether any level deeper than `level` has a table whose range
    /// contains `key`
    pub fn key_may_exist_below(&self, level: usize, key: &[u8]) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .any(|tables| tables.iter().any(|t| t.meta().may_contain_key(key)))
    }

    /// Apply an edit, producing the next Version
    pub(crate) fn apply(
        &self,
        edit: &VersionEdit,
        store: &Arc<dyn TableStore>,
        cache: &Option<Arc<BlockCache>>,
    ) -> Result<Version> {
        let mut next = self.clone();

        for &(level, id) in &edit.deleted_files {
            let tables = next.levels.get_mut(level).ok_or_else(|| {
                KvError::Corruption(format!("edit deletes table {} from missing level {}", id, level))
            })?;
            let before = tables.len();
            tables.retain(|t| t.id() != id);
            if tables.len() == before {
                return Err(KvError::Corruption(format!(
                    "edit deletes unknown table {} from level {}",
                    id, level
                )));
            }
        }

        for (level, meta) in &edit.new_files {
            let tables = next.levels.get_mut(*level).ok_or_else(|| {
                KvError::Corruption(format!("edit adds table {} to missing level {}", meta.id, level))
            })?;
            tables.push(Arc::new(TableHandle::new(
                meta.clone(),
                Arc::clone(store),
                cache.clone(),
            )));
        }

        next.levels[0].sort_by(|a, b| b.id().cmp(&a.id()));
        for level in next.levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.meta().smallest_key.cmp(&b.meta().smallest_key));
        }

        next.check_invariants()?;
        Ok(next)
    }

    /// Levels below L0 must be sorted and non-overlapping
    pub fn check_invariants(&self) -> Result<()> {
        for (level, tables) in self.levels.iter().enumerate().skip(1) {
            for pair in tables.windows(2) {
                if pair[0].meta().largest_key >= pair[1].meta().smallest_key {
                    return Err(KvError::Corruption(format!(
                        "level {} tables {} and {} overlap",
                        level,
                        pair[0].id(),
                        pair[1].id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Edit that recreates this Version from nothing
    pub(crate) fn snapshot_edit(&self) -> VersionEdit {
        let mut edit = VersionEdit::new();
        for (level, tables) in self.levels.iter().enumerate() {
            for table in tables.iter().rev() {
                edit.add_file(level, table.meta().clone());
            }
        }
        edit
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::sstable::test_util::build_table;
    use crate::sstable::SSTableConfig;

    /// Write a table and return its metadata for use in an edit
    pub fn table(store: &Arc<dyn TableStore>, id: u64, records: &[Record]) -> SSTableMeta {
        build_table(store, id, records, &SSTableConfig::default())
    }
}
