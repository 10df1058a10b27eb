//! Writing a frozen memtable to an L0 table

use crate::compaction::GcFilter;
use crate::sstable::{SSTableBuilder, SSTableConfig, SSTableMeta, TableStore};
use crate::{Record, Result, SequenceNumber};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Write `records` (in internal-key order) to table `id`.
///
/// Versions hidden from every snapshot are dropped; tombstones are always
/// kept because older data may sit in any table. Returns `None` when there
/// was nothing to write.
pub(crate) fn write_level0_table(
    records: impl Iterator<Item = Record>,
    id: u64,
    store: &Arc<dyn TableStore>,
    config: &SSTableConfig,
    smallest_snapshot: SequenceNumber,
) -> Result<Option<SSTableMeta>> {
    let started = Instant::now();
    let mut filter = GcFilter::new(smallest_snapshot);
    let mut builder: Option<SSTableBuilder> = None;

    for record in records {
        if !filter.keep(&record, |_| false) {
            continue;
        }
        if builder.is_none() {
            builder = Some(SSTableBuilder::new(id, store.create(id)?, config.clone()));
        }
        if let Some(b) = builder.as_mut() {
            if let Err(e) = b.add(&record) {
                if let Some(unfinished) = builder.take() {
                    if let Err(abandon_err) = unfinished.abandon() {
                        warn!("Failed to remove unfinished table {}: {}", id, abandon_err);
                    }
                }
                return Err(e);
            }
        }
    }

    let Some(builder) = builder else {
        return Ok(None);
    };
    let meta = builder.finish()?;
    info!(
        "Flushed table {}: {} entries, {} bytes, {} shadowed versions dropped in {:?}",
        meta.id,
        meta.entry_count,
        meta.file_size,
        filter.dropped(),
        started.elapsed()
    );
    Ok(Some(meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::MemTable;
    use crate::sstable::test_util::open_table;
    use crate::sstable::{open_table_store, StoreBackend};
    use crate::MAX_SEQUENCE;
    use tempfile::TempDir;

    #[test]
    fn test_flush_keeps_newest_and_tombstones() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();

        let memtable = MemTable::new(1, 1);
        memtable.put("a", "1", 1);
        memtable.put("b", "2", 2);
        memtable.delete("a", 3);
        memtable.put("b", "3", 4);

        let meta = write_level0_table(
            memtable.iter(),
            7,
            &store,
            &SSTableConfig::default(),
            MAX_SEQUENCE,
        )
        .unwrap()
        .unwrap();
        assert_eq!(meta.id, 7);
        assert_eq!(meta.entry_count, 2);
        assert_eq!(meta.smallest_seq, 3);
        assert_eq!(meta.largest_seq, 4);

        let table = open_table(&store, 7);
        assert!(table.get(b"a", MAX_SEQUENCE).unwrap().unwrap().is_tombstone());
        assert_eq!(table.get(b"b", MAX_SEQUENCE).unwrap().unwrap().value.as_ref(), b"3");
    }

    #[test]
    fn test_flush_respects_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();

        let memtable = MemTable::new(1, 1);
        memtable.put("k", "v1", 1);
        memtable.put("k", "v2", 2);
        memtable.put("k", "v3", 3);

        let meta = write_level0_table(memtable.iter(), 1, &store, &SSTableConfig::default(), 2)
            .unwrap()
            .unwrap();
        // v3 is newest, v2 is what the snapshot at 2 sees, v1 is hidden
        assert_eq!(meta.entry_count, 2);
    }

    #[test]
    fn test_empty_memtable_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();

        let memtable = MemTable::new(1, 1);
        let meta = write_level0_table(memtable.iter(), 1, &store, &SSTableConfig::default(), MAX_SEQUENCE)
            .unwrap();
        assert!(meta.is_none());
        assert!(store.list().unwrap().is_empty());
    }
}
