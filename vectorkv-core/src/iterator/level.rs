//! Concatenating iterator over the tables of one sorted run

use crate::sstable::TableIter;
use crate::version::TableHandle;
use crate::{InternalKey, Record, Result};
use std::sync::Arc;

/// Walks tables with disjoint, ascending key ranges one after another.
///
/// A table is only opened when the iterator reaches it, so a scan that
/// stops early never touches the rest of the level.
pub struct LevelIter {
    tables: Vec<Arc<TableHandle>>,
    next_table: usize,
    current: Option<TableIter>,
    /// Applied to the first table opened
    seek_target: Option<InternalKey>,
    done: bool,
}

impl LevelIter {
    /// Iterate `tables` from the first record `>= start`
    pub fn new(tables: Vec<Arc<TableHandle>>, start: Option<InternalKey>) -> Self {
        let next_table = match &start {
            Some(target) => tables
                .partition_point(|t| t.meta().largest_key.as_ref() < target.user_key.as_ref()),
            None => 0,
        };

        Self {
            tables,
            next_table,
            current: None,
            seek_target: start,
            done: false,
        }
    }

    fn open_next(&mut self) -> Result<bool> {
        let Some(table) = self.tables.get(self.next_table) else {
            return Ok(false);
        };
        self.next_table += 1;

        let mut iter = table.iter()?;
        if let Some(target) = self.seek_target.take() {
            iter.seek(&target)?;
        }
        self.current = Some(iter);
        Ok(true)
    }
}

impl Iterator for LevelIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.done {
            return None;
        }

        loop {
            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok(record)) => return Some(Ok(record)),
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }

            match self.open_next() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{open_table_store, StoreBackend, TableStore};
    use crate::version::test_util::table;
    use crate::MAX_SEQUENCE;
    use tempfile::TempDir;

    fn level(store: &Arc<dyn TableStore>) -> Vec<Arc<TableHandle>> {
        let ranges = [("a", "c"), ("d", "f"), ("g", "i")];
        ranges
            .iter()
            .enumerate()
            .map(|(i, (lo, hi))| {
                let meta = table(
                    store,
                    i as u64 + 1,
                    &[Record::put(*lo, "v", 1), Record::put(*hi, "v", 1)],
                );
                Arc::new(TableHandle::new(meta, Arc::clone(store), None))
            })
            .collect()
    }

    fn keys(iter: LevelIter) -> Vec<String> {
        iter.map(|r| String::from_utf8(r.unwrap().key.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_concatenates_tables() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        let tables = level(&store);

        assert_eq!(keys(LevelIter::new(tables, None)), ["a", "c", "d", "f", "g", "i"]);
    }

    #[test]
    fn test_start_skips_earlier_tables() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        let tables = level(&store);

        let start = InternalKey::new("e", MAX_SEQUENCE);
        assert_eq!(keys(LevelIter::new(tables.clone(), Some(start))), ["f", "g", "i"]);

        let past = InternalKey::new("z", MAX_SEQUENCE);
        assert!(keys(LevelIter::new(tables, Some(past))).is_empty());
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        let tables = level(&store);
        store.remove(2).unwrap();

        let results: Vec<_> = LevelIter::new(tables, None).collect();
        assert_eq!(results.len(), 3);
        assert!(results[2].is_err());
    }
}
