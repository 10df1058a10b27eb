use super::{to_record, MemTable};
use crate::{InternalKey, Record, MAX_SEQUENCE};
use bytes::Bytes;
use std::ops::Bound;
use std::sync::Arc;

/// Range iterator over a MemTable.
///
/// Holds only the table and a cursor key, so it can outlive any borrow of
/// the skip list and be repositioned with [`seek`](Self::seek) or
/// [`rewind`](Self::rewind). Each step is a skip-list lookup after the
/// last returned key.
pub struct MemTableIter {
    table: Arc<MemTable>,
    start: Bound<Bytes>,
    end: Bound<Bytes>,
    cursor: Bound<InternalKey>,
    done: bool,
}

impl MemTableIter {
    pub(super) fn new(table: Arc<MemTable>, start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        let cursor = lower_cursor(&start);
        Self {
            table,
            start,
            end,
            cursor,
            done: false,
        }
    }

    /// Restart from the beginning of the range
    pub fn rewind(&mut self) {
        self.cursor = lower_cursor(&self.start);
        self.done = false;
    }

    /// Position at the first entry whose user key is `>= key`
    pub fn seek(&mut self, key: &[u8]) {
        let target = Bound::Included(Bytes::copy_from_slice(key));
        self.cursor = match (&self.start, &target) {
            (Bound::Included(s), Bound::Included(k)) if s > k => lower_cursor(&self.start),
            (Bound::Excluded(s), Bound::Included(k)) if s >= k => lower_cursor(&self.start),
            _ => lower_cursor(&target),
        };
        self.done = false;
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Included(end) => key > end.as_ref(),
            Bound::Excluded(end) => key >= end.as_ref(),
            Bound::Unbounded => false,
        }
    }
}

fn lower_cursor(start: &Bound<Bytes>) -> Bound<InternalKey> {
    match start {
        Bound::Included(key) => Bound::Included(InternalKey::new(key.clone(), MAX_SEQUENCE)),
        // (key, 0) is the last internal key for `key`
        Bound::Excluded(key) => Bound::Excluded(InternalKey::new(key.clone(), 0)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl Iterator for MemTableIter {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.done {
            return None;
        }

        let Some(entry) = self.table.map.lower_bound(self.cursor.as_ref()) else {
            self.done = true;
            return None;
        };
        if self.past_end(&entry.key().user_key) {
            self.done = true;
            return None;
        }

        let record = to_record(entry.key(), entry.value());
        self.cursor = Bound::Excluded(entry.key().clone());
        Some(record)
    }
}
