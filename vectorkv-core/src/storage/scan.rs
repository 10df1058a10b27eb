//! Range scans over the whole engine

use super::state::EngineState;
use crate::iterator::{memtable_source, DbIterator, LevelIter, MergeIterator, RecordIter};
use crate::{InternalKey, Result, SequenceNumber, MAX_SEQUENCE};
use bytes::Bytes;
use std::ops::Bound;
use std::sync::Arc;

/// Lazy iterator over the live keys in `[start, end)`, ascending.
///
/// Holds the memtables and Version it was created from, so flushes and
/// compactions that finish during the scan change nothing it returns and
/// the tables it reads stay on disk until it is dropped.
pub struct ScanIter {
    state: Arc<EngineState>,
    read_seq: SequenceNumber,
    start: Bytes,
    end: Bytes,
    inner: Option<DbIterator>,
}

impl ScanIter {
    pub(crate) fn new(
        state: Arc<EngineState>,
        read_seq: SequenceNumber,
        start: Bytes,
        end: Bytes,
    ) -> Self {
        let mut iter = Self {
            state,
            read_seq,
            start,
            end,
            inner: None,
        };
        iter.position(None);
        iter
    }

    /// Restart from the beginning of the range
    pub fn rewind(&mut self) {
        self.position(None);
    }

    /// Continue from the first key `>= key` (clamped to the range)
    pub fn seek(&mut self, key: &[u8]) {
        self.position(Some(key));
    }

    /// Sequence number the scan reads at
    pub fn sequence(&self) -> SequenceNumber {
        self.read_seq
    }

    fn position(&mut self, target: Option<&[u8]>) {
        let from = match target {
            Some(key) if key > self.start.as_ref() => Bytes::copy_from_slice(key),
            _ => self.start.clone(),
        };
        if from >= self.end {
            self.inner = None;
            return;
        }
        let merged = MergeIterator::new(self.sources(&from));
        self.inner = Some(DbIterator::new(merged, self.read_seq, Some(self.end.clone())));
    }

    /// One source per memtable and L0 table, one per deeper level, newest
    /// data first
    fn sources(&self, from: &Bytes) -> Vec<RecordIter> {
        let state = &self.state;
        let version = &state.version;
        let lower = || Bound::Included(from.clone());
        let upper = || Bound::Excluded(self.end.clone());
        let seek = || Some(InternalKey::new(from.clone(), MAX_SEQUENCE));

        let mut sources: Vec<RecordIter> =
            Vec::with_capacity(2 + state.immutables.len() + version.num_levels());
        sources.push(memtable_source(state.memtable.scan(lower(), upper())));
        for imm in &state.immutables {
            sources.push(memtable_source(imm.scan(lower(), upper())));
        }

        let end = Some(self.end.as_ref());
        for table in version.overlapping(0, Some(from.as_ref()), end) {
            sources.push(Box::new(LevelIter::new(vec![table], seek())));
        }
        for level in 1..version.num_levels() {
            let tables = version.overlapping(level, Some(from.as_ref()), end);
            if !tables.is_empty() {
                sources.push(Box::new(LevelIter::new(tables, seek())));
            }
        }
        sources
    }
}

impl Iterator for ScanIter {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.as_mut()?.next();
        if item.is_none() {
            self.inner = None;
        }
        item
    }
}
