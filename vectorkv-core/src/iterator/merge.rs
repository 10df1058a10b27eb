//! K-way merge by internal key

use super::RecordIter;
use crate::{KvError, Record, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Head record of one source
struct HeapEntry {
    record: Record,
    /// Position in the source list; lower is newer
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse so the smallest internal key,
        // then the newest source, is on top
        other
            .record
            .cmp_internal(&self.record)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sources into one stream in internal-key order.
///
/// Every version from every source is emitted; callers decide what is
/// visible. Sources must be ordered newest first so equal internal keys
/// come out newest source first. The first source error is yielded once
/// and ends the stream.
pub struct MergeIterator {
    sources: Vec<RecordIter>,
    heap: BinaryHeap<HeapEntry>,
    error: Option<KvError>,
    done: bool,
}

impl MergeIterator {
    pub fn new(mut sources: Vec<RecordIter>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut error = None;

        for (source, iter) in sources.iter_mut().enumerate() {
            match iter.next() {
                Some(Ok(record)) => heap.push(HeapEntry { record, source }),
                Some(Err(e)) => {
                    error = Some(e);
                    break;
                }
                None => {}
            }
        }

        Self {
            sources,
            heap,
            error,
            done: false,
        }
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.done {
            return None;
        }
        if let Some(e) = self.error.take() {
            self.done = true;
            return Some(Err(e));
        }

        let Some(top) = self.heap.pop() else {
            self.done = true;
            return None;
        };

        match self.sources[top.source].next() {
            Some(Ok(record)) => self.heap.push(HeapEntry {
                record,
                source: top.source,
            }),
            Some(Err(e)) => self.error = Some(e),
            None => {}
        }

        Some(Ok(top.record))
    }
}
