//! MemTable implementation using a lock-free skip list
//!
//! The MemTable stores recent writes ordered by internal key (user key
//! ascending, sequence descending). Every version is kept; readers pick the
//! newest one visible at their read sequence. The single writer inserts
//! without blocking concurrent readers.

mod iter;

pub use iter::MemTableIter;

use crate::{InternalKey, Record, SequenceNumber, ValueType};
use bytes::Bytes;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-entry bookkeeping added to the size estimate
const ENTRY_OVERHEAD: usize = 32;

/// MemTable for in-memory writes
pub struct MemTable {
    map: SkipMap<InternalKey, (ValueType, Bytes)>,
    /// Approximate size in bytes
    size_bytes: AtomicUsize,
    /// Unique ID for this memtable
    id: u64,
    /// WAL file holding this memtable's writes
    log_number: u64,
}

impl MemTable {
    /// Create a new MemTable backed by WAL `log_number`
    pub fn new(id: u64, log_number: u64) -> Self {
        Self {
            map: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
            id,
            log_number,
        }
    }

    /// Get the MemTable ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn put(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, seq: SequenceNumber) {
        self.insert(Record::put(key, value, seq));
    }

    pub fn delete(&self, key: impl Into<Bytes>, seq: SequenceNumber) {
        self.insert(Record::delete(key, seq));
    }

    /// Insert a record
    pub fn insert(&self, record: Record) {
        let entry_size = record.size() + ENTRY_OVERHEAD;
        self.map.insert(
            InternalKey::new(record.key, record.seq),
            (record.kind, record.value),
        );
        self.size_bytes.fetch_add(entry_size, Ordering::Relaxed);
    }

    /// Newest version of `key` with a sequence number at most `read_seq`.
    /// A returned tombstone means the key is deleted as of `read_seq`.
    pub fn get(&self, key: &[u8], read_seq: SequenceNumber) -> Option<Record> {
        let target = InternalKey::seek_key(key, read_seq);
        let entry = self.map.lower_bound(Bound::Included(&target))?;
        if entry.key().user_key != key {
            return None;
        }
        Some(to_record(entry.key(), entry.value()))
    }

    /// Lazy iterator over every version in `[start, end)` user-key bounds
    pub fn scan(self: &Arc<Self>, start: Bound<Bytes>, end: Bound<Bytes>) -> MemTableIter {
        MemTableIter::new(Arc::clone(self), start, end)
    }

    /// Iterate all entries in internal-key order
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.map.iter().map(|entry| to_record(entry.key(), entry.value()))
    }

    /// Check if the MemTable should be flushed
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() >= size_limit
    }

    /// Get the current size in bytes
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Highest sequence number stored, if any
    pub fn max_seq(&self) -> Option<SequenceNumber> {
        self.map.iter().map(|entry| entry.key().seq).max()
    }
}

fn to_record(key: &InternalKey, value: &(ValueType, Bytes)) -> Record {
    Record {
        key: key.user_key.clone(),
        seq: key.seq,
        kind: value.0,
        value: value.1.clone(),
    }
}

/// Frozen MemTable waiting to be flushed.
///
/// Shares storage with the table it froze, so readers that captured the
/// active table keep seeing the same data.
#[derive(Clone)]
pub struct ImmutableMemTable {
    inner: Arc<MemTable>,
}

impl ImmutableMemTable {
    /// Freeze a MemTable
    pub fn new(memtable: Arc<MemTable>) -> Self {
        Self { inner: memtable }
    }

    /// Get the MemTable ID
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    pub fn log_number(&self) -> u64 {
        self.inner.log_number()
    }

    /// Get the size
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, key: &[u8], read_seq: SequenceNumber) -> Option<Record> {
        self.inner.get(key, read_seq)
    }

    pub fn scan(&self, start: Bound<Bytes>, end: Bound<Bytes>) -> MemTableIter {
        self.inner.scan(start, end)
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.inner.iter()
    }

    pub fn max_seq(&self) -> Option<SequenceNumber> {
        self.inner.max_seq()
    }
}
