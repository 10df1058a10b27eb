//! Garbage collection of shadowed versions and tombstones

use crate::{Record, SequenceNumber, MAX_SEQUENCE};
use bytes::Bytes;

/// Decides which records of an internal-key-ordered stream survive a flush
/// or compaction.
///
/// A version is dropped when a newer version of the same key is visible to
/// the oldest live snapshot. A tombstone visible to every snapshot is dropped
/// when the caller confirms nothing older of that key can exist below the
/// output.
#[derive(Debug)]
pub struct GcFilter {
    smallest_snapshot: SequenceNumber,
    current_key: Option<Bytes>,
    /// Sequence of the previous record with the same user key
    last_seq_for_key: SequenceNumber,
    dropped: u64,
}

impl GcFilter {
    pub fn new(smallest_snapshot: SequenceNumber) -> Self {
        Self {
            smallest_snapshot,
            current_key: None,
            last_seq_for_key: MAX_SEQUENCE,
            dropped: 0,
        }
    }

    /// Whether `record` must be written to the output.
    ///
    /// `is_base_level` is asked only for droppable tombstones and must
    /// return true when no deeper table may hold the key.
    pub fn keep(&mut self, record: &Record, is_base_level: impl FnOnce(&[u8]) -> bool) -> bool {
        if self.current_key.as_ref() != Some(&record.key) {
            self.current_key = Some(record.key.clone());
            self.last_seq_for_key = MAX_SEQUENCE;
        }

        let drop = if self.last_seq_for_key <= self.smallest_snapshot {
            true
        } else {
            record.is_tombstone()
                && record.seq <= self.smallest_snapshot
                && is_base_level(&record.key)
        };

        self.last_seq_for_key = record.seq;
        if drop {
            self.dropped += 1;
        }
        !drop
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
