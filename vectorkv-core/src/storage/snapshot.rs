//! Read snapshots pinned to a sequence number

use crate::SequenceNumber;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live snapshots by sequence number, with a count per sequence
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    live: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    /// Pin the sequence currently in `visible`.
    ///
    /// The load happens under the list lock, so a concurrent
    /// [`gc_horizon`](Self::gc_horizon) either sees this snapshot or
    /// returns a sequence no newer than it.
    pub fn acquire(self: &Arc<Self>, visible: &AtomicU64) -> Snapshot {
        let mut live = self.live.lock();
        let seq = visible.load(Ordering::Acquire);
        *live.entry(seq).or_insert(0) += 1;
        Snapshot {
            seq,
            list: Arc::clone(self),
        }
    }

    fn release(&self, seq: SequenceNumber) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                live.remove(&seq);
            }
        }
    }

    /// Sequence of the oldest live snapshot
    #[cfg(test)]
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.live.lock().keys().next().copied()
    }

    /// Oldest sequence any reader may still ask for: the oldest snapshot,
    /// or the visible sequence when there is none
    pub fn gc_horizon(&self, visible: &AtomicU64) -> SequenceNumber {
        let live = self.live.lock();
        match live.keys().next() {
            Some(&seq) => seq,
            None => visible.load(Ordering::Acquire),
        }
    }

    pub fn len(&self) -> usize {
        self.live.lock().values().sum()
    }
}

/// A consistent read view. Reads through it see exactly the writes acknowledged
/// before it was taken; compaction keeps the versions it needs until it is
/// dropped.
#[derive(Debug)]
pub struct Snapshot {
    seq: SequenceNumber,
    list: Arc<SnapshotList>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.seq
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_tracks_live_snapshots() {
        let list = Arc::new(SnapshotList::default());
        let visible = AtomicU64::new(3);
        assert_eq!(list.oldest(), None);
        assert_eq!(list.gc_horizon(&visible), 3);

        let s3a = list.acquire(&visible);
        let s3b = list.acquire(&visible);
        visible.store(5, Ordering::Release);
        let s5 = list.acquire(&visible);
        visible.store(9, Ordering::Release);
        assert_eq!(list.oldest(), Some(3));
        assert_eq!(list.gc_horizon(&visible), 3);
        assert_eq!(list.len(), 3);

        drop(s3a);
        assert_eq!(list.oldest(), Some(3));
        drop(s3b);
        assert_eq!(list.oldest(), Some(5));
        assert_eq!(s5.sequence(), 5);
        drop(s5);
        assert_eq!(list.oldest(), None);
        assert_eq!(list.gc_horizon(&visible), 9);
        assert_eq!(list.len(), 0);
    }
}
