//! Core record types shared by the write and read paths

use crate::{KvError, Result};
use bytes::Bytes;
use std::cmp::Ordering;

/// Monotonically increasing write sequence number
pub type SequenceNumber = u64;

/// Sequence number that observes every committed write
pub const MAX_SEQUENCE: SequenceNumber = u64::MAX;

/// Kind of a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// Live value
    Put = 1,
    /// Tombstone
    Delete = 2,
}

impl TryFrom<u8> for ValueType {
    type Error = KvError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ValueType::Put),
            2 => Ok(ValueType::Delete),
            _ => Err(KvError::InvalidFormat(format!(
                "Invalid value type: {}",
                value
            ))),
        }
    }
}

/// A versioned key-value pair or tombstone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub seq: SequenceNumber,
    pub kind: ValueType,
    /// Empty for tombstones
    pub value: Bytes,
}

impl Record {
    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>, seq: SequenceNumber) -> Self {
        Self {
            key: key.into(),
            seq,
            kind: ValueType::Put,
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Bytes>, seq: SequenceNumber) -> Self {
        Self {
            key: key.into(),
            seq,
            kind: ValueType::Delete,
            value: Bytes::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == ValueType::Delete
    }

    /// The value, or `None` for a tombstone
    pub fn value(&self) -> Option<&Bytes> {
        match self.kind {
            ValueType::Put => Some(&self.value),
            ValueType::Delete => None,
        }
    }

    /// Approximate in-memory footprint
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len() + 9
    }

    pub fn internal_key(&self) -> InternalKey {
        InternalKey::new(self.key.clone(), self.seq)
    }

    /// Order by internal key
    pub fn cmp_internal(&self, other: &Record) -> Ordering {
        compare_internal(&self.key, self.seq, &other.key, other.seq)
    }
}

/// `(user_key, seq)` ordered by key ascending, then seq descending, so the
/// newest version of a key sorts first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    pub user_key: Bytes,
    pub seq: SequenceNumber,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Bytes>, seq: SequenceNumber) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
        }
    }

    /// Smallest internal key for `user_key` visible at `seq`
    pub fn seek_key(user_key: &[u8], seq: SequenceNumber) -> Self {
        Self::new(Bytes::copy_from_slice(user_key), seq)
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_internal(&self.user_key, self.seq, &other.user_key, other.seq)
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn compare_internal(
    a_key: &[u8],
    a_seq: SequenceNumber,
    b_key: &[u8],
    b_seq: SequenceNumber,
) -> Ordering {
    a_key.cmp(b_key).then_with(|| b_seq.cmp(&a_seq))
}

/// Reject keys and values that the on-disk encodings cannot carry
pub fn validate_entry(key: &[u8], value: Option<&[u8]>) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > crate::config::MAX_KEY_SIZE {
        return Err(KvError::InvalidArgument(format!(
            "key of {} bytes exceeds limit of {}",
            key.len(),
            crate::config::MAX_KEY_SIZE
        )));
    }
    if let Some(value) = value {
        if value.len() > crate::config::MAX_VALUE_SIZE {
            return Err(KvError::InvalidArgument(format!(
                "value of {} bytes exceeds limit of {}",
                value.len(),
                crate::config::MAX_VALUE_SIZE
            )));
        }
    }
    Ok(())
}
