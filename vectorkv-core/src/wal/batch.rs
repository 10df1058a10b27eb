//! Atomic groups of writes

use crate::{validate_entry, KvError, Record, Result, SequenceNumber, ValueType};
use bytes::Bytes;

/// A single operation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOp {
    pub kind: ValueType,
    pub key: Bytes,
    pub value: Bytes,
}

/// Puts and deletes applied atomically: one WAL entry, consecutive
/// sequence numbers, made visible to readers together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> &mut Self {
        self.push(ValueType::Put, key.into(), value.into())
    }

    pub fn delete(&mut self, key: impl Into<Bytes>) -> &mut Self {
        self.push(ValueType::Delete, key.into(), Bytes::new())
    }

    fn push(&mut self, kind: ValueType, key: Bytes, value: Bytes) -> &mut Self {
        self.size += key.len() + value.len() + 9;
        self.ops.push(BatchOp { kind, key, value });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Approximate encoded size
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.size = 0;
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for op in &self.ops {
            let value = match op.kind {
                ValueType::Put => Some(op.value.as_ref()),
                ValueType::Delete => None,
            };
            validate_entry(&op.key, value)?;
        }
        if self.size > crate::config::MAX_BATCH_SIZE {
            return Err(KvError::InvalidArgument(format!(
                "batch of {} bytes exceeds limit of {}",
                self.size,
                crate::config::MAX_BATCH_SIZE
            )));
        }
        Ok(())
    }

    /// Records stamped with sequence numbers starting at `base_seq`
    pub fn records(&self, base_seq: SequenceNumber) -> impl Iterator<Item = Record> + '_ {
        self.ops.iter().enumerate().map(move |(i, op)| Record {
            key: op.key.clone(),
            seq: base_seq + i as u64,
            kind: op.kind,
            value: op.value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_records_are_consecutive() {
        let mut batch = WriteBatch::new();
        batch.put("a", "1").delete("b").put("c", "3");

        let records: Vec<_> = batch.records(10).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].seq, 10);
        assert!(records[1].is_tombstone());
        assert_eq!(records[2].seq, 12);
    }

    #[test]
    fn test_batch_rejects_empty_key() {
        let mut batch = WriteBatch::new();
        batch.put("", "v");
        assert!(batch.validate().is_err());

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.size(), 0);
    }

    #[test]
    fn test_batch_rejects_oversized_total() {
        // Clones share one buffer, so the batch is large only on paper
        let value = Bytes::from(vec![0u8; 64 * 1024 * 1024]);
        let mut batch = WriteBatch::new();
        for i in 0..15 {
            batch.put(format!("key-{}", i), value.clone());
        }
        assert!(batch.validate().is_ok());

        batch.put("one-too-many", value);
        assert!(batch.size() > crate::config::MAX_BATCH_SIZE);
        assert!(matches!(batch.validate(), Err(KvError::InvalidArgument(_))));
    }
}
