//! Table properties block

use crate::compression::CompressionType;
use crate::{Result, SequenceNumber};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Summary statistics stored in every table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProperties {
    pub num_entries: u64,
    pub num_deletions: u64,
    pub num_data_blocks: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub data_size: u64,
    pub index_size: u64,
    pub filter_size: u64,
    pub smallest_key: Bytes,
    pub largest_key: Bytes,
    pub smallest_seq: SequenceNumber,
    pub largest_seq: SequenceNumber,
    pub compression: CompressionType,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at: i64,
}

impl Default for TableProperties {
    fn default() -> Self {
        Self {
            num_entries: 0,
            num_deletions: 0,
            num_data_blocks: 0,
            raw_key_size: 0,
            raw_value_size: 0,
            data_size: 0,
            index_size: 0,
            filter_size: 0,
            smallest_key: Bytes::new(),
            largest_key: Bytes::new(),
            smallest_seq: SequenceNumber::MAX,
            largest_seq: 0,
            compression: CompressionType::None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl TableProperties {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
