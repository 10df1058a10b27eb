//! SSTable builder for writing sorted data to disk

use super::block::{seal_block, BlockBuilder, BlockHandle};
use super::{
    BloomFilter, SSTableConfig, SSTableMeta, TableFile, TableProperties, FORMAT_VERSION,
    TABLE_MAGIC,
};
use crate::{InternalKey, KvError, Record, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Write;
use tracing::warn;

/// Streams records, already in internal-key order, into a table file
pub struct SSTableBuilder {
    config: SSTableConfig,
    id: u64,
    file: Box<dyn TableFile>,
    offset: u64,

    // Current block
    data_block: BlockBuilder,
    block_first_key: Option<InternalKey>,

    // Index data
    index_entries: Vec<(InternalKey, BlockHandle)>,
    filter_keys: Vec<Bytes>,

    last_key: Option<InternalKey>,
    props: TableProperties,
}

impl SSTableBuilder {
    /// Create a new SSTable builder writing to `file`
    pub fn new(id: u64, file: Box<dyn TableFile>, config: SSTableConfig) -> Self {
        let data_block = BlockBuilder::new(config.block_restart_interval);
        let props = TableProperties {
            compression: config.compression,
            ..Default::default()
        };
        Self {
            config,
            id,
            file,
            offset: 0,
            data_block,
            block_first_key: None,
            index_entries: Vec::new(),
            filter_keys: Vec::new(),
            last_key: None,
            props,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Append a record. Records must be strictly increasing by internal key.
    pub fn add(&mut self, record: &Record) -> Result<()> {
        let key = record.internal_key();
        if let Some(last) = &self.last_key {
            if key <= *last {
                return Err(KvError::Internal(format!(
                    "out-of-order key {:?} after {:?} in table {}",
                    key, last, self.id
                )));
            }
            if last.user_key != key.user_key {
                self.filter_keys.push(key.user_key.clone());
            }
        } else {
            self.filter_keys.push(key.user_key.clone());
            self.props.smallest_key = key.user_key.clone();
        }

        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.clone());
        }
        self.data_block.add(record);

        self.props.num_entries += 1;
        if record.is_tombstone() {
            self.props.num_deletions += 1;
        }
        self.props.raw_key_size += record.key.len() as u64;
        self.props.raw_value_size += record.value.len() as u64;
        self.props.smallest_seq = self.props.smallest_seq.min(record.seq);
        self.props.largest_seq = self.props.largest_seq.max(record.seq);
        self.last_key = Some(key);

        if self.data_block.estimated_size() >= self.config.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Bytes written so far plus the pending block
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.data_block.estimated_size() as u64
    }

    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.props.num_entries == 0
    }

    /// The last user key added
    pub fn last_user_key(&self) -> Option<&Bytes> {
        self.last_key.as_ref().map(|k| &k.user_key)
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(
            &mut self.data_block,
            BlockBuilder::new(self.config.block_restart_interval),
        );
        let handle = self.write_block(&block.finish())?;
        if let Some(first_key) = self.block_first_key.take() {
            self.index_entries.push((first_key, handle));
        }
        self.props.num_data_blocks += 1;
        Ok(())
    }

    fn write_block(&mut self, payload: &[u8]) -> Result<BlockHandle> {
        let sealed = seal_block(payload, self.config.compression);
        self.write_raw(&sealed)
    }

    fn write_raw(&mut self, sealed: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle::new(
            self.offset,
            (sealed.len() - super::BLOCK_TRAILER_SIZE) as u64,
        );
        self.file.write_all(sealed)?;
        self.offset += sealed.len() as u64;
        Ok(handle)
    }

    /// Finish building, sync, and publish the table. On failure the
    /// unfinished file is removed.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        if self.is_empty() {
            let id = self.id;
            self.abandon()?;
            return Err(KvError::Internal(format!("table {} has no entries", id)));
        }
        if let Err(e) = self.write_tail() {
            if let Err(abandon_err) = self.file.abandon() {
                warn!("Failed to remove unfinished table {}: {}", self.id, abandon_err);
            }
            return Err(e);
        }

        let file_size = self.file.finish()?;
        debug_assert_eq!(file_size, self.offset);

        Ok(SSTableMeta {
            id: self.id,
            file_size,
            entry_count: self.props.num_entries,
            smallest_key: self.props.smallest_key,
            largest_key: self.props.largest_key,
            smallest_seq: self.props.smallest_seq,
            largest_seq: self.props.largest_seq,
        })
    }

    /// Discard the table without publishing it
    pub fn abandon(self) -> Result<()> {
        self.file.abandon()
    }

    /// Last data block, filter, index, properties, and footer
    fn write_tail(&mut self) -> Result<()> {
        self.flush_block()?;
        self.props.data_size = self.offset;

        // Filter block
        let filter_handle = if self.config.bloom_bits_per_key > 0 {
            let filter = BloomFilter::from_keys(
                self.filter_keys.iter().map(|k| k.as_ref()),
                self.config.bloom_bits_per_key,
            );
            // Filter bits are random; compressing them gains nothing
            let handle = self.write_raw(&seal_block(
                &filter.encode(),
                crate::compression::CompressionType::None,
            ))?;
            self.props.filter_size = handle.size;
            handle
        } else {
            BlockHandle::default()
        };

        // Index block
        let mut index = BytesMut::new();
        index.put_u32_le(self.index_entries.len() as u32);
        for (first_key, handle) in &self.index_entries {
            index.put_u32_le(first_key.user_key.len() as u32);
            index.put_slice(&first_key.user_key);
            index.put_u64_le(first_key.seq);
            handle.encode_to(&mut index);
        }
        let index_handle = self.write_block(&index)?;
        self.props.index_size = index_handle.size;

        // Properties block
        if let Some(last) = &self.last_key {
            self.props.largest_key = last.user_key.clone();
        }
        let props_handle = self.write_block(&self.props.encode()?)?;

        // Footer
        let mut footer = BytesMut::with_capacity(super::FOOTER_SIZE);
        filter_handle.encode_to(&mut footer);
        index_handle.encode_to(&mut footer);
        props_handle.encode_to(&mut footer);
        footer.put_u32_le(FORMAT_VERSION);
        footer.put_u32_le(TABLE_MAGIC);
        self.file.write_all(&footer)?;
        self.offset += footer.len() as u64;
        Ok(())
    }
}
