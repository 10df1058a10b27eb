//! SSTable reader for querying data

use super::block::{open_block, Block, BlockHandle};
use super::{
    BlockCache, BloomFilter, RandomAccessFile, TableIter, TableProperties, FOOTER_SIZE,
    FORMAT_VERSION, TABLE_MAGIC,
};
use crate::{InternalKey, KvError, Record, Result, SequenceNumber};
use bytes::{Buf, Bytes};
use std::sync::Arc;

/// Index entry: first internal key of a block and its location
#[derive(Debug, Clone)]
struct IndexEntry {
    first_key: InternalKey,
    handle: BlockHandle,
}

/// SSTable reader
///
/// Opening reads the footer, index, filter, and properties; data blocks
/// are read on demand through the shared block cache.
pub struct SSTableReader {
    id: u64,
    file: Arc<dyn RandomAccessFile>,
    index: Vec<IndexEntry>,
    bloom_filter: Option<BloomFilter>,
    properties: TableProperties,
    cache: Option<Arc<BlockCache>>,
}

impl SSTableReader {
    /// Open an SSTable file
    pub fn open(
        id: u64,
        file: Arc<dyn RandomAccessFile>,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let file_size = file.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(KvError::Corruption(format!(
                "table {} is {} bytes, shorter than its footer",
                id, file_size
            )));
        }

        // Read footer
        let footer = file.read_at(file_size - FOOTER_SIZE as u64, FOOTER_SIZE)?;
        let mut cursor = &footer[..];
        let filter_handle = BlockHandle::decode_from(&mut cursor);
        let index_handle = BlockHandle::decode_from(&mut cursor);
        let props_handle = BlockHandle::decode_from(&mut cursor);
        let version = cursor.get_u32_le();
        let magic = cursor.get_u32_le();

        // Verify magic
        if magic != TABLE_MAGIC {
            return Err(KvError::Corruption(format!("table {} has bad magic", id)));
        }
        if version != FORMAT_VERSION {
            return Err(KvError::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let data_end = file_size - FOOTER_SIZE as u64;
        for handle in [filter_handle, index_handle, props_handle] {
            if handle.size > 0 {
                handle.check_within(data_end)?;
            }
        }

        // Read index
        let index_data = Self::read_meta_block(&*file, index_handle)?;
        let index = Self::parse_index(&index_data)?;

        // Read bloom filter
        let bloom_filter = if filter_handle.size > 0 {
            let data = Self::read_meta_block(&*file, filter_handle)?;
            Some(BloomFilter::decode(&data)?)
        } else {
            None
        };

        let properties = TableProperties::decode(&Self::read_meta_block(&*file, props_handle)?)?;

        Ok(Self {
            id,
            file,
            index,
            bloom_filter,
            properties,
            cache,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }

    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    /// Check if the table may contain `key` (bloom filter check)
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if key < self.properties.smallest_key.as_ref() || key > self.properties.largest_key.as_ref()
        {
            return false;
        }
        self.bloom_filter
            .as_ref()
            .map_or(true, |filter| filter.may_contain(key))
    }

    /// Newest version of `key` visible at `read_seq`
    pub fn get(&self, key: &[u8], read_seq: SequenceNumber) -> Result<Option<Record>> {
        if !self.may_contain(key) {
            return Ok(None);
        }

        let target = InternalKey::seek_key(key, read_seq);
        let mut block_idx = self.find_block(&target);

        // A key's versions may continue into the next block
        while block_idx < self.index.len() {
            let block = self.read_block(block_idx)?;
            let pos = block.seek(&target);
            if let Some(record) = block.record(pos) {
                return Ok((record.key == key).then(|| record.clone()));
            }
            block_idx += 1;
        }

        Ok(None)
    }

    /// Iterate all records in internal-key order
    pub fn iter(self: &Arc<Self>) -> TableIter {
        TableIter::new(Arc::clone(self))
    }

    /// Block that may hold the first entry `>= target`
    pub(crate) fn find_block(&self, target: &InternalKey) -> usize {
        self.index
            .partition_point(|entry| entry.first_key <= *target)
            .saturating_sub(1)
    }

    /// Load data block `idx`, consulting the block cache first
    pub(crate) fn read_block(&self, idx: usize) -> Result<Arc<Block>> {
        let handle = self.index[idx].handle;

        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(self.id, handle.offset) {
                return Ok(block);
            }
        }

        handle.check_within(self.file.len())?;
        let raw = self.file.read_at(handle.offset, handle.read_len()?)?;
        let block = Arc::new(Block::decode(&open_block(&raw)?)?);

        if let Some(cache) = &self.cache {
            cache.insert(self.id, handle.offset, Arc::clone(&block));
        }

        Ok(block)
    }

    fn read_meta_block(file: &dyn RandomAccessFile, handle: BlockHandle) -> Result<Vec<u8>> {
        let raw = file.read_at(handle.offset, handle.read_len()?)?;
        open_block(&raw)
    }

    fn parse_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
        let truncated = || KvError::Corruption("truncated index block".into());

        let mut cursor = data;
        if cursor.remaining() < 4 {
            return Err(truncated());
        }
        let count = cursor.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count.min(data.len()));

        for _ in 0..count {
            if cursor.remaining() < 4 {
                return Err(truncated());
            }
            let key_len = cursor.get_u32_le() as usize;
            if cursor.remaining() < key_len + 24 {
                return Err(truncated());
            }
            let user_key = Bytes::copy_from_slice(&cursor[..key_len]);
            cursor.advance(key_len);
            let seq = cursor.get_u64_le();
            let handle = BlockHandle::decode_from(&mut cursor);

            entries.push(IndexEntry {
                first_key: InternalKey::new(user_key, seq),
                handle,
            });
        }

        Ok(entries)
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("id", &self.id)
            .field("blocks", &self.index.len())
            .field("entries", &self.properties.num_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::test_util::{build_table, open_table};
    use crate::sstable::{open_table_store, SSTableConfig, StoreBackend, TableStore};
    use crate::MAX_SEQUENCE;
    use tempfile::TempDir;

    fn small_blocks() -> SSTableConfig {
        SSTableConfig {
            block_size: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_get_across_blocks() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();

        let records: Vec<_> = (0..500u64)
            .map(|i| Record::put(format!("key-{:05}", i), format!("value-{}", i), i + 1))
            .collect();
        build_table(&store, 1, &records, &small_blocks());
        let table = open_table(&store, 1);

        assert!(table.num_blocks() > 10);
        for record in records.iter().step_by(37) {
            let found = table.get(&record.key, MAX_SEQUENCE).unwrap().unwrap();
            assert_eq!(&found, record);
        }
        assert!(table.get(b"key-00010", 5).unwrap().is_none());
        assert!(table.get(b"key-00010x", MAX_SEQUENCE).unwrap().is_none());
        assert!(table.get(b"zzz", MAX_SEQUENCE).unwrap().is_none());
    }

    #[test]
    fn test_versions_spanning_block_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();

        // Many versions of one key force it across several blocks
        let mut records = vec![Record::put("a", "first", 1)];
        for seq in (10..100u64).rev() {
            records.push(Record::put("hot", format!("v{}", seq), seq));
        }
        records.push(Record::put("z", "last", 2));
        build_table(&store, 1, &records, &small_blocks());
        let table = open_table(&store, 1);

        assert!(table.num_blocks() > 2);
        let newest = table.get(b"hot", MAX_SEQUENCE).unwrap().unwrap();
        assert_eq!(newest.seq, 99);
        let older = table.get(b"hot", 42).unwrap().unwrap();
        assert_eq!(older.value, Bytes::from("v42"));
        assert!(table.get(b"hot", 9).unwrap().is_none());
    }

    #[test]
    fn test_tombstone_is_returned() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        build_table(
            &store,
            1,
            &[Record::delete("a", 3), Record::put("a", "1", 1)],
            &SSTableConfig::default(),
        );
        let table = open_table(&store, 1);

        assert!(table.get(b"a", MAX_SEQUENCE).unwrap().unwrap().is_tombstone());
        assert_eq!(table.get(b"a", 2).unwrap().unwrap().value, Bytes::from("1"));
        assert_eq!(table.properties().num_deletions, 1);
    }

    #[test]
    fn test_corrupt_footer() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        build_table(&store, 1, &[Record::put("a", "1", 1)], &SSTableConfig::default());

        let path = temp_dir.path().join("000001.sst");
        let mut data = std::fs::read(&path).unwrap();
        let len = data.len();
        data[len - 1] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let result = SSTableReader::open(1, store.open(1).unwrap(), None);
        assert!(result.unwrap_err().is_corruption());
    }

    #[test]
    fn test_corrupt_block_handle_in_footer() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        build_table(&store, 1, &[Record::put("a", "1", 1)], &SSTableConfig::default());

        let path = temp_dir.path().join("000001.sst");
        let original = std::fs::read(&path).unwrap();
        let footer = original.len() - FOOTER_SIZE;

        // Index offset, then index size, pushed far past the end of the file
        for range in [footer + 16..footer + 24, footer + 24..footer + 32] {
            let mut data = original.clone();
            data[range].fill(0xFF);
            std::fs::write(&path, &data).unwrap();

            let result = SSTableReader::open(1, store.open(1).unwrap(), None);
            assert!(result.unwrap_err().is_corruption());
        }
    }

    #[test]
    fn test_block_cache_is_used() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_table_store(StoreBackend::Local, temp_dir.path()).unwrap();
        build_table(&store, 1, &[Record::put("a", "1", 1)], &SSTableConfig::default());

        let cache = Arc::new(BlockCache::new(1 << 20));
        let table = SSTableReader::open(1, store.open(1).unwrap(), Some(Arc::clone(&cache))).unwrap();
        table.get(b"a", MAX_SEQUENCE).unwrap();
        table.get(b"a", MAX_SEQUENCE).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }
}
