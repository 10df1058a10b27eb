//! SSTable data block implementation

use crate::compression::{self, CompressionType};
use crate::{InternalKey, KvError, Record, Result, ValueType};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Compression type byte plus CRC32
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block inside a table file (size excludes the trailer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
    }

    pub fn decode_from(buf: &mut impl Buf) -> Self {
        Self {
            offset: buf.get_u64_le(),
            size: buf.get_u64_le(),
        }
    }

    /// Bytes to read from the file, trailer included
    pub fn read_len(&self) -> Result<usize> {
        usize::try_from(self.size)
            .ok()
            .and_then(|size| size.checked_add(BLOCK_TRAILER_SIZE))
            .ok_or_else(|| KvError::Corruption(format!("block size {} out of range", self.size)))
    }

    /// Fail unless the block and its trailer lie within the first `limit` bytes
    pub fn check_within(&self, limit: u64) -> Result<()> {
        let end = self
            .offset
            .checked_add(self.size)
            .and_then(|end| end.checked_add(BLOCK_TRAILER_SIZE as u64));
        match end {
            Some(end) if end <= limit => Ok(()),
            _ => Err(KvError::Corruption(format!(
                "block at {} of {} bytes exceeds {} bytes",
                self.offset, self.size, limit
            ))),
        }
    }
}

/// Compress `payload` and append the trailer.
pub fn seal_block(payload: &[u8], codec: CompressionType) -> Bytes {
    let (codec, data) = compression::compress(payload, codec);
    let mut buf = BytesMut::with_capacity(data.len() + BLOCK_TRAILER_SIZE);
    buf.put_slice(&data);
    buf.put_u8(codec as u8);
    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf.freeze()
}

/// Verify the trailer of a raw block and return its decompressed payload.
pub fn open_block(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() < BLOCK_TRAILER_SIZE {
        return Err(KvError::Corruption("block too short".into()));
    }

    let body_end = raw.len() - 4;
    let expected = (&raw[body_end..]).get_u32_le();
    let actual = crc32fast::hash(&raw[..body_end]);
    if expected != actual {
        return Err(KvError::ChecksumMismatch { expected, actual });
    }

    let codec = CompressionType::try_from(raw[body_end - 1])?;
    compression::decompress(&raw[..body_end - 1], codec)
}

/// Block builder for writing records.
///
/// Keys are prefix-compressed against the previous key and fully stored
/// every `restart_interval` entries.
///
/// Entry format:
/// - 4 bytes: shared key prefix length
/// - 4 bytes: unshared key length
/// - 4 bytes: value length
/// - N bytes: unshared key suffix
/// - 8 bytes: sequence number
/// - 1 byte: value type
/// - N bytes: value
///
/// The block ends with the restart offsets (4 bytes each) and their count.
pub struct BlockBuilder {
    buf: BytesMut,
    restarts: Vec<u32>,
    last_key: Vec<u8>,
    restart_interval: usize,
    counter: usize,
    count: usize,
}

impl BlockBuilder {
    /// Create a new block builder
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            restarts: vec![0],
            last_key: Vec::new(),
            restart_interval: restart_interval.max(1),
            counter: 0,
            count: 0,
        }
    }

    /// Add a record; records must arrive in internal-key order
    pub fn add(&mut self, record: &Record) {
        let shared = if self.counter < self.restart_interval {
            self.last_key
                .iter()
                .zip(record.key.iter())
                .take_while(|(a, b)| a == b)
                .count()
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
            0
        };
        let unshared = &record.key[shared..];

        self.buf.put_u32_le(shared as u32);
        self.buf.put_u32_le(unshared.len() as u32);
        self.buf.put_u32_le(record.value.len() as u32);
        self.buf.put_slice(unshared);
        self.buf.put_u64_le(record.seq);
        self.buf.put_u8(record.kind as u8);
        self.buf.put_slice(&record.value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(unshared);
        self.counter += 1;
        self.count += 1;
    }

    /// Check if block has data
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.count
    }

    /// Size of the finished payload
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + self.restarts.len() * 4 + 4
    }

    /// Finish building and return the uncompressed payload
    pub fn finish(mut self) -> Bytes {
        for restart in &self.restarts {
            self.buf.put_u32_le(*restart);
        }
        self.buf.put_u32_le(self.restarts.len() as u32);
        self.buf.freeze()
    }
}

/// A decoded data block
#[derive(Debug)]
pub struct Block {
    records: Vec<Record>,
    /// Decoded payload size, charged against the block cache
    size: usize,
}

impl Block {
    /// Decode a block payload produced by [`BlockBuilder::finish`]
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let malformed = |what: &str| KvError::Corruption(format!("malformed block: {}", what));

        if payload.len() < 4 {
            return Err(malformed("missing restart count"));
        }
        let num_restarts = (&payload[payload.len() - 4..]).get_u32_le() as usize;
        let restarts_len = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .filter(|&n| n <= payload.len())
            .ok_or_else(|| malformed("restart array out of bounds"))?;
        let data_end = payload.len() - restarts_len;

        let mut data = &payload[..data_end];
        let mut records = Vec::new();
        let mut last_key: Vec<u8> = Vec::new();

        while data.has_remaining() {
            if data.remaining() < 12 {
                return Err(malformed("truncated entry header"));
            }
            let shared = data.get_u32_le() as usize;
            let unshared = data.get_u32_le() as usize;
            let value_len = data.get_u32_le() as usize;
            if shared > last_key.len() || data.remaining() < unshared + 9 + value_len {
                return Err(malformed("entry overruns block"));
            }

            last_key.truncate(shared);
            last_key.extend_from_slice(&data[..unshared]);
            data.advance(unshared);
            let seq = data.get_u64_le();
            let kind = ValueType::try_from(data.get_u8())?;
            let value = data.copy_to_bytes(value_len);

            records.push(Record {
                key: Bytes::copy_from_slice(&last_key),
                seq,
                kind,
                value,
            });
        }

        Ok(Self {
            records,
            size: payload.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn record(&self, idx: usize) -> Option<&Record> {
        self.records.get(idx)
    }

    /// Index of the first record at or after `target`
    pub fn seek(&self, target: &InternalKey) -> usize {
        self.records.partition_point(|r| {
            crate::compare_internal(&r.key, r.seq, &target.user_key, target.seq).is_lt()
        })
    }
}
