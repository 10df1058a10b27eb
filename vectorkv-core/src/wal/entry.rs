//! WAL entry types and serialization

use super::WriteBatch;
use crate::{KvError, Record, Result, SequenceNumber, ValueType};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Bytes of framing around every entry body
pub const FRAME_OVERHEAD: usize = 8;

/// Wrap `body` with a length prefix and CRC32 checksum.
///
/// Format:
/// - 4 bytes: frame length (body + checksum, excluding this field)
/// - N bytes: body
/// - 4 bytes: CRC32 of body
///
/// The manifest log uses the same framing for its records. Bodies are
/// bounded by [`MAX_BATCH_SIZE`](crate::config::MAX_BATCH_SIZE).
pub fn encode_frame(body: &[u8]) -> Bytes {
    debug_assert!(body.len() + 4 <= u32::MAX as usize);
    let mut buf = BytesMut::with_capacity(body.len() + FRAME_OVERHEAD);
    buf.put_u32_le((body.len() + 4) as u32);
    buf.put_slice(body);
    buf.put_u32_le(crc32fast::hash(body));
    buf.freeze()
}

/// Decode one frame from the front of `data`.
///
/// Returns `Ok(None)` when `data` ends before the frame does (a torn
/// tail), and `ChecksumMismatch` when the stored checksum disagrees.
pub fn decode_frame(data: &[u8]) -> Result<Option<(&[u8], usize)>> {
    if data.len() < 4 {
        return Ok(None);
    }

    let len = (&data[..4]).get_u32_le() as usize;
    if len < 4 {
        return Err(KvError::Corruption(format!("frame length {} too short", len)));
    }
    if data.len() < 4 + len {
        return Ok(None);
    }

    let frame = &data[4..4 + len];
    let body = &frame[..len - 4];
    let expected = (&frame[len - 4..]).get_u32_le();
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(KvError::ChecksumMismatch { expected, actual });
    }

    Ok(Some((body, 4 + len)))
}

/// A single WAL entry: one write batch stamped with its first sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub base_seq: SequenceNumber,
    pub batch: WriteBatch,
}

impl WalEntry {
    pub fn new(base_seq: SequenceNumber, batch: WriteBatch) -> Self {
        Self { base_seq, batch }
    }

    /// Sequence number of the last operation in the entry
    pub fn last_seq(&self) -> SequenceNumber {
        self.base_seq + self.batch.len().saturating_sub(1) as u64
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.batch.records(self.base_seq)
    }

    /// Serialize the entry inside a checksummed frame
    ///
    /// Body format:
    /// - 8 bytes: base sequence number
    /// - 4 bytes: operation count
    /// - per operation: kind (1 byte), key length (4), key, and for puts
    ///   value length (4) and value
    pub fn serialize_with_checksum(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(self.batch.size() + 12);
        body.put_u64_le(self.base_seq);
        body.put_u32_le(self.batch.len() as u32);

        for op in self.batch.ops() {
            body.put_u8(op.kind as u8);
            body.put_u32_le(op.key.len() as u32);
            body.put_slice(&op.key);
            if op.kind == ValueType::Put {
                body.put_u32_le(op.value.len() as u32);
                body.put_slice(&op.value);
            }
        }

        encode_frame(&body)
    }

    /// Deserialize an entry from the front of `data`, validating its checksum.
    ///
    /// Returns `Ok(None)` for an incomplete trailing entry.
    pub fn deserialize_with_checksum(data: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some((body, consumed)) = decode_frame(data)? else {
            return Ok(None);
        };
        Ok(Some((Self::decode_body(body)?, consumed)))
    }

    fn decode_body(mut body: &[u8]) -> Result<Self> {
        let malformed = || KvError::Corruption("malformed WAL entry body".into());

        if body.remaining() < 12 {
            return Err(malformed());
        }
        let base_seq = body.get_u64_le();
        let count = body.get_u32_le();

        let mut batch = WriteBatch::new();
        for _ in 0..count {
            if body.remaining() < 5 {
                return Err(malformed());
            }
            let kind = ValueType::try_from(body.get_u8())?;
            let key_len = body.get_u32_le() as usize;
            if body.remaining() < key_len {
                return Err(malformed());
            }
            let key = body.copy_to_bytes(key_len);

            match kind {
                ValueType::Put => {
                    if body.remaining() < 4 {
                        return Err(malformed());
                    }
                    let value_len = body.get_u32_le() as usize;
                    if body.remaining() < value_len {
                        return Err(malformed());
                    }
                    let value = body.copy_to_bytes(value_len);
                    batch.put(key, value);
                }
                ValueType::Delete => {
                    batch.delete(key);
                }
            }
        }

        if body.has_remaining() {
            return Err(malformed());
        }

        Ok(Self { base_seq, batch })
    }
}
