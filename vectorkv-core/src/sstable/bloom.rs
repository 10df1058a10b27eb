//! Bloom filter for fast existence checks

use crate::{KvError, Result};
use xxhash_rust::xxh3::xxh3_128;

/// Bloom filter over user keys, probed with double hashing
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomFilter {
    /// Create a new bloom filter sized for `num_keys`
    pub fn new(num_keys: usize, bits_per_key: usize) -> Self {
        // Tiny filters have a poor false positive rate
        let num_bits = (num_keys * bits_per_key).max(64);
        let num_bytes = (num_bits + 7) / 8;

        // Optimal number of hash functions
        let num_hashes = ((bits_per_key as f64) * 0.69).round() as usize;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Build a filter from every key in `keys`
    pub fn from_keys<'a>(keys: impl ExactSizeIterator<Item = &'a [u8]>, bits_per_key: usize) -> Self {
        let mut filter = Self::new(keys.len(), bits_per_key);
        for key in keys {
            filter.add(key);
        }
        filter
    }

    /// Add a key to the filter
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);

        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// Check if a key may be in the set
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);

        (0..self.num_hashes).all(|i| {
            let bit = self.bit_position(h1, h2, i);
            (self.bits[bit / 8] >> (bit % 8)) & 1 == 1
        })
    }

    /// Serialize as the bit array followed by the hash count
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len() + 1);
        out.extend_from_slice(&self.bits);
        out.push(self.num_hashes as u8);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((&num_hashes, bits)) = data.split_last() else {
            return Err(KvError::Corruption("empty bloom filter".into()));
        };
        if bits.is_empty() || num_hashes == 0 {
            return Err(KvError::Corruption("invalid bloom filter".into()));
        }
        Ok(Self {
            bits: bits.to_vec(),
            num_bits: bits.len() * 8,
            num_hashes: num_hashes as usize,
        })
    }

    /// Get number of hash functions
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Size of the bit array in bytes
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    /// Estimated false positive rate
    pub fn false_positive_rate(&self, num_keys: usize) -> f64 {
        let k = self.num_hashes as f64;
        let m = self.num_bits as f64;
        let n = num_keys as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }

    /// Split one 128-bit hash into the two halves used for double hashing.
    /// The hash is stable across builds, which matters for persisted filters.
    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash = xxh3_128(key);
        (hash as u64, (hash >> 64) as u64)
    }

    fn bit_position(&self, h1: u64, h2: u64, i: usize) -> usize {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash % self.num_bits as u64) as usize
    }
}
