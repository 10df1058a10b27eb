//! Shared LRU cache of decoded data blocks

use super::Block;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const NUM_SHARDS: usize = 16;

/// (table id, block offset)
type CacheKey = (u64, u64);

/// Block cache shared by every open table, bounded by decoded bytes
pub struct BlockCache {
    shards: Vec<Mutex<LruShard>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub usage: usize,
}

struct LruShard {
    capacity: usize,
    usage: usize,
    tick: u64,
    entries: HashMap<CacheKey, (Arc<Block>, u64)>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, CacheKey>,
}

impl LruShard {
    fn get(&mut self, key: &CacheKey) -> Option<Arc<Block>> {
        self.tick += 1;
        let tick = self.tick;
        let (block, last_used) = self.entries.get_mut(key)?;
        self.order.remove(last_used);
        *last_used = tick;
        self.order.insert(tick, *key);
        Some(Arc::clone(block))
    }

    fn insert(&mut self, key: CacheKey, block: Arc<Block>) {
        if block.size() > self.capacity {
            return;
        }
        self.tick += 1;
        self.usage += block.size();
        if let Some((old, last_used)) = self.entries.insert(key, (block, self.tick)) {
            self.usage -= old.size();
            self.order.remove(&last_used);
        }
        self.order.insert(self.tick, key);

        while self.usage > self.capacity {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            if let Some((evicted, _)) = self.entries.remove(&victim) {
                self.usage -= evicted.size();
            }
        }
    }
}

impl BlockCache {
    /// Create a cache holding up to `capacity` bytes of decoded blocks
    pub fn new(capacity: usize) -> Self {
        let per_shard = capacity / NUM_SHARDS;
        let shards = (0..NUM_SHARDS)
            .map(|_| {
                Mutex::new(LruShard {
                    capacity: per_shard,
                    usage: 0,
                    tick: 0,
                    entries: HashMap::new(),
                    order: BTreeMap::new(),
                })
            })
            .collect();
        Self {
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruShard> {
        let hash = key.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (key.1 >> 4);
        &self.shards[(hash as usize) % NUM_SHARDS]
    }

    pub fn get(&self, table_id: u64, offset: u64) -> Option<Arc<Block>> {
        let key = (table_id, offset);
        let found = self.shard(&key).lock().get(&key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, table_id: u64, offset: u64, block: Arc<Block>) {
        let key = (table_id, offset);
        self.shard(&key).lock().insert(key, block);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            usage: self.shards.iter().map(|s| s.lock().usage).sum(),
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache").field("stats", &self.stats()).finish()
    }
}
