//! Storage engine - top-level coordinator

use super::recovery::{self, Recovered};
use super::scan::ScanIter;
use super::snapshot::{Snapshot, SnapshotList};
use super::state::EngineState;
use super::worker::Job;
use super::StorageConfig;
use crate::memtable::MemTable;
use crate::sstable::{BlockCache, CacheStats, TableStore};
use crate::version::VersionSet;
use crate::wal::{WalEntry, WalWriter, WriteBatch};
use crate::{validate_entry, KvError, Result, SequenceNumber};
use bytes::Bytes;
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Embedded LSM key-value engine.
///
/// All methods take `&self`; the engine can be shared across threads
/// behind an `Arc`. Writes are serialized internally, reads never block
/// writes.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Active WAL and sequence counter, owned by the writer lock
pub(crate) struct WriterState {
    pub wal: WalWriter,
    /// Set when an append failed; the log may end in a torn frame
    pub poisoned: bool,
    pub last_seq: SequenceNumber,
}

/// State shared between the engine handle and the background worker
pub(crate) struct EngineInner {
    pub dir: PathBuf,
    pub wal_dir: PathBuf,
    pub config: StorageConfig,
    pub identity: Uuid,
    pub store: Arc<dyn TableStore>,
    pub cache: Option<Arc<BlockCache>>,

    pub state: RwLock<Arc<EngineState>>,
    pub writer: Mutex<WriterState>,
    /// Signalled when a flush frees room for a stalled writer
    pub stall: Condvar,
    pub versions: Mutex<VersionSet>,
    /// Highest sequence number whose write is fully applied
    pub visible_seq: AtomicU64,
    pub snapshots: Arc<SnapshotList>,

    pub jobs: Sender<Job>,
    pub bg_error: Mutex<Option<String>>,
    /// Inputs of automatic compactions that hit corrupt data
    pub damaged_inputs: Mutex<HashSet<u64>>,
    /// No new writes are accepted
    pub closed: AtomicBool,
    /// The worker should stop picking up compactions
    pub shutting_down: AtomicBool,

    pub next_memtable_id: AtomicU64,
    pub flush_count: AtomicU64,
    pub compaction_count: AtomicU64,
    pub compaction_bytes_written: AtomicU64,
}

/// Engine statistics
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub last_sequence: SequenceNumber,
    pub memtable_size: usize,
    pub memtable_entries: usize,
    pub immutable_memtables: usize,
    /// Table count per level
    pub level_files: Vec<usize>,
    /// Table bytes per level
    pub level_bytes: Vec<u64>,
    pub flushes: u64,
    pub compactions: u64,
    pub compaction_bytes_written: u64,
    pub live_snapshots: usize,
    pub block_cache: Option<CacheStats>,
    pub background_error: Option<String>,
}

impl Engine {
    /// Open (recovering if needed) the database in `dir`.
    ///
    /// `<dir>/config.json`, when present, replaces `config`.
    pub fn open(dir: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let config = StorageConfig::load_or(dir, config)?;
        config.validate()?;

        let Recovered {
            identity,
            store,
            cache,
            versions,
            wal,
            memtable,
            last_seq,
        } = recovery::recover(dir, &config)?;

        let state = EngineState::new(Arc::new(memtable), versions.current());
        let (jobs, job_rx) = crossbeam_channel::unbounded();

        let inner = Arc::new(EngineInner {
            dir: dir.to_path_buf(),
            wal_dir: recovery::wal_dir(dir),
            config,
            identity,
            store,
            cache,
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(WriterState {
                wal,
                poisoned: false,
                last_seq,
            }),
            stall: Condvar::new(),
            versions: Mutex::new(versions),
            visible_seq: AtomicU64::new(last_seq),
            snapshots: Arc::new(SnapshotList::default()),
            jobs,
            bg_error: Mutex::new(None),
            damaged_inputs: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            next_memtable_id: AtomicU64::new(1),
            flush_count: AtomicU64::new(0),
            compaction_count: AtomicU64::new(0),
            compaction_bytes_written: AtomicU64::new(0),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("vectorkv-bg".into())
            .spawn(move || worker_inner.run_worker(job_rx))?;

        // Recovery may have left more L0 files than the trigger allows
        let _ = inner.jobs.send(Job::Compact);

        info!(
            "Opened database {} in {:?} at sequence {}",
            inner.identity, inner.dir, last_seq
        );

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Insert or overwrite `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_entry(key, Some(value))?;
        let mut batch = WriteBatch::new();
        batch.put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.inner.write(batch)
    }

    /// Delete `key`; deleting a missing key is not an error
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        validate_entry(key, None)?;
        let mut batch = WriteBatch::new();
        batch.delete(Bytes::copy_from_slice(key));
        self.inner.write(batch)
    }

    /// Apply every operation of `batch` atomically
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(());
        }
        self.inner.write(batch)
    }

    /// Newest value of `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.ensure_open()?;
        self.inner.get_at_seq(key, None)
    }

    /// Value of `key` as of `snapshot`
    pub fn get_at(&self, snapshot: &Snapshot, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.ensure_open()?;
        self.inner.get_at_seq(key, Some(snapshot.sequence()))
    }

    /// Lazy iterator over `[start, end)`, reading as of now
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<ScanIter> {
        self.inner.ensure_open()?;
        Ok(self.inner.scan_at_seq(start, end, None))
    }

    /// Lazy iterator over `[start, end)` as of `snapshot`
    pub fn scan_at(&self, snapshot: &Snapshot, start: &[u8], end: &[u8]) -> Result<ScanIter> {
        self.inner.ensure_open()?;
        Ok(self.inner.scan_at_seq(start, end, Some(snapshot.sequence())))
    }

    /// Pin the current sequence number for repeatable reads
    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshots.acquire(&self.inner.visible_seq)
    }

    /// Flush the active memtable and wait for every frozen memtable to
    /// reach disk
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.flush_and_wait()
    }

    /// Push every table overlapping `[begin, end]` down to the deepest level
    /// holding data. `None` leaves that side unbounded.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.flush_and_wait()?;

        let (reply, done) = bounded(1);
        self.inner.send_job(Job::CompactRange {
            begin: begin.map(Bytes::copy_from_slice),
            end: end.map(Bytes::copy_from_slice),
            reply,
        })?;
        done.recv().map_err(|_| KvError::Closed)?
    }

    /// Compact the whole key space
    pub fn compact(&self) -> Result<()> {
        self.compact_range(None, None)
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let state = inner.current_state();
        let version = &state.version;
        let levels = 0..version.num_levels();

        EngineStats {
            last_sequence: inner.visible_seq.load(Ordering::Acquire),
            memtable_size: state.memtable.size(),
            memtable_entries: state.memtable.len(),
            immutable_memtables: state.immutables.len(),
            level_files: levels.clone().map(|l| version.num_files(l)).collect(),
            level_bytes: levels.map(|l| version.level_size(l)).collect(),
            flushes: inner.flush_count.load(Ordering::Relaxed),
            compactions: inner.compaction_count.load(Ordering::Relaxed),
            compaction_bytes_written: inner.compaction_bytes_written.load(Ordering::Relaxed),
            live_snapshots: inner.snapshots.len(),
            block_cache: inner.cache.as_ref().map(|c| c.stats()),
            background_error: inner.bg_error.lock().clone(),
        }
    }

    /// Unique id of this database, stable across restarts
    pub fn identity(&self) -> Uuid {
        self.inner.identity
    }

    /// The failure that stopped background work, if any
    pub fn background_error(&self) -> Option<String> {
        self.inner.bg_error.lock().clone()
    }

    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    /// Flush everything, sync the WAL, and stop the background worker.
    ///
    /// Later calls on this engine fail with [`KvError::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing database in {:?}", self.inner.dir);

        let flushed = self.inner.flush_and_wait();
        let synced = self.inner.writer.lock().wal.sync();
        self.stop_worker();

        flushed.and(synced)
    }

    fn stop_worker(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.stall.notify_all();
        let _ = self.inner.jobs.send(Job::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Background worker panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unflushed writes stay in the WAL and are replayed on open
        if let Err(e) = self.inner.writer.lock().wal.sync() {
            warn!("Failed to sync WAL on drop: {}", e);
        }
        self.stop_worker();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.inner.dir)
            .field("identity", &self.inner.identity)
            .finish()
    }
}

impl EngineInner {
    pub fn current_state(&self) -> Arc<EngineState> {
        Arc::clone(&self.state.read())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(KvError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn background_error(&self) -> Option<KvError> {
        self.bg_error
            .lock()
            .as_ref()
            .map(|msg| KvError::Background(msg.clone()))
    }

    pub fn send_job(&self, job: Job) -> Result<()> {
        self.jobs.send(job).map_err(|_| KvError::Closed)
    }

    /// Clone the state, then pick the read sequence. Loading the sequence
    /// second guarantees every version GC removed from that state is
    /// shadowed by one visible at it.
    fn read_view(&self, at: Option<SequenceNumber>) -> (Arc<EngineState>, SequenceNumber) {
        let state = self.current_state();
        let read_seq = at.unwrap_or_else(|| self.visible_seq.load(Ordering::Acquire));
        (state, read_seq)
    }

    fn get_at_seq(&self, key: &[u8], at: Option<SequenceNumber>) -> Result<Option<Bytes>> {
        let (state, read_seq) = self.read_view(at);
        Ok(state
            .get(key, read_seq)?
            .and_then(|record| record.value().cloned()))
    }

    fn scan_at_seq(&self, start: &[u8], end: &[u8], at: Option<SequenceNumber>) -> ScanIter {
        let (state, read_seq) = self.read_view(at);
        ScanIter::new(
            state,
            read_seq,
            Bytes::copy_from_slice(start),
            Bytes::copy_from_slice(end),
        )
    }

    /// Log `batch` and apply it to the memtable
    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock();
        self.make_room(&mut writer)?;

        let entry = WalEntry::new(writer.last_seq + 1, batch);
        // Sequence numbers of a failed append are never reused
        writer.last_seq = entry.last_seq();
        if let Err(e) = writer.wal.append(&entry) {
            writer.poisoned = true;
            warn!("WAL append failed, switching to a new log: {}", e);
            return Err(e);
        }

        let memtable = Arc::clone(&self.state.read().memtable);
        for record in entry.records() {
            memtable.insert(record);
        }
        self.visible_seq.store(entry.last_seq(), Ordering::Release);
        Ok(())
    }

    /// Make sure the active memtable can take another write: switch away
    /// from a full memtable or a poisoned log, stalling while too many
    /// frozen memtables wait for flush.
    fn make_room(&self, writer: &mut parking_lot::MutexGuard<'_, WriterState>) -> Result<()> {
        loop {
            if let Some(e) = self.background_error() {
                return Err(e);
            }
            self.ensure_open()?;

            let state = self.current_state();
            let full = state.memtable.should_flush(self.config.memtable_size_limit);
            if !full && !writer.poisoned {
                return Ok(());
            }

            if state.immutables.len() >= self.config.max_immutable_memtables {
                debug!(
                    "Stalling writes: {} memtables waiting for flush",
                    state.immutables.len()
                );
                self.stall.wait(writer);
                continue;
            }

            self.switch_memtable(writer)?;
            self.send_job(Job::Flush { reply: None })?;
            return Ok(());
        }
    }

    /// Freeze the active memtable and start a new WAL generation
    pub fn switch_memtable(&self, writer: &mut WriterState) -> Result<()> {
        let number = self.versions.lock().new_file_number();
        let wal = WalWriter::create(&self.wal_dir, number, self.config.wal.sync_policy)?;

        let mut old = std::mem::replace(&mut writer.wal, wal);
        if !writer.poisoned {
            if let Err(e) = old.sync() {
                warn!("Failed to sync WAL {} before switching: {}", old.number(), e);
            }
        }
        writer.poisoned = false;

        let id = self.next_memtable_id.fetch_add(1, Ordering::Relaxed);
        let memtable = Arc::new(MemTable::new(id, number));
        let mut state = self.state.write();
        debug!(
            "Froze memtable {} ({} bytes), new WAL {}",
            state.memtable.id(),
            state.memtable.size(),
            number
        );
        *state = Arc::new(state.with_new_memtable(memtable));
        Ok(())
    }

    /// Freeze a non-empty memtable and wait for the worker to flush every
    /// frozen memtable
    fn flush_and_wait(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock();
            let state = self.current_state();
            if !state.memtable.is_empty() || writer.poisoned {
                self.switch_memtable(&mut writer)?;
            }
        }

        let (reply, done) = bounded(1);
        self.send_job(Job::Flush { reply: Some(reply) })?;
        done.recv().map_err(|_| KvError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn retry_config(retries: u32, backoff_ms: u64) -> StorageConfig {
        let mut config = StorageConfig::default();
        config.compaction.max_background_retries = retries;
        config.compaction.retry_backoff_ms = backoff_ms;
        config
    }

    /// Turn an empty directory into a plain file so creating tables in it fails
    fn block_dir(dir: &Path) {
        fs::remove_dir(dir).unwrap();
        fs::write(dir, b"not a directory").unwrap();
    }

    fn unblock_dir(dir: &Path) {
        fs::remove_file(dir).unwrap();
        fs::create_dir(dir).unwrap();
    }

    fn small_config() -> StorageConfig {
        StorageConfig {
            memtable_size_limit: 4 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

        assert_eq!(engine.get(b"missing").unwrap(), None);
        engine.put(b"key", b"v1").unwrap();
        engine.put(b"key", b"v2").unwrap();
        assert_eq!(engine.get(b"key").unwrap(), Some(Bytes::from("v2")));

        engine.delete(b"key").unwrap();
        assert_eq!(engine.get(b"key").unwrap(), None);
        engine.delete(b"never-written").unwrap();
    }

    #[test]
    fn test_rejects_empty_key() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

        assert!(matches!(engine.put(b"", b"v"), Err(KvError::InvalidArgument(_))));
        assert!(matches!(engine.delete(b""), Err(KvError::InvalidArgument(_))));
    }

    #[test]
    fn test_write_batch_is_atomic_and_ordered() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put("a", "1").put("b", "2").delete("a").put("c", "3");
        engine.write(batch).unwrap();

        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("2")));
        assert_eq!(engine.stats().last_sequence, 4);

        let mut bad = WriteBatch::new();
        bad.put("ok", "1").put("", "2");
        assert!(engine.write(bad).is_err());
        assert_eq!(engine.get(b"ok").unwrap(), None);
    }

    #[test]
    fn test_memtable_switches_when_full() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), small_config()).unwrap();

        for i in 0..500u32 {
            let key = format!("key-{:05}", i);
            engine.put(key.as_bytes(), &[b'x'; 100]).unwrap();
        }
        engine.flush().unwrap();

        let stats = engine.stats();
        assert!(stats.flushes > 1);
        assert_eq!(stats.immutable_memtables, 0);
        for i in (0..500u32).step_by(41) {
            let key = format!("key-{:05}", i);
            assert!(engine.get(key.as_bytes()).unwrap().is_some(), "{}", key);
        }
    }

    #[test]
    fn test_snapshot_reads() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

        engine.put(b"k", b"old").unwrap();
        let snapshot = engine.snapshot();
        engine.put(b"k", b"new").unwrap();
        engine.put(b"later", b"x").unwrap();

        assert_eq!(engine.get_at(&snapshot, b"k").unwrap(), Some(Bytes::from("old")));
        assert_eq!(engine.get_at(&snapshot, b"later").unwrap(), None);
        assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::from("new")));
        assert_eq!(engine.stats().live_snapshots, 1);

        drop(snapshot);
        assert_eq!(engine.stats().live_snapshots, 0);
    }

    #[test]
    fn test_closed_engine_rejects_calls() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();

        assert!(matches!(engine.put(b"a", b"2"), Err(KvError::Closed)));
        assert!(matches!(engine.get(b"a"), Err(KvError::Closed)));
        assert!(matches!(engine.scan(b"a", b"z"), Err(KvError::Closed)));
        engine.close().unwrap();
    }

    #[test]
    fn test_identity_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let id = {
            let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
            engine.identity()
        };
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(engine.identity(), id);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            memtable_size_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            Engine::open(temp_dir.path(), config),
            Err(KvError::Config(_))
        ));
    }

    #[test]
    fn test_failed_wal_append_switches_log() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
        engine.put(b"before", b"1").unwrap();

        let first_log = {
            let mut writer = engine.inner.writer.lock();
            let number = writer.wal.number();
            writer.wal = WalWriter::read_only(&engine.inner.wal_dir, number).unwrap();
            number
        };
        assert!(matches!(engine.put(b"lost", b"2"), Err(KvError::Io(_))));
        assert_eq!(engine.get(b"lost").unwrap(), None);
        assert!(engine.inner.writer.lock().poisoned);

        engine.put(b"after", b"3").unwrap();
        {
            let writer = engine.inner.writer.lock();
            assert!(!writer.poisoned);
            assert!(writer.wal.number() > first_log);
        }
        // The failed write's sequence number is never reused
        assert_eq!(engine.stats().last_sequence, 3);
        drop(engine);

        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
        assert_eq!(engine.get(b"before").unwrap(), Some(Bytes::from("1")));
        assert_eq!(engine.get(b"lost").unwrap(), None);
        assert_eq!(engine.get(b"after").unwrap(), Some(Bytes::from("3")));
    }

    #[test]
    fn test_flush_retries_until_storage_recovers() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), retry_config(5, 200)).unwrap();
        engine.put(b"k", b"v").unwrap();

        let sst_dir = temp_dir.path().join("sst");
        block_dir(&sst_dir);
        let restorer = {
            let sst_dir = sst_dir.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                unblock_dir(&sst_dir);
            })
        };

        let started = Instant::now();
        engine.flush().unwrap();
        restorer.join().unwrap();

        // First attempt fails, the retry after the 200ms backoff succeeds
        assert!(started.elapsed() >= Duration::from_millis(200));
        let stats = engine.stats();
        assert_eq!(stats.background_error, None);
        assert_eq!(stats.level_files[0], 1);
        assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::from("v")));
    }

    #[test]
    fn test_exhausted_retries_stop_writes() {
        let temp_dir = TempDir::new().unwrap();
        let engine = Engine::open(temp_dir.path(), retry_config(2, 10)).unwrap();
        engine.put(b"k", b"v").unwrap();
        block_dir(&temp_dir.path().join("sst"));

        let started = Instant::now();
        assert!(matches!(engine.flush(), Err(KvError::Io(_))));
        // Backoff doubles: 10ms, then 20ms
        assert!(started.elapsed() >= Duration::from_millis(30));

        let error = engine.stats().background_error.unwrap();
        assert!(error.starts_with("flush failed"), "{}", error);
        assert_eq!(engine.background_error(), Some(error));
        assert!(matches!(engine.put(b"k2", b"v"), Err(KvError::Background(_))));
        assert!(matches!(engine.flush(), Err(KvError::Background(_))));

        // Frozen data is still readable
        assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::from("v")));
    }

    #[test]
    fn test_writes_stall_until_flush_catches_up() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = retry_config(5, 100);
        config.memtable_size_limit = 1024;
        config.max_immutable_memtables = 1;
        let engine = Arc::new(Engine::open(temp_dir.path(), config).unwrap());

        let sst_dir = temp_dir.path().join("sst");
        block_dir(&sst_dir);

        let writer = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..50u32 {
                    engine.put(format!("key-{:03}", i).as_bytes(), &[b'x'; 100])?;
                }
                Ok::<_, KvError>(())
            })
        };

        std::thread::sleep(Duration::from_millis(150));
        assert!(!writer.is_finished());
        let stats = engine.stats();
        assert_eq!(stats.immutable_memtables, 1);
        assert_eq!(stats.flushes, 0);

        unblock_dir(&sst_dir);
        writer.join().unwrap().unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.background_error(), None);
        assert!(engine.stats().flushes > 1);
        for i in 0..50u32 {
            let key = format!("key-{:03}", i);
            assert!(engine.get(key.as_bytes()).unwrap().is_some(), "{}", key);
        }
    }
}
