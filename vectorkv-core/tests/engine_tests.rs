//! End-to-end tests for the storage engine: write, flush, compaction,
//! snapshots, scans, and reopening.

use bytes::Bytes;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use vectorkv_core::storage::CONFIG_FILE;
use vectorkv_core::wal::SyncPolicy;
use vectorkv_core::{Engine, KvError, StorageConfig, WriteBatch};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small limits so a few thousand writes exercise every level
fn small_config() -> StorageConfig {
    let mut config = StorageConfig::default();
    config.wal.sync_policy = SyncPolicy::None;
    config.memtable_size_limit = 8 * 1024;
    config.sstable.block_size = 1024;
    config.sstable.target_file_size = 8 * 1024;
    config.compaction.l0_compaction_trigger = 2;
    config.compaction.base_level_size = 32 * 1024;
    config
}

fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir.join("sst"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "sst"))
        .count()
}

fn scan_all(engine: &Engine, start: &str, end: &str) -> Vec<(String, String)> {
    engine
        .scan(start.as_bytes(), end.as_bytes())
        .unwrap()
        .map(|item| {
            let (k, v) = item.unwrap();
            (
                String::from_utf8(k.to_vec()).unwrap(),
                String::from_utf8(v.to_vec()).unwrap(),
            )
        })
        .collect()
}

fn key(i: usize) -> String {
    format!("key-{:06}", i)
}

#[test]
fn test_put_delete_flush_scenario() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.delete(b"a").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("2")));
    assert_eq!(scan_all(&engine, "a", "c"), vec![("b".into(), "2".into())]);
    assert_eq!(engine.stats().level_files[0], 1);
}

#[test]
fn test_compaction_keeps_newest_version() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    engine.put(b"x", b"old").unwrap();
    engine.flush().unwrap();
    engine.put(b"x", b"new").unwrap();
    engine.flush().unwrap();
    assert_eq!(engine.stats().level_files[0], 2);

    engine.compact().unwrap();

    let stats = engine.stats();
    assert_eq!(stats.level_files[0], 0);
    assert_eq!(stats.level_files[1], 1);
    assert_eq!(engine.get(b"x").unwrap(), Some(Bytes::from("new")));
    assert_eq!(scan_all(&engine, "a", "z"), vec![("x".into(), "new".into())]);
    assert_eq!(count_sst_files(temp_dir.path()), 1);
}

#[test]
fn test_empty_engine_and_empty_ranges() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    assert_eq!(engine.get(b"anything").unwrap(), None);
    assert!(scan_all(&engine, "a", "z").is_empty());

    engine.put(b"m", b"1").unwrap();
    assert!(scan_all(&engine, "m", "m").is_empty());
    assert!(scan_all(&engine, "z", "a").is_empty());
    assert_eq!(scan_all(&engine, "m", "n"), vec![("m".into(), "1".into())]);
}

#[test]
fn test_many_writes_survive_compaction_and_reopen() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let n = 3000;

    {
        let engine = Engine::open(temp_dir.path(), small_config()).unwrap();
        for i in 0..n {
            engine.put(key(i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
        }
        for i in (0..n).step_by(3) {
            engine.delete(key(i).as_bytes()).unwrap();
        }
        engine.compact().unwrap();

        let stats = engine.stats();
        assert!(stats.flushes > 1);
        assert!(stats.compactions > 0);
        assert_eq!(stats.level_files[0], 0);
        assert_eq!(stats.background_error, None);
        engine.close().unwrap();
    }

    let engine = Engine::open(temp_dir.path(), small_config()).unwrap();
    for i in 0..n {
        let expected = (i % 3 != 0).then(|| Bytes::from(format!("v{}", i)));
        assert_eq!(engine.get(key(i).as_bytes()).unwrap(), expected, "{}", key(i));
    }

    let scanned = scan_all(&engine, &key(0), &key(n));
    assert_eq!(scanned.len(), n - n.div_ceil(3));
    assert!(scanned.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn test_compaction_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), small_config()).unwrap();
    for i in 0..500 {
        engine.put(key(i).as_bytes(), b"value").unwrap();
    }

    engine.compact().unwrap();
    let first = engine.stats();
    engine.compact().unwrap();
    let second = engine.stats();

    assert_eq!(first.level_files, second.level_files);
    assert_eq!(first.compactions, second.compactions);
    assert_eq!(first.level_files[0], 0);
}

#[test]
fn test_reopen_after_close() {
    let temp_dir = TempDir::new().unwrap();
    let identity = {
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
        engine.put(b"durable", b"yes").unwrap();
        engine.delete(b"durable-gone").unwrap();
        engine.close().unwrap();
        engine.identity()
    };

    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
    assert_eq!(engine.identity(), identity);
    assert_eq!(engine.get(b"durable").unwrap(), Some(Bytes::from("yes")));
    assert_eq!(engine.stats().last_sequence, 2);
}

#[test]
fn test_reopen_after_drop_replays_wal() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put("a", "1").put("b", "2").delete("a");
        engine.write(batch).unwrap();
        engine.put(b"c", b"3").unwrap();
        // Dropped without close: nothing flushed
    }

    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("2")));
    assert_eq!(engine.get(b"c").unwrap(), Some(Bytes::from("3")));
    assert_eq!(engine.stats().last_sequence, 4);

    // New writes continue after the recovered sequence
    engine.put(b"d", b"4").unwrap();
    assert_eq!(engine.stats().last_sequence, 5);
}

#[test]
fn test_scan_survives_flush_and_compaction() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    for i in 0..100 {
        engine.put(key(i).as_bytes(), b"first").unwrap();
    }
    engine.flush().unwrap();

    let mut scan = engine.scan(key(0).as_bytes(), key(100).as_bytes()).unwrap();
    let (k, v) = scan.next().unwrap().unwrap();
    assert_eq!(k.as_ref(), key(0).as_bytes());
    assert_eq!(v.as_ref(), b"first");

    for i in 0..100 {
        engine.put(key(i).as_bytes(), b"second").unwrap();
    }
    engine.compact().unwrap();
    assert_eq!(engine.stats().level_files[0], 0);

    // The scan still reads the tables compaction replaced
    let rest: Vec<_> = scan.by_ref().map(|item| item.unwrap()).collect();
    assert_eq!(rest.len(), 99);
    assert!(rest.iter().all(|(_, v)| v.as_ref() == b"first"));

    // Rewinding keeps the original view
    scan.rewind();
    assert_eq!(scan.count(), 100);

    assert!(scan_all(&engine, &key(0), &key(100))
        .iter()
        .all(|(_, v)| v == "second"));
}

#[test]
fn test_obsolete_tables_deleted_after_last_reader() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.flush().unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.flush().unwrap();

    let scan = engine.scan(b"a", b"z").unwrap();
    engine.compact().unwrap();
    // Two inputs held by the scan, one output
    assert_eq!(count_sst_files(temp_dir.path()), 3);

    drop(scan);
    assert_eq!(count_sst_files(temp_dir.path()), 1);
}

#[test]
fn test_snapshot_across_overwrite_flush_and_compaction() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    engine.put(b"k", b"old").unwrap();
    engine.put(b"gone", b"here").unwrap();
    let snapshot = engine.snapshot();

    engine.put(b"k", b"new").unwrap();
    engine.delete(b"gone").unwrap();
    engine.flush().unwrap();
    engine.compact().unwrap();

    assert_eq!(engine.get_at(&snapshot, b"k").unwrap(), Some(Bytes::from("old")));
    assert_eq!(engine.get_at(&snapshot, b"gone").unwrap(), Some(Bytes::from("here")));
    assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::from("new")));
    assert_eq!(engine.get(b"gone").unwrap(), None);

    let seen: Vec<_> = engine
        .scan_at(&snapshot, b"a", b"z")
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(seen, vec![Bytes::from("gone"), Bytes::from("k")]);

    // Once released, the next compaction may drop the old versions
    drop(snapshot);
    engine.put(b"k", b"newest").unwrap();
    engine.compact().unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(Bytes::from("newest")));
    assert_eq!(engine.get(b"gone").unwrap(), None);
}

#[test]
fn test_compact_range_only_touches_range() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(temp_dir.path(), StorageConfig::default()).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.flush().unwrap();
    engine.put(b"z", b"2").unwrap();
    engine.flush().unwrap();

    engine.compact_range(Some(b"a".as_slice()), Some(b"b".as_slice())).unwrap();
    let stats = engine.stats();
    assert_eq!(stats.level_files[0], 1);
    assert_eq!(stats.level_files[1], 1);

    assert!(matches!(
        engine.compact_range(Some(b"z".as_slice()), Some(b"a".as_slice())),
        Err(KvError::InvalidArgument(_))
    ));
}

#[test]
fn test_config_file_overrides_open_config() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join(CONFIG_FILE),
        r#"{"create_if_missing": false}"#,
    )
    .unwrap();

    let result = Engine::open(temp_dir.path(), StorageConfig::default());
    assert!(matches!(result, Err(KvError::InvalidArgument(_))));
}

#[test]
fn test_concurrent_readers_and_writer() {
    let temp_dir = TempDir::new().unwrap();
    let engine = std::sync::Arc::new(Engine::open(temp_dir.path(), small_config()).unwrap());

    let writer = {
        let engine = std::sync::Arc::clone(&engine);
        std::thread::spawn(move || {
            for i in 0..2000 {
                engine.put(key(i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in (0..2000).step_by(7) {
                    if let Some(v) = engine.get(key(i).as_bytes()).unwrap() {
                        assert_eq!(v, Bytes::from(format!("v{}", i)));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    engine.flush().unwrap();
    for i in (0..2000).step_by(13) {
        assert_eq!(
            engine.get(key(i).as_bytes()).unwrap(),
            Some(Bytes::from(format!("v{}", i)))
        );
    }
}

#[test]
fn test_corrupt_table_fails_only_its_reads() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let mut config = StorageConfig::default();
    config.compaction.l0_compaction_trigger = 3;
    let engine = Engine::open(temp_dir.path(), config).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.flush().unwrap();
    engine.put(b"b", b"2").unwrap();
    engine.flush().unwrap();

    // Damage the only data block of the oldest table
    let mut tables: Vec<_> = fs::read_dir(temp_dir.path().join("sst"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "sst"))
        .collect();
    tables.sort();
    let mut data = fs::read(&tables[0]).unwrap();
    data[0] ^= 0xFF;
    fs::write(&tables[0], &data).unwrap();

    // The third table triggers an automatic compaction that hits the damage
    engine.put(b"c", b"3").unwrap();
    engine.flush().unwrap();

    // Writes and flushes keep working
    engine.put(b"zzz", b"4").unwrap();
    engine.flush().unwrap();
    let stats = engine.stats();
    assert_eq!(stats.background_error, None);
    assert_eq!(stats.compactions, 0);
    assert_eq!(stats.level_files[0], 4);

    assert!(engine.get(b"a").unwrap_err().is_corruption());
    assert_eq!(engine.get(b"b").unwrap(), Some(Bytes::from("2")));
    assert_eq!(engine.get(b"c").unwrap(), Some(Bytes::from("3")));
    assert_eq!(engine.get(b"zzz").unwrap(), Some(Bytes::from("4")));

    // A manual compaction reports the damage to its caller only
    assert!(matches!(engine.compact(), Err(KvError::Compaction(_))));
    engine.put(b"after", b"5").unwrap();
    assert_eq!(engine.background_error(), None);
}
