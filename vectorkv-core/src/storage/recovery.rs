//! Opening a database directory: identity, version set, WAL replay

use super::flush::write_level0_table;
use super::StorageConfig;
use crate::memtable::MemTable;
use crate::sstable::{open_table_store, BlockCache, TableStore};
use crate::util::write_file_atomic;
use crate::version::{read_current, VersionEdit, VersionSet};
use crate::wal::{list_logs, log_path, remove_logs_before, WalReader, WalWriter};
use crate::{KvError, Result, SequenceNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const IDENTITY_FILE: &str = "IDENTITY";
const TABLE_DIR: &str = "sst";
const WAL_DIR: &str = "wal";

pub(crate) fn wal_dir(dir: &Path) -> PathBuf {
    dir.join(WAL_DIR)
}

/// Contents of the IDENTITY file
#[derive(Debug, Serialize, Deserialize)]
struct Identity {
    id: Uuid,
    created_at: DateTime<Utc>,
}

/// Everything the engine starts from
pub(crate) struct Recovered {
    pub identity: Uuid,
    pub store: Arc<dyn TableStore>,
    pub cache: Option<Arc<BlockCache>>,
    pub versions: VersionSet,
    /// Fresh log for the first memtable
    pub wal: WalWriter,
    /// Empty memtable bound to `wal`
    pub memtable: MemTable,
    pub last_seq: SequenceNumber,
}

/// Bring `dir` to a clean state.
///
/// Unfinished and unreferenced tables are deleted, every WAL not yet
/// covered by a table is replayed into a new L0 table, and a fresh WAL is
/// started. Afterwards the manifest alone describes the database.
pub(crate) fn recover(dir: &Path, config: &StorageConfig) -> Result<Recovered> {
    if !config.create_if_missing && read_current(dir)?.is_none() {
        return Err(KvError::InvalidArgument(format!(
            "no database in {:?} and create_if_missing is false",
            dir
        )));
    }
    fs::create_dir_all(dir)?;

    let identity = load_or_create_identity(dir)?;
    let store = open_table_store(config.store_backend, &dir.join(TABLE_DIR))?;
    let cache = (config.sstable.block_cache_capacity > 0)
        .then(|| Arc::new(BlockCache::new(config.sstable.block_cache_capacity)));

    let mut versions = VersionSet::open(
        dir,
        Arc::clone(&store),
        cache.clone(),
        config.compaction.max_levels,
        config.max_manifest_file_size,
        config.create_if_missing,
    )?;

    remove_orphan_tables(store.as_ref(), &versions)?;

    let wal_dir = wal_dir(dir);
    fs::create_dir_all(&wal_dir)?;
    let (replayed, last_seq) = replay_logs(&wal_dir, &mut versions)?;

    let mut edit = VersionEdit::new();
    if !replayed.is_empty() {
        let id = versions.new_file_number();
        let meta = write_level0_table(replayed.iter(), id, &store, &config.sstable, last_seq)?;
        if let Some(meta) = meta {
            info!(
                "Recovered {} WAL records into table {}",
                replayed.len(),
                meta.id
            );
            edit.add_file(0, meta);
        }
    }

    let number = versions.new_file_number();
    let wal = WalWriter::create(&wal_dir, number, config.wal.sync_policy)?;
    edit.log_number = Some(number);
    edit.last_sequence = Some(last_seq);
    versions.log_and_apply(edit)?;

    if let Err(e) = remove_logs_before(&wal_dir, number) {
        warn!("Failed to remove replayed WAL files: {}", e);
    }

    Ok(Recovered {
        identity,
        store,
        cache,
        versions,
        wal,
        memtable: MemTable::new(0, number),
        last_seq,
    })
}

fn load_or_create_identity(dir: &Path) -> Result<Uuid> {
    let path = dir.join(IDENTITY_FILE);
    if path.exists() {
        let identity: Identity = serde_json::from_slice(&fs::read(&path)?)
            .map_err(|e| KvError::Corruption(format!("unreadable {}: {}", IDENTITY_FILE, e)))?;
        return Ok(identity.id);
    }

    let identity = Identity {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
    };
    let contents = serde_json::to_vec_pretty(&identity)?;
    write_file_atomic(&path, &contents)?;
    info!("Assigned database identity {}", identity.id);
    Ok(identity.id)
}

/// Delete unfinished tables and tables no Version references
fn remove_orphan_tables(store: &dyn TableStore, versions: &VersionSet) -> Result<()> {
    let partial = store.remove_partial()?;
    let live = versions.current().live_files();

    let mut orphans = 0;
    for id in store.list()? {
        if !live.contains(&id) {
            store.remove(id)?;
            orphans += 1;
        }
    }
    if partial + orphans > 0 {
        warn!(
            "Removed {} unfinished and {} unreferenced tables",
            partial, orphans
        );
    }
    Ok(())
}

/// Replay every log the manifest still needs into one memtable.
///
/// A torn or corrupt tail ends that log only; later logs are still read.
fn replay_logs(wal_dir: &Path, versions: &mut VersionSet) -> Result<(MemTable, SequenceNumber)> {
    let memtable = MemTable::new(0, versions.log_number());
    let mut last_seq = versions.last_sequence();

    for number in list_logs(wal_dir)? {
        versions.mark_file_number_used(number);
        if number < versions.log_number() {
            continue;
        }

        let replay = WalReader::new(log_path(wal_dir, number)).replay()?;
        if replay.truncated {
            warn!(
                "WAL {} ends in a damaged entry after {} valid bytes",
                number, replay.valid_bytes
            );
        }
        for record in replay.records() {
            memtable.insert(record);
        }
        if let Some(seq) = replay.last_seq() {
            last_seq = last_seq.max(seq);
        }
    }

    Ok((memtable, last_seq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::{SyncPolicy, WalEntry, WriteBatch};
    use crate::MAX_SEQUENCE;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_log(dir: &Path, number: u64, base_seq: SequenceNumber, keys: &[&str]) {
        let mut wal = WalWriter::create(dir, number, SyncPolicy::Immediate).unwrap();
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.put(key.to_string(), format!("{}-{}", key, number));
        }
        wal.append(&WalEntry::new(base_seq, batch)).unwrap();
    }

    #[test]
    fn test_fresh_directory() {
        let temp_dir = TempDir::new().unwrap();
        let recovered = recover(temp_dir.path(), &StorageConfig::default()).unwrap();

        assert_eq!(recovered.last_seq, 0);
        assert_eq!(recovered.versions.current().total_files(), 0);
        assert!(recovered.memtable.is_empty());
        assert_eq!(list_logs(&wal_dir(temp_dir.path())).unwrap(), vec![recovered.wal.number()]);
        assert!(temp_dir.path().join(IDENTITY_FILE).exists());
    }

    #[test]
    fn test_missing_database_without_create() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            create_if_missing: false,
            ..Default::default()
        };
        assert!(matches!(
            recover(temp_dir.path(), &config),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_replays_logs_into_level0() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let wal_dir = wal_dir(dir);
        fs::create_dir_all(&wal_dir).unwrap();
        write_log(&wal_dir, 1, 1, &["a", "b"]);
        write_log(&wal_dir, 2, 3, &["a"]);

        let recovered = recover(dir, &StorageConfig::default()).unwrap();
        assert_eq!(recovered.last_seq, 3);
        assert!(recovered.wal.number() > 2);

        let version = recovered.versions.current();
        assert_eq!(version.num_files(0), 1);
        let a = version.get(b"a", MAX_SEQUENCE).unwrap().unwrap();
        assert_eq!(a.value.as_ref(), b"a-2");
        let b = version.get(b"b", MAX_SEQUENCE).unwrap().unwrap();
        assert_eq!(b.value.as_ref(), b"b-1");

        // Replayed logs are gone once their data is in a table
        assert_eq!(list_logs(&wal_dir).unwrap(), vec![recovered.wal.number()]);
    }

    #[test]
    fn test_torn_tail_keeps_valid_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let wal_dir = wal_dir(dir);
        fs::create_dir_all(&wal_dir).unwrap();
        write_log(&wal_dir, 1, 1, &["k"]);

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(log_path(&wal_dir, 1))
            .unwrap();
        file.write_all(&[0x20, 0, 0, 0, 1, 2, 3]).unwrap();

        let recovered = recover(dir, &StorageConfig::default()).unwrap();
        assert_eq!(recovered.last_seq, 1);
        let k = recovered.versions.current().get(b"k", MAX_SEQUENCE).unwrap().unwrap();
        assert_eq!(k.value.as_ref(), b"k-1");
    }

    #[test]
    fn test_orphan_tables_removed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        drop(recover(dir, &StorageConfig::default()).unwrap());

        let sst_dir = dir.join(TABLE_DIR);
        fs::write(sst_dir.join("000900.sst"), b"stray").unwrap();
        fs::write(sst_dir.join("000901.sst.tmp"), b"partial").unwrap();

        let recovered = recover(dir, &StorageConfig::default()).unwrap();
        assert!(recovered.store.list().unwrap().is_empty());
        assert!(!sst_dir.join("000901.sst.tmp").exists());
    }

    #[test]
    fn test_identity_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let first = load_or_create_identity(temp_dir.path()).unwrap();
        let second = load_or_create_identity(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
