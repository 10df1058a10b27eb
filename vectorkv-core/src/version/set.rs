//! The version set: current Version plus the manifest that persists it

use super::manifest::{manifest_path, read_current, read_manifest, set_current, ManifestWriter};
use super::{Version, VersionEdit};
use crate::sstable::{BlockCache, TableStore};
use crate::{KvError, Result, SequenceNumber};
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the current [`Version`] and the manifest.
///
/// Every mutation goes through [`log_and_apply`](VersionSet::log_and_apply),
/// which persists the edit before the new Version becomes current.
pub struct VersionSet {
    dir: PathBuf,
    store: Arc<dyn TableStore>,
    cache: Option<Arc<BlockCache>>,
    current: Arc<Version>,
    manifest: ManifestWriter,
    /// A failed append may have left a partial record behind
    manifest_poisoned: bool,
    max_manifest_file_size: u64,
    next_file_number: u64,
    last_sequence: SequenceNumber,
    log_number: u64,
    compact_pointers: Vec<Option<Bytes>>,
}

impl VersionSet {
    /// Recover the version set from `dir`, or create an empty one.
    ///
    /// Opening always starts a fresh manifest holding one snapshot edit and
    /// removes the previous manifest.
    pub fn open(
        dir: &Path,
        store: Arc<dyn TableStore>,
        cache: Option<Arc<BlockCache>>,
        num_levels: usize,
        max_manifest_file_size: u64,
        create_if_missing: bool,
    ) -> Result<Self> {
        let mut version = Version::new(num_levels);
        let mut next_file_number = 1;
        let mut last_sequence = 0;
        let mut log_number = 0;
        let mut compact_pointers = vec![None; num_levels];

        let previous = read_current(dir)?;
        match previous {
            Some(number) => {
                let path = manifest_path(dir, number);
                if !path.exists() {
                    return Err(KvError::Corruption(format!(
                        "CURRENT names missing manifest {:?}",
                        path
                    )));
                }

                let edits = read_manifest(&path)?;
                info!("Replaying {} manifest records from {:?}", edits.len(), path);
                for edit in &edits {
                    version = version.apply(edit, &store, &cache)?;
                    if let Some(n) = edit.log_number {
                        log_number = n;
                    }
                    if let Some(n) = edit.next_file_number {
                        next_file_number = n;
                    }
                    if let Some(seq) = edit.last_sequence {
                        last_sequence = seq;
                    }
                    for (level, key) in &edit.compact_pointers {
                        if let Some(slot) = compact_pointers.get_mut(*level) {
                            *slot = Some(key.clone());
                        }
                    }
                }
                next_file_number = next_file_number.max(number + 1);
            }
            None if create_if_missing => {
                info!("Creating new database in {:?}", dir);
            }
            None => {
                return Err(KvError::InvalidArgument(format!(
                    "no database in {:?} and create_if_missing is false",
                    dir
                )));
            }
        }

        let on_disk = store.list()?;
        for id in version.live_files() {
            if on_disk.binary_search(&id).is_err() {
                return Err(KvError::Corruption(format!("live table {} is missing", id)));
            }
            next_file_number = next_file_number.max(id + 1);
        }

        let manifest_number = next_file_number;
        next_file_number += 1;
        let manifest = ManifestWriter::create(dir, manifest_number)?;

        let mut set = Self {
            dir: dir.to_path_buf(),
            store,
            cache,
            current: Arc::new(version),
            manifest,
            manifest_poisoned: false,
            max_manifest_file_size,
            next_file_number,
            last_sequence,
            log_number,
            compact_pointers,
        };

        let snapshot = set.snapshot_edit(&set.current);
        set.manifest.append(&snapshot)?;
        set_current(dir, manifest_number)?;
        if let Some(old) = previous {
            set.remove_manifest(old);
        }

        debug!(
            "Version set open: manifest {}, next file {}, last sequence {}, log {}",
            manifest_number, set.next_file_number, set.last_sequence, set.log_number
        );
        Ok(set)
    }

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<BlockCache>> {
        self.cache.as_ref()
    }

    pub fn num_levels(&self) -> usize {
        self.current.num_levels()
    }

    /// Allocate a number for a new table, log, or manifest
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Make sure `number` is never handed out again
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    /// Oldest WAL whose contents are not yet in a table
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn manifest_number(&self) -> u64 {
        self.manifest.number()
    }

    pub fn compact_pointer(&self, level: usize) -> Option<&Bytes> {
        self.compact_pointers.get(level).and_then(Option::as_ref)
    }

    /// Persist `edit` and install the resulting Version.
    ///
    /// Tables deleted by the edit are marked obsolete; their files go away
    /// when the last reader of an older Version lets go.
    pub fn log_and_apply(&mut self, mut edit: VersionEdit) -> Result<Arc<Version>> {
        if let Some(n) = edit.log_number {
            if n < self.log_number {
                return Err(KvError::Internal(format!(
                    "log number {} moves backwards from {}",
                    n, self.log_number
                )));
            }
        }

        let next = self.current.apply(&edit, &self.store, &self.cache)?;

        let rotate = self.manifest_poisoned || self.manifest.size() >= self.max_manifest_file_size;
        let new_manifest = rotate.then(|| self.new_file_number());

        self.last_sequence = self.last_sequence.max(edit.last_sequence.unwrap_or(0));
        edit.last_sequence = Some(self.last_sequence);
        edit.next_file_number = Some(self.next_file_number);

        match new_manifest {
            Some(number) => {
                let mut snapshot = self.snapshot_edit(&next);
                snapshot.log_number = edit.log_number.or(snapshot.log_number);
                for (level, key) in &edit.compact_pointers {
                    snapshot.set_compact_pointer(*level, key.clone());
                }
                self.rotate_manifest(number, &snapshot)?;
            }
            None => {
                if let Err(e) = self.manifest.append(&edit) {
                    self.manifest_poisoned = true;
                    warn!("Manifest append failed, next edit starts a new manifest: {}", e);
                    return Err(e);
                }
            }
        }

        if let Some(n) = edit.log_number {
            self.log_number = n;
        }
        for (level, key) in edit.compact_pointers {
            if let Some(slot) = self.compact_pointers.get_mut(level) {
                *slot = Some(key);
            }
        }

        for &(level, id) in &edit.deleted_files {
            if let Some(table) = self.current.level(level).iter().find(|t| t.id() == id) {
                table.mark_obsolete();
            }
        }

        self.current = Arc::new(next);
        Ok(self.current())
    }

    fn rotate_manifest(&mut self, number: u64, snapshot: &VersionEdit) -> Result<()> {
        let mut writer = ManifestWriter::create(&self.dir, number)?;
        let written = writer.append(snapshot).and_then(|_| set_current(&self.dir, number));
        if let Err(e) = written {
            let _ = fs::remove_file(manifest_path(&self.dir, number));
            return Err(e);
        }

        let old = std::mem::replace(&mut self.manifest, writer);
        self.manifest_poisoned = false;
        self.remove_manifest(old.number());
        info!("Switched to manifest {}", number);
        Ok(())
    }

    fn remove_manifest(&self, number: u64) {
        if let Err(e) = fs::remove_file(manifest_path(&self.dir, number)) {
            warn!("Failed to remove old manifest {}: {}", number, e);
        }
    }

    /// Edit that recreates `version` and all counters from nothing
    fn snapshot_edit(&self, version: &Version) -> VersionEdit {
        let mut edit = version.snapshot_edit();
        edit.log_number = Some(self.log_number);
        edit.next_file_number = Some(self.next_file_number);
        edit.last_sequence = Some(self.last_sequence);
        for (level, key) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = key {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        edit
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("dir", &self.dir)
            .field("manifest", &self.manifest.number())
            .field("next_file_number", &self.next_file_number)
            .field("last_sequence", &self.last_sequence)
            .field("log_number", &self.log_number)
            .finish()
    }
}
