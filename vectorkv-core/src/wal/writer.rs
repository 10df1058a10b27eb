//! WAL writer implementation

use super::{log_path, SyncPolicy, WalEntry};
use crate::util::sync_dir;
use crate::{Result, SequenceNumber};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Appends entries to one log file.
///
/// Callers serialize access; the engine's writer lock owns the active log.
pub struct WalWriter {
    path: PathBuf,
    number: u64,
    sync_policy: SyncPolicy,
    file: BufWriter<File>,
    bytes_written: u64,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl WalWriter {
    /// Create the log file `number` in `dir`
    pub fn create(dir: &Path, number: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let path = log_path(dir, number);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        sync_dir(dir)?;

        debug!("Created WAL {:?}", path);

        Ok(Self {
            path,
            number,
            sync_policy,
            file: BufWriter::new(file),
            bytes_written: 0,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        })
    }

    /// Append an entry, syncing according to the policy before returning.
    ///
    /// Returns the last sequence number carried by the entry.
    pub fn append(&mut self, entry: &WalEntry) -> Result<SequenceNumber> {
        let serialized = entry.serialize_with_checksum();

        self.file.write_all(&serialized)?;
        self.file.flush()?;
        self.bytes_written += serialized.len() as u64;
        self.writes_since_sync += 1;

        if self.should_sync() {
            self.sync()?;
        }

        Ok(entry.last_seq())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Log file number
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far
    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    fn should_sync(&self) -> bool {
        match self.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => self.writes_since_sync >= n,
            SyncPolicy::Interval { millis } => {
                self.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }
}

#[cfg(test)]
impl WalWriter {
    /// Writer over an existing log opened read-only; every append fails
    pub(crate) fn read_only(dir: &Path, number: u64) -> Result<Self> {
        let path = log_path(dir, number);
        let file = File::open(&path)?;
        Ok(Self {
            path,
            number,
            sync_policy: SyncPolicy::Immediate,
            file: BufWriter::new(file),
            bytes_written: 0,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        })
    }
}
