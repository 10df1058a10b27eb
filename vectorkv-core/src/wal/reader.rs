//! WAL reader for recovery

use super::WalEntry;
use crate::{KvError, Record, Result, SequenceNumber};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Entries recovered from one log file
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Complete, checksummed entries in append order
    pub entries: Vec<WalEntry>,
    /// Length of the valid prefix
    pub valid_bytes: u64,
    /// Whether bytes after the valid prefix were discarded
    pub truncated: bool,
}

impl WalReplay {
    /// Records of every entry, in append order
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.entries.iter().flat_map(|entry| entry.records())
    }

    /// Highest sequence number recovered, if any
    pub fn last_seq(&self) -> Option<SequenceNumber> {
        self.entries.last().map(|entry| entry.last_seq())
    }
}

/// WAL reader for recovering entries after crash
pub struct WalReader {
    path: PathBuf,
}

impl WalReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the log, stopping at the first torn or corrupt entry.
    ///
    /// A damaged tail is expected after a crash and is never an error;
    /// only failing to read the file is.
    pub fn replay(&self) -> Result<WalReplay> {
        let data = fs::read(&self.path)?;
        let mut replay = WalReplay::default();
        let mut offset = 0;

        while offset < data.len() {
            match WalEntry::deserialize_with_checksum(&data[offset..]) {
                Ok(Some((entry, bytes_read))) => {
                    replay.entries.push(entry);
                    offset += bytes_read;
                }
                Ok(None) => {
                    warn!(
                        "Incomplete entry at offset {} in {:?}, truncating",
                        offset, self.path
                    );
                    replay.truncated = true;
                    break;
                }
                Err(e @ KvError::ChecksumMismatch { .. }) | Err(e @ KvError::Corruption(_)) => {
                    warn!(
                        "{} at offset {} in {:?}, truncating",
                        e, offset, self.path
                    );
                    replay.truncated = true;
                    break;
                }
                Err(KvError::InvalidFormat(msg)) => {
                    warn!(
                        "Invalid entry at offset {} in {:?} ({}), truncating",
                        offset, self.path, msg
                    );
                    replay.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        replay.valid_bytes = offset as u64;
        info!(
            "Recovered {} entries from {:?}",
            replay.entries.len(),
            self.path
        );

        Ok(replay)
    }
}
