//! Write-Ahead Log (WAL) implementation
//!
//! Every write batch is appended to the WAL and synced before it is
//! acknowledged. Each memtable generation owns one log file; the file is
//! deleted once that memtable has been flushed and the manifest records a
//! newer log number. After a crash the surviving logs are replayed up to
//! the first torn or corrupt entry.

mod batch;
mod entry;
mod reader;
mod writer;

pub use batch::{BatchOp, WriteBatch};
pub use entry::{decode_frame, encode_frame, WalEntry, FRAME_OVERHEAD};
pub use reader::{WalReader, WalReplay};
pub use writer::WalWriter;

use crate::util::parse_file_number;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// WAL sync policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    #[default]
    Immediate,
    /// Sync after N writes
    EveryN(usize),
    /// Sync on interval (trades durability for performance)
    Interval { millis: u64 },
    /// Never sync (OS decides, fastest, least safe)
    None,
}

/// WAL configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Sync policy
    pub sync_policy: SyncPolicy,
}

/// Path of the log file with the given number
pub fn log_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:020}.log", number))
}

/// Numbers of all log files in `dir`, ascending
pub fn list_logs(dir: &Path) -> Result<Vec<u64>> {
    let mut numbers = Vec::new();
    if !dir.exists() {
        return Ok(numbers);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(number) = entry
            .file_name()
            .to_str()
            .and_then(|name| parse_file_number(name, "", ".log"))
        {
            numbers.push(number);
        }
    }

    numbers.sort_unstable();
    Ok(numbers)
}

/// Delete every log older than `number`. Returns how many were removed.
pub fn remove_logs_before(dir: &Path, number: u64) -> Result<usize> {
    let mut removed = 0;
    for old in list_logs(dir)?.into_iter().filter(|&n| n < number) {
        fs::remove_file(log_path(dir, old))?;
        removed += 1;
    }
    Ok(removed)
}
