//! Manifest log and the CURRENT pointer
//!
//! The manifest is a sequence of framed [`VersionEdit`] records. `CURRENT`
//! names the live manifest and is replaced atomically when a new manifest
//! is started.

use super::VersionEdit;
use crate::util::{parse_file_number, sync_dir, write_file_atomic};
use crate::wal::{decode_frame, encode_frame};
use crate::{KvError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CURRENT_FILE: &str = "CURRENT";

pub fn manifest_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_name(number))
}

fn manifest_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Number of the manifest named by CURRENT, if the database exists
pub fn read_current(dir: &Path) -> Result<Option<u64>> {
    let path = dir.join(CURRENT_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&path)?;
    let name = contents.trim();
    parse_file_number(name, "MANIFEST-", "")
        .map(Some)
        .ok_or_else(|| KvError::Corruption(format!("CURRENT names invalid manifest {:?}", name)))
}

/// Point CURRENT at manifest `number`
pub fn set_current(dir: &Path, number: u64) -> Result<()> {
    write_file_atomic(
        &dir.join(CURRENT_FILE),
        format!("{}\n", manifest_name(number)).as_bytes(),
    )
}

/// Read every edit in a manifest.
///
/// An incomplete final record is a torn append that was never
/// acknowledged and is skipped; any other damage is corruption.
pub fn read_manifest(path: &Path) -> Result<Vec<VersionEdit>> {
    let data = fs::read(path)?;
    let mut edits = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        match decode_frame(&data[offset..]) {
            Ok(Some((body, consumed))) => {
                let edit = VersionEdit::decode(body).map_err(|e| {
                    KvError::Corruption(format!(
                        "undecodable manifest record at offset {} in {:?}: {}",
                        offset, path, e
                    ))
                })?;
                edits.push(edit);
                offset += consumed;
            }
            Ok(None) => {
                warn!(
                    "Ignoring incomplete manifest record at offset {} in {:?}",
                    offset, path
                );
                break;
            }
            Err(e) => {
                return Err(KvError::Corruption(format!(
                    "manifest {:?} damaged at offset {}: {}",
                    path, offset, e
                )));
            }
        }
    }

    Ok(edits)
}

/// Appends edits to one manifest file
pub struct ManifestWriter {
    file: File,
    number: u64,
    size: u64,
}

impl ManifestWriter {
    /// Create manifest `number` in `dir`
    pub fn create(dir: &Path, number: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(manifest_path(dir, number))?;
        sync_dir(dir)?;
        Ok(Self {
            file,
            number,
            size: 0,
        })
    }

    /// Append an edit and sync it
    pub fn append(&mut self, edit: &VersionEdit) -> Result<()> {
        let frame = encode_frame(&edit.encode()?);
        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.size += frame.len() as u64;
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}
