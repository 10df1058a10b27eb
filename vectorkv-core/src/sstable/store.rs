//! Storage backends for table files
//!
//! The engine talks to tables through [`TableStore`]; which backend is used
//! is decided by [`StoreBackend`] in the configuration.

use crate::util::{parse_file_number, sync_dir};
use crate::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Table storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Files under `<dir>/sst`
    #[default]
    Local,
}

/// Open the configured backend rooted at `dir`
pub fn open_table_store(backend: StoreBackend, dir: &Path) -> Result<Arc<dyn TableStore>> {
    match backend {
        StoreBackend::Local => Ok(Arc::new(LocalTableStore::open(dir)?)),
    }
}

/// A table being written. Bytes become visible under the table id only
/// after [`finish`](TableFile::finish).
pub trait TableFile: Write + Send {
    /// Make the file durable and publish it; returns its size.
    /// A failed publish leaves nothing behind.
    fn finish(self: Box<Self>) -> Result<u64>;

    /// Discard the unfinished file
    fn abandon(self: Box<Self>) -> Result<()>;
}

/// Positional reads from a finished table
pub trait RandomAccessFile: Send + Sync {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
    fn len(&self) -> u64;
}

/// Create, open, list, and delete table files by id
pub trait TableStore: Send + Sync + fmt::Debug {
    fn create(&self, id: u64) -> Result<Box<dyn TableFile>>;
    fn open(&self, id: u64) -> Result<Arc<dyn RandomAccessFile>>;
    fn remove(&self, id: u64) -> Result<()>;
    /// Ids of every finished table
    fn list(&self) -> Result<Vec<u64>>;
    /// Discard tables that were never finished
    fn remove_partial(&self) -> Result<usize>;
}

/// Tables stored as `{id:06}.sst` in one directory
#[derive(Debug)]
pub struct LocalTableStore {
    dir: PathBuf,
}

impl LocalTableStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn table_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{:06}.sst", id))
    }

    fn tmp_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{:06}.sst.tmp", id))
    }
}

impl TableStore for LocalTableStore {
    fn create(&self, id: u64) -> Result<Box<dyn TableFile>> {
        let tmp_path = self.tmp_path(id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        Ok(Box::new(LocalTableFile {
            file: BufWriter::new(file),
            tmp_path,
            final_path: self.table_path(id),
            dir: self.dir.clone(),
            written: 0,
        }))
    }

    fn open(&self, id: u64) -> Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(self.table_path(id))?;
        let len = file.metadata()?.len();
        Ok(Arc::new(LocalRandomAccessFile { file, len }))
    }

    fn remove(&self, id: u64) -> Result<()> {
        fs::remove_file(self.table_path(id))?;
        debug!("Removed table {}", id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_file_number(name, "", ".sst"))
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn remove_partial(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".sst.tmp"));
            if is_tmp {
                warn!("Removing unfinished table {:?}", path);
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

struct LocalTableFile {
    file: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    dir: PathBuf,
    written: u64,
}

impl Write for LocalTableFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl LocalTableFile {
    fn publish(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        sync_dir(&self.dir)
    }
}

impl TableFile for LocalTableFile {
    fn finish(mut self: Box<Self>) -> Result<u64> {
        if let Err(e) = self.publish() {
            if self.tmp_path.exists() {
                let _ = fs::remove_file(&self.tmp_path);
            }
            return Err(e);
        }
        Ok(self.written)
    }

    fn abandon(self: Box<Self>) -> Result<()> {
        let LocalTableFile { file, tmp_path, .. } = *self;
        drop(file);
        fs::remove_file(&tmp_path)?;
        debug!("Abandoned unfinished table {:?}", tmp_path);
        Ok(())
    }
}

struct LocalRandomAccessFile {
    file: File,
    len: u64,
}

impl RandomAccessFile for LocalRandomAccessFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(KvError::Corruption(format!(
                "read of {} bytes at {} past end of {} byte table",
                len, offset, self.len
            )));
        }
        let mut buf = vec![0u8; len];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
