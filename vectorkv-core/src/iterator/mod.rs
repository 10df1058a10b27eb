//! Iterators shared by the read path and compaction
//!
//! Every source (memtable, table, level) is adapted to a stream of
//! `Result<Record>` in internal-key order. [`MergeIterator`] combines them,
//! [`DbIterator`] turns the merged stream into user-visible key/value pairs.

mod db;
mod level;
mod merge;

pub use db::DbIterator;
pub use level::LevelIter;
pub use merge::MergeIterator;

use crate::memtable::MemTableIter;
use crate::{Record, Result};

/// A boxed stream of records in internal-key order
pub type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// Adapt an infallible memtable iterator to a record source
pub fn memtable_source(iter: MemTableIter) -> RecordIter {
    Box::new(iter.map(Ok))
}
