//! Forward iterator over one SSTable

use super::{Block, SSTableReader};
use crate::{InternalKey, Record, Result};
use std::sync::Arc;

/// Lazily walks a table block by block, in internal-key order.
///
/// Yields an error once (for example a corrupt block) and then ends.
pub struct TableIter {
    table: Arc<SSTableReader>,
    block_idx: usize,
    block: Option<Arc<Block>>,
    pos: usize,
    done: bool,
}

impl TableIter {
    pub(super) fn new(table: Arc<SSTableReader>) -> Self {
        Self {
            table,
            block_idx: 0,
            block: None,
            pos: 0,
            done: false,
        }
    }

    pub fn table_id(&self) -> u64 {
        self.table.id()
    }

    /// Restart from the first record
    pub fn seek_to_first(&mut self) {
        self.block_idx = 0;
        self.block = None;
        self.pos = 0;
        self.done = false;
    }

    /// Position at the first record `>= target`
    pub fn seek(&mut self, target: &InternalKey) -> Result<()> {
        self.done = false;
        self.block_idx = self.table.find_block(target);
        self.block = None;
        self.pos = 0;
        if self.block_idx >= self.table.num_blocks() {
            return Ok(());
        }

        let block = self.table.read_block(self.block_idx)?;
        self.pos = block.seek(target);
        self.block = Some(block);
        Ok(())
    }
}

impl Iterator for TableIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.done {
            return None;
        }

        loop {
            if let Some(block) = &self.block {
                if let Some(record) = block.record(self.pos) {
                    self.pos += 1;
                    return Some(Ok(record.clone()));
                }
                self.block = None;
                self.block_idx += 1;
                self.pos = 0;
            }

            if self.block_idx >= self.table.num_blocks() {
                self.done = true;
                return None;
            }

            match self.table.read_block(self.block_idx) {
                Ok(block) => self.block = Some(block),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
