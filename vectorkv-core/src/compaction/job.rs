//! Executing a compaction task

use super::{CompactionReason, CompactionTask, GcFilter};
use crate::iterator::{LevelIter, MergeIterator, RecordIter};
use crate::sstable::{SSTableBuilder, SSTableConfig, SSTableMeta, TableStore};
use crate::version::VersionEdit;
use crate::{Result, SequenceNumber};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counters for one finished compaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub input_files: usize,
    pub output_files: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub records_read: u64,
    pub records_dropped: u64,
}

/// Result of a compaction: the edit to log and what it produced
#[derive(Debug)]
pub struct CompactionOutput {
    pub edit: VersionEdit,
    pub outputs: Vec<SSTableMeta>,
    pub stats: CompactionStats,
}

/// Merges the inputs of a [`CompactionTask`] into new tables at the output
/// level. Nothing becomes visible until the returned edit is logged.
pub struct CompactionJob<'a> {
    task: &'a CompactionTask,
    store: Arc<dyn TableStore>,
    config: SSTableConfig,
    smallest_snapshot: SequenceNumber,
}

impl<'a> CompactionJob<'a> {
    pub fn new(
        task: &'a CompactionTask,
        store: Arc<dyn TableStore>,
        config: SSTableConfig,
        smallest_snapshot: SequenceNumber,
    ) -> Self {
        Self {
            task,
            store,
            config,
            smallest_snapshot,
        }
    }

    /// Run the merge. `new_file_number` allocates ids for output tables.
    ///
    /// On error every output written so far is removed, finished or not.
    pub fn run(&self, new_file_number: impl FnMut() -> u64) -> Result<CompactionOutput> {
        let task = self.task;
        let started = Instant::now();
        info!(
            "Compacting {} L{} files with {} L{} files ({:?})",
            task.inputs.len(),
            task.level,
            task.next_inputs.len(),
            task.output_level(),
            task.reason
        );

        let mut outputs = Vec::new();
        let mut stats = CompactionStats {
            input_files: task.num_input_files(),
            bytes_read: task.input_bytes(),
            ..Default::default()
        };

        let mut builder = None;
        if let Err(e) = self.merge_into(&mut outputs, &mut stats, &mut builder, new_file_number) {
            if let Some(unfinished) = builder.take() {
                let id = unfinished.id();
                if let Err(remove_err) = unfinished.abandon() {
                    warn!("Failed to remove unfinished compaction output {}: {}", id, remove_err);
                }
            }
            for meta in &outputs {
                if let Err(remove_err) = self.store.remove(meta.id) {
                    warn!("Failed to remove compaction output {}: {}", meta.id, remove_err);
                }
            }
            return Err(e);
        }

        let mut edit = VersionEdit::new();
        for table in &task.inputs {
            edit.delete_file(task.level, table.id());
        }
        for table in &task.next_inputs {
            edit.delete_file(task.output_level(), table.id());
        }
        for meta in &outputs {
            edit.add_file(task.output_level(), meta.clone());
        }
        if task.level > 0 && task.reason != CompactionReason::Manual {
            if let Some(key) = task.largest_input_key() {
                edit.set_compact_pointer(task.level, key);
            }
        }

        stats.output_files = outputs.len();
        stats.bytes_written = outputs.iter().map(|m| m.file_size).sum();
        info!(
            "Compacted L{} -> L{}: {} files ({} bytes) into {} files ({} bytes), dropped {} of {} records in {:?}",
            task.level,
            task.output_level(),
            stats.input_files,
            stats.bytes_read,
            stats.output_files,
            stats.bytes_written,
            stats.records_dropped,
            stats.records_read,
            started.elapsed()
        );

        Ok(CompactionOutput {
            edit,
            outputs,
            stats,
        })
    }

    fn merge_into(
        &self,
        outputs: &mut Vec<SSTableMeta>,
        stats: &mut CompactionStats,
        builder: &mut Option<SSTableBuilder>,
        mut new_file_number: impl FnMut() -> u64,
    ) -> Result<()> {
        let task = self.task;
        let output_level = task.output_level();
        let mut filter = GcFilter::new(self.smallest_snapshot);

        for record in MergeIterator::new(self.sources()) {
            let record = record?;
            stats.records_read += 1;

            if !filter.keep(&record, |key| !task.version.key_may_exist_below(output_level, key)) {
                continue;
            }

            // Split only between user keys so one key never spans two files
            // of the same level
            let split = builder.as_ref().is_some_and(|b| {
                b.estimated_size() >= self.config.target_file_size
                    && b.last_user_key() != Some(&record.key)
            });
            if split {
                if let Some(full) = builder.take() {
                    outputs.push(self.finish_output(full)?);
                }
            }

            if builder.is_none() {
                let id = new_file_number();
                *builder = Some(SSTableBuilder::new(
                    id,
                    self.store.create(id)?,
                    self.config.clone(),
                ));
            }
            if let Some(b) = builder.as_mut() {
                b.add(&record)?;
            }
        }

        if let Some(b) = builder.take() {
            outputs.push(self.finish_output(b)?);
        }
        stats.records_dropped = filter.dropped();
        Ok(())
    }

    fn finish_output(&self, builder: SSTableBuilder) -> Result<SSTableMeta> {
        let meta = builder.finish()?;
        debug!(
            "Compaction output {}: {} entries, {} bytes",
            meta.id, meta.entry_count, meta.file_size
        );
        Ok(meta)
    }

    /// Newest first: each L0 input on its own, then the sorted levels
    fn sources(&self) -> Vec<RecordIter> {
        let task = self.task;
        let mut sources: Vec<RecordIter> = Vec::new();
        if task.level == 0 {
            for table in &task.inputs {
                sources.push(Box::new(LevelIter::new(vec![Arc::clone(table)], None)));
            }
        } else {
            sources.push(Box::new(LevelIter::new(task.inputs.clone(), None)));
        }
        if !task.next_inputs.is_empty() {
            sources.push(Box::new(LevelIter::new(task.next_inputs.clone(), None)));
        }
        sources
    }
}
