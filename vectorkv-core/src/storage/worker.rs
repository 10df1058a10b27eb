//! Background worker: memtable flushes and compactions

use super::engine::EngineInner;
use super::flush::write_level0_table;
use crate::compaction::{pick_compaction, pick_manual, CompactionJob, CompactionTask};
use crate::memtable::ImmutableMemTable;
use crate::version::VersionEdit;
use crate::wal::remove_logs_before;
use crate::{KvError, Result};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Work sent to the background thread
pub(crate) enum Job {
    /// Flush every frozen memtable, then compact if needed
    Flush { reply: Option<Sender<Result<()>>> },
    /// Compact while any level is over its limit
    Compact,
    /// Push the range down level by level
    CompactRange {
        begin: Option<Bytes>,
        end: Option<Bytes>,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

impl EngineInner {
    /// Worker loop; runs until [`Job::Shutdown`] or every sender is gone
    pub fn run_worker(&self, jobs: Receiver<Job>) {
        debug!("Background worker started");
        while let Ok(job) = jobs.recv() {
            match job {
                Job::Flush { reply } => {
                    let result = match self.background_error() {
                        Some(e) => Err(e),
                        None => self.flush_pending(),
                    };
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                    self.maybe_compact();
                }
                Job::Compact => self.maybe_compact(),
                Job::CompactRange { begin, end, reply } => {
                    let result = self.compact_range(begin.as_deref(), end.as_deref());
                    let _ = reply.send(result);
                }
                Job::Shutdown => break,
            }
        }
        debug!("Background worker stopped");
    }

    /// Run `op`, retrying I/O failures with exponential backoff. A failure
    /// that outlasts the retries becomes the sticky background error,
    /// except a compaction stopped by corrupt input, which only fails
    /// that compaction.
    fn with_retry(&self, what: &str, mut op: impl FnMut() -> Result<()>) -> Result<()> {
        if let Some(e) = self.background_error() {
            return Err(e);
        }

        let config = &self.config.compaction;
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < config.max_background_retries => {
                    let delay = config
                        .retry_backoff_ms
                        .saturating_mul(2u64.saturating_pow(attempt));
                    attempt += 1;
                    warn!(
                        "Background {} failed (attempt {}), retrying in {}ms: {}",
                        what, attempt, delay, e
                    );
                    thread::sleep(Duration::from_millis(delay));
                }
                Err(e @ KvError::Compaction(_)) => {
                    error!("Background {} abandoned: {}", what, e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Background {} failed, stopping writes: {}", what, e);
                    *self.bg_error.lock() = Some(format!("{} failed: {}", what, e));
                    self.wake_writers();
                    return Err(e);
                }
            }
        }
    }

    /// Wake writers stalled on the frozen memtable limit
    fn wake_writers(&self) {
        // Taking the lock orders this after a writer that is about to wait
        drop(self.writer.lock());
        self.stall.notify_all();
    }

    /// Flush frozen memtables, if any, ahead of other background work
    fn flush_pending(&self) -> Result<()> {
        if self.current_state().immutables.is_empty() {
            return Ok(());
        }
        self.with_retry("flush", || self.flush_immutables())
    }

    fn flush_immutables(&self) -> Result<()> {
        loop {
            let state = self.current_state();
            let Some(imm) = state.oldest_immutable() else {
                return Ok(());
            };
            self.flush_one(imm, state.next_log_number(imm.id()))?;
        }
    }

    /// Write `imm` to L0 and retire its WAL
    fn flush_one(&self, imm: &ImmutableMemTable, next_log: u64) -> Result<()> {
        let id = self.versions.lock().new_file_number();
        let horizon = self.snapshots.gc_horizon(&self.visible_seq);
        let meta = write_level0_table(imm.iter(), id, &self.store, &self.config.sstable, horizon)?;

        let mut edit = VersionEdit::new();
        if let Some(meta) = meta {
            edit.add_file(0, meta);
        }
        edit.log_number = Some(next_log);
        edit.last_sequence = imm.max_seq();

        // A table written by a failed attempt stays behind as an orphan and
        // is removed on the next open
        {
            let mut versions = self.versions.lock();
            let version = versions.log_and_apply(edit)?;
            let mut state = self.state.write();
            *state = Arc::new(state.with_flushed(imm.id(), version));
        }
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        debug!("Memtable {} flushed, WAL {} retired", imm.id(), imm.log_number());

        if let Err(e) = remove_logs_before(&self.wal_dir, next_log) {
            warn!("Failed to remove old WAL files: {}", e);
        }
        self.wake_writers();
        Ok(())
    }

    /// Compact until no level needs it, the engine shuts down, or a
    /// compaction fails. Frozen memtables are flushed between tasks so
    /// stalled writers never wait on a chain of compactions.
    fn maybe_compact(&self) {
        while !self.shutting_down.load(Ordering::Acquire) {
            if self.flush_pending().is_err() || self.bg_error.lock().is_some() {
                return;
            }

            let task = {
                let versions = self.versions.lock();
                let version = versions.current();
                pick_compaction(&version, &self.config.compaction, |level| {
                    versions.compact_pointer(level).cloned()
                })
            };
            let Some(task) = task else {
                return;
            };
            if self.is_damaged(&task) {
                debug!("Skipping L{} compaction over damaged tables", task.level);
                return;
            }

            match self.with_retry("compaction", || self.run_compaction(&task)) {
                Ok(()) => {}
                Err(KvError::Compaction(_)) => {
                    let mut damaged = self.damaged_inputs.lock();
                    damaged.extend(task.inputs.iter().chain(&task.next_inputs).map(|t| t.id()));
                    warn!(
                        "Automatic compaction will skip tables {:?}",
                        damaged
                    );
                    return;
                }
                Err(_) => return,
            }
        }
    }

    fn is_damaged(&self, task: &CompactionTask) -> bool {
        let damaged = self.damaged_inputs.lock();
        !damaged.is_empty()
            && task
                .inputs
                .iter()
                .chain(&task.next_inputs)
                .any(|t| damaged.contains(&t.id()))
    }

    /// Merge `task` and install the result
    fn run_compaction(&self, task: &CompactionTask) -> Result<()> {
        let horizon = self.snapshots.gc_horizon(&self.visible_seq);
        let job = CompactionJob::new(
            task,
            Arc::clone(&self.store),
            self.config.sstable.clone(),
            horizon,
        );
        let output = job
            .run(|| self.versions.lock().new_file_number())
            .map_err(|e| {
                if e.is_corruption() {
                    KvError::Compaction(format!(
                        "L{} -> L{} stopped on corrupt input: {}",
                        task.level,
                        task.output_level(),
                        e
                    ))
                } else {
                    e
                }
            })?;

        {
            let mut versions = self.versions.lock();
            let version = versions.log_and_apply(output.edit)?;
            let mut state = self.state.write();
            *state = Arc::new(state.with_version(version));
        }

        self.compaction_count.fetch_add(1, Ordering::Relaxed);
        self.compaction_bytes_written
            .fetch_add(output.stats.bytes_written, Ordering::Relaxed);
        Ok(())
    }

    /// Push every table overlapping `[begin, end]` down to the deepest
    /// level that holds data. Runs to completion once started.
    fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        if let Some(e) = self.background_error() {
            return Err(e);
        }
        if let (Some(b), Some(e)) = (begin, end) {
            if b > e {
                return Err(KvError::InvalidArgument(
                    "compaction range begin is after end".into(),
                ));
            }
        }

        let deepest = {
            let version = self.versions.lock().current();
            (0..version.num_levels())
                .rev()
                .find(|&level| version.num_files(level) > 0)
                .unwrap_or(0)
        };

        info!("Manual compaction of levels 0..{}", deepest.max(1));
        for level in 0..deepest.max(1) {
            self.flush_pending()?;
            let task = {
                let version = self.versions.lock().current();
                pick_manual(&version, level, begin, end)
            };
            if let Some(task) = task {
                self.run_compaction(&task)?;
            }
        }
        Ok(())
    }
}
