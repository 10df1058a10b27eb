//! Leveled compaction
//!
//! The picker decides what to compact from the current [`Version`]; a
//! [`CompactionJob`] merges the inputs and produces the [`VersionEdit`]
//! that swaps inputs for outputs.
//!
//! [`VersionEdit`]: crate::version::VersionEdit

mod filter;
mod job;

pub use filter::GcFilter;
pub use job::{CompactionJob, CompactionOutput, CompactionStats};

use crate::version::{TableHandle, Version};
use crate::{KvError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Compaction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Number of L0 files that triggers an L0 compaction
    pub l0_compaction_trigger: usize,
    /// Size multiplier between levels
    pub level_size_multiplier: u64,
    /// Base level size (L1) in bytes
    pub base_level_size: u64,
    /// Maximum levels
    pub max_levels: usize,
    /// Attempts for a failing background job before it is given up
    pub max_background_retries: u32,
    /// First retry delay, doubled on every attempt
    pub retry_backoff_ms: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            l0_compaction_trigger: crate::config::L0_COMPACTION_TRIGGER,
            level_size_multiplier: crate::config::LEVEL_SIZE_RATIO,
            base_level_size: crate::config::BASE_LEVEL_SIZE,
            max_levels: crate::config::MAX_LEVELS,
            max_background_retries: crate::config::MAX_BACKGROUND_RETRIES,
            retry_backoff_ms: crate::config::RETRY_BACKOFF_MS,
        }
    }
}

impl CompactionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.l0_compaction_trigger == 0 {
            return Err(KvError::Config("l0_compaction_trigger must be positive".into()));
        }
        if self.level_size_multiplier < 2 {
            return Err(KvError::Config("level_size_multiplier must be at least 2".into()));
        }
        if self.max_levels < 2 {
            return Err(KvError::Config("max_levels must be at least 2".into()));
        }
        if self.base_level_size == 0 {
            return Err(KvError::Config("base_level_size must be positive".into()));
        }
        Ok(())
    }

    /// Size limit for a level >= 1
    pub fn target_size_for_level(&self, level: usize) -> u64 {
        let exp = level.saturating_sub(1) as u32;
        self.base_level_size
            .saturating_mul(self.level_size_multiplier.saturating_pow(exp))
    }
}

/// Why a compaction was scheduled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompactionReason {
    /// Too many L0 files
    L0FileCount,
    /// Level larger than its target; score is size / target
    LevelSize { score: f64 },
    /// Requested by `compact_range`
    Manual,
}

/// Inputs of one compaction: files from `level` merged with the overlapping
/// files of `level + 1`.
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub level: usize,
    pub inputs: Vec<Arc<TableHandle>>,
    pub next_inputs: Vec<Arc<TableHandle>>,
    pub reason: CompactionReason,
    /// Version the inputs were picked from
    pub version: Arc<Version>,
}

impl CompactionTask {
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    pub fn num_input_files(&self) -> usize {
        self.inputs.len() + self.next_inputs.len()
    }

    pub fn input_bytes(&self) -> u64 {
        self.inputs
            .iter()
            .chain(&self.next_inputs)
            .map(|t| t.meta().file_size)
            .sum()
    }

    /// Largest user key among the `level` inputs
    pub fn largest_input_key(&self) -> Option<Bytes> {
        self.inputs.iter().map(|t| t.meta().largest_key.clone()).max()
    }
}

/// Size score of every level; a score >= 1 needs compaction.
/// L0 is scored by file count, the last level is never scored.
pub fn level_scores(version: &Version, config: &CompactionConfig) -> Vec<f64> {
    let last = version.num_levels() - 1;
    (0..last)
        .map(|level| {
            if level == 0 {
                version.num_files(0) as f64 / config.l0_compaction_trigger as f64
            } else {
                version.level_size(level) as f64 / config.target_size_for_level(level) as f64
            }
        })
        .collect()
}

pub fn needs_compaction(version: &Version, config: &CompactionConfig) -> bool {
    level_scores(version, config).iter().any(|&s| s >= 1.0)
}

/// Pick the most urgent compaction, if any.
///
/// `compact_pointer` returns where the last size-triggered compaction of a
/// level ended; the next one starts with the first file after it.
pub fn pick_compaction(
    version: &Arc<Version>,
    config: &CompactionConfig,
    compact_pointer: impl Fn(usize) -> Option<Bytes>,
) -> Option<CompactionTask> {
    if version.num_files(0) >= config.l0_compaction_trigger {
        let inputs = version.level(0).to_vec();
        let (start, end) = key_range(&inputs)?;
        let next_inputs = version.overlapping(1, Some(start.as_ref()), Some(end.as_ref()));
        return Some(CompactionTask {
            level: 0,
            inputs,
            next_inputs,
            reason: CompactionReason::L0FileCount,
            version: Arc::clone(version),
        });
    }

    let scores = level_scores(version, config);
    let (level, score) = scores
        .iter()
        .copied()
        .enumerate()
        .skip(1)
        .filter(|&(_, score)| score >= 1.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let tables = version.level(level);
    let file = compact_pointer(level)
        .and_then(|ptr| tables.iter().find(|t| t.meta().smallest_key > ptr))
        .or_else(|| tables.first())?;

    let meta = file.meta();
    let next_inputs = version.overlapping(
        level + 1,
        Some(meta.smallest_key.as_ref()),
        Some(meta.largest_key.as_ref()),
    );

    Some(CompactionTask {
        level,
        inputs: vec![Arc::clone(file)],
        next_inputs,
        reason: CompactionReason::LevelSize { score },
        version: Arc::clone(version),
    })
}

/// Compact every file of `level` overlapping `[begin, end]` into `level + 1`.
///
/// Overlapping L0 inputs are widened until no other L0 file overlaps their
/// combined range, so no older L0 version of a key is left above a newer
/// one that moved down.
pub fn pick_manual(
    version: &Arc<Version>,
    level: usize,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Option<CompactionTask> {
    if level + 1 >= version.num_levels() {
        return None;
    }

    let mut inputs = version.overlapping(level, begin, end);
    if inputs.is_empty() {
        return None;
    }

    if level == 0 {
        loop {
            let (start, end) = key_range(&inputs)?;
            let widened = version.overlapping(0, Some(start.as_ref()), Some(end.as_ref()));
            if widened.len() == inputs.len() {
                break;
            }
            inputs = widened;
        }
    }

    let (start, end) = key_range(&inputs)?;
    let next_inputs = version.overlapping(level + 1, Some(start.as_ref()), Some(end.as_ref()));

    Some(CompactionTask {
        level,
        inputs,
        next_inputs,
        reason: CompactionReason::Manual,
        version: Arc::clone(version),
    })
}

/// Combined `[smallest, largest]` user-key range of `tables`
fn key_range(tables: &[Arc<TableHandle>]) -> Option<(Bytes, Bytes)> {
    let start = tables.iter().map(|t| t.meta().smallest_key.clone()).min()?;
    let end = tables.iter().map(|t| t.meta().largest_key.clone()).max()?;
    Some((start, end))
}
