//! Leveled compaction — `L0..Lk` with per-level size budgets.
//!
//! Unlike size-tiered compaction, leveled compaction keeps `L1..LN`
//! range-disjoint: each level holds at most one version of any key, and
//! compacting a file always merges it with the handful of next-level files
//! whose key range it overlaps, rather than with every other SSTable its
//! size happens to be close to. This bounds read amplification (a point
//! lookup touches at most one file per non-`L0` level) at the cost of more
//! write amplification than STCS.
//!
//! ## Trigger
//!
//! [`crate::engine::version::Version::pick_compaction_level`] scores every
//! level — `L0` on file count vs. `l0_compaction_trigger`, `Lk (k>=1)` on
//! total bytes vs. its target budget — and returns the highest-scoring
//! level, if any scores `>= 1.0`.
//!
//! ## Input selection
//!
//! - `L0`: every `L0` file participates (they may overlap each other
//!   arbitrarily, so a partial merge couldn't preserve ordering).
//! - `Lk (k>=1)`: a single file is picked via `Manifest`'s round-robin
//!   `compact_pointer` for that level, so repeated compactions eventually
//!   touch every file rather than always picking the same one.
//!
//! Either way, every file in `level + 1` whose key range overlaps the
//! selected input(s) is pulled into the same merge — this is what keeps
//! `level + 1` disjoint afterward.
//!
//! ## Merge and tombstone elimination
//!
//! The merge itself reuses [`crate::compaction::dedup_records`]. If no
//! level deeper than `level + 1` holds any key in the merged span (a
//! "bottommost" compaction for that range), tombstones are eliminated the
//! same way [`crate::compaction::stcs::major`] does for a full merge — the
//! Put they would have suppressed is either absent or already merged out.
//! Otherwise tombstones are preserved, since a deeper level may still hold
//! data they need to keep shadowed.
//!
//! ## Output splitting
//!
//! The merged output is cut into multiple SSTables when either bound is
//! crossed: `config.max_file_size`, or the accumulated overlap with
//! `level + 2` exceeds `max_file_size * max_grandparent_overlap_factor`
//! (the "sparse merge" rule — keeps a single output file from being
//! expensive to compact further down the tree).

use std::sync::Arc;

use crate::compaction::{
    CompactionError, CompactionResult, MergeIterator, dedup_records, full_range_scan_iters,
};
use crate::engine::utils::Record;
use crate::engine::version::{Version, sstable_overlaps_range};
use crate::engine::{EngineConfig, RangeTombstone, SSTABLE_DIR};
use crate::manifest::{Manifest, ManifestSstEntry};
use crate::sstable::{self, PointEntry, SSTable};
use tracing::{debug, info};

use super::CompactionStrategy;

#[cfg(test)]
mod tests;

/// Score-driven leveled compaction. Used for both `minor()` and `major()`
/// in [`super::CompactionStrategyType::Leveled`] — there is only one
/// algorithm, triggered either by the background loop (minor) or an
/// explicit user call (major forces level 0, see [`MajorCompaction`]).
pub struct LeveledCompaction;

impl CompactionStrategy for LeveledCompaction {
    fn compact(
        &self,
        sstables: &[Arc<SSTable>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
        oldest_snapshot: Option<u64>,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        let version = Version::from_sstables(sstables, config.num_levels);
        let Some(level) = version.pick_compaction_level(config) else {
            debug!("leveled compaction: no level over its score budget");
            return Ok(None);
        };
        execute(&version, level, manifest, data_dir, config, oldest_snapshot)
    }
}

/// User-triggered full-tree compaction: always compacts `L0` (if present),
/// regardless of score. Backs `Engine::major_compact()` for the `Leveled`
/// strategy family, mirroring how `stcs::MajorCompaction` forces a merge
/// rather than waiting on a threshold.
pub struct MajorCompaction;

impl CompactionStrategy for MajorCompaction {
    fn compact(
        &self,
        sstables: &[Arc<SSTable>],
        manifest: &mut Manifest,
        data_dir: &str,
        config: &EngineConfig,
        oldest_snapshot: Option<u64>,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        let version = Version::from_sstables(sstables, config.num_levels);
        let last = version.num_levels().saturating_sub(1);
        let level = (0..last).find(|&l| version.file_count(l) > 0);
        let Some(level) = level else {
            debug!("leveled major compaction: nothing resident to compact");
            return Ok(None);
        };
        execute(&version, level, manifest, data_dir, config, oldest_snapshot)
    }
}

/// Leveled compaction has no separate per-SSTable tombstone GC pass —
/// tombstones are eliminated inline whenever a merge reaches the bottommost
/// level for their key range, so a standalone pass would find nothing
/// [`LeveledCompaction`] hasn't already handled.
pub struct NoopTombstoneCompaction;

impl CompactionStrategy for NoopTombstoneCompaction {
    fn compact(
        &self,
        _sstables: &[Arc<SSTable>],
        _manifest: &mut Manifest,
        _data_dir: &str,
        _config: &EngineConfig,
        _oldest_snapshot: Option<u64>,
    ) -> Result<Option<CompactionResult>, CompactionError> {
        Ok(None)
    }
}

// ------------------------------------------------------------------------------------------------
// Execution
// ------------------------------------------------------------------------------------------------

fn execute(
    version: &Version,
    level: usize,
    manifest: &mut Manifest,
    data_dir: &str,
    config: &EngineConfig,
    oldest_snapshot: Option<u64>,
) -> Result<Option<CompactionResult>, CompactionError> {
    let level_files = &version.levels[level];
    if level_files.is_empty() {
        return Ok(None);
    }

    let inputs: Vec<Arc<SSTable>> = if level == 0 {
        level_files.clone()
    } else {
        let pointer = manifest.get_compact_pointer(level as u32)?;
        let idx = level_files
            .iter()
            .position(|f| f.properties.min_key.as_slice() > pointer.as_slice())
            .unwrap_or(0);
        vec![Arc::clone(&level_files[idx])]
    };

    let min_key = inputs
        .iter()
        .map(|f| f.properties.min_key.clone())
        .min()
        .expect("inputs non-empty");
    let max_key = inputs
        .iter()
        .map(|f| f.properties.max_key.clone())
        .max()
        .expect("inputs non-empty");

    let next_level = level + 1;
    let next_level_files: Vec<Arc<SSTable>> = version
        .levels
        .get(next_level)
        .map(|files| {
            files
                .iter()
                .filter(|f| sstable_overlaps_range(f, &min_key, &max_key))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    let mut all_inputs = inputs.clone();
    all_inputs.extend(next_level_files.iter().cloned());

    let removed_ids: Vec<u64> = all_inputs.iter().map(|f| f.id).collect();
    info!(
        level,
        next_level,
        input_count = inputs.len(),
        overlap_count = next_level_files.len(),
        ?removed_ids,
        "leveled compaction: starting merge"
    );

    let span_min = all_inputs
        .iter()
        .map(|f| f.properties.min_key.clone())
        .min()
        .expect("all_inputs non-empty");
    let mut span_max_exclusive = all_inputs
        .iter()
        .map(|f| f.properties.max_key.clone())
        .max()
        .expect("all_inputs non-empty");
    let span_max_inclusive = span_max_exclusive.clone();
    span_max_exclusive.push(0xFF);

    let bottommost = is_bottommost(version, next_level, &span_min, &span_max_inclusive);

    let sst_refs: Vec<&SSTable> = all_inputs.iter().map(|f| f.as_ref()).collect();
    let iters = full_range_scan_iters(&sst_refs)?;
    let merge_iter = MergeIterator::new(iters);

    let (point_entries, range_tombstones) = if bottommost {
        merge_bottommost(merge_iter, oldest_snapshot)
    } else {
        dedup_records(merge_iter, oldest_snapshot)
    };

    // Advance the round-robin pointer for non-L0 levels regardless of
    // whether anything survived — otherwise a fully-deleted key range
    // would keep getting re-selected forever.
    if level != 0 {
        manifest.set_compact_pointer(level as u32, span_max_inclusive.clone())?;
    }

    if point_entries.is_empty() && range_tombstones.is_empty() {
        info!(?removed_ids, "leveled compaction: every entry eliminated");
        manifest.apply_compaction(Vec::new(), removed_ids.clone())?;
        manifest.checkpoint()?;
        remove_files(data_dir, &removed_ids);
        return Ok(Some(CompactionResult {
            removed_ids,
            new_ssts: Vec::new(),
        }));
    }

    let grandparents: &[Arc<SSTable>] = version
        .levels
        .get(next_level + 1)
        .map(|v| v.as_slice())
        .unwrap_or(&[]);

    let (new_entries, new_ssts) = build_outputs(
        point_entries,
        range_tombstones,
        next_level as u32,
        grandparents,
        data_dir,
        manifest,
        config,
    )?;

    manifest.apply_compaction(new_entries, removed_ids.clone())?;
    manifest.checkpoint()?;
    remove_files(data_dir, &removed_ids);

    info!(
        new_sst_ids = ?new_ssts.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        removed_count = removed_ids.len(),
        "leveled compaction: complete"
    );

    Ok(Some(CompactionResult {
        removed_ids,
        new_ssts,
    }))
}

/// True when no level deeper than `next_level` holds any file overlapping
/// `[min_key, max_key]` — i.e. this merge's output has nowhere further to
/// shadow, so any tombstone it produces can only ever suppress data already
/// folded into this same merge.
fn is_bottommost(version: &Version, next_level: usize, min_key: &[u8], max_key: &[u8]) -> bool {
    for level in (next_level + 1)..version.num_levels() {
        if version.levels[level]
            .iter()
            .any(|f| sstable_overlaps_range(f, min_key, max_key))
        {
            return false;
        }
    }
    true
}

/// Merges a record stream that has nowhere deeper to shadow: range
/// tombstones suppress covered Puts in-line (same as
/// `stcs::major::execute`), and tombstones — point and range — are dropped
/// from the output once their sequence is at or below `oldest_snapshot`
/// (the smallest live snapshot LSN, or "no floor" when `None`). A version
/// or tombstone still above the floor is retained, since some live
/// snapshot's view depends on it.
fn merge_bottommost(
    merge_iter: impl Iterator<Item = Record>,
    oldest_snapshot: Option<u64>,
) -> (Vec<PointEntry>, Vec<RangeTombstone>) {
    let floor = oldest_snapshot.unwrap_or(u64::MAX);
    let mut all_range_tombstones: Vec<RangeTombstone> = Vec::new();
    let records: Vec<Record> = merge_iter.collect();
    for record in &records {
        if let Record::RangeDelete {
            start,
            end,
            lsn,
            timestamp,
        } = record
        {
            all_range_tombstones.push(RangeTombstone {
                start: start.clone(),
                end: end.clone(),
                lsn: *lsn,
                timestamp: *timestamp,
            });
        }
    }

    let mut point_entries = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;
    let mut prev_seq: Option<u64> = None;

    for record in records {
        match record {
            Record::RangeDelete { .. } => {}
            Record::Delete { key, lsn, timestamp } => {
                let is_first = last_key.as_ref() != Some(&key);
                if is_first {
                    last_key = Some(key.clone());
                    prev_seq = Some(lsn);
                } else {
                    let drop = prev_seq.is_some_and(|s| s <= floor);
                    prev_seq = Some(lsn);
                    if drop {
                        continue; // Superseded and unreachable by any live snapshot.
                    }
                }
                // Bottommost: a tombstone at or below the floor has nothing
                // left to shadow and no snapshot can need it.
                if lsn <= floor {
                    continue;
                }
                point_entries.push(PointEntry {
                    key,
                    value: None,
                    lsn,
                    timestamp,
                });
            }
            Record::Put {
                key,
                value,
                lsn,
                timestamp,
            } => {
                let is_first = last_key.as_ref() != Some(&key);
                if is_first {
                    last_key = Some(key.clone());
                    prev_seq = Some(lsn);
                } else {
                    let drop = prev_seq.is_some_and(|s| s <= floor);
                    prev_seq = Some(lsn);
                    if drop {
                        continue; // Superseded and unreachable by any live snapshot.
                    }
                }

                // Only suppress a Put by a range tombstone once that
                // tombstone's own LSN has itself fallen below the floor —
                // otherwise some live snapshot reads before the range
                // delete took effect and still needs this Put.
                let suppressed = all_range_tombstones
                    .iter()
                    .any(|rt| key >= rt.start && key < rt.end && rt.lsn > lsn && rt.lsn <= floor);
                if suppressed {
                    continue;
                }

                point_entries.push(PointEntry {
                    key,
                    value: Some(value),
                    lsn,
                    timestamp,
                });
            }
        }
    }

    (point_entries, Vec::new())
}

/// Splits the merged output into one or more SSTables, writing each to
/// disk and allocating its ID via the manifest, bounded by
/// `config.max_file_size` and the grandparent-overlap rule.
#[allow(clippy::too_many_arguments)]
fn build_outputs(
    point_entries: Vec<PointEntry>,
    range_tombstones: Vec<RangeTombstone>,
    level: u32,
    grandparents: &[Arc<SSTable>],
    data_dir: &str,
    manifest: &mut Manifest,
    config: &EngineConfig,
) -> Result<(Vec<ManifestSstEntry>, Vec<(u64, String)>), CompactionError> {
    let grandparent_limit = config
        .max_file_size
        .saturating_mul(config.max_grandparent_overlap_factor.max(1));

    let mut chunks: Vec<Vec<PointEntry>> = Vec::new();
    let mut current: Vec<PointEntry> = Vec::new();
    let mut current_bytes: u64 = 0;
    let mut chunk_start: Option<Vec<u8>> = None;

    for pe in point_entries {
        if current.is_empty() {
            chunk_start = Some(pe.key.clone());
        }
        current_bytes += (pe.key.len() + pe.value.as_ref().map_or(0, |v| v.len())) as u64;
        let overlap_bytes: u64 = grandparents
            .iter()
            .filter(|f| sstable_overlaps_range(f, chunk_start.as_ref().unwrap(), &pe.key))
            .map(|f| f.file_size())
            .sum();
        current.push(pe);

        if current_bytes >= config.max_file_size || overlap_bytes >= grandparent_limit {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
            chunk_start = None;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        // Every key was dropped but range tombstones survived on their own.
        chunks.push(Vec::new());
    }

    let mut new_entries = Vec::new();
    let mut new_ssts = Vec::new();

    for chunk in chunks {
        if chunk.is_empty() && range_tombstones.is_empty() {
            continue;
        }

        let chunk_min = chunk.first().map(|e| e.key.clone());
        let chunk_max = chunk.last().map(|e| e.key.clone());
        let chunk_range_tombstones: Vec<RangeTombstone> = match (&chunk_min, &chunk_max) {
            (Some(min), Some(max)) => range_tombstones
                .iter()
                .filter(|rt| rt.start.as_slice() <= max.as_slice() && rt.end.as_slice() > min.as_slice())
                .cloned()
                .collect(),
            _ => range_tombstones.clone(),
        };

        let mut smallest = chunk_min.clone();
        let mut largest = chunk_max.clone();
        for rt in &chunk_range_tombstones {
            smallest = Some(match smallest {
                Some(s) if s <= rt.start => s,
                _ => rt.start.clone(),
            });
            largest = Some(match largest {
                Some(l) if l >= rt.end => l,
                _ => rt.end.clone(),
            });
        }

        let new_sst_id = manifest.allocate_sst_id()?;
        let new_sst_path = format!("{}/{}/sstable-{}.sst", data_dir, SSTABLE_DIR, new_sst_id);

        let point_count = chunk.len();
        let range_count = chunk_range_tombstones.len();

        debug!(
            new_sst_id,
            level,
            point_count,
            range_count,
            path = %new_sst_path,
            "leveled compaction: building output chunk"
        );

        sstable::SstWriter::new(&new_sst_path).build(
            chunk.into_iter(),
            point_count,
            chunk_range_tombstones.into_iter(),
            range_count,
        )?;

        let file_size = std::fs::metadata(&new_sst_path)?.len();

        new_entries.push(ManifestSstEntry {
            id: new_sst_id,
            path: new_sst_path.clone().into(),
            level,
            file_size,
            smallest: smallest.unwrap_or_default(),
            largest: largest.unwrap_or_default(),
        });
        new_ssts.push((new_sst_id, new_sst_path));
    }

    Ok((new_entries, new_ssts))
}

fn remove_files(data_dir: &str, ids: &[u64]) {
    for id in ids {
        let path = format!("{}/{}/sstable-{}.sst", data_dir, SSTABLE_DIR, id);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(id, %e, "failed to remove old SSTable file during leveled compaction");
        }
    }
}
