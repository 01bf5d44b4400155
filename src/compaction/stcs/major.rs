//! Major compaction — full merge of all SSTables.
//!
//! Merges **every** SSTable into a single new SSTable, applying range
//! tombstones actively to suppress covered point entries. Because the
//! entire dataset is merged in one pass, this is always the bottommost
//! level for every key involved — a tombstone or superseded version can
//! be dropped once its sequence is at or below the oldest live snapshot,
//! but must be retained above that floor so a live snapshot's view is
//! unaffected.
//!
//! ## Option B implementation
//!
//! During the merge, each point entry is checked against the collected
//! range tombstones. If a Put has a lower LSN than a covering range
//! tombstone *and* the tombstone's own LSN is already at or below the
//! snapshot floor, it is suppressed (not written to the output) —
//! otherwise some live snapshot reads before the range delete took
//! effect and still needs to see the Put.
//!
//! After all entries are processed:
//! - Point tombstones (Delete) are dropped once their LSN is at or below
//!   the snapshot floor — nothing deeper remains for them to shadow.
//! - Range tombstones are dropped entirely — any Put they still need to
//!   suppress was already suppressed during the merge.

use std::sync::Arc;

use crate::compaction::{
    CompactionError, CompactionResult, MergeIterator, finalize_compaction, full_range_scan_iters,
};
use crate::engine::EngineConfig;
use crate::engine::RangeTombstone;
use crate::engine::utils::Record;
use crate::manifest::Manifest;
use crate::sstable::{PointEntry, SSTable};
use tracing::{debug, info, trace};

// ------------------------------------------------------------------------------------------------
// Public API
// ------------------------------------------------------------------------------------------------

/// Executes a major compaction, merging all SSTables into one.
///
/// This is always user-triggered (via `Engine::major_compact()`). It
/// will refuse to run if there are fewer than 2 SSTables.
///
/// Returns `Ok(None)` if nothing to compact (0–1 SSTables).
pub fn compact(
    sstables: &[Arc<SSTable>],
    manifest: &mut Manifest,
    data_dir: &str,
    _config: &EngineConfig,
    oldest_snapshot: Option<u64>,
) -> Result<Option<CompactionResult>, CompactionError> {
    if sstables.len() < 2 {
        debug!(
            sstable_count = sstables.len(),
            "major compaction: fewer than 2 SSTables, skipping"
        );
        return Ok(None);
    }

    let ids: Vec<u64> = sstables.iter().map(|s| s.id()).collect();
    info!(
        sstable_count = sstables.len(),
        ?ids,
        "major compaction: starting full merge"
    );

    let result = execute(sstables, manifest, data_dir, oldest_snapshot)?;

    info!(
        new_sst_ids = ?result.new_ssts.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        removed_count = result.removed_ids.len(),
        "major compaction: complete"
    );

    Ok(Some(result))
}

// ------------------------------------------------------------------------------------------------
// Execution
// ------------------------------------------------------------------------------------------------

fn execute(
    sstables: &[Arc<SSTable>],
    manifest: &mut Manifest,
    data_dir: &str,
    oldest_snapshot: Option<u64>,
) -> Result<CompactionResult, CompactionError> {
    let floor = oldest_snapshot.unwrap_or(u64::MAX);
    let sst_refs: Vec<&SSTable> = sstables.iter().map(|s| s.as_ref()).collect();
    let removed_ids: Vec<u64> = sstables.iter().map(|s| s.id()).collect();

    // Phase 1: Collect all range tombstones upfront from all SSTables.
    // We need them before processing point entries so we can check coverage.
    let mut all_range_tombstones: Vec<RangeTombstone> = Vec::new();
    for sst in sstables {
        all_range_tombstones.extend(sst.range_tombstone_iter());
    }

    // Phase 2: Create merge iterator over all SSTables.
    let iters = full_range_scan_iters(&sst_refs)?;
    let merge_iter = MergeIterator::new(iters);

    // Phase 3: Process records — dedup point entries (retaining any version
    // a live snapshot still needs), apply range tombstones, drop tombstones
    // that have fallen below the snapshot floor.
    let mut point_entries: Vec<PointEntry> = Vec::new();
    let mut last_key: Option<Vec<u8>> = None;
    let mut prev_seq: Option<u64> = None;

    for record in merge_iter {
        match record {
            Record::RangeDelete { .. } => {
                // Range tombstones are never re-emitted — any Put they still
                // need to suppress was already suppressed below.
            }
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
                // This is the bottommost merge — a tombstone at or below the
                // floor has nothing left to shadow and no snapshot can need it.
                if lsn <= floor {
                    trace!(key = ?key, lsn, "major: dropping point tombstone");
                    continue;
                }
                trace!(key = ?key, lsn, "major: retaining point tombstone for live snapshot");
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

                // Check if this Put is suppressed by a range tombstone with
                // higher LSN that has itself already fallen below the
                // snapshot floor (otherwise some live snapshot reads before
                // the range delete took effect and still needs this Put).
                if is_suppressed_by_range(&key, lsn, &all_range_tombstones, floor) {
                    trace!(key = ?key, lsn, "major: Put suppressed by range tombstone");
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

    // Major compaction produces no range tombstones in the output; any
    // still-relevant Delete entries were retained above as point entries.
    finalize_compaction(manifest, data_dir, 0, removed_ids, point_entries, Vec::new())
}

// ------------------------------------------------------------------------------------------------
// Range tombstone helpers
// ------------------------------------------------------------------------------------------------

/// Returns `true` if the given key+lsn is suppressed by any range
/// tombstone with a strictly higher LSN whose own LSN has already fallen
/// at or below the snapshot floor.
fn is_suppressed_by_range(
    key: &[u8],
    put_lsn: u64,
    range_tombstones: &[RangeTombstone],
    floor: u64,
) -> bool {
    for rt in range_tombstones {
        if key >= rt.start.as_slice() && key < rt.end.as_slice() && rt.lsn > put_lsn && rt.lsn <= floor {
            return true;
        }
    }
    false
}
