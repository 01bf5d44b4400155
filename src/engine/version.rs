//! # Version — the leveled file-layout snapshot
//!
//! A `Version` groups the engine's flat SSTable list (as carried on
//! [`EngineInner`](super::EngineInner) and in the manifest) into per-level
//! vectors: `L0` keeps the newest-first flush order (its files may overlap
//! each other), while `L1..LN` are sorted by `smallest` and are range-disjoint
//! within a level. Building a `Version` is cheap — it clones `Arc<SSTable>`
//! handles, not file contents — so the engine can derive one on demand from
//! whatever SSTable list it currently holds under its read lock, giving
//! callers a pinned, consistent view without a separate reference-counting
//! scheme layered on top of the `Arc`s already in play.

use std::sync::Arc;

use crate::engine::EngineConfig;
use crate::sstable::SSTable;

/// An immutable, per-level view of the SSTable file layout.
///
/// Cheap to construct: `levels[0]` holds `Arc<SSTable>` clones in the same
/// (newest-first) order as the engine's flat list; `levels[1..]` are each
/// sorted by `smallest` ascending, matching the invariant that non-`L0`
/// levels are key-range-disjoint.
pub struct Version {
    pub levels: Vec<Vec<Arc<SSTable>>>,
}

impl Version {
    /// Groups a flat SSTable list by `.level`, clamping any level beyond
    /// `num_levels - 1` into the last level (defensive against a manifest
    /// written by a future, larger `num_levels` configuration).
    pub fn from_sstables(sstables: &[Arc<SSTable>], num_levels: usize) -> Self {
        let num_levels = num_levels.max(1);
        let mut levels: Vec<Vec<Arc<SSTable>>> = vec![Vec::new(); num_levels];

        for sst in sstables {
            let level = (sst.level as usize).min(num_levels - 1);
            levels[level].push(Arc::clone(sst));
        }

        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.properties.min_key.cmp(&b.properties.min_key));
        }

        Self { levels }
    }

    /// Number of levels this version was built with.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of files resident in `level`. Returns 0 for an out-of-range level.
    pub fn file_count(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.len())
    }

    /// Total on-disk bytes of every file in `level`.
    pub fn total_bytes(&self, level: usize) -> u64 {
        self.levels
            .get(level)
            .map_or(0, |l| l.iter().map(|s| s.file_size()).sum())
    }

    /// Target byte budget for `level` (`k >= 1`): `base_level_bytes * 10^(k-1)`.
    pub fn target_bytes_for_level(level: usize, config: &EngineConfig) -> u64 {
        debug_assert!(level >= 1);
        let factor = 10u64.saturating_pow((level - 1) as u32);
        config.base_level_bytes.saturating_mul(factor)
    }

    /// Compaction score for `level`, per `spec.md`'s `pick_compaction` rule:
    /// `L0` scores on file count vs. `l0_compaction_trigger`; `Lk (k>=1)`
    /// scores on total bytes vs. its target budget. A score >= 1.0 means the
    /// level is over budget and is a compaction candidate.
    pub fn compaction_score(&self, level: usize, config: &EngineConfig) -> f64 {
        if level == 0 {
            self.file_count(0) as f64 / config.l0_compaction_trigger.max(1) as f64
        } else {
            let target = Self::target_bytes_for_level(level, config).max(1);
            self.total_bytes(level) as f64 / target as f64
        }
    }

    /// Returns the level with the highest score, if any level scores >= 1.0.
    /// Never picks the last level (there is nowhere deeper to compact into).
    pub fn pick_compaction_level(&self, config: &EngineConfig) -> Option<usize> {
        let last = self.num_levels().saturating_sub(1);
        let mut best: Option<(usize, f64)> = None;

        for level in 0..last {
            let score = self.compaction_score(level, config);
            if score >= 1.0 {
                match best {
                    Some((_, best_score)) if best_score >= score => {}
                    _ => best = Some((level, score)),
                }
            }
        }

        best.map(|(level, _)| level)
    }

    /// For every file in `level`, sums the byte size of every file in
    /// `level + 1` whose key range overlaps it, and returns the maximum such
    /// sum across all files in `level`. Used by
    /// [`Engine::max_next_level_overlapping_bytes`](super::Engine::max_next_level_overlapping_bytes)
    /// to verify the sparse-merge / grandparent-overlap bound.
    pub fn max_next_level_overlapping_bytes(&self) -> u64 {
        let mut worst = 0u64;

        for level in 0..self.num_levels().saturating_sub(1) {
            let Some(next) = self.levels.get(level + 1) else {
                continue;
            };
            for file in &self.levels[level] {
                let overlap: u64 = next
                    .iter()
                    .filter(|other| ranges_overlap(file, other))
                    .map(|other| other.file_size())
                    .sum();
                worst = worst.max(overlap);
            }
        }

        worst
    }
}

/// True if the two SSTables' `[min_key, max_key]` ranges intersect.
pub fn ranges_overlap(a: &SSTable, b: &SSTable) -> bool {
    a.properties.min_key <= b.properties.max_key && b.properties.min_key <= a.properties.max_key
}

/// True if `sst`'s `[min_key, max_key]` range intersects `[start, end]`
/// (both inclusive — callers pass an already-widened `end` when an
/// exclusive bound is needed).
pub fn sstable_overlaps_range(sst: &SSTable, start: &[u8], end: &[u8]) -> bool {
    sst.properties.min_key.as_slice() <= end && start <= sst.properties.max_key.as_slice()
}
