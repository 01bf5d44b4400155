//! Unit tests for [`super::version::Version`] file-layout and scoring logic.
//!
//! These build tiny on-disk SSTables directly via
//! [`crate::sstable::builder::SstWriter`] rather than driving a full
//! `Engine`, so the scoring math can be checked in isolation from flush/
//! compaction scheduling.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::engine::EngineConfig;
    use crate::engine::utils::PointEntry;
    use crate::engine::version::Version;
    use crate::sstable::SSTable;
    use crate::sstable::builder::SstWriter;

    /// Builds a single-key SSTable at `dir/name.sst`, assigns it `level`,
    /// and returns it wrapped in an `Arc` as the engine stores it.
    fn make_sstable(dir: &TempDir, name: &str, key: &[u8], level: u32) -> Arc<SSTable> {
        let path = dir.path().join(format!("{name}.sst"));
        SstWriter::new(&path)
            .build(
                std::iter::once(PointEntry::new(key.to_vec(), b"v".to_vec(), 1, 0)),
                1,
                std::iter::empty(),
                0,
            )
            .unwrap();
        let mut sst = SSTable::open(&path).unwrap();
        sst.level = level;
        Arc::new(sst)
    }

    #[test]
    fn from_sstables_groups_by_level_and_sorts_non_l0() {
        let dir = TempDir::new().unwrap();
        let l0_a = make_sstable(&dir, "l0_a", b"m", 0);
        let l0_b = make_sstable(&dir, "l0_b", b"a", 0);
        let l1_z = make_sstable(&dir, "l1_z", b"z", 1);
        let l1_a = make_sstable(&dir, "l1_a", b"a", 1);

        let version = Version::from_sstables(&[l0_a, l0_b, l1_z, l1_a], 4);

        assert_eq!(version.num_levels(), 4);
        assert_eq!(version.file_count(0), 2);
        assert_eq!(version.file_count(1), 2);
        assert_eq!(version.file_count(2), 0);

        // L0 keeps flush order (overlap is expected and not an error).
        assert_eq!(version.levels[0][0].properties.min_key, b"m");
        assert_eq!(version.levels[0][1].properties.min_key, b"a");

        // L1 is sorted ascending by smallest key.
        assert_eq!(version.levels[1][0].properties.min_key, b"a");
        assert_eq!(version.levels[1][1].properties.min_key, b"z");
    }

    #[test]
    fn from_sstables_clamps_level_beyond_num_levels() {
        let dir = TempDir::new().unwrap();
        let sst = make_sstable(&dir, "overflow", b"k", 99);

        let version = Version::from_sstables(&[sst], 3);

        assert_eq!(version.file_count(2), 1, "level 99 should clamp into the last level");
        assert_eq!(version.file_count(0), 0);
        assert_eq!(version.file_count(1), 0);
    }

    #[test]
    fn l0_compaction_score_is_file_count_over_trigger() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            l0_compaction_trigger: 4,
            ..EngineConfig::default()
        };

        let files: Vec<_> = (0..3)
            .map(|i| make_sstable(&dir, &format!("f{i}"), format!("k{i}").as_bytes(), 0))
            .collect();
        let version = Version::from_sstables(&files, 4);
        assert!((version.compaction_score(0, &config) - 0.75).abs() < 1e-9);

        let files: Vec<_> = (0..4)
            .map(|i| make_sstable(&dir, &format!("g{i}"), format!("k{i}").as_bytes(), 0))
            .collect();
        let version = Version::from_sstables(&files, 4);
        assert!((version.compaction_score(0, &config) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn non_l0_score_is_total_bytes_over_target_budget() {
        let dir = TempDir::new().unwrap();
        let sst = make_sstable(&dir, "one", b"k", 1);
        let size = sst.file_size();
        let config = EngineConfig {
            base_level_bytes: size, // exactly at budget
            ..EngineConfig::default()
        };

        let version = Version::from_sstables(&[sst], 4);
        assert!((version.compaction_score(1, &config) - 1.0).abs() < 1e-9);

        // L2's target is base_level_bytes * 10, so the same bytes score far lower.
        let dir2 = TempDir::new().unwrap();
        let sst2 = make_sstable(&dir2, "two", b"k", 2);
        let version2 = Version::from_sstables(&[sst2], 4);
        assert!(version2.compaction_score(2, &config) < 0.2);
    }

    #[test]
    fn pick_compaction_level_prefers_highest_over_budget_score() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            l0_compaction_trigger: 4,
            base_level_bytes: 1, // trivially over budget for any non-empty L1
            ..EngineConfig::default()
        };

        // L0 under trigger (score 0.25), L1 wildly over budget.
        let l0 = make_sstable(&dir, "l0", b"a", 0);
        let l1 = make_sstable(&dir, "l1", b"b", 1);
        let version = Version::from_sstables(&[l0, l1], 4);

        assert_eq!(version.pick_compaction_level(&config), Some(1));
    }

    #[test]
    fn pick_compaction_level_returns_none_when_nothing_over_budget() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::default();
        let sst = make_sstable(&dir, "lonely", b"a", 0);
        let version = Version::from_sstables(&[sst], 4);

        assert_eq!(version.pick_compaction_level(&config), None);
    }

    #[test]
    fn pick_compaction_level_never_picks_the_bottommost_level() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            base_level_bytes: 1,
            ..EngineConfig::default()
        };
        // Only the last level (index 1 of a 2-level Version) has data, and
        // it is wildly over any byte budget — but there is nowhere to
        // compact it into, so it must never be picked.
        let sst = make_sstable(&dir, "bottom", b"a", 1);
        let version = Version::from_sstables(&[sst], 2);

        assert_eq!(version.pick_compaction_level(&config), None);
    }

    #[test]
    fn max_next_level_overlapping_bytes_sums_overlapping_files_only() {
        let dir = TempDir::new().unwrap();
        // L1 file covers key "m"; two L2 files, one overlapping ("m"), one not ("z").
        let l1 = make_sstable(&dir, "l1", b"m", 1);
        let l2_overlap = make_sstable(&dir, "l2_overlap", b"m", 2);
        let l2_disjoint = make_sstable(&dir, "l2_disjoint", b"z", 2);

        let overlap_size = l2_overlap.file_size();
        let version = Version::from_sstables(&[l1, l2_overlap, l2_disjoint], 4);

        assert_eq!(version.max_next_level_overlapping_bytes(), overlap_size);
    }

    #[test]
    fn max_next_level_overlapping_bytes_is_zero_with_no_next_level_files() {
        let dir = TempDir::new().unwrap();
        let sst = make_sstable(&dir, "solo", b"a", 1);
        let version = Version::from_sstables(&[sst], 4);

        assert_eq!(version.max_next_level_overlapping_bytes(), 0);
    }
}
