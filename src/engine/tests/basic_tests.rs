#[cfg(test)]
mod tests {
    use crate::engine::{Engine, EngineConfig};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    #[test]
    fn engine_open_fresh_database() {
        init_tracing();
        let temp = TempDir::new().unwrap();

        let config = EngineConfig {
            write_buffer_size: 1024,
            min_sstable_size: 1024,
            min_threshold: 4,
            max_threshold: 32,
            tombstone_ratio_threshold: 0.2,
            tombstone_compaction_interval: 3600,
            thread_pool_size: 2,
            ..EngineConfig::default()
        };

        let engine = Engine::open(temp.path(), config).expect("Engine open failed");

        let stats = engine.stats().expect("stats");
        assert_eq!(stats.frozen_count, 0);
        assert_eq!(stats.sstables_count, 0);
        assert_eq!(stats.total_sst_size_bytes, 0);
        assert!(stats.sst_sizes.is_empty());
    }
}
