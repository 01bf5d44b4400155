//! # Db — the embeddable public API
//!
//! [`Db`] wraps the lower-level [`Engine`](crate::engine::Engine) with input
//! validation, configuration bounds-checking, and a small background thread
//! pool that flushes and compacts frozen memtables off the caller's hot
//! path. This is the type most applications should use; [`crate::engine`]
//! remains available for callers that want direct control over flush and
//! compaction scheduling.
//!
//! ## Background scheduling
//!
//! Every write that reports "the active memtable was frozen" enqueues a
//! flush job onto a small worker pool (sized by
//! [`DbConfig::thread_pool_size`]). A worker picks up the job, flushes the
//! oldest frozen memtable to an SSTable, then opportunistically runs one
//! round of minor and tombstone compaction. This mirrors how the
//! synchronous engine's three compaction entry points are meant to be
//! driven — just off the caller's thread.
//!
//! ## Write backpressure
//!
//! Before each write, [`Db`] checks L0's file count against
//! `l0_slowdown_writes_trigger` and `l0_stop_writes_trigger`: past the
//! slowdown trigger a write yields briefly once; past the stop trigger it
//! blocks (no timeout) until the background pool's next flush or
//! compaction brings L0 back down. The lower-level `Engine` never does
//! this itself — a caller driving flush/compaction manually has nothing
//! else running to shrink L0, so blocking there would deadlock.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::channel::{Sender, unbounded};
use thiserror::Error;
use tracing::warn;

use crate::compaction::CompactionStrategyType;
use crate::engine::{Engine, EngineConfig, EngineError, Snapshot};

const MIN_WRITE_BUFFER_SIZE: usize = 1024;
const MAX_WRITE_BUFFER_SIZE: usize = 256 * 1024 * 1024;
const MIN_COMPACTION_THRESHOLD: usize = 2;
const MAX_COMPACTION_THRESHOLD_FLOOR: usize = 64;
const MAX_COMPACTION_THRESHOLD_CEIL: usize = 256;
const MAX_TOMBSTONE_INTERVAL_SECS: usize = 604_800; // 7 days
const MIN_THREAD_POOL_SIZE: usize = 1;
const MAX_THREAD_POOL_SIZE: usize = 32;
const MIN_NUM_LEVELS: usize = 2;
const MAX_NUM_LEVELS: usize = 16;
const MIN_L0_COMPACTION_TRIGGER: usize = 1;
const MAX_L0_COMPACTION_TRIGGER: usize = 64;

/// Configuration for a [`Db`] instance.
///
/// Every field is validated by [`Db::open`]; out-of-range values are
/// rejected with [`DbError::InvalidConfig`] rather than silently clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DbConfig {
    /// Max memtable size (bytes) before freeze. Valid range: 1 KiB – 256 MiB.
    pub write_buffer_size: usize,

    /// Compaction strategy family.
    pub compaction_strategy: CompactionStrategyType,

    /// Lower bound multiplier for STCS bucket size range.
    pub bucket_low: f64,

    /// Upper bound multiplier for STCS bucket size range.
    pub bucket_high: f64,

    /// Min size (bytes) for regular STCS buckets.
    pub min_sstable_size: usize,

    /// Min SSTables in a bucket to trigger minor compaction. Valid range: 2 – 64.
    pub min_compaction_threshold: usize,

    /// Max SSTables compacted at once. Valid range: 2 – 256, must be ≥
    /// `min_compaction_threshold`.
    pub max_compaction_threshold: usize,

    /// Ratio of tombstones to total records that triggers tombstone
    /// compaction. Valid range: `(0.0, 1.0]`.
    pub tombstone_compaction_ratio: f64,

    /// Min SSTable age (seconds) before eligible for tombstone compaction.
    /// Valid range: 0 – 604800 (7 days).
    pub tombstone_compaction_interval: usize,

    /// Resolve bloom filter false positives during tombstone compaction
    /// with an actual `get()`.
    pub tombstone_bloom_fallback: bool,

    /// Allow dropping range tombstones once older data is scanned clear.
    pub tombstone_range_drop: bool,

    /// Background worker count for flush/compaction scheduling. Valid
    /// range: 1 – 32.
    pub thread_pool_size: usize,

    /// Number of levels `L0..=num_levels-1` maintained when
    /// `compaction_strategy` is [`CompactionStrategyType::Leveled`].
    /// Ignored by the `Stcs` strategy. Valid range: 2 – 16.
    pub num_levels: usize,

    /// Number of `L0` SSTables that triggers leveled compaction of `L0`.
    /// Valid range: 1 – 64.
    pub l0_compaction_trigger: usize,

    /// Number of `L0` SSTables at which writes are throttled to let
    /// compaction catch up. Must be >= `l0_compaction_trigger`.
    pub l0_slowdown_writes_trigger: usize,

    /// Number of `L0` SSTables at which writes are refused outright.
    /// Must be >= `l0_slowdown_writes_trigger`.
    pub l0_stop_writes_trigger: usize,

    /// Target total byte size of `L1`; deeper levels scale this by
    /// `10^(k-1)`. Must be nonzero.
    pub base_level_bytes: u64,

    /// Soft cap on a single leveled-compaction output file's size. Must
    /// be nonzero.
    pub max_file_size: u64,

    /// Bounds grandparent-level overlap for a leveled-compaction output
    /// file, as a multiple of `max_file_size`. Must be nonzero.
    pub max_grandparent_overlap_factor: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        let engine_defaults = EngineConfig::default();
        Self {
            write_buffer_size: engine_defaults.write_buffer_size,
            compaction_strategy: engine_defaults.compaction_strategy,
            bucket_low: engine_defaults.bucket_low,
            bucket_high: engine_defaults.bucket_high,
            min_sstable_size: engine_defaults.min_sstable_size,
            min_compaction_threshold: engine_defaults.min_threshold,
            max_compaction_threshold: engine_defaults.max_threshold,
            tombstone_compaction_ratio: engine_defaults.tombstone_ratio_threshold,
            tombstone_compaction_interval: engine_defaults.tombstone_compaction_interval,
            tombstone_bloom_fallback: engine_defaults.tombstone_bloom_fallback,
            tombstone_range_drop: engine_defaults.tombstone_range_drop,
            thread_pool_size: engine_defaults.thread_pool_size,
            num_levels: engine_defaults.num_levels,
            l0_compaction_trigger: engine_defaults.l0_compaction_trigger,
            l0_slowdown_writes_trigger: engine_defaults.l0_slowdown_writes_trigger,
            l0_stop_writes_trigger: engine_defaults.l0_stop_writes_trigger,
            base_level_bytes: engine_defaults.base_level_bytes,
            max_file_size: engine_defaults.max_file_size,
            max_grandparent_overlap_factor: engine_defaults.max_grandparent_overlap_factor,
        }
    }
}

impl DbConfig {
    fn validate(&self) -> Result<(), DbError> {
        if !(MIN_WRITE_BUFFER_SIZE..=MAX_WRITE_BUFFER_SIZE).contains(&self.write_buffer_size) {
            return Err(DbError::InvalidConfig(format!(
                "write_buffer_size must be between {MIN_WRITE_BUFFER_SIZE} and {MAX_WRITE_BUFFER_SIZE}, got {}",
                self.write_buffer_size
            )));
        }

        if !(MIN_COMPACTION_THRESHOLD..=MAX_COMPACTION_THRESHOLD_FLOOR)
            .contains(&self.min_compaction_threshold)
        {
            return Err(DbError::InvalidConfig(format!(
                "min_compaction_threshold must be between {MIN_COMPACTION_THRESHOLD} and {MAX_COMPACTION_THRESHOLD_FLOOR}, got {}",
                self.min_compaction_threshold
            )));
        }

        if !(MIN_COMPACTION_THRESHOLD..=MAX_COMPACTION_THRESHOLD_CEIL)
            .contains(&self.max_compaction_threshold)
        {
            return Err(DbError::InvalidConfig(format!(
                "max_compaction_threshold must be between {MIN_COMPACTION_THRESHOLD} and {MAX_COMPACTION_THRESHOLD_CEIL}, got {}",
                self.max_compaction_threshold
            )));
        }

        if self.max_compaction_threshold < self.min_compaction_threshold {
            return Err(DbError::InvalidConfig(format!(
                "max_compaction_threshold ({}) must be >= min_compaction_threshold ({})",
                self.max_compaction_threshold, self.min_compaction_threshold
            )));
        }

        if !(self.tombstone_compaction_ratio > 0.0 && self.tombstone_compaction_ratio <= 1.0) {
            return Err(DbError::InvalidConfig(format!(
                "tombstone_compaction_ratio must be in (0.0, 1.0], got {}",
                self.tombstone_compaction_ratio
            )));
        }

        if self.tombstone_compaction_interval > MAX_TOMBSTONE_INTERVAL_SECS {
            return Err(DbError::InvalidConfig(format!(
                "tombstone_compaction_interval must be <= {MAX_TOMBSTONE_INTERVAL_SECS}, got {}",
                self.tombstone_compaction_interval
            )));
        }

        if !(MIN_THREAD_POOL_SIZE..=MAX_THREAD_POOL_SIZE).contains(&self.thread_pool_size) {
            return Err(DbError::InvalidConfig(format!(
                "thread_pool_size must be between {MIN_THREAD_POOL_SIZE} and {MAX_THREAD_POOL_SIZE}, got {}",
                self.thread_pool_size
            )));
        }

        if !(MIN_NUM_LEVELS..=MAX_NUM_LEVELS).contains(&self.num_levels) {
            return Err(DbError::InvalidConfig(format!(
                "num_levels must be between {MIN_NUM_LEVELS} and {MAX_NUM_LEVELS}, got {}",
                self.num_levels
            )));
        }

        if !(MIN_L0_COMPACTION_TRIGGER..=MAX_L0_COMPACTION_TRIGGER)
            .contains(&self.l0_compaction_trigger)
        {
            return Err(DbError::InvalidConfig(format!(
                "l0_compaction_trigger must be between {MIN_L0_COMPACTION_TRIGGER} and {MAX_L0_COMPACTION_TRIGGER}, got {}",
                self.l0_compaction_trigger
            )));
        }

        if self.l0_slowdown_writes_trigger < self.l0_compaction_trigger {
            return Err(DbError::InvalidConfig(format!(
                "l0_slowdown_writes_trigger ({}) must be >= l0_compaction_trigger ({})",
                self.l0_slowdown_writes_trigger, self.l0_compaction_trigger
            )));
        }

        if self.l0_stop_writes_trigger < self.l0_slowdown_writes_trigger {
            return Err(DbError::InvalidConfig(format!(
                "l0_stop_writes_trigger ({}) must be >= l0_slowdown_writes_trigger ({})",
                self.l0_stop_writes_trigger, self.l0_slowdown_writes_trigger
            )));
        }

        if self.base_level_bytes == 0 {
            return Err(DbError::InvalidConfig(
                "base_level_bytes must be nonzero".into(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(DbError::InvalidConfig(
                "max_file_size must be nonzero".into(),
            ));
        }

        if self.max_grandparent_overlap_factor == 0 {
            return Err(DbError::InvalidConfig(
                "max_grandparent_overlap_factor must be nonzero".into(),
            ));
        }

        Ok(())
    }

    fn into_engine_config(self) -> EngineConfig {
        EngineConfig {
            write_buffer_size: self.write_buffer_size,
            compaction_strategy: self.compaction_strategy,
            bucket_low: self.bucket_low,
            bucket_high: self.bucket_high,
            min_sstable_size: self.min_sstable_size,
            min_threshold: self.min_compaction_threshold,
            max_threshold: self.max_compaction_threshold,
            tombstone_ratio_threshold: self.tombstone_compaction_ratio,
            tombstone_compaction_interval: self.tombstone_compaction_interval,
            tombstone_bloom_fallback: self.tombstone_bloom_fallback,
            tombstone_range_drop: self.tombstone_range_drop,
            thread_pool_size: self.thread_pool_size,
            num_levels: self.num_levels,
            l0_compaction_trigger: self.l0_compaction_trigger,
            l0_slowdown_writes_trigger: self.l0_slowdown_writes_trigger,
            l0_stop_writes_trigger: self.l0_stop_writes_trigger,
            base_level_bytes: self.base_level_bytes,
            max_file_size: self.max_file_size,
            max_grandparent_overlap_factor: self.max_grandparent_overlap_factor,
        }
    }
}

/// Errors returned by [`Db`] operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// A `DbConfig` field was outside its valid range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A call argument violated a precondition (empty key, empty value,
    /// or an inverted/degenerate range).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The database handle has already been closed.
    #[error("database is closed")]
    Closed,

    /// An error propagated from the underlying storage engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

// ------------------------------------------------------------------------------------------------
// Background flush/compaction pool
// ------------------------------------------------------------------------------------------------

enum Job {
    Flush,
}

struct BackgroundPool {
    tx: Sender<Job>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl BackgroundPool {
    fn spawn(engine: Engine, size: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(size);

        for worker_id in 0..size {
            let engine = engine.clone();
            let rx = rx.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("ledgekv-bg-{worker_id}"))
                    .spawn(move || {
                        while let Ok(Job::Flush) = rx.recv() {
                            if let Err(e) = engine.flush_oldest_frozen() {
                                warn!(%e, "background flush failed");
                                continue;
                            }
                            match engine.minor_compact() {
                                Ok(_) => {}
                                Err(e) => warn!(%e, "background minor compaction failed"),
                            }
                            match engine.tombstone_compact() {
                                Ok(_) => {}
                                Err(e) => warn!(%e, "background tombstone compaction failed"),
                            }
                        }
                    })
                    .expect("failed to spawn background worker thread"),
            );
        }

        Self { tx, handles }
    }

    fn schedule_flush(&self) {
        // Best-effort: if every worker has already exited (shutdown in
        // progress) the send fails and is silently dropped.
        let _ = self.tx.send(Job::Flush);
    }

    fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// An embeddable, ordered key-value store.
///
/// `Db` is cheaply clonable-by-reference in spirit (it owns an `Engine`,
/// itself an `Arc<RwLock<_>>` handle) but does not implement `Clone` — share
/// it across threads behind an `Arc<Db>` instead, since `close()` and the
/// background pool assume a single owning handle.
pub struct Db {
    engine: Engine,
    closed: AtomicBool,
    pool: Mutex<Option<BackgroundPool>>,
}

impl Db {
    /// Opens (or creates) a database at `path` with the given configuration.
    ///
    /// Returns [`DbError::InvalidConfig`] if any `config` field is out of
    /// its valid range.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        config.validate()?;

        let thread_pool_size = config.thread_pool_size;
        let engine = Engine::open(path, config.into_engine_config())?;
        let pool = BackgroundPool::spawn(engine.clone(), thread_pool_size);

        Ok(Self {
            engine,
            closed: AtomicBool::new(false),
            pool: Mutex::new(Some(pool)),
        })
    }

    fn check_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }

    /// Inserts or overwrites `key` with `value`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }
        if value.is_empty() {
            return Err(DbError::InvalidArgument("value must not be empty".into()));
        }

        self.stall_for_l0()?;
        let frozen = self.engine.put(key.to_vec(), value.to_vec())?;
        if frozen {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Looks up `key`, returning `None` if absent or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        self.check_open()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }
        Ok(self.engine.get(key.to_vec())?)
    }

    /// Deletes `key` (inserts a point tombstone).
    pub fn delete(&self, key: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }

        self.stall_for_l0()?;
        let frozen = self.engine.delete(key.to_vec())?;
        if frozen {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Deletes every key in `[start, end)` (inserts a range tombstone).
    pub fn delete_range(&self, start: &[u8], end: &[u8]) -> Result<(), DbError> {
        self.check_open()?;
        if start.is_empty() {
            return Err(DbError::InvalidArgument(
                "start key must not be empty".into(),
            ));
        }
        if end.is_empty() {
            return Err(DbError::InvalidArgument(
                "end key must not be empty".into(),
            ));
        }
        if start >= end {
            return Err(DbError::InvalidArgument(
                "start key must be strictly less than end key".into(),
            ));
        }

        self.stall_for_l0()?;
        let frozen = self.engine.delete_range(start.to_vec(), end.to_vec())?;
        if frozen {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Returns all live key-value pairs in `[start, end)`, in ascending
    /// key order.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
        self.check_open()?;
        if start.is_empty() {
            return Err(DbError::InvalidArgument(
                "start key must not be empty".into(),
            ));
        }
        if end.is_empty() {
            return Err(DbError::InvalidArgument(
                "end key must not be empty".into(),
            ));
        }

        if start >= end {
            return Ok(Vec::new());
        }

        Ok(self.engine.scan(start, end)?.collect())
    }

    /// Takes a pinned-LSN snapshot of the current committed state.
    ///
    /// Reads made through [`Db::get_at`]/[`Db::scan_at`] with the returned
    /// handle observe exactly this moment's state, regardless of later
    /// writes or compactions. Dropping the handle releases the pin.
    pub fn snapshot(&self) -> Result<Snapshot, DbError> {
        self.check_open()?;
        Ok(self.engine.snapshot()?)
    }

    /// Looks up `key` as of `snapshot`, returning `None` if absent or
    /// deleted at that point in time.
    pub fn get_at(&self, key: &[u8], snapshot: &Snapshot) -> Result<Option<Vec<u8>>, DbError> {
        self.check_open()?;
        if key.is_empty() {
            return Err(DbError::InvalidArgument("key must not be empty".into()));
        }
        Ok(self.engine.get_at(key, snapshot)?)
    }

    /// Returns all key-value pairs in `[start, end)` visible as of
    /// `snapshot`, in ascending key order.
    pub fn scan_at(
        &self,
        start: &[u8],
        end: &[u8],
        snapshot: &Snapshot,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
        self.check_open()?;
        if start.is_empty() {
            return Err(DbError::InvalidArgument(
                "start key must not be empty".into(),
            ));
        }
        if end.is_empty() {
            return Err(DbError::InvalidArgument(
                "end key must not be empty".into(),
            ));
        }

        if start >= end {
            return Ok(Vec::new());
        }

        Ok(self.engine.scan_at(start, end, snapshot)?.collect())
    }

    /// Forces compaction of every SSTable overlapping `[begin, end]`.
    ///
    /// Returns `Ok(true)` if anything was merged, `Ok(false)` if fewer
    /// than two SSTables overlapped the range.
    pub fn compact_range(&self, begin: &[u8], end: &[u8]) -> Result<bool, DbError> {
        self.check_open()?;
        Ok(self.engine.compact_range(begin, end)?)
    }

    /// Runs one round of major compaction, merging all SSTables into one.
    ///
    /// Returns `Ok(true)` if a compaction was performed, `Ok(false)` if
    /// there were fewer than two SSTables to merge.
    pub fn major_compact(&self) -> Result<bool, DbError> {
        self.check_open()?;
        Ok(self.engine.major_compact()?)
    }

    /// Gracefully closes the database: flushes remaining frozen memtables,
    /// stops the background pool, and checkpoints the manifest.
    ///
    /// Idempotent — calling `close()` more than once is a no-op after the
    /// first successful call.
    pub fn close(&self) -> Result<(), DbError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        if let Some(pool) = self.pool.lock().unwrap().take() {
            pool.shutdown();
        }

        self.engine.close()?;
        Ok(())
    }

    fn schedule_flush(&self) {
        if let Some(pool) = self.pool.lock().unwrap().as_ref() {
            pool.schedule_flush();
        }
    }

    /// Write-path backpressure: yields briefly once L0 is past
    /// `l0_slowdown_writes_trigger`, then blocks until the background pool
    /// brings it back under `l0_stop_writes_trigger`.
    ///
    /// Has no timeout, matching the resource model's write stall — a `Db`
    /// always has a background pool running, so this always eventually
    /// unblocks once a flush or compaction lands.
    fn stall_for_l0(&self) -> Result<(), DbError> {
        let mut slowed_down = false;
        loop {
            let (l0_count, slowdown_trigger, stop_trigger) = self.engine.write_stall_status()?;
            if l0_count >= stop_trigger {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            if l0_count >= slowdown_trigger && !slowed_down {
                slowed_down = true;
                std::thread::sleep(Duration::from_micros(500));
            }
            return Ok(());
        }
    }
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(%e, "error closing database on drop");
        }
    }
}
