//! # AeternusDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Active     │  │   Frozen     │  │  SSTables   │  │
//! │  │  Memtable   │  │  Memtables   │  │  (on disk)  │  │
//! │  │  + WAL      │  │  + WALs      │  │             │  │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬──────┘  │
//! │        │   freeze        │   flush         │         │
//! │        └─────────►       └────────►        │         │
//! │                                            │         │
//! │  ┌──────────────────────────────────────────┘         │
//! │  │  Compaction (minor / tombstone / major)           │
//! │  └───────────────────────────────────────────────────┘│
//! │                                                      │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │              Manifest (WAL + snapshot)           │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, flush, compact |
//! | [`memtable`] | In-memory write buffer with multi-version entries and range tombstones |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with bloom filters and block indices |
//! | [`manifest`] | Persistent metadata manager (WAL + snapshot model) |
//! | [`compaction`] | Size-tiered, tombstone, and major compaction strategies |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Multi-version concurrency** — multiple versions per key, ordered by
//!   log sequence number (LSN). Reads always see the latest committed version.
//! - **Point and range tombstones** — efficient delete semantics for both
//!   individual keys and key ranges.
//! - **Bloom filter lookups** — each SSTable carries a bloom filter for
//!   fast negative point-lookup responses.
//! - **Block-level CRC32 integrity** — every on-disk block (WAL records,
//!   SSTable data blocks, headers, footers) is checksummed.
//! - **Pluggable compaction** — three strategies (minor, tombstone, major)
//!   with configurable thresholds.
//!
//! ## Quick Start
//!
//! The [`Db`] wrapper is the recommended entry point — it validates
//! configuration and drives flush/compaction on a background pool:
//!
//! ```rust,no_run
//! use ledgekv::{Db, DbConfig};
//!
//! let db = Db::open("/tmp/my_db", DbConfig::default()).unwrap();
//!
//! db.put(b"hello", b"world").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! db.delete(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! db.put(b"a", b"1").unwrap();
//! db.put(b"b", b"2").unwrap();
//! let results = db.scan(b"a", b"c").unwrap();
//!
//! db.close().unwrap();
//! ```
//!
//! Callers that want direct control over flush/compaction scheduling can
//! use [`engine::Engine`] instead:
//!
//! ```rust,no_run
//! use ledgekv::engine::{Engine, EngineConfig};
//! use ledgekv::compaction::CompactionStrategyType;
//!
//! let config = EngineConfig {
//!     compaction_strategy: CompactionStrategyType::Stcs,
//!     ..EngineConfig::default()
//! };
//!
//! let engine = Engine::open("/tmp/my_db_raw", config).unwrap();
//!
//! engine.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello".to_vec()).unwrap(), Some(b"world".to_vec()));
//!
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod compaction;
pub mod db;
pub mod encoding;
pub mod engine;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use compaction::CompactionStrategyType;
pub use db::{Db, DbConfig, DbError};
pub use engine::{Engine, EngineConfig, EngineError, Snapshot};
