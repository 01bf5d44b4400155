//! # Manifest Component
//!
//! The **Manifest** is the central metadata authority for the LSM storage engine.
//! It tracks the engine’s durable state, including:
//!
//! - active WAL segment ID,
//! - frozen (older) WAL segments,
//! - list of existing SSTables,
//! - latest durable global LSN,
//! - manifest version number.
//!
//! The manifest acts as a *miniature WAL-driven metadata database*.
//!
//! ## Data durability strategy
//!
//! Manifest metadata is persisted using a **WAL + periodic snapshot** model:
//!
//! 1. **Manifest WAL** (`manifest.wal`) records mutation operations:
//!    - switching active WAL,
//!    - promoting WALs to frozen,
//!    - adding/removing SSTables,
//!    - updating LSN.
//!
//! 2. **Manifest snapshot** (`MANIFEST-<number>`, e.g. `MANIFEST-000001`) is
//!    a compact encoded dump of the whole metadata structure. Checksum
//!    ensures corruption detection. Every `checkpoint()` allocates the next
//!    number and writes a fresh file rather than overwriting the old one.
//!
//! 3. **`CURRENT`** is a one-line pointer file naming the live
//!    `MANIFEST-<number>` file. It is the single source of truth for which
//!    snapshot to load — recovery reads `CURRENT`, then opens the manifest
//!    it names. Both the snapshot write and the `CURRENT` update are
//!    performed write-to-temp-then-rename, so a crash mid-checkpoint always
//!    leaves `CURRENT` pointing at either the old or the new snapshot, never
//!    a partially-written one.
//!
//! 4. On startup:
//!    - If `CURRENT` names a valid snapshot → load it, replay WAL.
//!    - If `CURRENT` is absent, or names a snapshot that is missing or
//!      corrupted → fall back to an empty manifest and replay the WAL from
//!      scratch (the WAL is ground truth; the snapshot is an optimization).
//!
//! This ensures crash recovery is always correct and consistent.
//!
//! ## Thread safety
//!
//! - **WAL** is internally synchronized — no external lock is required.
//! - **ManifestData** is wrapped in a `Mutex` to coordinate concurrent metadata operations.
//!
//! The manifest itself is fully thread-safe and can be accessed from any engine thread.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use crate::encoding::{self, EncodingError};
use crate::wal::{Wal, WalError};
use crc32fast::Hasher as Crc32;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use thiserror::Error;
use tracing::{error, info, warn};

const SNAPSHOT_TMP_SUFFIX: &str = ".tmp";
/// Prefix shared by every numbered manifest snapshot file: `MANIFEST-000001`,
/// `MANIFEST-000002`, etc. A new number is allocated on every `checkpoint()`.
const MANIFEST_PREFIX: &str = "MANIFEST-";
/// One-line pointer file naming the currently-live `MANIFEST-<number>` file.
/// Recovery reads this first, then opens the manifest it names.
const CURRENT_FILENAME: &str = "CURRENT";
/// Manifest WAL filename. This is a fixed, single-segment WAL file — it does
/// not rotate. Truncated to zero on each checkpoint.
const WAL_FILENAME: &str = "000000.log";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snapshot file is corrupted or checksum mismatched.
    #[error("Snapshot checksum mismatch")]
    SnapshotChecksumMismatch,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Manifest data structures
// ------------------------------------------------------------------------------------------------

/// In-memory representation of the manifest durable state.
///
/// This structure stores the persistent metadata describing
/// the layout of the LSM tree. Fields are private to enforce
/// invariants through the [`Manifest`] API.
#[derive(Debug, PartialEq, Clone)]
pub(crate) struct ManifestData {
    /// Monotonically increasing manifest version.
    version: u64,

    /// Last globally assigned LSN (Log Sequence Number).
    last_lsn: u64,

    /// Identifier of current active WAL segment.
    active_wal: u64,

    /// Identifiers of frozen WAL segments (older, ready for flush).
    frozen_wals: Vec<u64>,

    /// List of all SSTables belonging to the LSM tree.
    sstables: Vec<ManifestSstEntry>,

    /// Next SSTable ID to allocate. Monotonically increasing.
    next_sst_id: u64,

    /// Per-level round-robin compaction cursor: the key after which the
    /// next leveled compaction of that level should pick its input file.
    /// Indexed by level; empty entry means "start from the beginning".
    compact_pointers: Vec<Vec<u8>>,

    /// Runtime-only flag: true when in-memory state diverges from
    /// the last persisted snapshot. Not serialized.
    dirty: bool,
}

/// Entry describing a single SSTable known to the manifest.
///
/// Identifies table by unique ID and on-disk path, and carries the
/// level-assignment metadata ("FileMetadata") needed to reconstruct a
/// leveled [`Version`](crate::engine::version::Version) without re-opening
/// every SSTable on startup just to read its properties block.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSstEntry {
    /// Globally unique SSTable ID.
    pub id: u64,

    /// Filesystem path to SSTable file.
    pub path: PathBuf,

    /// Level this SSTable belongs to (`0..NUM_LEVELS`).
    pub level: u32,

    /// On-disk file size in bytes, used for compaction scoring without
    /// a `stat()` call.
    pub file_size: u64,

    /// Smallest user key in this SSTable.
    pub smallest: Vec<u8>,

    /// Largest user key in this SSTable.
    pub largest: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for ManifestSstEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.id, buf)?;
        encoding::Encode::encode_to(&self.path, buf)?;
        encoding::Encode::encode_to(&self.level, buf)?;
        encoding::Encode::encode_to(&self.file_size, buf)?;
        encoding::Encode::encode_to(&self.smallest, buf)?;
        encoding::Encode::encode_to(&self.largest, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestSstEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (path, n) = PathBuf::decode_from(&buf[offset..])?;
        offset += n;
        let (level, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (file_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (smallest, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (largest, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                id,
                path,
                level,
                file_size,
                smallest,
                largest,
            },
            offset,
        ))
    }
}

impl encoding::Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.last_lsn, buf)?;
        encoding::Encode::encode_to(&self.active_wal, buf)?;
        encoding::encode_vec(&self.frozen_wals, buf)?;
        encoding::encode_vec(&self.sstables, buf)?;
        encoding::Encode::encode_to(&self.next_sst_id, buf)?;
        encoding::encode_vec(&self.compact_pointers, buf)?;
        // `dirty` is a runtime-only flag — always written as `false` for
        // wire compatibility, but never read back.
        encoding::Encode::encode_to(&false, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (active_wal, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (frozen_wals, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
        offset += n;
        let (sstables, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
        offset += n;
        let (next_sst_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (compact_pointers, n) = encoding::decode_vec::<Vec<u8>>(&buf[offset..])?;
        offset += n;
        // `dirty` is present in the wire format for backward compatibility
        // but its value is discarded — always initialised to `false`.
        let (_dirty, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                last_lsn,
                active_wal,
                frozen_wals,
                sstables,
                next_sst_id,
                compact_pointers,
                dirty: false,
            },
            offset,
        ))
    }
}

impl encoding::Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::Version { version } => {
                encoding::Encode::encode_to(&0u32, buf)?;
                encoding::Encode::encode_to(version, buf)?;
            }
            ManifestEvent::SetActiveWal { wal } => {
                encoding::Encode::encode_to(&1u32, buf)?;
                encoding::Encode::encode_to(wal, buf)?;
            }
            ManifestEvent::AddFrozenWal { wal } => {
                encoding::Encode::encode_to(&2u32, buf)?;
                encoding::Encode::encode_to(wal, buf)?;
            }
            ManifestEvent::RemoveFrozenWal { wal } => {
                encoding::Encode::encode_to(&3u32, buf)?;
                encoding::Encode::encode_to(wal, buf)?;
            }
            ManifestEvent::AddSst { entry } => {
                encoding::Encode::encode_to(&4u32, buf)?;
                encoding::Encode::encode_to(entry, buf)?;
            }
            ManifestEvent::RemoveSst { id } => {
                encoding::Encode::encode_to(&5u32, buf)?;
                encoding::Encode::encode_to(id, buf)?;
            }
            ManifestEvent::UpdateLsn { last_lsn } => {
                encoding::Encode::encode_to(&6u32, buf)?;
                encoding::Encode::encode_to(last_lsn, buf)?;
            }
            ManifestEvent::AllocateSstId { id } => {
                encoding::Encode::encode_to(&7u32, buf)?;
                encoding::Encode::encode_to(id, buf)?;
            }
            ManifestEvent::Compaction { added, removed } => {
                encoding::Encode::encode_to(&8u32, buf)?;
                encoding::encode_vec(added, buf)?;
                encoding::encode_vec(removed, buf)?;
            }
            ManifestEvent::SetCompactPointer { level, key } => {
                encoding::Encode::encode_to(&9u32, buf)?;
                encoding::Encode::encode_to(level, buf)?;
                encoding::Encode::encode_to(key, buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for ManifestEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (tag, n) = u32::decode_from(buf)?;
        offset += n;
        match tag {
            0 => {
                let (version, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Version { version }, offset))
            }
            1 => {
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::SetActiveWal { wal }, offset))
            }
            2 => {
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AddFrozenWal { wal }, offset))
            }
            3 => {
                let (wal, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::RemoveFrozenWal { wal }, offset))
            }
            4 => {
                let (entry, n) = ManifestSstEntry::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AddSst { entry }, offset))
            }
            5 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::RemoveSst { id }, offset))
            }
            6 => {
                let (last_lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::UpdateLsn { last_lsn }, offset))
            }
            7 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::AllocateSstId { id }, offset))
            }
            8 => {
                let (added, n) = encoding::decode_vec::<ManifestSstEntry>(&buf[offset..])?;
                offset += n;
                let (removed, n) = encoding::decode_vec::<u64>(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::Compaction { added, removed }, offset))
            }
            9 => {
                let (level, n) = u32::decode_from(&buf[offset..])?;
                offset += n;
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::SetCompactPointer { level, key }, offset))
            }
            _ => Err(EncodingError::InvalidTag {
                tag,
                type_name: "ManifestEvent",
            }),
        }
    }
}

impl encoding::Encode for ManifestSnapshot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.snapshot_lsn, buf)?;
        encoding::Encode::encode_to(&self.manifest_data, buf)?;
        encoding::Encode::encode_to(&self.checksum, buf)?;
        Ok(())
    }
}

impl encoding::Decode for ManifestSnapshot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (snapshot_lsn, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (manifest_data, n) = ManifestData::decode_from(&buf[offset..])?;
        offset += n;
        let (checksum, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                snapshot_lsn,
                manifest_data,
                checksum,
            },
            offset,
        ))
    }
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            version: 1,
            last_lsn: 0,
            active_wal: 0,
            frozen_wals: Vec::new(),
            sstables: Vec::new(),
            next_sst_id: 1,
            compact_pointers: Vec::new(),
            dirty: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest record types
// ------------------------------------------------------------------------------------------------

/// Record stored in manifest WAL. Each variant describes
/// a single metadata mutation applied to ManifestData.
#[derive(Debug)]
pub enum ManifestEvent {
    /// Sets a new version of manifest
    Version { version: u64 },

    /// Sets a new WAL segment as active.
    SetActiveWal { wal: u64 },

    /// Adds a WAL segment to the frozen list.
    AddFrozenWal { wal: u64 },

    /// Removes a frozen WAL from manifest state.
    RemoveFrozenWal { wal: u64 },

    /// Adds a new SSTable entry.
    AddSst { entry: ManifestSstEntry },

    /// Removes an SSTable by ID.
    RemoveSst { id: u64 },

    /// Updates the global last known LSN.
    UpdateLsn { last_lsn: u64 },

    /// Allocates the next SSTable ID (persists the counter increment).
    AllocateSstId { id: u64 },

    /// Atomic compaction operation: adds new SSTables and removes old ones
    /// in a single WAL entry, ensuring crash-safe manifest transitions.
    Compaction {
        added: Vec<ManifestSstEntry>,
        removed: Vec<u64>,
    },

    /// Advances the round-robin compaction cursor for a level — the key
    /// after which the next leveled compaction of that level should pick
    /// its input file.
    SetCompactPointer { level: u32, key: Vec<u8> },
}

/// Serialized snapshot stored in `MANIFEST-000001`.
///
/// Contains full manifest data and a checksum for corruption detection.
#[derive(Debug)]
struct ManifestSnapshot {
    /// Snapshot version number (matches manifest version).
    version: u64,

    /// The LSN at the time of snapshot creation.
    snapshot_lsn: u64,

    /// Full metadata (active WAL, frozen WALs, SSTables, etc.).
    manifest_data: ManifestData,

    /// CRC32 checksum of the entire serialized payload.
    checksum: u32,
}

// ------------------------------------------------------------------------------------------------
// Manifest core
// ------------------------------------------------------------------------------------------------

/// Persistent metadata manager of the LSM engine.
///
/// Provides crash-safe metadata operations using a WAL-driven model.
/// Allows concurrent updates.
///
/// # Durability rules
///
/// For every metadata mutation:
/// - Append a record to manifest WAL.
/// - Update in-memory state.
/// - Optionally, WAL may be fsync'ed (policy-dependent).
///
/// Checkpoint compacts state into a snapshot and truncates WAL.
#[derive(Debug)]
pub struct Manifest {
    /// Path to engine root directory.
    path: PathBuf,

    /// Manifest WAL storing metadata operations.
    ///
    /// The WAL ensures crash recovery consistency and is internally thread-safe.
    wal: Wal<ManifestEvent>,

    /// In-memory manifest state protected by a mutex.
    ///
    /// Concurrent threads update metadata safely using this lock.
    data: Mutex<ManifestData>,

    /// Number of the `MANIFEST-<number>` file `CURRENT` currently points to
    /// (0 if no snapshot has been written yet). Only mutated by
    /// `checkpoint()`, which requires `&mut self`.
    current_manifest_num: u64,
}

impl Manifest {
    /// Opens the manifest from the given engine directory.
    ///
    /// # Behavior
    /// - Loads snapshot if present.
    /// - Replays manifest WAL to recover latest consistent state.
    /// - Initializes empty manifest if neither snapshot nor WAL exist.
    ///
    /// # Returns
    /// Loaded `Manifest` with fully reconstructed state.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        // 1. Read CURRENT to find the live manifest snapshot, then load it.
        let mut data = ManifestData::default();
        let mut snapshot_lsn: u64 = 0;
        let mut current_manifest_num: u64 = 0;

        if let Some(name) = Self::read_current(&path.join(CURRENT_FILENAME)) {
            match Self::parse_manifest_num(&name) {
                Some(num) => {
                    current_manifest_num = num;
                    let snapshot_path = path.join(&name);
                    match Self::read_snapshot(&snapshot_path) {
                        Ok((snap, slsn)) => {
                            data = snap;
                            snapshot_lsn = slsn;
                            info!("Loaded manifest snapshot from {:?}", snapshot_path);
                        }
                        Err(e) => {
                            // Resilient recovery: ignore corrupt/missing snapshot
                            // and replay WAL from scratch. The WAL is ground
                            // truth; the snapshot is an optimisation hint.
                            warn!(
                                "Failed to read manifest snapshot {:?}: {}; \
                                 falling back to full WAL replay",
                                snapshot_path, e
                            );
                        }
                    }
                }
                None => {
                    warn!("CURRENT contains unparsable manifest name {:?}", name);
                }
            }
        }

        // 2. Open manifest WAL file (create if missing)
        let wal_path = path.join(WAL_FILENAME);
        let wal = Wal::<ManifestEvent>::open(&wal_path, None)?;

        // 3. Replay WAL entries (only those after snapshot_lsn if snapshot exists)
        //    The manifest WAL records are small; we iterate all records and apply.
        let mut manifest = Manifest {
            path,
            wal,
            data: Mutex::new(data),
            current_manifest_num,
        };

        manifest.replay_wal(snapshot_lsn)?;

        Ok(manifest)
    }

    // --------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------

    /// Acquires the manifest data lock, mapping a poisoned mutex to
    /// [`ManifestError::Internal`].
    fn lock_data(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data.lock().map_err(|_| {
            error!("Mutex poisoned");
            ManifestError::Internal("Mutex poisoned".into())
        })
    }

    /// Reads the `CURRENT` pointer file, returning the manifest filename it
    /// names, or `None` if the file is absent, empty, or unreadable.
    fn read_current(current_path: &Path) -> Option<String> {
        match fs::read_to_string(current_path) {
            Ok(contents) => {
                let name = contents.trim();
                if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read CURRENT file {:?}: {}", current_path, e);
                None
            }
        }
    }

    /// Parses the trailing number out of a `MANIFEST-<number>` filename.
    fn parse_manifest_num(name: &str) -> Option<u64> {
        name.strip_prefix(MANIFEST_PREFIX)?.parse::<u64>().ok()
    }

    /// Formats the filename for manifest snapshot number `num`.
    fn manifest_filename(num: u64) -> String {
        format!("{MANIFEST_PREFIX}{num:06}")
    }

    /// Atomically points `CURRENT` at `manifest_name` (write-temp, fsync,
    /// rename, fsync parent directory).
    fn write_current(dir: &Path, manifest_name: &str) -> Result<(), ManifestError> {
        let tmp_path = dir.join(format!("{CURRENT_FILENAME}{SNAPSHOT_TMP_SUFFIX}"));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(manifest_name.as_bytes())?;
            f.write_all(b"\n")?;
            f.sync_all()?;
        }
        let final_path = dir.join(CURRENT_FILENAME);
        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(dir)?;
        Ok(())
    }

    // --------------------------------------------------------------------
    // Read accessors
    // --------------------------------------------------------------------

    /// Returns the active WAL segment ID.
    pub fn get_active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.active_wal)
    }

    /// Returns the frozen WAL segment list.
    pub fn get_frozen_wals(&self) -> Result<Vec<u64>, ManifestError> {
        Ok(self.lock_data()?.frozen_wals.clone())
    }

    /// Returns list of SSTable entries.
    pub fn get_sstables(&self) -> Result<Vec<ManifestSstEntry>, ManifestError> {
        Ok(self.lock_data()?.sstables.clone())
    }

    /// Returns the last persistent LSN.
    pub fn get_last_lsn(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.last_lsn)
    }

    /// Returns `true` if in-memory state has diverged from the last snapshot.
    pub fn is_dirty(&self) -> Result<bool, ManifestError> {
        Ok(self.lock_data()?.dirty)
    }

    // --------------------------------------------------------------------
    // Mutation methods
    // --------------------------------------------------------------------
    //
    // All mutation methods take `&self` rather than `&mut self`.
    // Interior mutability is provided by the `Mutex<ManifestData>` and the
    // internally-synchronised WAL.  This allows concurrent metadata updates
    // without requiring exclusive ownership.  `checkpoint()` is the only
    // method that requires `&mut self` because it truncates the WAL and
    // must not race with concurrent mutations.

    /// Updates the active WAL segment.
    pub fn set_active_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::SetActiveWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Adds a WAL segment to frozen list.
    pub fn add_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::AddFrozenWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Removes a frozen WAL.
    pub fn remove_frozen_wal(&self, wal_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::RemoveFrozenWal { wal: wal_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Adds an SSTable entry to manifest.
    pub fn add_sstable(&self, entry: ManifestSstEntry) -> Result<(), ManifestError> {
        let rec = ManifestEvent::AddSst {
            entry: entry.clone(),
        };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Removes SSTable entry by ID.
    pub fn remove_sstable(&self, sst_id: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::RemoveSst { id: sst_id };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Atomically allocates the next SSTable ID.
    ///
    /// Increments the manifest's `next_sst_id` counter and persists the
    /// new value to the WAL. Returns the allocated ID.
    ///
    /// The data lock is held across the read-and-increment to prevent
    /// two concurrent callers from allocating the same ID.
    pub fn allocate_sst_id(&self) -> Result<u64, ManifestError> {
        let mut data = self.lock_data()?;
        let id = data.next_sst_id;
        let rec = ManifestEvent::AllocateSstId { id };
        self.wal.append(&rec)?;
        data.next_sst_id = id + 1;
        data.dirty = true;
        Ok(id)
    }

    /// Returns the next SSTable ID without allocating it.
    pub fn peek_next_sst_id(&self) -> Result<u64, ManifestError> {
        Ok(self.lock_data()?.next_sst_id)
    }

    /// Returns the current round-robin compaction cursor for `level`, or an
    /// empty key if the level has never been compacted.
    pub fn get_compact_pointer(&self, level: u32) -> Result<Vec<u8>, ManifestError> {
        let data = self.lock_data()?;
        Ok(data
            .compact_pointers
            .get(level as usize)
            .cloned()
            .unwrap_or_default())
    }

    /// Advances the round-robin compaction cursor for `level` to `key`.
    pub fn set_compact_pointer(&self, level: u32, key: Vec<u8>) -> Result<(), ManifestError> {
        let rec = ManifestEvent::SetCompactPointer { level, key };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Atomically records a compaction: adds new SSTables and removes old ones
    /// in a single WAL entry.
    pub fn apply_compaction(
        &self,
        added: Vec<ManifestSstEntry>,
        removed: Vec<u64>,
    ) -> Result<(), ManifestError> {
        let rec = ManifestEvent::Compaction { added, removed };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Updates last durable LSN.
    pub fn update_lsn(&self, last_lsn: u64) -> Result<(), ManifestError> {
        let rec = ManifestEvent::UpdateLsn { last_lsn };
        self.wal.append(&rec)?;
        self.apply_record(&rec)?;
        Ok(())
    }

    /// Creates a manifest snapshot.
    ///
    /// # Behavior
    /// - Serializes ManifestData and writes it to a freshly numbered
    ///   `MANIFEST-<number>` file.
    /// - Computes a checksum for corruption detection.
    /// - Atomically repoints `CURRENT` at the new file.
    /// - Best-effort removes the manifest file `CURRENT` previously named.
    /// - Resets/truncates manifest WAL to reduce recovery cost.
    ///
    /// # Exclusive access
    /// Requires `&mut self` to ensure no concurrent mutations race with the
    /// WAL truncation step.
    pub fn checkpoint(&mut self) -> Result<(), ManifestError> {
        // 1. Build snapshot structure (capture current state, checksum placeholder)
        let snapshot = {
            let data = self.lock_data()?.clone();

            ManifestSnapshot {
                version: data.version,
                snapshot_lsn: data.last_lsn,
                manifest_data: data,
                checksum: 0,
            }
        };

        // 2. Single-pass: serialize with checksum=0, compute CRC, then patch
        //    the trailing 4 bytes with the real checksum (little-endian u32).
        let mut snapshot_bytes = encoding::encode_to_vec(&snapshot)?;

        let mut hasher = Crc32::new();
        hasher.update(&snapshot_bytes);
        let checksum = hasher.finalize();

        let len = snapshot_bytes.len();
        snapshot_bytes[len - 4..].copy_from_slice(&checksum.to_le_bytes());

        // 3. Allocate the next manifest number and write to a temp file.
        let new_num = self.current_manifest_num + 1;
        let new_name = Self::manifest_filename(new_num);
        let tmp_path = self.path.join(format!("{new_name}{SNAPSHOT_TMP_SUFFIX}"));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            f.write_all(&snapshot_bytes)?;
            f.sync_all()?; // ensure snapshot content durable
        }

        // 4. Atomic rename into place, then fsync parent directory.
        let final_path = self.path.join(&new_name);
        fs::rename(&tmp_path, &final_path)?;
        Self::fsync_dir(&self.path)?;

        info!("Manifest snapshot written to {:?}", final_path);

        // 5. Atomically repoint CURRENT at the new snapshot. Recovery always
        //    reads CURRENT first, so until this rename lands, a crash still
        //    recovers from the previous (still-intact) snapshot.
        Self::write_current(&self.path, &new_name)?;

        // 6. Best-effort cleanup of the manifest file this one superseded.
        if self.current_manifest_num > 0 {
            let old_path = self
                .path
                .join(Self::manifest_filename(self.current_manifest_num));
            if let Err(e) = fs::remove_file(&old_path) {
                warn!("Failed to remove superseded manifest {:?}: {}", old_path, e);
            }
        }
        self.current_manifest_num = new_num;

        // 7. Truncate manifest WAL to header-only (safe after snapshot durability)
        self.wal.truncate()?;

        // 8. Mark in-memory data as clean
        self.lock_data()?.dirty = false;

        Ok(())
    }

    fn fsync_dir(dir: &Path) -> Result<(), ManifestError> {
        let dir_file = File::open(dir)?;
        dir_file.sync_all()?;
        Ok(())
    }

    // TODO: refactor logic!
    fn read_snapshot(p: &Path) -> Result<(ManifestData, u64), ManifestError> {
        let mut f = File::open(p)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;

        let (snap, _) = encoding::decode_from_slice::<ManifestSnapshot>(buf.as_slice())?;

        // Verify checksum: re-encode with checksum=0, CRC the result, compare.
        let verify = ManifestSnapshot {
            checksum: 0,
            version: snap.version,
            snapshot_lsn: snap.snapshot_lsn,
            manifest_data: snap.manifest_data.clone(),
        };
        let verify_bytes = encoding::encode_to_vec(&verify)?;

        let mut hasher = Crc32::new();
        hasher.update(&verify_bytes);
        let computed_checksum = hasher.finalize();

        if snap.checksum != computed_checksum {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        Ok((snap.manifest_data, snap.snapshot_lsn))
    }

    fn replay_wal(&mut self, snapshot_lsn: u64) -> Result<(), ManifestError> {
        let iter = match self.wal.replay_iter() {
            Ok(i) => i,
            Err(e) => {
                return Err(ManifestError::Wal(e));
            }
        };

        let mut count: u64 = 0;
        for item in iter {
            match item {
                Ok(rec) => {
                    self.apply_record(&rec)?;
                    count += 1;
                }
                Err(e) => {
                    warn!("Manifest WAL replay stopped due to WAL error: {}", e);
                    break;
                }
            }
        }

        // Defensive check: after replay the manifest LSN must be at least
        // as large as the snapshot baseline.  A smaller value indicates WAL
        // truncation or data loss.
        let current_lsn = self.lock_data()?.last_lsn;
        if snapshot_lsn > 0 && current_lsn < snapshot_lsn {
            warn!(
                "Manifest LSN after WAL replay ({}) is less than snapshot LSN ({}); \
                 possible WAL truncation or data loss",
                current_lsn, snapshot_lsn
            );
        }

        info!(
            "Manifest WAL replay: {} entries applied (snapshot_lsn={})",
            count, snapshot_lsn
        );

        Ok(())
    }

    fn apply_record(&self, rec: &ManifestEvent) -> Result<(), ManifestError> {
        let mut data = self.lock_data()?;

        match rec {
            ManifestEvent::Version { version } => {
                data.version = *version;
                data.dirty = true;
            }

            ManifestEvent::SetActiveWal { wal } => {
                data.active_wal = *wal;
                data.frozen_wals.retain(|w| w != wal);
                data.dirty = true;
            }

            ManifestEvent::AddFrozenWal { wal } => {
                if !data.frozen_wals.contains(wal) {
                    data.frozen_wals.push(*wal);
                }
                data.dirty = true;
            }

            ManifestEvent::RemoveFrozenWal { wal } => {
                data.frozen_wals.retain(|w| w != wal);
                data.dirty = true;
            }

            ManifestEvent::AddSst { entry } => {
                // Avoid duplicate SST IDs (idempotent)
                if !data.sstables.iter().any(|e| e.id == entry.id) {
                    data.sstables.push(entry.clone());
                }
                data.dirty = true;
            }

            ManifestEvent::RemoveSst { id } => {
                data.sstables.retain(|e| e.id != *id);
                data.dirty = true;
            }

            ManifestEvent::UpdateLsn { last_lsn } => {
                if *last_lsn > data.last_lsn {
                    data.last_lsn = *last_lsn;
                }
                data.dirty = true;
            }

            ManifestEvent::AllocateSstId { id } => {
                // Advance counter past the allocated ID (self-healing on replay).
                if *id >= data.next_sst_id {
                    data.next_sst_id = *id + 1;
                }
                data.dirty = true;
            }

            ManifestEvent::Compaction { added, removed } => {
                // Remove old SSTables first.
                for id in removed {
                    data.sstables.retain(|e| e.id != *id);
                }
                // Add new SSTables (idempotent — skip duplicates).
                for entry in added {
                    if !data.sstables.iter().any(|e| e.id == entry.id) {
                        data.sstables.push(entry.clone());
                    }
                    // Keep next_sst_id consistent.
                    if entry.id >= data.next_sst_id {
                        data.next_sst_id = entry.id + 1;
                    }
                }
                data.dirty = true;
            }

            ManifestEvent::SetCompactPointer { level, key } => {
                let level = *level as usize;
                if data.compact_pointers.len() <= level {
                    data.compact_pointers.resize(level + 1, Vec::new());
                }
                data.compact_pointers[level] = key.clone();
                data.dirty = true;
            }
        }

        Ok(())
    }
}
