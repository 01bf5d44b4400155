//! Write-Ahead Logging (WAL) Module
//!
//! This module implements a **durable**, **append-only**, and **generic** Write-Ahead Log (WAL)
//! suitable for embedded databases and key-value storage engines.
//! It provides **type-safe**, **CRC-protected**, and **thread-safe** persistence of arbitrary records
//! that implement the [`WalData`] trait.
//!
//! ## Design Overview
//!
//! The WAL ensures crash recovery and corruption detection for any serializable record type
//! (`MemTableRecord`, `ManifestRecord`, etc.). It uses [`crate::encoding`] for compact serialization
//! and [`crc32fast`] for data integrity.
//!
//! Logical records are packed into fixed-size 32 KiB blocks using the classic log
//! block/record framing: a record that doesn't fit in the remaining space of a
//! block is split across `FIRST`/`MIDDLE`/`LAST` physical fragments, and the tail
//! of a block too small to hold another fragment header is zero-padded.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! <32 KiB block><32 KiB block>...
//! ```
//!
//! Each block holds a sequence of physical records:
//!
//! ```text
//! [CRC32_LE(4)][LEN_LE(2)][TYPE(1)][DATA(LEN)]
//! ```
//!
//! - **Header** — a [`WalHeader`] structure followed by a 4-byte CRC32 checksum.
//! - **Physical record** — `checksum(4) + length(2) + type(1) + data(length)`,
//!   where `checksum` covers `type || data` and `type` is one of
//!   [`RecordType::Full`], [`RecordType::First`], [`RecordType::Middle`], or
//!   [`RecordType::Last`].
//! - A logical record that fits entirely within the space left in the current
//!   block is written as a single `FULL` fragment; a larger one is split into
//!   `FIRST`, zero or more `MIDDLE`, and one `LAST` fragment, each confined to
//!   its own block.
//! - When fewer than [`RECORD_HEADER_SIZE`] bytes remain in a block, the
//!   remainder is zero-filled and the next fragment starts at the following
//!   block boundary.
//!
//! # Concurrency model
//!
//! - Writes are synchronized via a single `Mutex` guarding both the file handle
//!   and the writer's position within the current block, so concurrent
//!   appenders never interleave a record's fragments.
//! - [`WalIter`] opens its own independent, read-only file handle and tracks
//!   its own logical offset, so replay never contends with concurrent appends.
//!
//! # Guarantees
//!
//! - **Durability:** Every `append()` is followed by an `fsync()` via [`File::sync_all`].
//! - **Integrity:** Both header and record checksums are verified during replay.
//! - **Corruption detection:** Replay stops at first failed checksum or truncated write.
//! - **Safety:** Thread-safe, generic over any [`crate::encoding`] `Encode`/`Decode` type.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::encoding::{self, EncodingError};
use crc32fast::Hasher as Crc32;
use std::ffi::OsStr;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Size of a block that physical records are packed into.
const BLOCK_SIZE: u64 = 32 * 1024;

/// Size of a physical record header: `checksum(4) + length(2) + type(1)`.
const RECORD_HEADER_SIZE: u64 = 7;

/// Tag byte identifying a physical record fragment's role within its
/// logical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// Padding placeholder; never holds real data. Encountering one during
    /// replay means the rest of the block is zero-fill and should be skipped.
    Zero = 0,
    /// The logical record fits entirely in one fragment.
    Full = 1,
    /// First fragment of a logical record split across multiple blocks.
    First = 2,
    /// Interior fragment of a split logical record.
    Middle = 3,
    /// Final fragment of a split logical record.
    Last = 4,
}

impl RecordType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Data integrity failure — checksum did not match.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Record exceeds the configured maximum size.
    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// Unexpected end-of-file during read.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    /// WAL header failed integrity validation.
    #[error("Internal header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header / Record structures
// ------------------------------------------------------------------------------------------------

/// Metadata written at the start of the WAL file.
///
/// This section validates the WAL’s identity and constraints.
/// It is followed by a CRC32 checksum to protect against corruption.
#[derive(Debug)]
pub struct WalHeader {
    /// Magic constant to identify WAL files (`b"AWAL"`).
    magic: [u8; 4],

    /// WAL format version.
    version: u32,

    /// Maximum record size (in bytes).
    max_record_size: u32,

    /// Monotonically-increasing WAL sequence number (segment id).
    wal_seq: u64,
}

impl WalHeader {
    /// Expected 4-byte magic constant.
    pub const MAGIC: [u8; 4] = *b"AWAL";

    /// Current supported version number.
    pub const VERSION: u32 = 1;

    /// Default maximum record size (1 MiB).
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 1024 * 1024;

    /// Creates a new [`WalHeader`] instance.
    ///
    /// # Parameters
    /// - `max_record_size`: Maximum record size limit.
    /// - `wal_seq`: WAL segment sequence number.
    pub fn new(max_record_size: u32, wal_seq: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
            wal_seq,
        }
    }

    /// Encoded size of the header in bytes (without the trailing CRC).
    ///
    /// Layout: `magic(4) + version(4) + max_record_size(4) + wal_seq(8)` = 20.
    pub const ENCODED_SIZE: usize = 4 + 4 + 4 + 8;

    /// Total on-disk size of the header *including* its trailing CRC32.
    pub const HEADER_DISK_SIZE: usize = Self::ENCODED_SIZE + U32_SIZE;

    /// Returns the WAL segment sequence number.
    pub fn wal_seq(&self) -> u64 {
        self.wal_seq
    }

    /// Returns the maximum record size (in bytes).
    pub fn max_record_size(&self) -> u32 {
        self.max_record_size
    }

    /// Returns the WAL format version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl encoding::Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        encoding::Encode::encode_to(&self.magic, buf)?;
        encoding::Encode::encode_to(&self.version, buf)?;
        encoding::Encode::encode_to(&self.max_record_size, buf)?;
        encoding::Encode::encode_to(&self.wal_seq, buf)?;
        Ok(())
    }
}

impl encoding::Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (max_record_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (wal_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                max_record_size,
                wal_seq,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Traits
// ------------------------------------------------------------------------------------------------

/// Trait for data types that can be written to and read from the WAL.
///
/// Any record type used with [`Wal`] must implement this trait,
/// which acts as a marker requiring [`crate::encoding`] serialization.
///
/// # Required Traits
/// - [`crate::encoding::Encode`]
/// - [`crate::encoding::Decode`]
/// - [`Send`] + [`Sync`] + [`Debug`]
pub trait WalData: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}
impl<T> WalData for T where T: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// A generic, thread-safe Write-Ahead Log for durable record storage.
///
/// See the [module-level documentation](self) for more details on format,
/// concurrency, and guarantees.
///
/// # Type Parameters
///
/// * `T` — Any record type implementing [`WalData`].
#[derive(Debug)]
pub struct Wal<T: WalData> {
    /// Writer file handle plus its position within the current block,
    /// guarded together so concurrent appenders never interleave fragments.
    writer: Mutex<WriterState>,

    /// Path to the WAL file on disk.
    path: PathBuf,

    /// Persistent header with metadata and integrity info.
    header: WalHeader,

    /// Marker field to associate this WAL with the generic record type `T`.
    _phantom: std::marker::PhantomData<T>,
}

/// Writer-side state: the open file plus how far into the current 32 KiB
/// block the next physical record will start.
#[derive(Debug)]
struct WriterState {
    file: File,
    block_offset: u64,
}

impl<T: WalData> Wal<T> {
    /// Open or create a WAL file at the given path.
    ///
    /// # Parameters
    /// - `path`: Path to the WAL file.
    /// - `max_record_size`: Optional custom maximum record size.
    ///
    /// # Returns
    /// A [`Wal`] instance, ready for appending or replaying records.
    pub fn open<P: AsRef<Path>>(path: P, max_record_size: Option<u32>) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        let wal_seq = Self::parse_seq_from_path(path_ref)
            .ok_or(WalError::Internal("WAL name incorrect".into()))?;

        // If file is empty, create and write a new header.
        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(
                max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                wal_seq,
            );

            write_header(&mut file, &header)?;
            file.sync_all()?;

            info!(path = %path_ref.display(), seq = wal_seq, "WAL created with new header");

            header
        } else {
            // Existing WAL → read and validate header + checksum.
            file.seek(SeekFrom::Start(0))?;

            let header = read_and_validate_header(&mut file)?;

            if header.wal_seq != wal_seq {
                return Err(WalError::InvalidHeader("sequence number mismatch".into()));
            }

            debug!(
                path = %path_ref.display(),
                max_record_size = header.max_record_size,
                seq = header.wal_seq,
                "WAL header validated"
            );

            header
        };

        info!(path = %path_ref.display(), seq = header.wal_seq, "WAL opened");

        let data_len = file.metadata()?.len().saturating_sub(WalHeader::HEADER_DISK_SIZE as u64);
        let block_offset = data_len % BLOCK_SIZE;

        Ok(Self {
            writer: Mutex::new(WriterState { file, block_offset }),
            path: path_ref.to_path_buf(),
            header,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Parse `wal_seq` from filename if it matches `wal-<seq>.log`.
    fn parse_seq_from_path(path: &Path) -> Option<u64> {
        let name = path.file_name().and_then(OsStr::to_str)?;
        // Expect pattern wal-000001.log or wal-1.log etc.
        if let Some(seq_str) = name
            .strip_prefix("wal-")
            .and_then(|s| s.strip_suffix(".log"))
        {
            return seq_str.parse::<u64>().ok();
        }
        None
    }

    /// Appends a single record to the WAL.
    ///
    /// The record is serialized using [`crate::encoding`] and packed into the
    /// current 32 KiB block as one or more physical fragments (see the
    /// [module-level documentation](self) for the on-disk framing). The whole
    /// multi-fragment write is performed under a single lock, so concurrent
    /// appenders never interleave a record's fragments.
    ///
    /// # Parameters
    /// - `record`: Reference to the record implementing [`WalData`].
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        let record_bytes = encoding::encode_to_vec(record)?;

        if record_bytes.len() > self.header.max_record_size as usize {
            return Err(WalError::RecordTooLarge(record_bytes.len()));
        }

        let mut state = self
            .writer
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        write_fragments(&mut state, &record_bytes)?;
        state.file.sync_all()?;

        trace!(len = record_bytes.len(), "WAL record appended");
        Ok(())
    }

    /// Returns an iterator that replays all valid records from the WAL.
    ///
    /// The iterator opens its own read-only file handle, reassembles
    /// `FIRST`/`MIDDLE`/`LAST` fragments into logical records, verifies CRC
    /// checksums, and decodes each entry into its original record type `T`.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");

        let file = OpenOptions::new().read(true).open(&self.path)?;
        let start_offset = WalHeader::HEADER_DISK_SIZE as u64;

        Ok(WalIter {
            file,
            offset: start_offset,
            max_record_size: self.header.max_record_size as usize,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Truncate (clear) the WAL and rewrite header.
    ///
    /// After truncation, WAL contains only the header and its checksum.
    pub fn truncate(&mut self) -> Result<(), WalError> {
        let mut state = self
            .writer
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        state.file.set_len(0)?;
        state.file.seek(SeekFrom::Start(0))?;

        write_header(&mut state.file, &self.header)?;
        state.file.sync_all()?;
        state.block_offset = 0;

        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Rotates to a new WAL segment with the next sequence number.
    ///
    /// Syncs the current WAL, opens a new WAL file with `wal_seq + 1`,
    /// and replaces `self` with the new instance.
    ///
    /// Returns the new WAL sequence number.
    pub fn rotate_next(&mut self) -> Result<u64, WalError> {
        {
            let state = self
                .writer
                .lock()
                .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
            state.file.sync_all()?;
        }

        let next_seq = self
            .header
            .wal_seq
            .checked_add(1)
            .ok_or_else(|| WalError::Internal("WAL sequence number overflow".into()))?;

        let cur_path = PathBuf::from(&self.path);
        let dir = cur_path.parent().unwrap_or_else(|| Path::new("."));
        let next_path = dir.join(format!("wal-{next_seq:06}.log"));

        let new_wal = Wal::<T>::open(&next_path, Some(self.header.max_record_size))?;
        *self = new_wal;

        Ok(next_seq)
    }

    /// Get the path of the underlying WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the WAL segment sequence number.
    pub fn wal_seq(&self) -> u64 {
        self.header.wal_seq
    }

    /// Returns the configured maximum record size.
    pub fn max_record_size(&self) -> u32 {
        self.header.max_record_size
    }

    /// Returns the current on-disk file size in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        let state = self
            .writer
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        Ok(state.file.metadata()?.len())
    }
}

impl<T: WalData> Drop for Wal<T> {
    fn drop(&mut self) {
        match self.writer.lock() {
            Ok(state) => {
                if let Err(e) = state.file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let state = poisoned.into_inner();
                if let Err(e) = state.file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop (poisoned lock)");
                } else {
                    warn!(path = %self.path.display(), "WAL recovered and synced after poisoned lock");
                }
            }
        }
    }
}

/// Splits `data` into one or more physical record fragments and writes them
/// to `state.file`, rolling to a new block whenever too little room remains
/// for another fragment header. Mirrors LevelDB's `log_writer.cc::AddRecord`.
fn write_fragments(state: &mut WriterState, data: &[u8]) -> Result<(), WalError> {
    let mut remaining = data;
    let mut begun = false;

    loop {
        let space_left = BLOCK_SIZE - state.block_offset;
        if space_left < RECORD_HEADER_SIZE {
            if space_left > 0 {
                state.file.write_all(&vec![0u8; space_left as usize])?;
            }
            state.block_offset = 0;
        }

        let avail = (BLOCK_SIZE - state.block_offset - RECORD_HEADER_SIZE) as usize;
        let fragment_len = avail.min(remaining.len());
        let is_last_fragment = fragment_len == remaining.len();

        let record_type = match (begun, is_last_fragment) {
            (false, true) => RecordType::Full,
            (false, false) => RecordType::First,
            (true, true) => RecordType::Last,
            (true, false) => RecordType::Middle,
        };

        write_physical_record(&mut state.file, record_type, &remaining[..fragment_len])?;
        state.block_offset += RECORD_HEADER_SIZE + fragment_len as u64;

        remaining = &remaining[fragment_len..];
        begun = true;

        if remaining.is_empty() {
            return Ok(());
        }
    }
}

/// Writes a single physical record: `checksum(4) + length(2) + type(1) + data`.
fn write_physical_record(file: &mut File, record_type: RecordType, data: &[u8]) -> Result<(), WalError> {
    let length = u16::try_from(data.len()).map_err(|_| WalError::RecordTooLarge(data.len()))?;
    let type_byte = record_type as u8;
    let checksum = compute_crc(&[&[type_byte], data]);

    file.write_all(&checksum.to_le_bytes())?;
    file.write_all(&length.to_le_bytes())?;
    file.write_all(&[type_byte])?;
    file.write_all(data)?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming WAL replay iterator.
///
/// `WalIter` reads physical record fragments sequentially from the WAL file,
/// reassembles `FIRST`/`MIDDLE`/`LAST` runs into logical records, and yields
/// decoded `T` values. It is designed to:
///
/// - **Stream** records without allocating the entire WAL into memory.
/// - **Own** an independent, read-only file handle, so replay never contends
///   with a concurrently-writing [`Wal`].
/// - **Detect corruption** and truncated writes using CRC32 checksums, length
///   bounds, and block-boundary checks.
pub struct WalIter<T: WalData> {
    /// Independent read-only file handle.
    file: File,

    /// Current byte offset within WAL file.
    offset: u64,

    /// Maximum allowed logical record size.
    max_record_size: usize,

    /// Marker field to associate this WAL iterator with the generic record type `T`.
    _phantom: std::marker::PhantomData<T>,
}

impl<T: WalData> std::fmt::Debug for WalIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalIter")
            .field("offset", &self.offset)
            .field("max_record_size", &self.max_record_size)
            .finish_non_exhaustive()
    }
}

/// Reads exactly `buf.len()` bytes from `file` at the current position.
///
/// Returns `Ok(true)` on a full read, `Ok(false)` if zero bytes could be
/// read (a clean EOF sitting exactly at a fragment boundary), or
/// `WalError::UnexpectedEof` if the stream ends partway through `buf`.
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<bool, WalError> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) if total == 0 => return Ok(false),
            Ok(0) => return Err(WalError::UnexpectedEof),
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WalError::Io(e)),
        }
    }
    Ok(true)
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let data_start = WalHeader::HEADER_DISK_SIZE as u64;
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let pos_in_block = (self.offset - data_start) % BLOCK_SIZE;
            let space_left = BLOCK_SIZE - pos_in_block;
            if space_left < RECORD_HEADER_SIZE {
                // Remainder of the block is zero-padding; skip to the next block.
                self.offset += space_left;
            }

            if let Err(e) = self.file.seek(SeekFrom::Start(self.offset)) {
                return Some(Err(WalError::Io(e)));
            }

            let mut header_bytes = [0u8; RECORD_HEADER_SIZE as usize];
            match read_exact_or_eof(&mut self.file, &mut header_bytes) {
                Ok(true) => {}
                Ok(false) => {
                    trace!(offset = self.offset, "WAL replay reached end of file");
                    return if buffer.is_empty() {
                        None
                    } else {
                        Some(Err(WalError::UnexpectedEof))
                    };
                }
                Err(e) => return Some(Err(e)),
            }

            let checksum = u32::from_le_bytes(header_bytes[0..4].try_into().unwrap());
            let length = u16::from_le_bytes(header_bytes[4..6].try_into().unwrap()) as u64;
            let type_byte = header_bytes[6];

            let pos_in_block = (self.offset - data_start) % BLOCK_SIZE;
            if pos_in_block + RECORD_HEADER_SIZE + length > BLOCK_SIZE {
                return Some(Err(WalError::RecordTooLarge(length as usize)));
            }
            if buffer.len() + length as usize > self.max_record_size {
                return Some(Err(WalError::RecordTooLarge(buffer.len() + length as usize)));
            }

            let record_type = match RecordType::from_u8(type_byte) {
                Some(rt) => rt,
                None => {
                    return Some(Err(WalError::Internal(format!(
                        "unknown WAL record type byte {type_byte}"
                    ))));
                }
            };

            if record_type == RecordType::Zero {
                // Explicit zero-fill sentinel; treat like padding.
                self.offset += BLOCK_SIZE - pos_in_block;
                if buffer.is_empty() {
                    continue;
                }
                return Some(Err(WalError::UnexpectedEof));
            }

            let mut fragment = vec![0u8; length as usize];
            match read_exact_or_eof(&mut self.file, &mut fragment) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(offset = self.offset, "WAL truncated record (partial fragment)");
                    return Some(Err(WalError::UnexpectedEof));
                }
                Err(e) => {
                    warn!(offset = self.offset, "WAL truncated record (partial fragment)");
                    return Some(Err(e));
                }
            }

            if let Err(e) = verify_crc(&[&[type_byte], fragment.as_slice()], checksum) {
                warn!(offset = self.offset, "WAL record checksum mismatch");
                return Some(Err(e));
            }

            self.offset += RECORD_HEADER_SIZE + length;

            let expects_continuation = !buffer.is_empty();
            match record_type {
                RecordType::Full if expects_continuation => {
                    return Some(Err(WalError::Internal(
                        "unexpected FULL fragment mid-record".into(),
                    )));
                }
                RecordType::Full => {
                    buffer = fragment;
                    break;
                }
                RecordType::First if expects_continuation => {
                    return Some(Err(WalError::Internal(
                        "unexpected FIRST fragment mid-record".into(),
                    )));
                }
                RecordType::First => buffer = fragment,
                RecordType::Middle if !expects_continuation => {
                    return Some(Err(WalError::Internal(
                        "MIDDLE fragment with no preceding FIRST".into(),
                    )));
                }
                RecordType::Middle => buffer.extend_from_slice(&fragment),
                RecordType::Last if !expects_continuation => {
                    return Some(Err(WalError::Internal(
                        "LAST fragment with no preceding FIRST".into(),
                    )));
                }
                RecordType::Last => {
                    buffer.extend_from_slice(&fragment);
                    break;
                }
                RecordType::Zero => unreachable!("handled above"),
            }
        }

        trace!(len = buffer.len(), "WAL reassembled record");

        match encoding::decode_from_slice::<T>(&buffer) {
            Ok((record, _)) => Some(Ok(record)),
            Err(e) => Some(Err(WalError::Encoding(e))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Header I/O helpers
// ------------------------------------------------------------------------------------------------

/// Writes a [`WalHeader`] followed by its CRC32 checksum, then syncs.
fn write_header<W: Write>(writer: &mut W, header: &WalHeader) -> Result<(), WalError> {
    let header_bytes = encoding::encode_to_vec(header)?;
    let checksum = compute_crc(&[&header_bytes]);

    writer.write_all(&header_bytes)?;
    writer.write_all(&checksum.to_le_bytes())?;

    // Sync if the writer is a File (trait objects won't have sync_all, but
    // our callers always follow up with their own sync when needed).
    Ok(())
}

/// Reads and validates a [`WalHeader`] from the current file position.
///
/// Checks CRC, magic, and version. Does **not** validate `wal_seq` (the
/// caller must do that, since the expected sequence depends on context).
fn read_and_validate_header<R: Read>(reader: &mut R) -> Result<WalHeader, WalError> {
    let mut header_bytes = vec![0u8; WalHeader::ENCODED_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let mut checksum_bytes = [0u8; U32_SIZE];
    reader.read_exact(&mut checksum_bytes)?;
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    verify_crc(&[&header_bytes], stored_checksum)
        .map_err(|_| WalError::InvalidHeader("header checksum mismatch".into()))?;

    let (header, _) = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;

    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {}",
            header.version
        )));
    }

    Ok(header)
}

// ------------------------------------------------------------------------------------------------
// CRC helpers
// ------------------------------------------------------------------------------------------------

/// Computes a CRC32 checksum over one or more byte slices.
fn compute_crc(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Verifies that the CRC32 over the given byte slices matches `expected`.
fn verify_crc(parts: &[&[u8]], expected: u32) -> Result<(), WalError> {
    let computed = compute_crc(parts);
    if computed != expected {
        return Err(WalError::ChecksumMismatch);
    }
    Ok(())
}
