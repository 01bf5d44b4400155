//! # Snapshots — pinned-LSN reads
//!
//! `spec.md` requires explicit snapshot registration: a reader records the
//! LSN in effect when the snapshot was taken, and every subsequent read
//! through that snapshot handle must observe exactly the committed state as
//! of that LSN, regardless of writes or compactions that happen afterward.
//!
//! [`SnapshotSet`] tracks every currently-live snapshot LSN, reference-counted,
//! in a `Mutex<BTreeMap<u64, usize>>` guarded the same way the rest of this
//! engine's mutable metadata is (`FrozenMemtable`, `Manifest`): interior
//! mutability behind a lock, `&self` methods. [`Snapshot`] is an RAII guard —
//! it deregisters its pin on `Drop`, so a caller can never forget to release
//! one.

use std::sync::{Arc, Mutex};

use std::collections::BTreeMap;

/// The multiset of LSNs pinned by currently-live [`Snapshot`] handles.
///
/// Keyed by LSN with a pin count per entry, since two [`Snapshot`]s taken
/// with no intervening write share an LSN and must not collapse into a
/// single registration — `release`ing one must not unpin the LSN while the
/// other is still live.
///
/// Compaction consults [`SnapshotSet::oldest`] before dropping a tombstone
/// or an older version of a key, so that a live snapshot's view is never
/// disturbed by background compaction.
#[derive(Debug, Default)]
pub struct SnapshotSet {
    live: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotSet {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a pin on `lsn`. Called once per [`Snapshot`] construction;
    /// increments the existing count if another live snapshot already
    /// pinned this LSN.
    fn register(&self, lsn: u64) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        *live.entry(lsn).or_insert(0) += 1;
    }

    /// Releases one pin on `lsn`. Called once per [`Snapshot`] drop — only
    /// removes the entry once its count reaches zero, so a sibling
    /// [`Snapshot`] pinned at the same LSN keeps it registered.
    fn release(&self, lsn: u64) {
        let mut live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = live.get_mut(&lsn) {
            *count -= 1;
            if *count == 0 {
                live.remove(&lsn);
            }
        }
    }

    /// Returns the oldest (smallest) currently-pinned LSN, or `None` if no
    /// snapshot is live. Compaction treats "no live snapshot" as "every
    /// sequence number is eligible for elimination".
    pub fn oldest(&self) -> Option<u64> {
        let live = self.live.lock().unwrap_or_else(|p| p.into_inner());
        live.keys().next().copied()
    }

    /// Number of currently-live snapshots (diagnostic / test use), counting
    /// multiple pins at the same LSN separately.
    pub fn len(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pinned read-sequence handle.
///
/// Obtained via [`Engine::snapshot`](super::Engine::snapshot). Reads made
/// through [`Engine::get_at`](super::Engine::get_at) /
/// [`Engine::scan_at`](super::Engine::scan_at) with this handle observe
/// exactly the committed state as of the LSN recorded at construction time,
/// no matter how many writes or compactions happen afterward. Dropping the
/// handle releases its pin; a `Snapshot` cannot be cloned (each handle is a
/// single pin) — take a fresh one via `Engine::snapshot()` if another
/// reader needs the same view.
pub struct Snapshot {
    lsn: u64,
    set: Arc<SnapshotSet>,
}

impl Snapshot {
    pub(crate) fn new(lsn: u64, set: Arc<SnapshotSet>) -> Self {
        set.register(lsn);
        Self { lsn, set }
    }

    /// The LSN this snapshot is pinned at.
    pub fn lsn(&self) -> u64 {
        self.lsn
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.set.release(self.lsn);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("lsn", &self.lsn).finish()
    }
}
