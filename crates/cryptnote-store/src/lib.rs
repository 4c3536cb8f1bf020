//! cryptnote-store: note persistence with atomic conditional transitions
//!
//! Three backends implement [`NoteStore`]:
//!   - **Memory**: `Mutex<HashMap>`, for tests and throwaway runs.
//!   - **JSON** (default): in-memory map persisted to one file on every
//!     transition (temp + fsync + rename) before the call returns.
//!   - **RocksDB** (behind the `rocksdb` feature): one key per note, synced writes.
//!
//! Every backend applies [`NoteRecord::consume`] and [`NoteRecord::expire`]
//! while holding a per-store lock, so the read-check-write on a note is one
//! indivisible step and no two callers can both move a note out of `Active`.

pub mod json;
pub mod memory;
pub mod migrate;
#[cfg(feature = "rocksdb")]
pub mod rocks;

use chrono::{DateTime, Utc};
use cryptnote_core::config::StoreBackendKind;
use cryptnote_core::{ConsumeOutcome, NoteError, NoteId, NoteRecord, NoteStatus};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use json::JsonNoteStore;
pub use memory::MemoryNoteStore;
pub use migrate::{migrate_file, MigrationReport};
#[cfg(feature = "rocksdb")]
pub use rocks::RocksNoteStore;

/// On-disk format version written by [`JsonNoteStore`].
pub const STORE_FORMAT_VERSION: u32 = 2;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("note id already exists")]
    DuplicateId,

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store data corrupt: {0}")]
    Corrupt(String),

    #[error("store format version {found} is older than {expected}; run `cryptnote migrate`")]
    NeedsMigration { found: u32, expected: u32 },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("backend not available: {0}")]
    Unsupported(String),

    /// A note violated its own invariants during a transition.
    #[error(transparent)]
    Invariant(#[from] NoteError),

    #[cfg(feature = "rocksdb")]
    #[error("rocksdb: {0}")]
    Rocks(#[from] rocksdb::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

impl From<StoreError> for NoteError {
    fn from(e: StoreError) -> Self {
        NoteError::Internal(e.to_string())
    }
}

/// Persistence for notes.
///
/// Implementations must make `try_consume` and the per-note step of
/// `sweep_expired` atomic with respect to every other mutation of the same
/// note, and must not return until the resulting state is persisted.
pub trait NoteStore: Send + Sync {
    /// Persist a new active note and return its id.
    fn create(&self, record: NoteRecord) -> StoreResult<NoteId>;

    /// Non-mutating read.
    fn get(&self, id: &NoteId) -> StoreResult<Option<NoteRecord>>;

    /// The single disclosure transition. See [`NoteRecord::consume`].
    fn try_consume(&self, id: &NoteId, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome>;

    /// Close up to `batch_limit` active notes whose deadline is at or before
    /// `now`. Returns how many notes changed.
    fn sweep_expired(&self, now: DateTime<Utc>, batch_limit: usize) -> StoreResult<usize>;

    /// Number of stored notes, in any state.
    fn len(&self) -> StoreResult<usize>;

    /// Store-wide counts as observed at `now`. Read-only.
    fn stats(&self, now: DateTime<Utc>) -> StoreResult<NoteStats>;

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Cheap reachability probe for readiness checks.
    fn check_health(&self) -> StoreResult<()> {
        self.len().map(|_| ())
    }
}

/// Aggregate counts over every stored note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NoteStats {
    pub total: usize,
    pub active: usize,
    pub revealed: usize,
    pub expired_unread: usize,
    pub password_protected: usize,
    pub replies: usize,
    /// Sealed body bytes still held by active notes
    pub stored_body_bytes: usize,
}

impl NoteStats {
    pub fn record(&mut self, note: &NoteRecord, now: DateTime<Utc>) {
        self.total += 1;
        match note.effective_status(now) {
            NoteStatus::Active => self.active += 1,
            NoteStatus::Revealed => self.revealed += 1,
            NoteStatus::ExpiredUnread => self.expired_unread += 1,
        }
        if note.protection.requires_password() {
            self.password_protected += 1;
        }
        if note.reply_to.is_some() {
            self.replies += 1;
        }
        if let Some(body) = &note.body {
            self.stored_body_bytes += body.as_str().len();
        }
    }

    pub fn collect<'a>(notes: impl IntoIterator<Item = &'a NoteRecord>, now: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        for note in notes {
            stats.record(note, now);
        }
        stats
    }
}

/// Open the configured backend.
pub fn open_store(kind: StoreBackendKind, path: &Path) -> StoreResult<Arc<dyn NoteStore>> {
    match kind {
        StoreBackendKind::Memory => Ok(Arc::new(MemoryNoteStore::new())),
        StoreBackendKind::Json => Ok(Arc::new(JsonNoteStore::open(path)?)),
        #[cfg(feature = "rocksdb")]
        StoreBackendKind::Rocksdb => Ok(Arc::new(RocksNoteStore::open(path)?)),
        #[cfg(not(feature = "rocksdb"))]
        StoreBackendKind::Rocksdb => Err(StoreError::Unsupported(
            "rocksdb backend not compiled in (build with --features rocksdb)".into(),
        )),
    }
}

/// Whether a consume outcome changed the stored record.
pub(crate) fn outcome_mutates(outcome: &ConsumeOutcome) -> bool {
    matches!(
        outcome,
        ConsumeOutcome::ConsumedNow { .. } | ConsumeOutcome::ExpiredUnread(_)
    )
}
