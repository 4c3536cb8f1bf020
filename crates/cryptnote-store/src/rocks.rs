//! RocksDB-backed note store (feature `rocksdb`).
//!
//! One key per note (`note/<id>`), JSON values. A process-wide mutex
//! serializes every read-check-write, and all writes are synced to the WAL
//! before returning.

use chrono::{DateTime, Utc};
use cryptnote_core::{ConsumeOutcome, NoteId, NoteRecord};
use rocksdb::{IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{outcome_mutates, NoteStats, NoteStore, StoreError, StoreResult, STORE_FORMAT_VERSION};

const NOTE_PREFIX: &[u8] = b"note/";
const VERSION_KEY: &[u8] = b"meta/format_version";

pub struct RocksNoteStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksNoteStore {
    /// Open or create a database directory at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;

        match db.get(VERSION_KEY)? {
            None => db.put_opt(
                VERSION_KEY,
                STORE_FORMAT_VERSION.to_string().as_bytes(),
                &synced(),
            )?,
            Some(raw) => {
                let found: u32 = std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| StoreError::Corrupt("unreadable format version".into()))?;
                if found != STORE_FORMAT_VERSION {
                    return Err(StoreError::Corrupt(format!(
                        "rocksdb store format version {found}, expected {STORE_FORMAT_VERSION}"
                    )));
                }
            }
        }

        debug!(path = %path.display(), "opened rocksdb note store");
        Ok(RocksNoteStore {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load(&self, id: &NoteId) -> StoreResult<Option<NoteRecord>> {
        match self.db.get(note_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn for_each_note(&self, mut f: impl FnMut(NoteRecord) -> bool) -> StoreResult<()> {
        let iter = self
            .db
            .iterator(IteratorMode::From(NOTE_PREFIX, rocksdb::Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(NOTE_PREFIX) {
                break;
            }
            if !f(serde_json::from_slice(&value)?) {
                break;
            }
        }
        Ok(())
    }
}

fn note_key(id: &NoteId) -> Vec<u8> {
    let mut key = NOTE_PREFIX.to_vec();
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

fn synced() -> WriteOptions {
    let mut opts = WriteOptions::default();
    opts.set_sync(true);
    opts
}

impl NoteStore for RocksNoteStore {
    fn create(&self, record: NoteRecord) -> StoreResult<NoteId> {
        let _guard = self.lock()?;
        let key = note_key(&record.id);
        if self.db.get(&key)?.is_some() {
            return Err(StoreError::DuplicateId);
        }
        self.db.put_opt(&key, serde_json::to_vec(&record)?, &synced())?;
        Ok(record.id)
    }

    fn get(&self, id: &NoteId) -> StoreResult<Option<NoteRecord>> {
        self.load(id)
    }

    fn try_consume(&self, id: &NoteId, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        let _guard = self.lock()?;
        let Some(mut record) = self.load(id)? else {
            return Ok(ConsumeOutcome::NotFound);
        };
        let outcome = record.consume(now)?;
        if outcome_mutates(&outcome) {
            self.db
                .put_opt(note_key(id), serde_json::to_vec(&record)?, &synced())?;
        }
        Ok(outcome)
    }

    fn sweep_expired(&self, now: DateTime<Utc>, batch_limit: usize) -> StoreResult<usize> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        let mut expired = 0;
        let mut encode_err = None;

        self.for_each_note(|mut record| {
            if expired >= batch_limit {
                return false;
            }
            if record.expire(now) {
                match serde_json::to_vec(&record) {
                    Ok(value) => {
                        batch.put(note_key(&record.id), value);
                        expired += 1;
                    }
                    Err(e) => {
                        encode_err = Some(e);
                        return false;
                    }
                }
            }
            true
        })?;

        if let Some(e) = encode_err {
            return Err(e.into());
        }
        if expired > 0 {
            self.db.write_opt(batch, &synced())?;
        }
        Ok(expired)
    }

    fn len(&self) -> StoreResult<usize> {
        let mut count = 0;
        self.for_each_note(|_| {
            count += 1;
            true
        })?;
        Ok(count)
    }

    fn stats(&self, now: DateTime<Utc>) -> StoreResult<NoteStats> {
        let mut stats = NoteStats::default();
        self.for_each_note(|record| {
            stats.record(&record, now);
            true
        })?;
        Ok(stats)
    }

    fn check_health(&self) -> StoreResult<()> {
        self.db.get(VERSION_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use cryptnote_core::{NoteStatus, ProtectionMode, SealedBody};

    fn note(now: DateTime<Utc>) -> NoteRecord {
        NoteRecord::new(
            ProtectionMode::ServerKey,
            SealedBody::new("aa:bb"),
            now,
            Duration::hours(1),
            None,
        )
    }

    #[test]
    fn test_rocksdb_consume_persists() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let id = {
            let store = RocksNoteStore::open(dir.path()).unwrap();
            let id = store.create(note(now)).unwrap();
            assert!(matches!(
                store.try_consume(&id, now).unwrap(),
                ConsumeOutcome::ConsumedNow { .. }
            ));
            id
        };

        let store = RocksNoteStore::open(dir.path()).unwrap();
        let record = store.get(&id).unwrap().unwrap();
        assert_eq!(record.status, NoteStatus::Revealed);
        assert!(matches!(
            store.try_consume(&id, now).unwrap(),
            ConsumeOutcome::AlreadyConsumed(_)
        ));
    }

    #[test]
    fn test_rocksdb_sweep_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksNoteStore::open(dir.path()).unwrap();
        let now = Utc::now();
        for _ in 0..4 {
            store.create(note(now)).unwrap();
        }
        let later = now + Duration::hours(2);
        assert_eq!(store.sweep_expired(later, 3).unwrap(), 3);
        assert_eq!(store.sweep_expired(later, 3).unwrap(), 1);
        assert_eq!(store.len().unwrap(), 4);
        assert_eq!(store.stats(later).unwrap().expired_unread, 4);
    }
}
