//! In-process note store.

use chrono::{DateTime, Utc};
use cryptnote_core::{ConsumeOutcome, NoteId, NoteRecord};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{NoteStats, NoteStore, StoreError, StoreResult};

/// Thread-safe note store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryNoteStore {
    notes: Mutex<HashMap<NoteId, NoteRecord>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<NoteId, NoteRecord>>> {
        self.notes.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl NoteStore for MemoryNoteStore {
    fn create(&self, record: NoteRecord) -> StoreResult<NoteId> {
        let mut notes = self.lock()?;
        if notes.contains_key(&record.id) {
            return Err(StoreError::DuplicateId);
        }
        let id = record.id.clone();
        notes.insert(id.clone(), record);
        Ok(id)
    }

    fn get(&self, id: &NoteId) -> StoreResult<Option<NoteRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn try_consume(&self, id: &NoteId, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        let mut notes = self.lock()?;
        match notes.get_mut(id) {
            None => Ok(ConsumeOutcome::NotFound),
            Some(record) => Ok(record.consume(now)?),
        }
    }

    fn sweep_expired(&self, now: DateTime<Utc>, batch_limit: usize) -> StoreResult<usize> {
        let mut notes = self.lock()?;
        let mut expired = 0;
        for record in notes.values_mut() {
            if expired >= batch_limit {
                break;
            }
            if record.expire(now) {
                expired += 1;
            }
        }
        Ok(expired)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    fn stats(&self, now: DateTime<Utc>) -> StoreResult<NoteStats> {
        Ok(NoteStats::collect(self.lock()?.values(), now))
    }
}
