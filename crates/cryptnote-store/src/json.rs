//! Single-file JSON note store.
//!
//! The whole store lives in memory behind one mutex. Every mutation writes the
//! full file (temp file, fsync, rename) before it returns. A write that fails
//! before the rename undoes the in-memory change. Once the rename has
//! happened the new file may be what a restart reads, so the change is kept
//! and the error is still reported.

use chrono::{DateTime, Utc};
use cryptnote_core::{ConsumeOutcome, NoteId, NoteRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{outcome_mutates, NoteStats, NoteStore, StoreError, StoreResult, STORE_FORMAT_VERSION};

type NoteMap = BTreeMap<NoteId, NoteRecord>;

/// On-disk layout, version 2. The version itself is checked before this is
/// decoded.
#[derive(Debug, Deserialize)]
pub(crate) struct StoreFile {
    pub notes: NoteMap,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    notes: &'a NoteMap,
}

/// A failed store write. `committed` is set once the new file has replaced
/// the old one, i.e. only the directory sync failed.
#[derive(Debug)]
pub(crate) struct WriteFailure {
    pub committed: bool,
    pub error: StoreError,
}

type DirSync = fn(&Path) -> std::io::Result<()>;

pub struct JsonNoteStore {
    path: PathBuf,
    notes: Mutex<NoteMap>,
    sync_dir: DirSync,
}

impl JsonNoteStore {
    /// Load the store at `path`, or start empty if the file does not exist.
    ///
    /// A legacy (unversioned) file is refused with
    /// [`StoreError::NeedsMigration`]; see [`crate::migrate_file`].
    pub fn open(path: &Path) -> StoreResult<Self> {
        let notes = match read_store_file(path)? {
            Some(file) => file.notes,
            None => NoteMap::new(),
        };
        debug!(path = %path.display(), notes = notes.len(), "opened json note store");

        Ok(JsonNoteStore {
            path: path.to_path_buf(),
            notes: Mutex::new(notes),
            sync_dir: sync_parent_dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, NoteMap>> {
        self.notes.lock().map_err(|_| StoreError::Poisoned)
    }

    #[cfg(test)]
    fn with_dir_sync(mut self, sync_dir: DirSync) -> Self {
        self.sync_dir = sync_dir;
        self
    }

    fn persist(&self, notes: &NoteMap) -> Result<(), WriteFailure> {
        write_store_file_with(&self.path, notes, self.sync_dir)
    }
}

impl NoteStore for JsonNoteStore {
    fn create(&self, record: NoteRecord) -> StoreResult<NoteId> {
        let mut notes = self.lock()?;
        if notes.contains_key(&record.id) {
            return Err(StoreError::DuplicateId);
        }
        let id = record.id.clone();
        notes.insert(id.clone(), record);
        if let Err(failure) = self.persist(&notes) {
            if failure.committed {
                warn!(note = %id.fingerprint(), error = %failure.error, "note written but directory sync failed");
            } else {
                notes.remove(&id);
            }
            return Err(failure.error);
        }
        Ok(id)
    }

    fn get(&self, id: &NoteId) -> StoreResult<Option<NoteRecord>> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn try_consume(&self, id: &NoteId, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        let mut notes = self.lock()?;
        let Some(record) = notes.get_mut(id) else {
            return Ok(ConsumeOutcome::NotFound);
        };

        let before = record.clone();
        let outcome = record.consume(now)?;
        if outcome_mutates(&outcome) {
            if let Err(failure) = self.persist(&notes) {
                if failure.committed {
                    // The file on disk already shows the transition; keep it.
                    warn!(note = %id.fingerprint(), error = %failure.error, "consume written but directory sync failed");
                } else {
                    warn!(note = %id.fingerprint(), error = %failure.error, "persist failed, rolling back consume");
                    notes.insert(id.clone(), before);
                }
                return Err(failure.error);
            }
        }
        Ok(outcome)
    }

    fn sweep_expired(&self, now: DateTime<Utc>, batch_limit: usize) -> StoreResult<usize> {
        let mut notes = self.lock()?;
        let mut changed: Vec<NoteRecord> = Vec::new();
        for record in notes.values_mut() {
            if changed.len() >= batch_limit {
                break;
            }
            let before = record.clone();
            if record.expire(now) {
                changed.push(before);
            }
        }

        if changed.is_empty() {
            return Ok(0);
        }
        if let Err(failure) = self.persist(&notes) {
            if failure.committed {
                warn!(expired = changed.len(), error = %failure.error, "sweep written but directory sync failed");
            } else {
                for before in changed {
                    notes.insert(before.id.clone(), before);
                }
            }
            return Err(failure.error);
        }
        Ok(changed.len())
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.lock()?.len())
    }

    fn stats(&self, now: DateTime<Utc>) -> StoreResult<NoteStats> {
        Ok(NoteStats::collect(self.lock()?.values(), now))
    }

    fn check_health(&self) -> StoreResult<()> {
        let _guard = self.lock()?;
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => Err(StoreError::Io(
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("store directory missing: {}", dir.display()),
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// Version declared by a store file, or `None` for a legacy bare map.
pub(crate) fn probe_version(value: &serde_json::Value) -> StoreResult<Option<u32>> {
    let obj = value
        .as_object()
        .ok_or_else(|| StoreError::Corrupt("store root is not a JSON object".into()))?;
    match obj.get("version") {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid store version: {v}"))),
    }
}

/// Read and validate a version-2 store file. `Ok(None)` when absent or empty.
pub(crate) fn read_store_file(path: &Path) -> StoreResult<Option<StoreFile>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(&content)?;
    match probe_version(&value)? {
        None => Err(StoreError::NeedsMigration {
            found: 1,
            expected: STORE_FORMAT_VERSION,
        }),
        Some(v) if v < STORE_FORMAT_VERSION => Err(StoreError::NeedsMigration {
            found: v,
            expected: STORE_FORMAT_VERSION,
        }),
        Some(v) if v > STORE_FORMAT_VERSION => Err(StoreError::Corrupt(format!(
            "store format version {v} is newer than supported {STORE_FORMAT_VERSION}"
        ))),
        Some(_) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Atomically replace `path` with a version-2 file holding `notes`.
pub(crate) fn write_store_file(path: &Path, notes: &NoteMap) -> Result<(), WriteFailure> {
    write_store_file_with(path, notes, sync_parent_dir)
}

fn write_store_file_with(
    path: &Path,
    notes: &NoteMap,
    sync_dir: DirSync,
) -> Result<(), WriteFailure> {
    let uncommitted = |error: StoreError| WriteFailure {
        committed: false,
        error,
    };

    let tmp_path = stage_store_file(path, notes).map_err(uncommitted)?;
    fs::rename(&tmp_path, path).map_err(|e| uncommitted(e.into()))?;
    sync_dir(path).map_err(|e| WriteFailure {
        committed: true,
        error: e.into(),
    })
}

/// Write `notes` to a synced temp file next to `path` and return its path.
fn stage_store_file(path: &Path, notes: &NoteMap) -> StoreResult<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(&StoreFileRef {
        version: STORE_FORMAT_VERSION,
        notes,
    })?;

    let tmp_path = path.with_extension("tmp");
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(&json)?;
    tmp.sync_all()?;
    Ok(tmp_path)
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
