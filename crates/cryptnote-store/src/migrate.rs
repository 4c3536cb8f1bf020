//! Upgrade of unversioned (v1) JSON stores.
//!
//! A v1 file is a bare map from id to a legacy record that marked encryption
//! with a boolean and never recorded server-key protection explicitly. The
//! upgrade backfills `protection` once, offline, so runtime code can rely on
//! the stored mode and never guess from ciphertext shape. Sealed bodies keep
//! their old AES-256-CBC encoding and are tagged [`CipherSuite::LegacyAesCbc`]
//! so reveal opens them with the matching cipher.

use chrono::{DateTime, Duration, Utc};
use cryptnote_core::{CipherSuite, NoteId, NoteRecord, NoteStatus, ProtectionMode, SealedBody};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::json::{probe_version, write_store_file};
use crate::{StoreError, StoreResult, STORE_FORMAT_VERSION};

/// Lifetime assumed for legacy records without a deadline.
const LEGACY_DEFAULT_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyNote {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encrypted: bool,
    #[serde(default)]
    viewed: bool,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reply_to: Option<String>,
    #[serde(default)]
    protection: Option<ProtectionMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// File was already at the current version; nothing was written
    pub already_current: bool,
    pub migrated: usize,
    /// Records dropped because their id was not a valid note id
    pub skipped: usize,
    /// Legacy records closed as revealed (body discarded)
    pub revealed: usize,
    /// Legacy records closed as expired (body discarded)
    pub expired: usize,
    pub backup: Option<PathBuf>,
}

/// Backup location written before the store file is replaced.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".v1.bak");
    PathBuf::from(name)
}

/// Upgrade the store at `path` to the current format in place.
///
/// A missing file or one already at version 2 is left untouched. Running the
/// migration twice is a no-op the second time.
pub fn migrate_file(path: &Path, now: DateTime<Utc>) -> StoreResult<MigrationReport> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(MigrationReport {
                already_current: true,
                ..Default::default()
            })
        }
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(MigrationReport {
            already_current: true,
            ..Default::default()
        });
    }

    let value: serde_json::Value = serde_json::from_str(&content)?;
    match probe_version(&value)? {
        Some(STORE_FORMAT_VERSION) => {
            return Ok(MigrationReport {
                already_current: true,
                ..Default::default()
            })
        }
        Some(v) => {
            return Err(StoreError::Corrupt(format!(
                "cannot migrate store format version {v}"
            )))
        }
        None => {}
    }

    let legacy: HashMap<String, LegacyNote> = serde_json::from_value(value)?;
    let mut report = MigrationReport::default();
    let mut notes = BTreeMap::new();

    for (raw_id, old) in legacy {
        let id = match NoteId::parse(&raw_id) {
            Ok(id) => id,
            Err(_) => {
                warn!(len = raw_id.len(), "skipping legacy note with invalid id");
                report.skipped += 1;
                continue;
            }
        };
        let record = upgrade(id, old, now);
        match record.status {
            NoteStatus::Revealed => report.revealed += 1,
            NoteStatus::ExpiredUnread => report.expired += 1,
            NoteStatus::Active => {}
        }
        report.migrated += 1;
        notes.insert(record.id.clone(), record);
    }

    let backup = backup_path(path);
    fs::copy(path, &backup)?;
    write_store_file(path, &notes).map_err(|failure| failure.error)?;
    report.backup = Some(backup);

    info!(
        path = %path.display(),
        migrated = report.migrated,
        skipped = report.skipped,
        revealed = report.revealed,
        expired = report.expired,
        "migrated legacy note store"
    );
    Ok(report)
}

fn upgrade(id: NoteId, old: LegacyNote, now: DateTime<Utc>) -> NoteRecord {
    let content = old.content.filter(|c| !c.is_empty());
    let protection = infer_protection(old.protection, old.encrypted, content.as_deref());
    let created_at = old.created_at.unwrap_or(now);
    let expires_at = old
        .expires_at
        .unwrap_or(created_at + Duration::hours(LEGACY_DEFAULT_LIFETIME_HOURS));
    let reply_to = old.reply_to.and_then(|r| NoteId::parse(&r).ok());

    let (status, body) = match (old.viewed, content) {
        // Legacy reveals sometimes failed to clear the body; drop it now.
        (true, _) => (NoteStatus::Revealed, None),
        (false, None) => (NoteStatus::ExpiredUnread, None),
        (false, Some(c)) => (NoteStatus::Active, Some(SealedBody::new(c))),
    };
    let cipher = match (&body, protection) {
        (Some(_), ProtectionMode::Password | ProtectionMode::ServerKey) => {
            CipherSuite::LegacyAesCbc
        }
        _ => CipherSuite::default(),
    };

    NoteRecord {
        id,
        body,
        protection,
        created_at,
        expires_at,
        status,
        reply_to,
        cipher,
    }
}

/// Decide the protection mode of a legacy record.
///
/// An explicit field wins, then the legacy `encrypted` flag (password), then
/// the `iv:ciphertext` layout the old server-key cipher produced.
pub fn infer_protection(
    explicit: Option<ProtectionMode>,
    encrypted: bool,
    content: Option<&str>,
) -> ProtectionMode {
    if let Some(mode) = explicit {
        return mode;
    }
    if encrypted {
        return ProtectionMode::Password;
    }
    match content {
        Some(c) if looks_server_sealed(c) => ProtectionMode::ServerKey,
        _ => ProtectionMode::None,
    }
}

fn looks_server_sealed(content: &str) -> bool {
    let Some((iv, data)) = content.split_once(':') else {
        return false;
    };
    iv.len() == 32
        && iv.bytes().all(|b| b.is_ascii_hexdigit())
        && !data.is_empty()
        && data.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonNoteStore, NoteStore};

    const ACTIVE_ID: &str = "00112233445566778899aabb";
    const VIEWED_ID: &str = "aabbccddeeff001122334455";
    const SERVER_ID: &str = "5566778899aabbccddeeff00";

    fn legacy_file() -> String {
        format!(
            r#"{{
  "{ACTIVE_ID}": {{
    "content": "hello",
    "encrypted": false,
    "viewed": false,
    "createdAt": "2025-01-01T00:00:00Z",
    "expiresAt": "2025-01-02T00:00:00Z",
    "replyTo": "{VIEWED_ID}"
  }},
  "{VIEWED_ID}": {{
    "content": "still-here-after-view",
    "encrypted": true,
    "viewed": true,
    "createdAt": "2025-01-01T00:00:00Z",
    "expiresAt": "2025-01-01T03:00:00Z"
  }},
  "{SERVER_ID}": {{
    "content": "0123456789abcdef0123456789abcdef:deadbeef",
    "encrypted": false,
    "viewed": false,
    "createdAt": "2025-01-01T00:00:00Z"
  }},
  "not-an-id": {{ "content": "x" }}
}}"#
        )
    }

    #[test]
    fn test_infer_protection_order() {
        let sealed = "0123456789abcdef0123456789abcdef:00ff";
        assert_eq!(
            infer_protection(Some(ProtectionMode::None), true, Some(sealed)),
            ProtectionMode::None
        );
        assert_eq!(infer_protection(None, true, Some("x")), ProtectionMode::Password);
        assert_eq!(infer_protection(None, false, Some(sealed)), ProtectionMode::ServerKey);
        assert_eq!(infer_protection(None, false, Some("hi: there")), ProtectionMode::None);
        assert_eq!(infer_protection(None, false, Some("abcd:00ff")), ProtectionMode::None);
        assert_eq!(infer_protection(None, false, None), ProtectionMode::None);
    }

    #[test]
    fn test_migrate_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, legacy_file()).unwrap();
        let now: DateTime<Utc> = "2025-01-01T12:00:00Z".parse().unwrap();

        let report = migrate_file(&path, now).unwrap();
        assert!(!report.already_current);
        assert_eq!(report.migrated, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.revealed, 1);
        assert_eq!(report.backup, Some(backup_path(&path)));
        assert!(backup_path(&path).exists());

        let store = JsonNoteStore::open(&path).unwrap();
        assert_eq!(store.len().unwrap(), 3);

        let active = store.get(&NoteId::parse(ACTIVE_ID).unwrap()).unwrap().unwrap();
        assert_eq!(active.status, NoteStatus::Active);
        assert_eq!(active.protection, ProtectionMode::None);
        assert_eq!(active.reply_to, Some(NoteId::parse(VIEWED_ID).unwrap()));
        assert_eq!(active.cipher, CipherSuite::XChaCha20Poly1305);

        let viewed = store.get(&NoteId::parse(VIEWED_ID).unwrap()).unwrap().unwrap();
        assert_eq!(viewed.status, NoteStatus::Revealed);
        assert_eq!(viewed.protection, ProtectionMode::Password);
        assert!(viewed.body.is_none());

        let server = store.get(&NoteId::parse(SERVER_ID).unwrap()).unwrap().unwrap();
        assert_eq!(server.protection, ProtectionMode::ServerKey);
        assert_eq!(server.expires_at, server.created_at + Duration::hours(24));
        assert_eq!(server.cipher, CipherSuite::LegacyAesCbc);
        assert_eq!(
            server.body.as_ref().map(|b| b.as_str()),
            Some("0123456789abcdef0123456789abcdef:deadbeef")
        );
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, legacy_file()).unwrap();
        let now = Utc::now();

        migrate_file(&path, now).unwrap();
        let first = fs::read_to_string(&path).unwrap();

        let again = migrate_file(&path, now).unwrap();
        assert!(again.already_current);
        assert_eq!(again.migrated, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn test_migrate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = migrate_file(&dir.path().join("absent.json"), Utc::now()).unwrap();
        assert!(report.already_current);
        assert!(report.backup.is_none());
    }
}
