use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NoteError, NoteResult};

/// Random bytes behind a note id.
pub const NOTE_ID_BYTES: usize = 12;

/// Length of the hex-rendered note id.
pub const NOTE_ID_LEN: usize = NOTE_ID_BYTES * 2;

/// Unguessable capability id: 96 random bits as 24 lowercase hex characters.
///
/// Holding the id is the only authorization needed to query or reveal a note,
/// so it must never be logged in full. Use [`NoteId::fingerprint`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(String);

impl NoteId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NOTE_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Validate the id format. Accepts either hex case, normalizes to lowercase.
    pub fn parse(s: &str) -> NoteResult<Self> {
        if s.len() != NOTE_ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(NoteError::Validation(format!(
                "note id must be {NOTE_ID_LEN} hex characters"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short non-reversible tag for log lines.
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.0.as_bytes()).to_hex()[..8].to_string()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NoteId {
    type Err = NoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NoteId {
    type Error = NoteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NoteId> for String {
    fn from(id: NoteId) -> Self {
        id.0
    }
}

/// Which secret protects a note body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    /// Encrypted under a key derived from a user-supplied password
    Password,
    /// Encrypted under the server-wide key
    #[serde(rename = "server")]
    ServerKey,
    /// Stored unprotected (only produced by legacy migration)
    None,
}

impl ProtectionMode {
    pub fn requires_password(self) -> bool {
        matches!(self, ProtectionMode::Password)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtectionMode::Password => "password",
            ProtectionMode::ServerKey => "server",
            ProtectionMode::None => "none",
        }
    }
}

impl fmt::Display for ProtectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cipher a sealed body was produced with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    /// Argon2id key, XChaCha20-Poly1305 body
    #[default]
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
    /// scrypt key, AES-256-CBC body. Only carried over by migration.
    #[serde(rename = "legacy_aes_cbc")]
    LegacyAesCbc,
}

impl CipherSuite {
    pub fn is_current(&self) -> bool {
        *self == CipherSuite::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Hours,
    Days,
}

impl FromStr for DurationUnit {
    type Err = NoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hours" | "hour" | "h" => Ok(DurationUnit::Hours),
            "days" | "day" | "d" => Ok(DurationUnit::Days),
            other => Err(NoteError::Validation(format!(
                "unknown duration unit {other:?} (expected hours or days)"
            ))),
        }
    }
}

/// User-chosen lifetime of an unread note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteTtl {
    pub value: u32,
    pub unit: DurationUnit,
}

impl NoteTtl {
    pub fn hours(value: u32) -> Self {
        Self {
            value,
            unit: DurationUnit::Hours,
        }
    }

    pub fn days(value: u32) -> Self {
        Self {
            value,
            unit: DurationUnit::Days,
        }
    }

    pub fn duration(&self) -> Duration {
        match self.unit {
            DurationUnit::Hours => Duration::hours(i64::from(self.value)),
            DurationUnit::Days => Duration::days(i64::from(self.value)),
        }
    }

    /// Check the TTL is at least one unit and no longer than `max_days`.
    pub fn validate(&self, max_days: u32) -> NoteResult<Duration> {
        if self.value == 0 {
            return Err(NoteError::Validation("duration must be at least 1".into()));
        }
        let duration = self.duration();
        if duration > Duration::days(i64::from(max_days)) {
            return Err(NoteError::Validation(format!(
                "duration exceeds the maximum of {max_days} days"
            )));
        }
        Ok(duration)
    }
}

impl Default for NoteTtl {
    fn default() -> Self {
        Self::hours(24)
    }
}

/// Stored note body: ciphertext blob, or plaintext for [`ProtectionMode::None`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedBody(String);

impl SealedBody {
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SealedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedBody([REDACTED; {} bytes])", self.0.len())
    }
}

/// Persisted lifecycle state of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteStatus {
    Active,
    Revealed,
    ExpiredUnread,
}

impl NoteStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, NoteStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Revealed,
    ExpiredUnread,
}

/// What a caller learns about a spent note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalView {
    pub reason: TerminalReason,
    pub was_protection: ProtectionMode,
    pub created_at: DateTime<Utc>,
    /// Reveal instant for revealed notes, deadline for expired ones
    pub closed_at: DateTime<Utc>,
}

impl TerminalView {
    pub fn viewed(&self) -> bool {
        self.reason == TerminalReason::Revealed
    }
}

/// Result of the atomic consume transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    NotFound,
    /// The note was already terminal before this call.
    AlreadyConsumed(TerminalView),
    /// This call found the deadline passed and closed the note.
    ExpiredUnread(TerminalView),
    /// This call won the single disclosure. `body` is the content captured
    /// before it was cleared.
    ConsumedNow {
        protection: ProtectionMode,
        body: SealedBody,
    },
}

/// One secret note and its access/expiry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: NoteId,
    /// Present only while the note is active
    pub body: Option<SealedBody>,
    pub protection: ProtectionMode,
    pub created_at: DateTime<Utc>,
    /// Deadline while active; reveal instant once revealed
    pub expires_at: DateTime<Utc>,
    pub status: NoteStatus,
    /// Weak reference to the note this one answers; never dereferenced here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<NoteId>,
    #[serde(default, skip_serializing_if = "CipherSuite::is_current")]
    pub cipher: CipherSuite,
}

impl NoteRecord {
    /// Build a fresh active note with a newly generated id.
    pub fn new(
        protection: ProtectionMode,
        body: SealedBody,
        created_at: DateTime<Utc>,
        lifetime: Duration,
        reply_to: Option<NoteId>,
    ) -> Self {
        Self {
            id: NoteId::generate(),
            body: Some(body),
            protection,
            created_at,
            expires_at: created_at + lifetime,
            status: NoteStatus::Active,
            reply_to,
            cipher: CipherSuite::default(),
        }
    }

    pub fn viewed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Status as observed at `now`. An active note past its deadline reads as
    /// expired even before the transition has been persisted.
    pub fn effective_status(&self, now: DateTime<Utc>) -> NoteStatus {
        match self.status {
            NoteStatus::Active if self.expires_at <= now => NoteStatus::ExpiredUnread,
            status => status,
        }
    }

    /// Terminal metadata, or `None` while the note is still revealable.
    pub fn terminal_view(&self, now: DateTime<Utc>) -> Option<TerminalView> {
        let reason = match self.effective_status(now) {
            NoteStatus::Active => return None,
            NoteStatus::Revealed => TerminalReason::Revealed,
            NoteStatus::ExpiredUnread => TerminalReason::ExpiredUnread,
        };
        Some(TerminalView {
            reason,
            was_protection: self.protection,
            created_at: self.created_at,
            closed_at: self.expires_at,
        })
    }

    /// Close an active note whose deadline has passed. Returns whether the
    /// record changed; repeated calls are no-ops.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != NoteStatus::Active || self.expires_at > now {
            return false;
        }
        self.status = NoteStatus::ExpiredUnread;
        self.body = None;
        true
    }

    /// The single disclosure transition. Callers must hold whatever lock or
    /// transaction makes the read-check-write on this record indivisible.
    pub fn consume(&mut self, now: DateTime<Utc>) -> NoteResult<ConsumeOutcome> {
        if self.viewed() {
            let view = self
                .terminal_view(now)
                .ok_or_else(|| NoteError::Internal("terminal note has no terminal view".into()))?;
            return Ok(ConsumeOutcome::AlreadyConsumed(view));
        }
        if self.expire(now) {
            let view = self
                .terminal_view(now)
                .ok_or_else(|| NoteError::Internal("expired note has no terminal view".into()))?;
            return Ok(ConsumeOutcome::ExpiredUnread(view));
        }

        let body = self.body.take().ok_or_else(|| {
            NoteError::Internal(format!(
                "active note {} has no body",
                self.id.fingerprint()
            ))
        })?;
        self.status = NoteStatus::Revealed;
        self.expires_at = now;
        Ok(ConsumeOutcome::ConsumedNow {
            protection: self.protection,
            body,
        })
    }
}
