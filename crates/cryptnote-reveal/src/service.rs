//! Create, metadata and reveal over a [`NoteStore`].
//!
//! Reveal pre-checks the credential before touching note state: the key is
//! derived and the stored blob authenticated first, so a wrong password is
//! rejected without spending the single read. Only then is the atomic
//! `try_consume` issued. Once issued it always runs to completion on the
//! blocking pool, even if the caller stops waiting.

use chrono::{DateTime, Utc};
use cryptnote_core::config::{CryptnoteConfig, NotesConfig};
use cryptnote_core::{
    CipherSuite, Clock, ConsumeOutcome, NoteError, NoteId, NoteRecord, NoteResult, NoteTtl, ProtectionMode,
    SealedBody, TerminalView,
};
use cryptnote_crypto::{open, open_legacy, seal, CryptoError, CryptoProvider, NoteKey, NoteSecret};
use cryptnote_store::{NoteStats, NoteStore, StoreError};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::metrics::NoteMetrics;

/// Input to [`NoteService::create_note`].
#[derive(Debug)]
pub struct NewNote {
    pub text: SecretString,
    /// Non-empty selects password protection; otherwise the server key is used
    pub password: Option<SecretString>,
    /// Falls back to `notes.default_ttl`
    pub ttl: Option<NoteTtl>,
    pub reply_to: Option<String>,
}

/// Non-destructive view of a note.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NoteMetadata {
    Active {
        protection: ProtectionMode,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Terminal {
        #[serde(flatten)]
        view: TerminalView,
        viewed: bool,
    },
}

impl NoteMetadata {
    fn terminal(view: TerminalView) -> Self {
        NoteMetadata::Terminal {
            viewed: view.viewed(),
            view,
        }
    }
}

#[derive(Debug)]
pub enum RevealOutcome {
    /// This call performed the one permitted disclosure.
    Revealed {
        protection: ProtectionMode,
        content: SecretString,
    },
    /// The note was already revealed or has expired.
    Gone(TerminalView),
}

/// Tunables taken from configuration.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub kdf_workers: usize,
    pub kdf_timeout: Duration,
    pub notes: NotesConfig,
}

impl ServiceOptions {
    pub fn from_config(config: &CryptnoteConfig) -> Self {
        let kdf_workers = match config.crypto.kdf_workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        };
        Self {
            kdf_workers,
            kdf_timeout: Duration::from_millis(config.crypto.kdf_timeout_ms),
            notes: config.notes.clone(),
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&CryptnoteConfig::default())
    }
}

/// A credential that authenticated the stored body before consumption.
struct Prechecked {
    cipher: CipherSuite,
    key: NoteKey,
    body: SealedBody,
    plaintext: String,
}

pub struct NoteService {
    store: Arc<dyn NoteStore>,
    crypto: Arc<CryptoProvider>,
    clock: Arc<dyn Clock>,
    kdf_permits: Arc<Semaphore>,
    kdf_timeout: Duration,
    limits: NotesConfig,
    metrics: NoteMetrics,
}

impl NoteService {
    pub fn new(
        store: Arc<dyn NoteStore>,
        crypto: Arc<CryptoProvider>,
        clock: Arc<dyn Clock>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            store,
            crypto,
            clock,
            kdf_permits: Arc::new(Semaphore::new(options.kdf_workers.max(1))),
            kdf_timeout: options.kdf_timeout,
            limits: options.notes,
            metrics: NoteMetrics::default(),
        }
    }

    /// Report into an externally registered set of counters.
    pub fn with_metrics(mut self, metrics: NoteMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &NoteMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Encrypt and persist a new note, returning its capability id.
    pub async fn create_note(&self, note: NewNote) -> NoteResult<NoteId> {
        let len = note.text.expose_secret().len();
        if len == 0 {
            return Err(NoteError::Validation("note text is empty".into()));
        }
        if len > self.limits.max_note_bytes {
            return Err(NoteError::Validation(format!(
                "note text exceeds {} bytes",
                self.limits.max_note_bytes
            )));
        }
        let lifetime = note
            .ttl
            .unwrap_or(self.limits.default_ttl)
            .validate(self.limits.max_ttl_days)?;
        let reply_to = note.reply_to.as_deref().map(NoteId::parse).transpose()?;

        let secret = NoteSecret::from_password(note.password);
        let protection = match secret {
            NoteSecret::Password(_) => ProtectionMode::Password,
            NoteSecret::Server => ProtectionMode::ServerKey,
        };
        let key = self.derive_key(secret, CipherSuite::default()).await?;
        let sealed = seal(&key, note.text.expose_secret())
            .map_err(|e| NoteError::Internal(format!("sealing note: {e}")))?;

        let record = NoteRecord::new(
            protection,
            SealedBody::new(sealed),
            self.clock.now(),
            lifetime,
            reply_to,
        );
        let expires_at = record.expires_at;
        let id = self.blocking(move |store| store.create(record)).await?;

        self.metrics.created(protection.as_str());
        info!(note = %id.fingerprint(), %protection, %expires_at, "note created");
        Ok(id)
    }

    /// Look up a note without changing it. Malformed ids read as not found.
    pub async fn get_metadata(&self, raw_id: &str) -> NoteResult<NoteMetadata> {
        let id = NoteId::parse(raw_id).map_err(|_| NoteError::NotFound)?;
        let record = self.read(&id).await?.ok_or(NoteError::NotFound)?;

        let now = self.clock.now();
        Ok(match record.terminal_view(now) {
            Some(view) => NoteMetadata::terminal(view),
            None => NoteMetadata::Active {
                protection: record.protection,
                created_at: record.created_at,
                expires_at: record.expires_at,
            },
        })
    }

    /// Attempt the one permitted disclosure of a note.
    pub async fn reveal(
        &self,
        raw_id: &str,
        password: Option<SecretString>,
    ) -> NoteResult<RevealOutcome> {
        let result = self.reveal_inner(raw_id, password).await;
        let label = match &result {
            Ok(RevealOutcome::Revealed { .. }) => "revealed",
            Ok(RevealOutcome::Gone(_)) => "gone",
            Err(NoteError::NotFound) => "not_found",
            Err(NoteError::InvalidCredential) => "invalid_credential",
            Err(NoteError::Validation(_)) => "invalid_request",
            Err(NoteError::Internal(_)) => "error",
        };
        self.metrics.reveal(label);
        result
    }

    async fn reveal_inner(
        &self,
        raw_id: &str,
        password: Option<SecretString>,
    ) -> NoteResult<RevealOutcome> {
        let id = NoteId::parse(raw_id).map_err(|_| NoteError::NotFound)?;
        let record = self.read(&id).await?.ok_or(NoteError::NotFound)?;
        if record.viewed() {
            return terminal(&record, self.clock.now());
        }

        let secret = NoteSecret::from_password(password);
        let prechecked = if record.effective_status(self.clock.now()).is_terminal() {
            // Overdue: let try_consume persist the expiry, no credential needed.
            None
        } else {
            self.precheck(&record, secret).await?
        };

        let now = self.clock.now();
        let consumed_id = id.clone();
        let outcome = self
            .blocking(move |store| store.try_consume(&consumed_id, now))
            .await?;

        match outcome {
            ConsumeOutcome::NotFound => Err(NoteError::NotFound),
            ConsumeOutcome::AlreadyConsumed(view) => {
                debug!(note = %id.fingerprint(), "reveal lost to an earlier transition");
                Ok(RevealOutcome::Gone(view))
            }
            ConsumeOutcome::ExpiredUnread(view) => {
                info!(note = %id.fingerprint(), "note expired unread on reveal");
                Ok(RevealOutcome::Gone(view))
            }
            ConsumeOutcome::ConsumedNow { protection, body } => {
                let content = self.open_consumed(&id, protection, body, prechecked)?;
                info!(note = %id.fingerprint(), %protection, "note revealed");
                Ok(RevealOutcome::Revealed {
                    protection,
                    content: SecretString::from(content),
                })
            }
        }
    }

    /// Authenticate the credential against the active body. `Ok(None)` for
    /// unprotected notes.
    async fn precheck(
        &self,
        record: &NoteRecord,
        secret: NoteSecret,
    ) -> NoteResult<Option<Prechecked>> {
        let secret = match (record.protection, secret) {
            (ProtectionMode::None, _) => return Ok(None),
            (ProtectionMode::Password, NoteSecret::Server) => {
                return Err(NoteError::InvalidCredential)
            }
            (ProtectionMode::Password, pw) => pw,
            (ProtectionMode::ServerKey, _) => NoteSecret::Server,
        };
        let body = record
            .body
            .clone()
            .ok_or_else(|| NoteError::Internal("active note has no body".into()))?;

        let key = self.derive_key(secret, record.cipher).await?;
        match open_body(record.cipher, &key, &body) {
            Ok(plaintext) => Ok(Some(Prechecked {
                cipher: record.cipher,
                key,
                body,
                plaintext,
            })),
            Err(_) => {
                debug!(note = %record.id.fingerprint(), "credential rejected before consume");
                Err(NoteError::InvalidCredential)
            }
        }
    }

    /// Produce the plaintext of a body this call just consumed. The
    /// consumption stands even if this fails.
    fn open_consumed(
        &self,
        id: &NoteId,
        protection: ProtectionMode,
        body: SealedBody,
        prechecked: Option<Prechecked>,
    ) -> NoteResult<String> {
        if protection == ProtectionMode::None {
            return Ok(body.into_inner());
        }
        let Some(pre) = prechecked else {
            warn!(note = %id.fingerprint(), "consumed a protected note without a checked credential");
            return Err(NoteError::InvalidCredential);
        };
        if pre.body == body {
            return Ok(pre.plaintext);
        }
        open_body(pre.cipher, &pre.key, &body).map_err(|_| {
            warn!(note = %id.fingerprint(), "consumed body failed to decrypt; note is spent");
            NoteError::InvalidCredential
        })
    }

    /// Store-wide counts at the current instant.
    pub async fn stats(&self) -> NoteResult<NoteStats> {
        let now = self.clock.now();
        self.blocking(move |store| store.stats(now)).await
    }

    /// Close up to `batch_limit` overdue notes. Returns how many changed.
    pub async fn sweep_expired(&self, batch_limit: usize) -> NoteResult<usize> {
        let now = self.clock.now();
        self.blocking(move |store| store.sweep_expired(now, batch_limit))
            .await
    }

    /// Non-mutating read, retried on internal store failures.
    async fn read(&self, id: &NoteId) -> NoteResult<Option<NoteRecord>> {
        let mut attempt = 0;
        loop {
            let lookup = id.clone();
            match self.blocking(move |store| store.get(&lookup)).await {
                Err(e) if e.is_retryable() && attempt < self.limits.read_retries => {
                    attempt += 1;
                    warn!(note = %id.fingerprint(), attempt, error = %e, "note read failed, retrying");
                    tokio::time::sleep(Duration::from_millis(25 * u64::from(attempt))).await;
                }
                other => return other,
            }
        }
    }

    /// Run a store call on the blocking pool. Dropping the returned future
    /// does not cancel the call.
    async fn blocking<T, F>(&self, f: F) -> NoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn NoteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| NoteError::Internal(format!("store task failed: {e}")))?
            .map_err(|e| {
                warn!(error = %e, "note store error");
                NoteError::from(e)
            })
    }

    /// Resolve the key for `secret` under `cipher`. Everything but the
    /// cached server key is derived on the blocking pool, gated by the worker
    /// semaphore and the request timeout.
    async fn derive_key(&self, secret: NoteSecret, cipher: CipherSuite) -> NoteResult<NoteKey> {
        if let (NoteSecret::Server, CipherSuite::XChaCha20Poly1305) = (&secret, cipher) {
            return self
                .crypto
                .key_for(&secret)
                .map_err(|e| NoteError::Internal(e.to_string()));
        }

        let crypto = Arc::clone(&self.crypto);
        let permits = Arc::clone(&self.kdf_permits);
        let work = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| NoteError::Internal("key derivation pool closed".into()))?;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                match cipher {
                    CipherSuite::XChaCha20Poly1305 => crypto.key_for(&secret),
                    CipherSuite::LegacyAesCbc => crypto.legacy_key_for(&secret),
                }
            })
            .await
            .map_err(|e| NoteError::Internal(format!("key derivation task failed: {e}")))?
            .map_err(|e| NoteError::Internal(format!("key derivation: {e}")))
        };

        match tokio::time::timeout(self.kdf_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.kdf_timeouts.inc();
                warn!(timeout_ms = self.kdf_timeout.as_millis() as u64, "key derivation timed out");
                Err(NoteError::Internal("key derivation timed out".into()))
            }
        }
    }
}

fn terminal(record: &NoteRecord, now: DateTime<Utc>) -> NoteResult<RevealOutcome> {
    record
        .terminal_view(now)
        .map(RevealOutcome::Gone)
        .ok_or_else(|| NoteError::Internal("terminal note has no terminal view".into()))
}

fn open_body(cipher: CipherSuite, key: &NoteKey, body: &SealedBody) -> Result<String, CryptoError> {
    match cipher {
        CipherSuite::XChaCha20Poly1305 => open(key, body.as_str()),
        CipherSuite::LegacyAesCbc => open_legacy(key, body.as_str()),
    }
}
