//! Wiring shared by the daemon and the operator CLI: configuration, the
//! server secret, the configured store, and a ready [`NoteService`].

use cryptnote_core::config::{expand_tilde, CryptnoteConfig, CryptoConfig, StoreBackendKind};
use cryptnote_core::{Clock, SystemClock};
use cryptnote_crypto::{CryptoError, CryptoProvider, KdfParams};
use cryptnote_store::{migrate_file, open_store, NoteStore, StoreError};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::NoteMetrics;
use crate::service::{NoteService, ServiceOptions};

/// Environment variable holding the server-wide secret.
pub const SERVER_SECRET_ENV: &str = "CRYPTNOTE_SERVER_SECRET";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no server secret: set CRYPTNOTE_SERVER_SECRET or crypto.server_secret_file")]
    MissingServerSecret,

    #[error("crypto setup: {0}")]
    Crypto(#[from] CryptoError),

    #[error("note store {path}: {source}")]
    Store { path: PathBuf, source: StoreError },
}

/// Load the TOML config at `path`, or defaults when the file is absent.
pub async fn load_config(path: &Path) -> Result<CryptnoteConfig, BootstrapError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => toml::from_str(&content).map_err(|source| BootstrapError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found (using defaults)");
            Ok(CryptnoteConfig::default())
        }
        Err(source) => Err(BootstrapError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolve the server secret: environment first, then the configured file.
pub fn load_server_secret(crypto: &CryptoConfig) -> Result<SecretString, BootstrapError> {
    if let Ok(secret) = std::env::var(SERVER_SECRET_ENV) {
        if !secret.trim().is_empty() {
            return Ok(SecretString::from(secret));
        }
    }
    let Some(file) = &crypto.server_secret_file else {
        return Err(BootstrapError::MissingServerSecret);
    };
    let path = expand_tilde(file);
    let content = std::fs::read_to_string(&path).map_err(|source| BootstrapError::Read {
        path: path.clone(),
        source,
    })?;
    match content.lines().next().map(str::trim) {
        Some(line) if !line.is_empty() => Ok(SecretString::from(line.to_string())),
        _ => Err(BootstrapError::MissingServerSecret),
    }
}

pub fn kdf_params(crypto: &CryptoConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: crypto.argon2_mem_cost_kib,
        time_cost: crypto.argon2_time_cost,
        parallelism: crypto.argon2_parallelism,
    }
}

/// Open the configured store, upgrading a legacy JSON file first when
/// `migrate` is set.
pub fn open_configured_store(
    config: &CryptnoteConfig,
    migrate: bool,
    clock: &dyn Clock,
) -> Result<Arc<dyn NoteStore>, BootstrapError> {
    let path = expand_tilde(&config.store.path);
    let store_err = |source| BootstrapError::Store {
        path: path.clone(),
        source,
    };

    if migrate && config.store.backend == StoreBackendKind::Json {
        let report = migrate_file(&path, clock.now()).map_err(store_err)?;
        if !report.already_current {
            info!(
                migrated = report.migrated,
                skipped = report.skipped,
                "legacy note store upgraded"
            );
        }
    }

    let store = open_store(config.store.backend, &path).map_err(store_err)?;
    info!(backend = ?config.store.backend, path = %path.display(), "note store opened");
    Ok(store)
}

/// Everything needed to serve notes from `config`.
pub fn build_service(
    config: &CryptnoteConfig,
    metrics: NoteMetrics,
) -> Result<Arc<NoteService>, BootstrapError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = open_configured_store(config, config.store.auto_migrate, clock.as_ref())?;
    let secret = load_server_secret(&config.crypto)?;
    let crypto = Arc::new(CryptoProvider::new(&secret, kdf_params(&config.crypto))?);

    let service = NoteService::new(store, crypto, clock, ServiceOptions::from_config(config))
        .with_metrics(metrics);
    Ok(Arc::new(service))
}
