use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::NoteTtl;

/// Top-level configuration (loaded from cryptnote.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptnoteConfig {
    pub daemon: DaemonConfig,
    pub store: StoreConfig,
    pub crypto: CryptoConfig,
    pub notes: NotesConfig,
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics + health endpoint (default: 127.0.0.1:9110)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// Single JSON file, every transition persisted before returning
    Json,
    /// Process memory only; contents are lost on exit
    Memory,
    /// RocksDB database directory (requires the `rocksdb` feature)
    Rocksdb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    /// File (json) or directory (rocksdb) holding the notes
    pub path: PathBuf,
    /// Upgrade a legacy store file in place on daemon startup
    pub auto_migrate: bool,
}

/// Note encryption configuration.
///
/// The server secret itself is never read from this file: it comes from the
/// `CRYPTNOTE_SERVER_SECRET` environment variable or `server_secret_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// File containing the server-wide secret (first line, trimmed)
    pub server_secret_file: Option<PathBuf>,
    /// Argon2id memory cost in KiB (default: 19456 = 19 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 2)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 1)
    pub argon2_parallelism: u32,
    /// Concurrent key derivations allowed (0 = cpu_count)
    pub kdf_workers: usize,
    /// Per-request key derivation budget in milliseconds
    pub kdf_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    /// Longest lifetime a caller may choose
    pub max_ttl_days: u32,
    /// Largest accepted note body in bytes
    pub max_note_bytes: usize,
    /// Retries for metadata reads on store failure (reveal is never retried)
    pub read_retries: u32,
    /// Lifetime used when the caller does not choose one
    pub default_ttl: NoteTtl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    /// Seconds between sweeps (default: 600)
    pub interval_secs: u64,
    /// Notes expired per store call
    pub batch_limit: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9110".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Json,
            path: PathBuf::from("~/.local/share/cryptnote/notes.json"),
            auto_migrate: true,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            server_secret_file: None,
            argon2_mem_cost_kib: 19456,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            kdf_workers: 0,
            kdf_timeout_ms: 10_000,
        }
    }
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            max_ttl_days: 30,
            max_note_bytes: 64 * 1024,
            read_retries: 2,
            default_ttl: NoteTtl::default(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            batch_limit: 500,
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
