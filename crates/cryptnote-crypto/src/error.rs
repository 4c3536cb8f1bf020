use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Wrong key, malformed blob, failed authentication, or non-UTF-8
    /// plaintext. One variant on purpose: callers cannot tell them apart.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("server secret must not be empty")]
    EmptyServerSecret,
}
