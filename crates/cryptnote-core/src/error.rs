use thiserror::Error;

pub type NoteResult<T> = Result<T, NoteError>;

/// Failure taxonomy for note operations.
///
/// Terminal notes (revealed or expired) are not errors; they are reported as
/// successful "gone" outcomes carrying a [`crate::TerminalView`].
#[derive(Debug, Error)]
pub enum NoteError {
    /// Malformed input, rejected before any store access.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("note not found")]
    NotFound,

    /// Wrong password or corrupt ciphertext. The two are deliberately
    /// indistinguishable.
    #[error("invalid credential")]
    InvalidCredential,

    /// Store unavailable, key derivation timeout, broken invariant.
    /// The message is for logs only and must not be shown to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NoteError {
    /// Only internal failures may be retried, and only by idempotent reads.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NoteError::Internal(_))
    }

    /// Caller-facing message with internal detail stripped.
    pub fn public_message(&self) -> &'static str {
        match self {
            NoteError::Validation(_) => "invalid request",
            NoteError::NotFound => "not found",
            NoteError::InvalidCredential => "invalid password",
            NoteError::Internal(_) => "internal error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_internal_is_retryable() {
        assert!(NoteError::Internal("store down".into()).is_retryable());
        assert!(!NoteError::NotFound.is_retryable());
        assert!(!NoteError::InvalidCredential.is_retryable());
        assert!(!NoteError::Validation("x".into()).is_retryable());
    }

    #[test]
    fn public_message_hides_detail() {
        let err = NoteError::Internal("rocksdb: IO error at /var/lib/notes".into());
        assert_eq!(err.public_message(), "internal error");
    }
}
