//! Secret resolution: which key protects a given note.

use secrecy::{ExposeSecret, SecretString};
use std::sync::OnceLock;

use crate::cipher::{open, seal};
use crate::error::CryptoError;
use crate::kdf::{derive_note_key, KdfParams, NoteKey};
use crate::legacy::derive_legacy_key;

/// The secret a note body is sealed under.
#[derive(Debug)]
pub enum NoteSecret {
    /// User-supplied password
    Password(SecretString),
    /// The server-wide secret
    Server,
}

impl NoteSecret {
    /// A non-empty password selects password protection; anything else falls
    /// back to the server secret.
    pub fn from_password(password: Option<SecretString>) -> Self {
        match password {
            Some(pw) if !pw.expose_secret().is_empty() => NoteSecret::Password(pw),
            _ => NoteSecret::Server,
        }
    }
}

/// Derives note keys and seals/opens note bodies.
///
/// The server key is derived once at construction; password keys are derived
/// on every call and cost a full Argon2id run. The legacy server key is
/// derived on first use and cached.
#[derive(Debug)]
pub struct CryptoProvider {
    params: KdfParams,
    server_key: NoteKey,
    server_secret: SecretString,
    legacy_server_key: OnceLock<NoteKey>,
}

impl CryptoProvider {
    pub fn new(server_secret: &SecretString, params: KdfParams) -> Result<Self, CryptoError> {
        if server_secret.expose_secret().trim().is_empty() {
            return Err(CryptoError::EmptyServerSecret);
        }
        let server_key = derive_note_key(server_secret, &params)?;
        tracing::debug!(
            mem_cost_kib = params.mem_cost_kib,
            time_cost = params.time_cost,
            "server note key derived"
        );
        Ok(Self {
            params,
            server_key,
            server_secret: SecretString::from(server_secret.expose_secret()),
            legacy_server_key: OnceLock::new(),
        })
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Resolve the key for `secret`. Expensive for passwords.
    pub fn key_for(&self, secret: &NoteSecret) -> Result<NoteKey, CryptoError> {
        match secret {
            NoteSecret::Password(pw) => derive_note_key(pw, &self.params),
            NoteSecret::Server => Ok(self.server_key.clone()),
        }
    }

    /// Resolve the scrypt key for a body carried over from the legacy cipher.
    pub fn legacy_key_for(&self, secret: &NoteSecret) -> Result<NoteKey, CryptoError> {
        match secret {
            NoteSecret::Password(pw) => derive_legacy_key(pw),
            NoteSecret::Server => {
                if let Some(key) = self.legacy_server_key.get() {
                    return Ok(key.clone());
                }
                let key = derive_legacy_key(&self.server_secret)?;
                Ok(self.legacy_server_key.get_or_init(|| key).clone())
            }
        }
    }

    pub fn encrypt(&self, plaintext: &str, secret: &NoteSecret) -> Result<String, CryptoError> {
        let key = self.key_for(secret)?;
        seal(&key, plaintext)
    }

    pub fn decrypt(&self, sealed: &str, secret: &NoteSecret) -> Result<String, CryptoError> {
        let key = self.key_for(secret)?;
        open(&key, sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CryptoProvider {
        CryptoProvider::new(
            &SecretString::from("server-wide-secret"),
            KdfParams {
                mem_cost_kib: 1024,
                time_cost: 1,
                parallelism: 1,
            },
        )
        .unwrap()
    }

    fn password(pw: &str) -> NoteSecret {
        NoteSecret::Password(SecretString::from(pw))
    }

    #[test]
    fn test_secret_resolution() {
        assert!(matches!(NoteSecret::from_password(None), NoteSecret::Server));
        assert!(matches!(
            NoteSecret::from_password(Some(SecretString::from(""))),
            NoteSecret::Server
        ));
        assert!(matches!(
            NoteSecret::from_password(Some(SecretString::from("abc123"))),
            NoteSecret::Password(_)
        ));
    }

    #[test]
    fn test_password_roundtrip() {
        let p = provider();
        let sealed = p.encrypt("launch codes", &password("abc123")).unwrap();
        assert_eq!(p.decrypt(&sealed, &password("abc123")).unwrap(), "launch codes");
    }

    #[test]
    fn test_wrong_password_fails_like_corruption() {
        let p = provider();
        let sealed = p.encrypt("launch codes", &password("abc123")).unwrap();

        let wrong = p.decrypt(&sealed, &password("wrong1")).unwrap_err();
        let corrupt = p.decrypt("garbage", &password("abc123")).unwrap_err();
        assert!(matches!(wrong, CryptoError::DecryptionFailed));
        assert!(matches!(corrupt, CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_server_key_roundtrip() {
        let p = provider();
        let sealed = p.encrypt("server protected", &NoteSecret::Server).unwrap();
        assert_eq!(p.decrypt(&sealed, &NoteSecret::Server).unwrap(), "server protected");
        assert!(p.decrypt(&sealed, &password("server-wide-secret-nope")).is_err());
    }

    #[test]
    fn test_server_key_matches_password_derivation() {
        // The server secret goes through the same KDF as a password would.
        let p = provider();
        let sealed = p.encrypt("x", &NoteSecret::Server).unwrap();
        assert_eq!(p.decrypt(&sealed, &password("server-wide-secret")).unwrap(), "x");
    }

    #[test]
    fn test_legacy_keys_follow_the_secret() {
        let p = provider();
        let blob = "000102030405060708090a0b0c0d0e0f:\
            4f156459380c43b5473851bddaf1d620d45b6d028aed1d77528aa0dd94b9a612";

        let server = p.legacy_key_for(&NoteSecret::Server).unwrap();
        assert_eq!(crate::open_legacy(&server, blob).unwrap(), "legacy launch codes");
        let cached = p.legacy_key_for(&NoteSecret::Server).unwrap();
        assert_eq!(cached.as_bytes(), server.as_bytes());

        let other = p.legacy_key_for(&password("abc123")).unwrap();
        assert!(crate::open_legacy(&other, blob).is_err());
    }

    #[test]
    fn test_empty_server_secret_rejected() {
        let result = CryptoProvider::new(&SecretString::from("   "), KdfParams::default());
        assert!(matches!(result, Err(CryptoError::EmptyServerSecret)));
    }
}
