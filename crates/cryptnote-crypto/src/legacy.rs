//! Opening bodies written by the pre-v2 note server
//!
//! ```text
//! scrypt(secret, salt = "salt", N = 2^14, r = 8, p = 1) → 256-bit key
//!   └── AES-256-CBC(key, iv = random 128-bit), PKCS#7 padding
//! ```
//!
//! Encoding: `hex(iv) ":" hex(ciphertext)`. The scheme is unauthenticated; a
//! wrong key surfaces as bad padding or invalid UTF-8. Only opening is
//! supported, new bodies are always sealed with [`crate::seal`].

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::NoteKey;
use crate::KEY_SIZE;

/// Salt the legacy server passed to scrypt for every key.
pub const LEGACY_SALT: &[u8] = b"salt";

/// AES block / IV size
pub const LEGACY_IV_SIZE: usize = 16;

const LEGACY_SCRYPT_LOG_N: u8 = 14;
const LEGACY_SCRYPT_R: u32 = 8;
const LEGACY_SCRYPT_P: u32 = 1;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Derive the key a legacy body was sealed under.
///
/// Costs ~16 MiB and tens of milliseconds; run it off the async executor.
pub fn derive_legacy_key(secret: &SecretString) -> Result<NoteKey, CryptoError> {
    let params = scrypt::Params::new(
        LEGACY_SCRYPT_LOG_N,
        LEGACY_SCRYPT_R,
        LEGACY_SCRYPT_P,
        KEY_SIZE,
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid scrypt params: {e}")))?;

    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(
        secret.expose_secret().as_bytes(),
        LEGACY_SALT,
        &params,
        &mut key,
    )
    .map_err(|e| CryptoError::Kdf(format!("scrypt: {e}")))?;

    let note_key = NoteKey::from_bytes(key);
    key.zeroize();
    Ok(note_key)
}

/// Decrypt a legacy `hex(iv):hex(ciphertext)` body.
///
/// Every failure is reported as [`CryptoError::DecryptionFailed`].
pub fn open_legacy(key: &NoteKey, sealed: &str) -> Result<String, CryptoError> {
    let (iv_hex, data_hex) = sealed
        .split_once(':')
        .ok_or(CryptoError::DecryptionFailed)?;

    let iv = hex::decode(iv_hex).map_err(|_| CryptoError::DecryptionFailed)?;
    if iv.len() != LEGACY_IV_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let data = hex::decode(data_hex).map_err(|_| CryptoError::DecryptionFailed)?;
    if data.is_empty() || data.len() % LEGACY_IV_SIZE != 0 {
        return Err(CryptoError::DecryptionFailed);
    }

    let plaintext = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| CryptoError::DecryptionFailed)?
        .decrypt_padded_vec_mut::<Pkcs7>(&data)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Produced by the old server's scheme: scrypt(secret, "salt", 32) with
    // Node's defaults, AES-256-CBC, IV 00..0f, plaintext "legacy launch codes".
    const PASSWORD_KEY_HEX: &str =
        "8ae5e656ef25c2e4eb4c6307e4f3f4191b8228a5d25e42ed4a5f81beff96864c";
    const PASSWORD_BLOB: &str = "000102030405060708090a0b0c0d0e0f:\
        a81e30a22fc4c6e0ab81871d9a75e8ff6a4ccc13cb567a499f7d4866b80dfce6";
    const SERVER_BLOB: &str = "000102030405060708090a0b0c0d0e0f:\
        4f156459380c43b5473851bddaf1d620d45b6d028aed1d77528aa0dd94b9a612";

    #[test]
    fn test_key_matches_reference_derivation() {
        let key = derive_legacy_key(&SecretString::from("abc123")).unwrap();
        assert_eq!(hex::encode(key.as_bytes()), PASSWORD_KEY_HEX);
    }

    #[test]
    fn test_open_reference_blobs() {
        let pw_key = derive_legacy_key(&SecretString::from("abc123")).unwrap();
        assert_eq!(open_legacy(&pw_key, PASSWORD_BLOB).unwrap(), "legacy launch codes");

        let server_key = derive_legacy_key(&SecretString::from("server-wide-secret")).unwrap();
        assert_eq!(open_legacy(&server_key, SERVER_BLOB).unwrap(), "legacy launch codes");
    }

    #[test]
    fn test_wrong_key_and_malformed_input_fail() {
        let server_key = derive_legacy_key(&SecretString::from("server-wide-secret")).unwrap();
        assert!(matches!(
            open_legacy(&server_key, PASSWORD_BLOB),
            Err(CryptoError::DecryptionFailed)
        ));

        let key = NoteKey::from_bytes([7u8; KEY_SIZE]);
        for bad in [
            "",
            "no-separator",
            "0001:a81e30a22fc4c6e0ab81871d9a75e8ff",
            "000102030405060708090a0b0c0d0e0f:",
            "000102030405060708090a0b0c0d0e0f:a81e30",
            "000102030405060708090a0b0c0d0e0f:zz",
        ] {
            assert!(open_legacy(&key, bad).is_err(), "{bad:?} should not open");
        }
    }
}
