//! Note body sealing with XChaCha20-Poly1305
//!
//! Sealed body format (text):
//! ```text
//! hex(24-byte random nonce) ":" hex(ciphertext || 16-byte Poly1305 tag)
//! AAD = NOTE_AAD
//! ```

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::CryptoError;
use crate::kdf::NoteKey;
use crate::{NONCE_SIZE, NOTE_AAD, TAG_SIZE};

/// Encrypt a note body under `key` with a fresh random nonce.
pub fn seal(key: &NoteKey, plaintext: &str) -> Result<String, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad: NOTE_AAD,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = String::with_capacity((NONCE_SIZE + ciphertext.len()) * 2 + 1);
    sealed.push_str(&hex::encode(nonce_bytes));
    sealed.push(':');
    sealed.push_str(&hex::encode(ciphertext));
    Ok(sealed)
}

/// Decrypt a sealed note body.
///
/// Every failure (bad encoding, short input, wrong key, tampering, invalid
/// UTF-8) is reported as [`CryptoError::DecryptionFailed`].
pub fn open(key: &NoteKey, sealed: &str) -> Result<String, CryptoError> {
    let (nonce_hex, ciphertext_hex) = sealed
        .split_once(':')
        .ok_or(CryptoError::DecryptionFailed)?;

    let nonce_bytes = hex::decode(nonce_hex).map_err(|_| CryptoError::DecryptionFailed)?;
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }
    let ciphertext = hex::decode(ciphertext_hex).map_err(|_| CryptoError::DecryptionFailed)?;
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad: NOTE_AAD,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn key(byte: u8) -> NoteKey {
        NoteKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key(1);
        let sealed = seal(&k, "hello, one-time world!").unwrap();
        assert_eq!(open(&k, &sealed).unwrap(), "hello, one-time world!");
    }

    #[test]
    fn test_seal_open_empty() {
        let k = key(1);
        let sealed = seal(&k, "").unwrap();
        assert_eq!(open(&k, &sealed).unwrap(), "");
    }

    #[test]
    fn test_sealed_format() {
        let sealed = seal(&key(1), "abcd").unwrap();
        let (nonce_hex, ct_hex) = sealed.split_once(':').unwrap();

        assert_eq!(nonce_hex.len(), NONCE_SIZE * 2);
        // plaintext (4) + tag (16) bytes, hex-encoded
        assert_eq!(ct_hex.len(), (4 + TAG_SIZE) * 2);
        assert!(sealed.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_nonce_never_reused() {
        let k = key(1);
        let a = seal(&k, "same text").unwrap();
        let b = seal(&k, "same text").unwrap();
        assert_ne!(a.split_once(':').unwrap().0, b.split_once(':').unwrap().0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = seal(&key(1), "secret data").unwrap();
        assert!(matches!(
            open(&key(2), &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let k = key(1);
        let sealed = seal(&k, "secret data").unwrap();
        let (nonce_hex, ct_hex) = sealed.split_once(':').unwrap();
        let mut ct = hex::decode(ct_hex).unwrap();
        ct[0] ^= 0xFF;
        let tampered = format!("{nonce_hex}:{}", hex::encode(ct));

        assert!(matches!(
            open(&k, &tampered),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_malformed_blobs() {
        let k = key(1);
        for blob in [
            "",
            "no-separator",
            "zz:zz",
            "00:00",
            "0011223344556677889900112233445566778899aabbccdd:",
            "00112233445566778899aabbccddeeff:00112233445566778899aabbccddeeff",
        ] {
            assert!(
                matches!(open(&k, blob), Err(CryptoError::DecryptionFailed)),
                "{blob:?} should fail"
            );
        }
    }

    mod proptest_suite {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn roundtrip_arbitrary_text(text in ".{0,512}", k in any::<[u8; 32]>()) {
                let key = NoteKey::from_bytes(k);
                let sealed = seal(&key, &text).unwrap();
                prop_assert_eq!(open(&key, &sealed).unwrap(), text);
            }

            #[test]
            fn wrong_key_matches_corruption_error(
                text in ".{1,128}",
                a in any::<[u8; 32]>(),
                b in any::<[u8; 32]>(),
            ) {
                prop_assume!(a != b);
                let sealed = seal(&NoteKey::from_bytes(a), &text).unwrap();

                let wrong_key = open(&NoteKey::from_bytes(b), &sealed).unwrap_err();
                let corrupt = open(&NoteKey::from_bytes(a), &sealed[1..]).unwrap_err();

                prop_assert!(matches!(wrong_key, CryptoError::DecryptionFailed));
                prop_assert!(matches!(corrupt, CryptoError::DecryptionFailed));
            }
        }
    }
}
