//! cryptnote-crypto: note body encryption
//!
//! Scheme:
//! ```text
//! secret (user password | server-wide secret)
//!   └── Argon2id(secret, salt = NOTE_KEY_SALT) → 256-bit note key
//!         └── XChaCha20-Poly1305(key, nonce = random 192-bit, AAD = NOTE_AAD)
//! ```
//!
//! Sealed body encoding: `hex(nonce) ":" hex(ciphertext || tag)`.
//!
//! The salt is fixed so a password always maps to the same key without a
//! salt store. This makes offline dictionary attacks against a leaked store
//! cheaper than a per-record salt would; the Argon2id cost is the only
//! defense there.
//!
//! Bodies migrated from the pre-v2 server stay in their AES-256-CBC form and
//! are opened with [`legacy::open_legacy`] under an scrypt key. The legacy
//! server-key bodies use the same configured server secret.

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod legacy;
pub mod provider;

pub use cipher::{open, seal};
pub use error::CryptoError;
pub use kdf::{derive_note_key, KdfParams, NoteKey};
pub use legacy::{derive_legacy_key, open_legacy};
pub use provider::{CryptoProvider, NoteSecret};

/// Size of a note key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Fixed, documented KDF salt shared by every note.
pub const NOTE_KEY_SALT: &[u8] = b"cryptnote/note-key/v1";

/// Associated data bound into every sealed body.
pub const NOTE_AAD: &[u8] = b"cryptnote/note-body/v1";
