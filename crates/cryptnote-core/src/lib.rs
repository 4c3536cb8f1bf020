//! cryptnote-core: shared types for one-time secret notes
//!
//! A note is addressed by an unguessable [`NoteId`] and moves through
//! `Active → {Revealed, ExpiredUnread}` exactly once. The transition
//! functions on [`NoteRecord`] are the only code that mutates note state;
//! storage backends apply them under their own atomicity primitive.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{NoteError, NoteResult};
pub use types::{
    CipherSuite, ConsumeOutcome, DurationUnit, NoteId, NoteRecord, NoteStatus, NoteTtl, ProtectionMode,
    SealedBody, TerminalReason, TerminalView,
};
