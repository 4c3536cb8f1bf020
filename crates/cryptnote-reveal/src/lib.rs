//! cryptnote-reveal: the note lifecycle as seen by callers
//!
//! [`NoteService`] turns raw store transitions into the observable
//! create / metadata / reveal outcomes, running key derivation on a bounded
//! blocking pool. [`ExpiryReaper`] closes overdue notes in the background
//! using the same per-note transition as reveal.

pub mod bootstrap;
pub mod metrics;
pub mod reaper;
pub mod service;

pub use bootstrap::BootstrapError;
pub use metrics::NoteMetrics;
pub use reaper::ExpiryReaper;
pub use service::{NewNote, NoteMetadata, NoteService, RevealOutcome, ServiceOptions};
