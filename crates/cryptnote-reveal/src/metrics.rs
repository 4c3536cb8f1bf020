//! Prometheus counters for note traffic.

use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProtectionLabels {
    pub protection: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Counters shared by the service and the reaper. Cloning shares the
/// underlying series.
#[derive(Clone, Debug, Default)]
pub struct NoteMetrics {
    pub notes_created: Family<ProtectionLabels, Counter>,
    pub reveals: Family<OutcomeLabels, Counter>,
    pub notes_expired: Counter,
    pub kdf_timeouts: Counter,
    pub notes_active: Gauge,
    pub notes_stored: Gauge,
}

impl NoteMetrics {
    /// Create the counters and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "cryptnote_notes_created",
            "Notes created, by protection mode",
            metrics.notes_created.clone(),
        );
        registry.register(
            "cryptnote_reveals",
            "Reveal attempts, by outcome",
            metrics.reveals.clone(),
        );
        registry.register(
            "cryptnote_notes_expired",
            "Notes closed unread by the expiry reaper",
            metrics.notes_expired.clone(),
        );
        registry.register(
            "cryptnote_kdf_timeouts",
            "Key derivations abandoned after the per-request timeout",
            metrics.kdf_timeouts.clone(),
        );
        registry.register(
            "cryptnote_notes_active",
            "Active notes at the last scrape",
            metrics.notes_active.clone(),
        );
        registry.register(
            "cryptnote_notes_stored",
            "Stored notes in any state at the last scrape",
            metrics.notes_stored.clone(),
        );
        metrics
    }

    pub fn created(&self, protection: &str) {
        self.notes_created
            .get_or_create(&ProtectionLabels {
                protection: protection.to_string(),
            })
            .inc();
    }

    pub fn reveal(&self, outcome: &str) {
        self.reveals
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn reveal_count(&self, outcome: &str) -> u64 {
        self.reveals
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .get()
    }
}
