//! Background expiry of unread notes.

use cryptnote_core::NoteResult;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::service::NoteService;

/// Periodically closes overdue notes in bounded batches.
///
/// Reveal already expires overdue notes lazily, so the schedule only bounds
/// how long sealed bodies of never-visited notes stay on disk.
pub struct ExpiryReaper {
    service: Arc<NoteService>,
    interval: Duration,
    batch_limit: usize,
}

impl ExpiryReaper {
    pub fn new(service: Arc<NoteService>, interval: Duration, batch_limit: usize) -> Self {
        Self {
            service,
            interval,
            batch_limit: batch_limit.max(1),
        }
    }

    /// Sweep until a batch comes back short. Returns the total converted.
    ///
    /// Notes closed by earlier batches are counted and logged even when a
    /// later batch fails.
    pub async fn sweep_once(&self) -> NoteResult<usize> {
        let mut total = 0;
        let result = loop {
            match self.service.sweep_expired(self.batch_limit).await {
                Ok(n) => {
                    total += n;
                    if n < self.batch_limit {
                        break Ok(total);
                    }
                }
                Err(e) => break Err(e),
            }
        };
        self.report(total, result.is_err());
        result
    }

    fn report(&self, total: usize, failed: bool) {
        if total > 0 {
            self.service.metrics().notes_expired.inc_by(total as u64);
        }
        match (total, failed) {
            (0, false) => debug!("reaper: nothing to expire"),
            (0, true) => {}
            (n, false) => info!(expired = n, "reaper: closed overdue notes"),
            (n, true) => info!(expired = n, "reaper: closed overdue notes before a batch failed"),
        }
    }

    /// Sweep on every tick until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_limit = self.batch_limit,
            "reaper started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reaper: shutdown");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "reaper sweep failed");
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use cryptnote_core::{ConsumeOutcome, ManualClock, NoteError, NoteId, NoteRecord, NoteTtl};
    use cryptnote_crypto::{CryptoProvider, KdfParams};
    use cryptnote_store::{MemoryNoteStore, NoteStats, NoteStore, StoreError, StoreResult};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::service::{NewNote, ServiceOptions};

    /// Memory store whose sweeps fail after the first batch.
    struct FailingSecondSweep {
        inner: MemoryNoteStore,
        sweeps: AtomicUsize,
    }

    impl NoteStore for FailingSecondSweep {
        fn create(&self, record: NoteRecord) -> StoreResult<NoteId> {
            self.inner.create(record)
        }

        fn get(&self, id: &NoteId) -> StoreResult<Option<NoteRecord>> {
            self.inner.get(id)
        }

        fn try_consume(&self, id: &NoteId, now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
            self.inner.try_consume(id, now)
        }

        fn sweep_expired(&self, now: DateTime<Utc>, batch_limit: usize) -> StoreResult<usize> {
            if self.sweeps.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(StoreError::Io(std::io::Error::other("disk went away")));
            }
            self.inner.sweep_expired(now, batch_limit)
        }

        fn len(&self) -> StoreResult<usize> {
            self.inner.len()
        }

        fn stats(&self, now: DateTime<Utc>) -> StoreResult<NoteStats> {
            self.inner.stats(now)
        }
    }

    #[tokio::test]
    async fn test_partial_sweep_is_counted_before_error() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(FailingSecondSweep {
            inner: MemoryNoteStore::new(),
            sweeps: AtomicUsize::new(0),
        });
        let provider = CryptoProvider::new(
            &SecretString::from("server-wide-secret"),
            KdfParams {
                mem_cost_kib: 1024,
                time_cost: 1,
                parallelism: 1,
            },
        )
        .unwrap();
        let service = Arc::new(NoteService::new(
            store.clone(),
            Arc::new(provider),
            clock.clone(),
            ServiceOptions::default(),
        ));

        for i in 0..5 {
            service
                .create_note(NewNote {
                    text: SecretString::from(format!("note {i}")),
                    password: None,
                    ttl: Some(NoteTtl::hours(1)),
                    reply_to: None,
                })
                .await
                .unwrap();
        }
        clock.advance(ChronoDuration::hours(2));

        let reaper = ExpiryReaper::new(Arc::clone(&service), Duration::from_secs(60), 2);
        assert!(matches!(
            reaper.sweep_once().await,
            Err(NoteError::Internal(_))
        ));
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 2);
        assert_eq!(service.metrics().notes_expired.get(), 2);
        assert_eq!(service.stats().await.unwrap().expired_unread, 5);
    }
}
