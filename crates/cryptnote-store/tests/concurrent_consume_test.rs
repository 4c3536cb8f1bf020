//! Races many threads against a single note on each backend and checks that
//! exactly one of them observes the disclosure.

use chrono::{Duration, Utc};
use cryptnote_core::{ConsumeOutcome, NoteRecord, NoteStatus, ProtectionMode, SealedBody};
use cryptnote_store::{JsonNoteStore, MemoryNoteStore, NoteStore};
use std::sync::{Arc, Barrier};
use std::thread;

const RACERS: usize = 50;

fn race(store: Arc<dyn NoteStore>) {
    let now = Utc::now();
    let id = store
        .create(NoteRecord::new(
            ProtectionMode::Password,
            SealedBody::new("00:11"),
            now,
            Duration::hours(1),
            None,
        ))
        .unwrap();

    let barrier = Arc::new(Barrier::new(RACERS));
    let handles: Vec<_> = (0..RACERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let id = id.clone();
            thread::spawn(move || {
                barrier.wait();
                store.try_consume(&id, now).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<ConsumeOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, ConsumeOutcome::ConsumedNow { .. }))
        .count();
    let losers = outcomes
        .iter()
        .filter(|o| matches!(o, ConsumeOutcome::AlreadyConsumed(_)))
        .count();

    assert_eq!(winners, 1);
    assert_eq!(losers, RACERS - 1);

    let record = store.get(&id).unwrap().unwrap();
    assert_eq!(record.status, NoteStatus::Revealed);
    assert!(record.body.is_none());
}

#[test]
fn memory_store_single_winner() {
    race(Arc::new(MemoryNoteStore::new()));
}

#[test]
fn json_store_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonNoteStore::open(&dir.path().join("notes.json")).unwrap();
    race(Arc::new(store));
}

#[test]
fn sweep_and_consume_never_both_win() {
    let store: Arc<dyn NoteStore> = Arc::new(MemoryNoteStore::new());
    let created = Utc::now() - Duration::hours(2);
    let id = store
        .create(NoteRecord::new(
            ProtectionMode::None,
            SealedBody::new("plain"),
            created,
            Duration::hours(1),
            None,
        ))
        .unwrap();
    let now = Utc::now();

    let barrier = Arc::new(Barrier::new(2));
    let sweeper = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            store.sweep_expired(now, 10).unwrap()
        })
    };
    barrier.wait();
    let outcome = store.try_consume(&id, now).unwrap();
    let swept = sweeper.join().unwrap();

    // The deadline has passed, so nobody may disclose the body.
    assert!(!matches!(outcome, ConsumeOutcome::ConsumedNow { .. }));
    match outcome {
        ConsumeOutcome::ExpiredUnread(_) => assert_eq!(swept, 0),
        ConsumeOutcome::AlreadyConsumed(_) => assert_eq!(swept, 1),
        other => panic!("unexpected outcome {other:?}"),
    }
    let record = store.get(&id).unwrap().unwrap();
    assert_eq!(record.status, NoteStatus::ExpiredUnread);
}

#[cfg(feature = "rocksdb")]
#[test]
fn rocksdb_store_single_winner() {
    let dir = tempfile::tempdir().unwrap();
    let store = cryptnote_store::RocksNoteStore::open(dir.path()).unwrap();
    race(Arc::new(store));
}
