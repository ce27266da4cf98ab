//! Store-level tests — transaction runner and chunked batch writer.

use chrono::{TimeZone, Utc};
use economy_core::{
    error::LedgerError,
    store::{usage as usage_store, EconomyStore},
    usage::{UsageCounter, UsageResource},
};

fn seeded_store(users: usize) -> EconomyStore {
    let store = EconomyStore::in_memory().unwrap();
    store.migrate().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap();
    store
        .run_transaction(|tx| {
            for i in 0..users {
                let mut counter =
                    UsageCounter::empty(&format!("u{i}"), UsageResource::Photo, None);
                counter.count = 3;
                counter.lifetime_count = 3;
                usage_store::upsert(tx, &counter, now)?;
            }
            Ok(())
        })
        .unwrap();
    store
}

/// A chunk size smaller than the work list still touches every item.
#[test]
fn batch_write_covers_items_across_chunks() {
    let store = seeded_store(5);
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();

    let keys = store
        .run_transaction(|tx| usage_store::list_keys(tx, UsageResource::Photo))
        .unwrap();
    assert_eq!(keys.len(), 5);

    let written = store
        .batch_write(&keys, 2, |tx, (user, character)| {
            usage_store::reset_row(tx, user, UsageResource::Photo, character.as_deref(), now)
        })
        .unwrap();
    assert_eq!(written, 5);

    store
        .run_transaction(|tx| {
            for (user, character) in &keys {
                let counter = usage_store::get(tx, user, UsageResource::Photo, character.as_deref())?
                    .expect("seeded counter");
                assert_eq!(counter.count, 0, "counter for {user} not reset");
                assert_eq!(counter.lifetime_count, 3);
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn batch_write_rejects_zero_chunk_size() {
    let store = seeded_store(1);
    let err = store
        .batch_write(&[("u0".to_string(), None::<String>)], 0, |_, _| Ok(()))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
}

/// A domain error inside the transaction aborts the whole block: nothing
/// before the failure point is visible afterwards.
#[test]
fn failed_transaction_leaves_no_partial_writes() {
    let store = seeded_store(1);
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();

    let result: Result<(), _> = store.run_transaction(|tx| {
        usage_store::reset_row(tx, "u0", UsageResource::Photo, None, now)?;
        Err(LedgerError::Validation("forced failure".into()))
    });
    assert!(result.is_err());

    let counter = store
        .run_transaction(|tx| usage_store::get(tx, "u0", UsageResource::Photo, None))
        .unwrap()
        .expect("seeded counter");
    assert_eq!(counter.count, 3, "rolled-back reset must not be visible");
}
