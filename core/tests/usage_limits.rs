//! Usage counter tests — reset/override semantics and limit checks.

use chrono::{TimeZone, Utc};
use economy_core::{
    clock::{Clock, ManualClock, SharedClock},
    config::EconomyConfig,
    error::LedgerError,
    service::EconomyService,
    usage::{UsageOverrides, UsageResource},
};
use std::sync::Arc;

fn make_service(tag: &str) -> (EconomyService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap(),
    ));
    let shared: SharedClock = clock.clone();
    let service = EconomyService::build_in_memory(tag, EconomyConfig::default(), shared).unwrap();
    (service, clock)
}

/// Absent counters read as zero-valued defaults, never as an error.
#[test]
fn missing_counter_reads_as_default() {
    let (service, _) = make_service("usage-default");
    let counter = service
        .usage()
        .counter("u1", UsageResource::Photo, None)
        .unwrap();
    assert_eq!(counter.count, 0);
    assert_eq!(counter.lifetime_count, 0);
    assert!(!counter.permanent_unlock);
    assert!(counter.custom_limit.is_none());
    assert!(counter.last_reset_date.is_none());
}

/// record_use bumps both the window count and the monotone lifetime count.
#[test]
fn record_use_increments_both_counts() {
    let (service, _) = make_service("usage-record");
    let usage = service.usage();
    for _ in 0..3 {
        usage.record_use("u1", UsageResource::Conversation, Some("c1")).unwrap();
    }
    let counter = usage.counter("u1", UsageResource::Conversation, Some("c1")).unwrap();
    assert_eq!(counter.count, 3);
    assert_eq!(counter.lifetime_count, 3);
}

/// Reset zeroes the window count and stamps the reset date, but a prior
/// lifetime count of 42 stays 42 even as count goes 7 -> 0.
#[test]
fn reset_preserves_lifetime_count() {
    let (service, clock) = make_service("usage-reset");
    let usage = service.usage();

    for _ in 0..42 {
        usage.record_use("u1", UsageResource::Photo, None).unwrap();
    }
    usage.set_used("u1", UsageResource::Photo, None, 7).unwrap();

    let before = usage.counter("u1", UsageResource::Photo, None).unwrap();
    assert_eq!(before.count, 7);
    assert_eq!(before.lifetime_count, 42);

    let after = usage.reset("u1", UsageResource::Photo, None).unwrap();
    assert_eq!(after.count, 0);
    assert_eq!(after.lifetime_count, 42);
    assert_eq!(after.last_reset_date, Some(clock.now()));
}

/// Direct overrides clamp negatives to zero and leave lifetime alone.
#[test]
fn set_used_clamps_to_zero() {
    let (service, _) = make_service("usage-clamp");
    let usage = service.usage();
    usage.record_use("u1", UsageResource::Voice, Some("c1")).unwrap();

    let counter = usage.set_used("u1", UsageResource::Voice, Some("c1"), -5).unwrap();
    assert_eq!(counter.count, 0);
    assert_eq!(counter.lifetime_count, 1);

    let counter = usage.set_used("u1", UsageResource::Voice, Some("c1"), 9).unwrap();
    assert_eq!(counter.count, 9);
}

/// Override updates touch only the fields that were supplied.
#[test]
fn entitlement_fields_update_partially() {
    let (service, _) = make_service("usage-overrides");
    let usage = service.usage();

    usage
        .set_entitlement_fields(
            "u1",
            UsageResource::Video,
            None,
            &UsageOverrides {
                card_count: Some(5),
                permanent_unlock: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

    let counter = usage
        .set_entitlement_fields(
            "u1",
            UsageResource::Video,
            None,
            &UsageOverrides { unlocked_count: Some(3), ..Default::default() },
        )
        .unwrap();

    // Earlier fields survived the second partial update.
    assert_eq!(counter.card_count, 5);
    assert!(counter.permanent_unlock);
    assert_eq!(counter.unlocked_count, 3);
}

#[test]
fn custom_limit_below_minus_one_is_rejected() {
    let (service, _) = make_service("usage-bad-limit");
    let err = service
        .usage()
        .set_entitlement_fields(
            "u1",
            UsageResource::Photo,
            None,
            &UsageOverrides { custom_limit: Some(-2), ..Default::default() },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
}

/// The photo default limit is 3: the fourth use is denied.
#[test]
fn check_enforces_the_default_limit() {
    let (service, _) = make_service("usage-check-default");
    let usage = service.usage();

    for _ in 0..3 {
        let check = usage.check("u1", UsageResource::Photo, None).unwrap();
        assert!(check.allowed);
        usage.record_use("u1", UsageResource::Photo, None).unwrap();
    }
    let check = usage.check("u1", UsageResource::Photo, None).unwrap();
    assert!(!check.allowed);
    assert_eq!(check.used, 3);
    assert_eq!(check.limit, 3);
    assert_eq!(check.remaining, 0);
}

/// A custom limit replaces the default entirely.
#[test]
fn custom_limit_overrides_default() {
    let (service, _) = make_service("usage-check-custom");
    let usage = service.usage();
    usage
        .set_entitlement_fields(
            "u1",
            UsageResource::Photo,
            None,
            &UsageOverrides { custom_limit: Some(10), ..Default::default() },
        )
        .unwrap();
    usage.set_used("u1", UsageResource::Photo, None, 9).unwrap();

    let check = usage.check("u1", UsageResource::Photo, None).unwrap();
    assert!(check.allowed);
    assert_eq!(check.limit, 10);
    assert_eq!(check.remaining, 1);
}

/// Permanent unlock passes regardless of the count.
#[test]
fn permanent_unlock_always_passes() {
    let (service, _) = make_service("usage-check-permanent");
    let usage = service.usage();
    usage.set_used("u1", UsageResource::Video, None, 1_000).unwrap();
    usage
        .set_entitlement_fields(
            "u1",
            UsageResource::Video,
            None,
            &UsageOverrides { permanent_unlock: Some(true), ..Default::default() },
        )
        .unwrap();

    let check = usage.check("u1", UsageResource::Video, None).unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, -1);
}

/// Ad-unlocked extra uses raise the window allowance on top of the limit.
#[test]
fn unlocked_count_extends_the_window() {
    let (service, _) = make_service("usage-check-unlocked");
    let usage = service.usage();
    usage.set_used("u1", UsageResource::Photo, None, 3).unwrap();
    assert!(!usage.check("u1", UsageResource::Photo, None).unwrap().allowed);

    usage
        .set_entitlement_fields(
            "u1",
            UsageResource::Photo,
            None,
            &UsageOverrides { unlocked_count: Some(2), ..Default::default() },
        )
        .unwrap();
    let check = usage.check("u1", UsageResource::Photo, None).unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, 2);
}

/// Bulk reset touches every tracked counter for the resource and nothing else.
#[test]
fn bulk_reset_covers_all_counters() {
    let (service, _) = make_service("usage-bulk-reset");
    let usage = service.usage();

    for user in ["u1", "u2", "u3"] {
        for character in [Some("c1"), Some("c2")] {
            usage.record_use(user, UsageResource::CharacterCreation, character).unwrap();
        }
    }
    usage.record_use("u1", UsageResource::Photo, None).unwrap();

    let reset = usage.reset_all(UsageResource::CharacterCreation).unwrap();
    assert_eq!(reset, 6);

    for user in ["u1", "u2", "u3"] {
        let counter = usage
            .counter(user, UsageResource::CharacterCreation, Some("c1"))
            .unwrap();
        assert_eq!(counter.count, 0);
        assert_eq!(counter.lifetime_count, 1, "lifetime survives bulk reset");
        assert!(counter.last_reset_date.is_some());
    }

    // Other resources are untouched.
    let photo = usage.counter("u1", UsageResource::Photo, None).unwrap();
    assert_eq!(photo.count, 1);
}
