//! Wallet ledger tests — balance mutation and the audit trail.

use chrono::{Duration, TimeZone, Utc};
use economy_core::{
    clock::{ManualClock, SharedClock},
    config::EconomyConfig,
    error::LedgerError,
    service::EconomyService,
    wallet::{HistoryFilter, LedgerKind},
};
use std::sync::Arc;

fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 9, 4, 0, 0).unwrap()
}

fn make_service(tag: &str) -> (EconomyService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let shared: SharedClock = clock.clone();
    let service = EconomyService::build_in_memory(tag, EconomyConfig::default(), shared).unwrap();
    service.ensure_account("u1").unwrap();
    (service, clock)
}

/// A fresh account starts at zero.
#[test]
fn new_account_starts_empty() {
    let (service, _) = make_service("wallet-empty");
    assert_eq!(service.wallet().balance("u1").unwrap(), 0);
}

#[test]
fn unknown_user_is_not_found() {
    let (service, _) = make_service("wallet-unknown");
    let err = service.wallet().balance("nobody").unwrap_err();
    assert!(matches!(err, LedgerError::UserNotFound(_)), "got {err:?}");
}

/// Credits and debits apply in order; every entry satisfies
/// balance_after == balance_before + amount.
#[test]
fn delta_sequence_keeps_consistent_audit_trail() {
    let (service, _) = make_service("wallet-sequence");
    let wallet = service.wallet();

    wallet
        .credit("u1", 500, LedgerKind::Reward, "signup bonus", serde_json::json!({}))
        .unwrap();
    wallet.debit("u1", 120, "photo generation", serde_json::json!({})).unwrap();
    wallet.debit("u1", 80, "voice message", serde_json::json!({})).unwrap();

    assert_eq!(wallet.balance("u1").unwrap(), 300);

    let entries = wallet.history("u1", &HistoryFilter::default()).unwrap();
    assert_eq!(entries.len(), 3);
    for entry in &entries {
        assert_eq!(
            entry.balance_after,
            entry.balance_before + entry.amount,
            "inconsistent entry {}",
            entry.id
        );
    }
}

/// A debit past zero is rejected and leaves no trace.
#[test]
fn overdraft_is_rejected_without_partial_writes() {
    let (service, _) = make_service("wallet-overdraft");
    let wallet = service.wallet();
    wallet
        .credit("u1", 100, LedgerKind::Reward, "bonus", serde_json::json!({}))
        .unwrap();

    let err = wallet.debit("u1", 101, "too expensive", serde_json::json!({})).unwrap_err();
    assert!(
        matches!(err, LedgerError::InsufficientBalance { balance: 100, required: 101 }),
        "got {err:?}"
    );

    assert_eq!(wallet.balance("u1").unwrap(), 100);
    let entries = wallet.history("u1", &HistoryFilter::default()).unwrap();
    assert_eq!(entries.len(), 1, "failed debit must not append an entry");
}

#[test]
fn zero_and_negative_amounts_are_validation_errors() {
    let (service, _) = make_service("wallet-validation");
    let wallet = service.wallet();
    for amount in [0, -5] {
        let err = wallet
            .credit("u1", amount, LedgerKind::Reward, "bad", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
        let err = wallet.debit("u1", amount, "bad", serde_json::json!({})).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    }
}

/// Support tooling sets the balance outright, recording the signed diff.
#[test]
fn set_balance_records_signed_difference() {
    let (service, _) = make_service("wallet-set-balance");
    let wallet = service.wallet();
    wallet
        .credit("u1", 250, LedgerKind::Reward, "bonus", serde_json::json!({}))
        .unwrap();

    let adjustment = wallet.set_balance("u1", 100).unwrap();
    assert_eq!(adjustment.previous_balance, 250);
    assert_eq!(adjustment.difference, -150);
    assert_eq!(wallet.balance("u1").unwrap(), 100);

    let admin_entries = wallet
        .history(
            "u1",
            &HistoryFilter { kind: Some(LedgerKind::Admin), ..Default::default() },
        )
        .unwrap();
    assert_eq!(admin_entries.len(), 1);
    assert_eq!(admin_entries[0].amount, -150);
}

/// Refunding a debit restores the coins and references the original entry;
/// refunding it twice fails and changes nothing.
#[test]
fn refund_restores_balance_once() {
    let (service, _) = make_service("wallet-refund");
    let wallet = service.wallet();
    wallet
        .credit("u1", 200, LedgerKind::Reward, "bonus", serde_json::json!({}))
        .unwrap();
    wallet.debit("u1", 150, "video generation", serde_json::json!({})).unwrap();

    let debit_entry = wallet
        .history("u1", &HistoryFilter { kind: Some(LedgerKind::Spend), ..Default::default() })
        .unwrap()
        .remove(0);

    let receipt = wallet
        .refund("u1", &debit_entry.id, "generation failed", &Default::default())
        .unwrap();
    assert_eq!(receipt.refunded_amount, 150);
    assert_eq!(receipt.new_balance, 200);

    let err = wallet
        .refund("u1", &debit_entry.id, "again", &Default::default())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
    assert_eq!(wallet.balance("u1").unwrap(), 200);
}

/// The refund window is enforced unless forced.
#[test]
fn refund_window_expires() {
    let (service, clock) = make_service("wallet-refund-window");
    let wallet = service.wallet();
    wallet
        .credit("u1", 200, LedgerKind::Reward, "bonus", serde_json::json!({}))
        .unwrap();
    wallet.debit("u1", 50, "photo", serde_json::json!({})).unwrap();
    let entry = wallet
        .history("u1", &HistoryFilter { kind: Some(LedgerKind::Spend), ..Default::default() })
        .unwrap()
        .remove(0);

    clock.advance(Duration::days(8));

    let err = wallet
        .refund("u1", &entry.id, "too late", &Default::default())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");

    let forced = economy_core::wallet::RefundOptions { force: true, ..Default::default() };
    let receipt = wallet.refund("u1", &entry.id, "support override", &forced).unwrap();
    assert_eq!(receipt.new_balance, 200);
}

/// Credits are never refundable.
#[test]
fn refund_rejects_credit_entries() {
    let (service, _) = make_service("wallet-refund-credit");
    let wallet = service.wallet();
    wallet
        .credit("u1", 200, LedgerKind::Reward, "bonus", serde_json::json!({}))
        .unwrap();
    let entry = wallet.history("u1", &HistoryFilter::default()).unwrap().remove(0);
    let err = wallet
        .refund("u1", &entry.id, "not a debit", &Default::default())
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)), "got {err:?}");
}

#[test]
fn stats_split_credits_and_debits() {
    let (service, _) = make_service("wallet-stats");
    let wallet = service.wallet();
    wallet
        .credit("u1", 500, LedgerKind::Purchase, "coins", serde_json::json!({}))
        .unwrap();
    wallet.debit("u1", 200, "spend", serde_json::json!({})).unwrap();

    let stats = wallet.stats("u1").unwrap();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_credited, 500);
    assert_eq!(stats.total_debited, 200);
}
