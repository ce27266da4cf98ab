//! The atomic bundle-purchase workflow.
//!
//! Payment verification happens before this module is invoked; a purchase
//! here only grants the bundle contents and records the history. The limit
//! check runs twice on purpose: a cheap read-only pre-check for early
//! rejection, then the authoritative re-check inside the transaction, both
//! through the identical policy function.

use crate::clock::{PolicyCalendar, SharedClock};
use crate::config::BundleDefinition;
use crate::entitlement::EntitlementType;
use crate::error::{LedgerError, LedgerResult};
use crate::policy::{self, PurchaseRecord};
use crate::store::{self, EconomyStore};
use crate::wallet::{LedgerEntry, LedgerKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Passed through from the (already verified) payment flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub provider:  Option<String>,
    pub reference: Option<String>,
    /// Client-supplied request token. When present, a replayed purchase
    /// with the same token fails with `DuplicateRequest` instead of
    /// double-granting an unlimited bundle.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub bundle_id:        String,
    pub bundle_name:      String,
    pub price_paid:       i64,
    pub currency:         String,
    pub coins_received:   i64,
    pub entitlements_received: BTreeMap<EntitlementType, i64>,
    pub new_balance:      i64,
    pub new_entitlements: BTreeMap<EntitlementType, i64>,
    pub purchase_count:   i64,
}

pub struct PurchaseOrchestrator {
    store:    EconomyStore,
    clock:    SharedClock,
    calendar: PolicyCalendar,
}

impl PurchaseOrchestrator {
    pub fn new(store: EconomyStore, clock: SharedClock, calendar: PolicyCalendar) -> Self {
        Self { store, clock, calendar }
    }

    pub fn purchase(
        &self,
        user_id: &str,
        bundle: &BundleDefinition,
        payment: &PaymentInfo,
    ) -> LedgerResult<PurchaseReceipt> {
        // Existence check and fast-path policy rejection, outside the
        // transaction. Stale reads are fine here — the in-transaction
        // re-check is the one that counts.
        if store::account::get(self.store.conn(), user_id)?.is_none() {
            return Err(LedgerError::UserNotFound(user_id.to_string()));
        }
        let record = store::purchase::get(self.store.conn(), user_id, &bundle.id)?;
        let decision =
            policy::evaluate(bundle.purchase_limit, record.as_ref(), self.clock.now(), &self.calendar);
        if !decision.allowed {
            return Err(decision.into_error());
        }

        let receipt = self.store.run_transaction(|tx| {
            let now = self.clock.now();

            let mut account = store::account::get(tx, user_id)?
                .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
            let record = store::purchase::get(tx, user_id, &bundle.id)?;

            // Authoritative check: closes the race window between the
            // pre-check and the commit.
            let decision =
                policy::evaluate(bundle.purchase_limit, record.as_ref(), now, &self.calendar);
            if !decision.allowed {
                return Err(decision.into_error());
            }

            if let Some(key) = &payment.idempotency_key {
                if store::ledger::idempotency_key_exists(tx, key)? {
                    return Err(LedgerError::DuplicateRequest {
                        idempotency_key: key.clone(),
                    });
                }
            }

            let balance_before = account.balance;
            account.balance += bundle.contents.coins;
            for (entitlement, delta) in &bundle.contents.entitlements {
                *account.entitlements.entry(*entitlement).or_insert(0) += delta;
            }
            store::account::update(tx, &account, now)?;

            let record = match record {
                Some(mut record) => {
                    record.count += 1;
                    record.last_purchase_at = now;
                    store::purchase::update(tx, &record)?;
                    record
                }
                None => {
                    let record = PurchaseRecord {
                        user_id:           user_id.to_string(),
                        bundle_id:         bundle.id.clone(),
                        count:             1,
                        first_purchase_at: now,
                        last_purchase_at:  now,
                        version:           0,
                    };
                    store::purchase::insert(tx, &record)?;
                    record
                }
            };

            store::ledger::append(
                tx,
                &LedgerEntry::new(
                    user_id,
                    LedgerKind::Purchase,
                    bundle.contents.coins,
                    balance_before,
                    account.balance,
                    &format!("purchased {}", bundle.name),
                    serde_json::json!({
                        "bundle_id": bundle.id,
                        "price": bundle.price,
                        "currency": bundle.currency,
                        "contents": &bundle.contents,
                        "payment": payment,
                    }),
                    payment.idempotency_key.clone(),
                    now,
                ),
            )?;

            Ok(PurchaseReceipt {
                bundle_id:        bundle.id.clone(),
                bundle_name:      bundle.name.clone(),
                price_paid:       bundle.price,
                currency:         bundle.currency.clone(),
                coins_received:   bundle.contents.coins,
                entitlements_received: bundle.contents.entitlements.clone(),
                new_balance:      account.balance,
                new_entitlements: account.entitlements,
                purchase_count:   record.count,
            })
        })?;

        log::info!(
            "purchase: {user_id} bought {} (#{}) -> balance {}",
            receipt.bundle_id,
            receipt.purchase_count,
            receipt.new_balance
        );
        Ok(receipt)
    }
}
