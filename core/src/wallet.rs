//! Wallet balances and the append-only transaction ledger.
//!
//! Every balance mutation and its audit entry commit in one atomic
//! transaction; there is no path that moves coins without leaving a ledger
//! entry. Callers charging for generated media must debit only after the
//! artifact was produced — there is no compensating-refund path for a
//! failed generation.

use crate::clock::SharedClock;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{self, EconomyStore};
use crate::types::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Purchase,
    Spend,
    Reward,
    Refund,
    Admin,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Spend    => "spend",
            Self::Reward   => "reward",
            Self::Refund   => "refund",
            Self::Admin    => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "spend"    => Some(Self::Spend),
            "reward"   => Some(Self::Reward),
            "refund"   => Some(Self::Refund),
            "admin"    => Some(Self::Admin),
            _ => None,
        }
    }
}

/// One immutable audit record. `amount` is signed; the invariant
/// `balance_after == balance_before + amount` is checked at the append seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id:              String,
    pub user_id:         UserId,
    pub kind:            LedgerKind,
    pub amount:          i64,
    pub balance_before:  i64,
    pub balance_after:   i64,
    pub description:     String,
    pub metadata:        serde_json::Value,
    pub idempotency_key: Option<String>,
    pub created_at:      DateTime<Utc>,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: &str,
        kind: LedgerKind,
        amount: i64,
        balance_before: i64,
        balance_after: i64,
        description: &str,
        metadata: serde_json::Value,
        idempotency_key: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            amount,
            balance_before,
            balance_after,
            description: description.to_string(),
            metadata,
            idempotency_key,
            created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryFilter {
    pub kind:   Option<LedgerKind>,
    pub limit:  usize,
    pub offset: usize,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self { kind: None, limit: 50, offset: 0 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub entry_count:    i64,
    pub total_credited: i64,
    pub total_debited:  i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceAdjustment {
    pub previous_balance: i64,
    pub new_balance:      i64,
    pub difference:       i64,
}

#[derive(Debug, Clone)]
pub struct RefundOptions {
    pub days_limit: i64,
    pub force:      bool,
}

impl Default for RefundOptions {
    fn default() -> Self {
        Self { days_limit: 7, force: false }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundReceipt {
    pub original_entry_id: String,
    pub refunded_amount:   i64,
    pub new_balance:       i64,
}

pub struct WalletLedger {
    store: EconomyStore,
    clock: SharedClock,
}

impl WalletLedger {
    pub fn new(store: EconomyStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Create a zero-balance account if the user has none yet.
    pub fn ensure_account(&self, user_id: &str) -> LedgerResult<store::account::AccountRow> {
        let now = self.clock.now();
        self.store
            .run_transaction(|tx| store::account::ensure(tx, user_id, now))
    }

    pub fn balance(&self, user_id: &str) -> LedgerResult<i64> {
        store::account::get(self.store.conn(), user_id)?
            .map(|a| a.balance)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }

    /// Apply a signed balance delta and append the matching audit entry,
    /// atomically. Fails with `InsufficientBalance` when the delta would
    /// take the balance below zero.
    pub fn apply_delta(
        &self,
        user_id: &str,
        amount: i64,
        kind: LedgerKind,
        description: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<i64> {
        let new_balance = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut account = store::account::get(tx, user_id)?
                .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
            let balance_before = account.balance;
            let balance_after = balance_before + amount;
            if balance_after < 0 {
                return Err(LedgerError::InsufficientBalance {
                    balance:  balance_before,
                    required: -amount,
                });
            }
            account.balance = balance_after;
            store::account::update(tx, &account, now)?;
            store::ledger::append(
                tx,
                &LedgerEntry::new(
                    user_id,
                    kind,
                    amount,
                    balance_before,
                    balance_after,
                    description,
                    metadata.clone(),
                    None,
                    now,
                ),
            )?;
            Ok(balance_after)
        })?;

        log::info!(
            "wallet: {user_id} {} {amount:+} -> balance {new_balance}",
            kind.as_str()
        );
        Ok(new_balance)
    }

    /// Grant coins. `amount` must be positive.
    pub fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: LedgerKind,
        description: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<i64> {
        if amount <= 0 {
            return Err(LedgerError::Validation("credit amount must be positive".into()));
        }
        self.apply_delta(user_id, amount, kind, description, metadata)
    }

    /// Spend coins. `amount` must be positive.
    pub fn debit(
        &self,
        user_id: &str,
        amount: i64,
        description: &str,
        metadata: serde_json::Value,
    ) -> LedgerResult<i64> {
        if amount <= 0 {
            return Err(LedgerError::Validation("debit amount must be positive".into()));
        }
        self.apply_delta(user_id, -amount, LedgerKind::Spend, description, metadata)
    }

    /// Support tooling: set the balance outright, recording the signed
    /// difference as an admin entry.
    pub fn set_balance(&self, user_id: &str, new_balance: i64) -> LedgerResult<BalanceAdjustment> {
        if new_balance < 0 {
            return Err(LedgerError::Validation("balance cannot be negative".into()));
        }
        let adjustment = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut account = store::account::get(tx, user_id)?
                .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
            let previous = account.balance;
            let difference = new_balance - previous;
            account.balance = new_balance;
            store::account::update(tx, &account, now)?;
            store::ledger::append(
                tx,
                &LedgerEntry::new(
                    user_id,
                    LedgerKind::Admin,
                    difference,
                    previous,
                    new_balance,
                    "balance set by support",
                    serde_json::json!({ "previous_balance": previous }),
                    None,
                    now,
                ),
            )?;
            Ok(BalanceAdjustment {
                previous_balance: previous,
                new_balance,
                difference,
            })
        })?;

        log::info!(
            "wallet: {user_id} balance set {} -> {}",
            adjustment.previous_balance,
            adjustment.new_balance
        );
        Ok(adjustment)
    }

    /// Refund a prior debit entry within the refund window, crediting the
    /// coins back and appending a refund entry that references the original.
    /// The original entry itself is never mutated.
    pub fn refund(
        &self,
        user_id: &str,
        entry_id: &str,
        reason: &str,
        options: &RefundOptions,
    ) -> LedgerResult<RefundReceipt> {
        let receipt = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let entry = store::ledger::get(tx, entry_id)?
                .ok_or_else(|| LedgerError::EntryNotFound(entry_id.to_string()))?;
            if entry.user_id != user_id {
                return Err(LedgerError::Validation(
                    "ledger entry belongs to a different user".into(),
                ));
            }
            if entry.amount >= 0 {
                return Err(LedgerError::Validation(
                    "only debit entries can be refunded".into(),
                ));
            }
            if store::ledger::refund_exists_for(tx, entry_id)? {
                return Err(LedgerError::Validation(format!(
                    "entry '{entry_id}' was already refunded"
                )));
            }
            if !options.force && now - entry.created_at > Duration::days(options.days_limit) {
                return Err(LedgerError::Validation(format!(
                    "refund window of {} days has passed",
                    options.days_limit
                )));
            }

            let refund_amount = -entry.amount;
            let mut account = store::account::get(tx, user_id)?
                .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
            let balance_before = account.balance;
            account.balance += refund_amount;
            store::account::update(tx, &account, now)?;
            store::ledger::append(
                tx,
                &LedgerEntry::new(
                    user_id,
                    LedgerKind::Refund,
                    refund_amount,
                    balance_before,
                    account.balance,
                    &format!("refund: {reason}"),
                    serde_json::json!({ "refund_of": entry_id, "reason": reason }),
                    None,
                    now,
                ),
            )?;
            Ok(RefundReceipt {
                original_entry_id: entry_id.to_string(),
                refunded_amount:   refund_amount,
                new_balance:       account.balance,
            })
        })?;

        log::info!(
            "wallet: {user_id} refunded {} for entry {} -> balance {}",
            receipt.refunded_amount,
            receipt.original_entry_id,
            receipt.new_balance
        );
        Ok(receipt)
    }

    // ── Reporting reads (non-transactional, stale-tolerant) ───────────

    pub fn history(&self, user_id: &str, filter: &HistoryFilter) -> LedgerResult<Vec<LedgerEntry>> {
        store::ledger::list_for_user(self.store.conn(), user_id, filter)
    }

    pub fn stats(&self, user_id: &str) -> LedgerResult<LedgerStats> {
        store::ledger::stats_for_user(self.store.conn(), user_id)
    }
}
