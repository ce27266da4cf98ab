//! Consumable entitlement counters (unlock cards and creation tickets).
//!
//! Counters live on the account document, so a grant or consume is a
//! single version-guarded account write.

use crate::clock::SharedClock;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{self, EconomyStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntitlementType {
    CharacterUnlock,
    PhotoUnlock,
    VideoUnlock,
    VoiceUnlock,
    CreateTicket,
}

impl EntitlementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CharacterUnlock => "characterUnlock",
            Self::PhotoUnlock     => "photoUnlock",
            Self::VideoUnlock     => "videoUnlock",
            Self::VoiceUnlock     => "voiceUnlock",
            Self::CreateTicket    => "createTicket",
        }
    }
}

impl std::fmt::Display for EntitlementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct EntitlementManager {
    store: EconomyStore,
    clock: SharedClock,
}

impl EntitlementManager {
    pub fn new(store: EconomyStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    pub fn balances(&self, user_id: &str) -> LedgerResult<BTreeMap<EntitlementType, i64>> {
        store::account::get(self.store.conn(), user_id)?
            .map(|a| a.entitlements)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }

    pub fn balance(&self, user_id: &str, entitlement: EntitlementType) -> LedgerResult<i64> {
        Ok(self
            .balances(user_id)?
            .get(&entitlement)
            .copied()
            .unwrap_or(0))
    }

    /// Grant `amount` credits of an entitlement. Returns the new count.
    pub fn grant(
        &self,
        user_id: &str,
        entitlement: EntitlementType,
        amount: i64,
    ) -> LedgerResult<i64> {
        if amount <= 0 {
            return Err(LedgerError::Validation("grant amount must be positive".into()));
        }
        let new_count = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut account = store::account::get(tx, user_id)?
                .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
            let count = account.entitlements.entry(entitlement).or_insert(0);
            *count += amount;
            let new_count = *count;
            store::account::update(tx, &account, now)?;
            Ok(new_count)
        })?;

        log::info!("entitlement: {user_id} +{amount} {entitlement} -> {new_count}");
        Ok(new_count)
    }

    /// Consume `amount` credits. Fails with `InsufficientEntitlement` and
    /// performs no mutation when the current count is too low.
    pub fn consume(
        &self,
        user_id: &str,
        entitlement: EntitlementType,
        amount: i64,
    ) -> LedgerResult<i64> {
        if amount <= 0 {
            return Err(LedgerError::Validation("consume amount must be positive".into()));
        }
        let new_count = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut account = store::account::get(tx, user_id)?
                .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
            let available = account.entitlements.get(&entitlement).copied().unwrap_or(0);
            if available < amount {
                return Err(LedgerError::InsufficientEntitlement {
                    entitlement: entitlement.to_string(),
                    available,
                    requested: amount,
                });
            }
            account.entitlements.insert(entitlement, available - amount);
            store::account::update(tx, &account, now)?;
            Ok(available - amount)
        })?;

        log::info!("entitlement: {user_id} -{amount} {entitlement} -> {new_count}");
        Ok(new_count)
    }
}
