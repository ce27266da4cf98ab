//! Per-resource usage counters with reset, direct-set, and override
//! semantics.
//!
//! `count` is the in-window tally and is the only field a reset touches.
//! `lifetime_count` is monotone — it survives resets and direct overrides.
//! Missing counters read as zero-valued defaults; a counter row is only
//! materialized on the first write.

use crate::clock::SharedClock;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{self, EconomyStore, BATCH_MAX_OPS};
use crate::types::{CharacterId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageResource {
    Conversation,
    Voice,
    Photo,
    Video,
    CharacterCreation,
}

impl UsageResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation      => "conversation",
            Self::Voice             => "voice",
            Self::Photo             => "photo",
            Self::Video             => "video",
            Self::CharacterCreation => "character_creation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation"       => Some(Self::Conversation),
            "voice"              => Some(Self::Voice),
            "photo"              => Some(Self::Photo),
            "video"              => Some(Self::Video),
            "character_creation" => Some(Self::CharacterCreation),
            _ => None,
        }
    }
}

impl std::fmt::Display for UsageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageCounter {
    pub user_id:          UserId,
    pub resource:         UsageResource,
    pub character_id:     Option<CharacterId>,
    pub count:            i64,
    pub lifetime_count:   i64,
    pub unlocked_count:   i64,
    pub card_count:       i64,
    pub permanent_unlock: bool,
    pub custom_limit:     Option<i64>,
    pub last_reset_date:  Option<DateTime<Utc>>,
}

impl UsageCounter {
    /// The zero-valued default served for keys that were never written.
    pub fn empty(user_id: &str, resource: UsageResource, character_id: Option<&str>) -> Self {
        Self {
            user_id:          user_id.to_string(),
            resource,
            character_id:     character_id.map(str::to_string),
            count:            0,
            lifetime_count:   0,
            unlocked_count:   0,
            card_count:       0,
            permanent_unlock: false,
            custom_limit:     None,
            last_reset_date:  None,
        }
    }
}

/// Partial update of the override fields only; `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageOverrides {
    pub unlocked_count:   Option<i64>,
    pub card_count:       Option<i64>,
    pub permanent_unlock: Option<bool>,
    pub custom_limit:     Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitCheck {
    pub allowed:          bool,
    pub used:             i64,
    /// Effective base limit; -1 means unlimited.
    pub limit:            i64,
    pub unlocked:         i64,
    /// Uses left in the window; -1 when unlimited.
    pub remaining:        i64,
    pub permanent_unlock: bool,
}

pub struct UsageLimitTracker {
    store:    EconomyStore,
    clock:    SharedClock,
    defaults: BTreeMap<UsageResource, i64>,
}

impl UsageLimitTracker {
    pub fn new(
        store: EconomyStore,
        clock: SharedClock,
        defaults: BTreeMap<UsageResource, i64>,
    ) -> Self {
        Self { store, clock, defaults }
    }

    /// Read a counter; absent keys return the zero-valued default.
    pub fn counter(
        &self,
        user_id: &str,
        resource: UsageResource,
        character_id: Option<&str>,
    ) -> LedgerResult<UsageCounter> {
        Ok(
            store::usage::get(self.store.conn(), user_id, resource, character_id)?
                .unwrap_or_else(|| UsageCounter::empty(user_id, resource, character_id)),
        )
    }

    /// Record one consumption: bumps both the in-window count and the
    /// monotone lifetime count.
    pub fn record_use(
        &self,
        user_id: &str,
        resource: UsageResource,
        character_id: Option<&str>,
    ) -> LedgerResult<UsageCounter> {
        let counter = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut counter = store::usage::get(tx, user_id, resource, character_id)?
                .unwrap_or_else(|| UsageCounter::empty(user_id, resource, character_id));
            counter.count += 1;
            counter.lifetime_count += 1;
            store::usage::upsert(tx, &counter, now)?;
            Ok(counter)
        })?;

        log::debug!(
            "usage: {user_id} {resource} used -> {} (lifetime {})",
            counter.count,
            counter.lifetime_count
        );
        Ok(counter)
    }

    /// Direct override of the in-window count; negative input clamps to 0.
    /// The lifetime count is not touched.
    pub fn set_used(
        &self,
        user_id: &str,
        resource: UsageResource,
        character_id: Option<&str>,
        count: i64,
    ) -> LedgerResult<UsageCounter> {
        let count = count.max(0);
        let counter = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut counter = store::usage::get(tx, user_id, resource, character_id)?
                .unwrap_or_else(|| UsageCounter::empty(user_id, resource, character_id));
            counter.count = count;
            store::usage::upsert(tx, &counter, now)?;
            Ok(counter)
        })?;

        log::info!("usage: {user_id} {resource} count set to {count}");
        Ok(counter)
    }

    /// Window reset: zeroes `count` and stamps `last_reset_date`; lifetime,
    /// unlock, card, and override fields are untouched.
    pub fn reset(
        &self,
        user_id: &str,
        resource: UsageResource,
        character_id: Option<&str>,
    ) -> LedgerResult<UsageCounter> {
        let counter = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut counter = store::usage::get(tx, user_id, resource, character_id)?
                .unwrap_or_else(|| UsageCounter::empty(user_id, resource, character_id));
            counter.count = 0;
            counter.last_reset_date = Some(now);
            store::usage::upsert(tx, &counter, now)?;
            Ok(counter)
        })?;

        log::info!("usage: {user_id} {resource} reset");
        Ok(counter)
    }

    /// Partial update of the override fields only.
    pub fn set_entitlement_fields(
        &self,
        user_id: &str,
        resource: UsageResource,
        character_id: Option<&str>,
        overrides: &UsageOverrides,
    ) -> LedgerResult<UsageCounter> {
        if let Some(limit) = overrides.custom_limit {
            if limit < -1 {
                return Err(LedgerError::Validation(
                    "custom limit must be -1 (unlimited) or non-negative".into(),
                ));
            }
        }
        let counter = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut counter = store::usage::get(tx, user_id, resource, character_id)?
                .unwrap_or_else(|| UsageCounter::empty(user_id, resource, character_id));
            if let Some(unlocked) = overrides.unlocked_count {
                counter.unlocked_count = unlocked.max(0);
            }
            if let Some(cards) = overrides.card_count {
                counter.card_count = cards.max(0);
            }
            if let Some(permanent) = overrides.permanent_unlock {
                counter.permanent_unlock = permanent;
            }
            if let Some(limit) = overrides.custom_limit {
                counter.custom_limit = Some(limit);
            }
            store::usage::upsert(tx, &counter, now)?;
            Ok(counter)
        })?;

        log::info!("usage: {user_id} {resource} overrides updated");
        Ok(counter)
    }

    /// Limit check against the effective limit: `custom_limit` when set,
    /// else the configured per-resource default. A permanent unlock always
    /// passes; ad-unlocked extra uses raise the window allowance.
    pub fn check(
        &self,
        user_id: &str,
        resource: UsageResource,
        character_id: Option<&str>,
    ) -> LedgerResult<LimitCheck> {
        let counter = self.counter(user_id, resource, character_id)?;
        let limit = counter
            .custom_limit
            .unwrap_or_else(|| self.defaults.get(&resource).copied().unwrap_or(-1));

        let (allowed, remaining) = if counter.permanent_unlock || limit < 0 {
            (true, -1)
        } else {
            let allowance = limit + counter.unlocked_count;
            (counter.count < allowance, (allowance - counter.count).max(0))
        };

        Ok(LimitCheck {
            allowed,
            used: counter.count,
            limit,
            unlocked: counter.unlocked_count,
            remaining,
            permanent_unlock: counter.permanent_unlock,
        })
    }

    /// Bulk window reset across every tracked counter for a resource, in
    /// chunks of at most `BATCH_MAX_OPS` writes. Used by scheduled
    /// maintenance; not atomic across chunks.
    pub fn reset_all(&self, resource: UsageResource) -> LedgerResult<usize> {
        let now = self.clock.now();
        let keys = store::usage::list_keys(self.store.conn(), resource)?;
        let reset = self.store.batch_write(&keys, BATCH_MAX_OPS, |tx, (user, character)| {
            store::usage::reset_row(tx, user, resource, character.as_deref(), now)
        })?;
        log::info!("usage: bulk reset {reset} {resource} counters");
        Ok(reset)
    }
}
