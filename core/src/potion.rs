//! Timed potion effects, keyed by (potion type, optional character).
//!
//! Lifecycle per key:
//!   no record → activate → active until expires_at
//!   active    → extend   → expiry recomputed from now (not added to the
//!                          old expiry)
//!   any       → remove   → no record
//! Expiry is observed at read time; no background sweep is needed for
//! correctness. `cleanup_expired` exists only for storage hygiene.

use crate::clock::SharedClock;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{self, EconomyStore};
use crate::types::{CharacterId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_EFFECT_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PotionType {
    MemoryBoost,
    BrainBoost,
}

impl PotionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryBoost => "memory_boost",
            Self::BrainBoost  => "brain_boost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memory_boost" => Some(Self::MemoryBoost),
            "brain_boost"  => Some(Self::BrainBoost),
            _ => None,
        }
    }
}

impl std::fmt::Display for PotionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// At most one record exists per (user, potion type, character) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivePotionEffect {
    pub user_id:      UserId,
    pub potion_type:  PotionType,
    pub character_id: Option<CharacterId>,
    pub activated_at: DateTime<Utc>,
    pub expires_at:   DateTime<Utc>,
}

impl ActivePotionEffect {
    /// Human-readable key, e.g. `memory_boost_c1`.
    pub fn effect_id(&self) -> String {
        match &self.character_id {
            Some(character) => format!("{}_{character}", self.potion_type.as_str()),
            None => self.potion_type.as_str().to_string(),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    /// Whole days until expiry, rounded up; 0 once expired.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        let secs = (self.expires_at - now).num_seconds();
        if secs <= 0 {
            0
        } else {
            (secs + 86_399) / 86_400
        }
    }
}

/// Read-time view of a key's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectStatus {
    Inactive,
    Active {
        expires_at:     DateTime<Utc>,
        days_remaining: i64,
    },
    Expired {
        expired_at: DateTime<Utc>,
    },
}

impl EffectStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// An effect together with its derived state, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct EffectView {
    #[serde(flatten)]
    pub effect:         ActivePotionEffect,
    pub is_active:      bool,
    pub days_remaining: i64,
}

pub struct PotionEffectManager {
    store: EconomyStore,
    clock: SharedClock,
}

impl PotionEffectManager {
    pub fn new(store: EconomyStore, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Activate an effect for `duration_days`. Re-activating a key that is
    /// already active replaces the single record for that key — duplicate
    /// buffs for one character/potion pair cannot exist.
    pub fn activate(
        &self,
        user_id: &str,
        potion_type: PotionType,
        character_id: Option<&str>,
        duration_days: u32,
    ) -> LedgerResult<ActivePotionEffect> {
        validate_duration(duration_days)?;
        let effect = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let effect = ActivePotionEffect {
                user_id:      user_id.to_string(),
                potion_type,
                character_id: character_id.map(str::to_string),
                activated_at: now,
                expires_at:   now + Duration::days(duration_days as i64),
            };
            store::potion::upsert(tx, &effect)?;
            Ok(effect)
        })?;

        log::info!(
            "potion: {user_id} activated {} for {duration_days}d (expires {})",
            effect.effect_id(),
            effect.expires_at
        );
        Ok(effect)
    }

    /// Re-time an existing effect: the new expiry is computed from now, not
    /// added to the previous expiry. Works on expired-but-present records
    /// too, which re-activates them.
    pub fn extend(
        &self,
        user_id: &str,
        potion_type: PotionType,
        character_id: Option<&str>,
        duration_days: u32,
    ) -> LedgerResult<ActivePotionEffect> {
        validate_duration(duration_days)?;
        let effect = self.store.run_transaction(|tx| {
            let now = self.clock.now();
            let mut effect = store::potion::get(tx, user_id, potion_type, character_id)?
                .ok_or_else(|| LedgerError::EffectNotFound(effect_key(potion_type, character_id)))?;
            effect.activated_at = now;
            effect.expires_at = now + Duration::days(duration_days as i64);
            store::potion::upsert(tx, &effect)?;
            Ok(effect)
        })?;

        log::info!(
            "potion: {user_id} extended {} to {}",
            effect.effect_id(),
            effect.expires_at
        );
        Ok(effect)
    }

    pub fn remove(
        &self,
        user_id: &str,
        potion_type: PotionType,
        character_id: Option<&str>,
    ) -> LedgerResult<()> {
        let removed = self
            .store
            .run_transaction(|tx| store::potion::delete(tx, user_id, potion_type, character_id))?;
        if !removed {
            return Err(LedgerError::EffectNotFound(effect_key(potion_type, character_id)));
        }
        log::info!("potion: {user_id} removed {}", effect_key(potion_type, character_id));
        Ok(())
    }

    /// Derived state of a key, computed at read time.
    pub fn status(
        &self,
        user_id: &str,
        potion_type: PotionType,
        character_id: Option<&str>,
    ) -> LedgerResult<EffectStatus> {
        let now = self.clock.now();
        let effect = store::potion::get(self.store.conn(), user_id, potion_type, character_id)?;
        Ok(match effect {
            None => EffectStatus::Inactive,
            Some(effect) if effect.is_active(now) => EffectStatus::Active {
                expires_at:     effect.expires_at,
                days_remaining: effect.days_remaining(now),
            },
            Some(effect) => EffectStatus::Expired {
                expired_at: effect.expires_at,
            },
        })
    }

    pub fn is_active(
        &self,
        user_id: &str,
        potion_type: PotionType,
        character_id: Option<&str>,
    ) -> LedgerResult<bool> {
        Ok(self.status(user_id, potion_type, character_id)?.is_active())
    }

    /// All effect records for a user, expired ones included, with derived
    /// state attached. Sorted soonest-expiring first.
    pub fn effects(&self, user_id: &str) -> LedgerResult<Vec<EffectView>> {
        let now = self.clock.now();
        let effects = store::potion::list_for_user(self.store.conn(), user_id)?;
        Ok(effects
            .into_iter()
            .map(|effect| EffectView {
                is_active:      effect.is_active(now),
                days_remaining: effect.days_remaining(now),
                effect,
            })
            .collect())
    }

    /// Only the currently-active effects.
    pub fn active_effects(&self, user_id: &str) -> LedgerResult<Vec<ActivePotionEffect>> {
        let now = self.clock.now();
        Ok(store::potion::list_for_user(self.store.conn(), user_id)?
            .into_iter()
            .filter(|e| e.is_active(now))
            .collect())
    }

    /// Storage-hygiene sweep; pass `None` to sweep every user. Returns the
    /// number of rows removed.
    pub fn cleanup_expired(&self, user_id: Option<&str>) -> LedgerResult<usize> {
        let now = self.clock.now();
        let removed = store::potion::delete_expired(self.store.conn(), user_id, now)?;
        if removed > 0 {
            log::info!("potion: swept {removed} expired effects");
        }
        Ok(removed)
    }
}

fn validate_duration(duration_days: u32) -> LedgerResult<()> {
    if duration_days == 0 || duration_days > MAX_EFFECT_DAYS {
        return Err(LedgerError::Validation(format!(
            "duration must be within 1-{MAX_EFFECT_DAYS} days, got {duration_days}"
        )));
    }
    Ok(())
}

fn effect_key(potion_type: PotionType, character_id: Option<&str>) -> String {
    match character_id {
        Some(character) => format!("{}_{character}", potion_type.as_str()),
        None => potion_type.as_str().to_string(),
    }
}
