//! The composition root: wires the store, clock, catalog, and managers into
//! the surface consumed by the HTTP and admin layers.

use crate::cache::CatalogCache;
use crate::clock::{PolicyCalendar, SharedClock};
use crate::config::{BundleDefinition, EconomyConfig};
use crate::entitlement::EntitlementManager;
use crate::error::{LedgerError, LedgerResult, LimitReason};
use crate::policy;
use crate::potion::PotionEffectManager;
use crate::purchase::{PaymentInfo, PurchaseOrchestrator, PurchaseReceipt};
use crate::store::{self, EconomyStore};
use crate::usage::UsageLimitTracker;
use crate::wallet::WalletLedger;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// A bundle listing annotated with the calling user's purchase state.
#[derive(Debug, Clone, Serialize)]
pub struct BundleWithStatus {
    #[serde(flatten)]
    pub bundle: BundleDefinition,
    pub status: PurchaseStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseStatus {
    pub can_purchase:      bool,
    pub reason:            Option<LimitReason>,
    pub next_available_at: Option<DateTime<Utc>>,
    pub purchase_count:    i64,
    pub last_purchase_at:  Option<DateTime<Utc>>,
}

pub struct EconomyService {
    config:       EconomyConfig,
    clock:        SharedClock,
    calendar:     PolicyCalendar,
    store:        EconomyStore,
    catalog:      CatalogCache,
    wallet:       WalletLedger,
    entitlements: EntitlementManager,
    potions:      PotionEffectManager,
    usage:        UsageLimitTracker,
    orchestrator: PurchaseOrchestrator,
}

impl EconomyService {
    /// Build a fully wired service. Each manager gets its own connection to
    /// the same database via `reopen()`; `store` itself is kept for catalog
    /// reads and stays alive for the lifetime of the service (which also
    /// keeps shared in-memory databases alive).
    pub fn build(
        store: EconomyStore,
        config: EconomyConfig,
        clock: SharedClock,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let calendar = PolicyCalendar::from_offset_minutes(config.policy_utc_offset_minutes)?;
        let catalog = CatalogCache::new(Duration::from_secs(config.catalog_cache_ttl_secs));

        let wallet = WalletLedger::new(store.reopen()?, clock.clone());
        let entitlements = EntitlementManager::new(store.reopen()?, clock.clone());
        let potions = PotionEffectManager::new(store.reopen()?, clock.clone());
        let usage = UsageLimitTracker::new(
            store.reopen()?,
            clock.clone(),
            config.usage_defaults.clone(),
        );
        let orchestrator = PurchaseOrchestrator::new(store.reopen()?, clock.clone(), calendar);

        Ok(Self {
            config,
            clock,
            calendar,
            store,
            catalog,
            wallet,
            entitlements,
            potions,
            usage,
            orchestrator,
        })
    }

    /// Build over a fresh shared in-memory store. Used by tests and
    /// maintenance dry-runs; `tag` must be unique per live instance.
    pub fn build_in_memory(
        tag: &str,
        config: EconomyConfig,
        clock: SharedClock,
    ) -> LedgerResult<Self> {
        let store = EconomyStore::in_memory_shared(tag)?;
        store.migrate()?;
        Self::build(store, config, clock)
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    // ── Managers ──────────────────────────────────────────────────────

    pub fn wallet(&self) -> &WalletLedger {
        &self.wallet
    }

    pub fn entitlements(&self) -> &EntitlementManager {
        &self.entitlements
    }

    pub fn potions(&self) -> &PotionEffectManager {
        &self.potions
    }

    pub fn usage(&self) -> &UsageLimitTracker {
        &self.usage
    }

    /// Create a zero-balance account if the user has none yet.
    pub fn ensure_account(&self, user_id: &str) -> LedgerResult<()> {
        self.wallet.ensure_account(user_id)?;
        Ok(())
    }

    // ── Catalog ───────────────────────────────────────────────────────

    /// Active bundles, sorted by display order. Served from the TTL cache;
    /// the store-backed catalog wins over the compiled-in defaults.
    pub fn bundles(&self) -> LedgerResult<Vec<BundleDefinition>> {
        let mut bundles = self.load_catalog()?;
        bundles.retain(|b| b.active);
        bundles.sort_by_key(|b| b.order);
        Ok(bundles)
    }

    /// Bundles annotated with the user's purchase state, for the shop view.
    pub fn bundles_with_status(&self, user_id: &str) -> LedgerResult<Vec<BundleWithStatus>> {
        let now = self.clock.now();
        let records = store::purchase::list_for_user(self.store.conn(), user_id)?;
        let bundles = self.bundles()?;

        Ok(bundles
            .into_iter()
            .map(|bundle| {
                let record = records.iter().find(|r| r.bundle_id == bundle.id);
                let decision = policy::evaluate(bundle.purchase_limit, record, now, &self.calendar);
                BundleWithStatus {
                    status: PurchaseStatus {
                        can_purchase:      decision.allowed,
                        reason:            decision.reason,
                        next_available_at: decision.next_available_at,
                        purchase_count:    record.map(|r| r.count).unwrap_or(0),
                        last_purchase_at:  record.map(|r| r.last_purchase_at),
                    },
                    bundle,
                }
            })
            .collect())
    }

    /// Admin write path; invalidates the catalog cache.
    pub fn upsert_bundle(&self, bundle: &BundleDefinition) -> LedgerResult<()> {
        self.store.run_transaction(|tx| {
            store::catalog::upsert(tx, bundle, self.clock.now())
        })?;
        self.catalog.invalidate();
        log::info!("catalog: bundle '{}' upserted", bundle.id);
        Ok(())
    }

    /// Write the compiled-in catalog into the store (first-run seeding).
    pub fn seed_catalog(&self) -> LedgerResult<usize> {
        let bundles = self.config.bundles.clone();
        let now = self.clock.now();
        let seeded = self.store.run_transaction(|tx| {
            for bundle in &bundles {
                store::catalog::upsert(tx, bundle, now)?;
            }
            Ok(bundles.len())
        })?;
        self.catalog.invalidate();
        log::info!("catalog: seeded {seeded} bundles");
        Ok(seeded)
    }

    // ── Purchasing ────────────────────────────────────────────────────

    /// Purchase a bundle by id. Payment is assumed to be verified already.
    pub fn purchase_bundle(
        &self,
        user_id: &str,
        bundle_id: &str,
        payment: &PaymentInfo,
    ) -> LedgerResult<PurchaseReceipt> {
        let bundle = self
            .bundles()?
            .into_iter()
            .find(|b| b.id == bundle_id)
            .ok_or_else(|| LedgerError::BundleNotFound(bundle_id.to_string()))?;
        self.orchestrator.purchase(user_id, &bundle, payment)
    }

    // ── Maintenance ───────────────────────────────────────────────────

    /// Sweep expired potion effects for one user, or all users.
    pub fn sweep_expired_potions(&self, user_id: Option<&str>) -> LedgerResult<usize> {
        self.potions.cleanup_expired(user_id)
    }

    fn load_catalog(&self) -> LedgerResult<Vec<BundleDefinition>> {
        self.catalog.get_or_load(|| {
            let stored = store::catalog::load_all(self.store.conn())?;
            if stored.is_empty() {
                log::debug!("catalog: store empty, serving built-in bundle catalog");
                Ok(self.config.bundles.clone())
            } else {
                Ok(stored)
            }
        })
    }
}
