//! Catalog and policy configuration.
//!
//! Bundle/potion catalogs and usage defaults load from JSON files under a
//! data directory, falling back to the compiled-in catalog when a file is
//! absent. The store-backed catalog (seeded by the admin tool) takes
//! precedence at runtime; these definitions are the last-resort defaults.

use crate::entitlement::EntitlementType;
use crate::error::{LedgerError, LedgerResult};
use crate::potion::PotionType;
use crate::usage::UsageResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How often one user may buy a given bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseLimit {
    #[default]
    None,
    Once,
    Weekly,
    Monthly,
}

/// What a bundle grants on purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleContents {
    #[serde(default)]
    pub coins: i64,
    #[serde(default)]
    pub entitlements: BTreeMap<EntitlementType, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDefinition {
    pub id:    String,
    pub name:  String,
    pub price: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub contents: BundleContents,
    #[serde(default)]
    pub purchase_limit: PurchaseLimit,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotionDefinition {
    pub potion_type:   PotionType,
    pub price:         i64,
    pub duration_days: u32,
    #[serde(default)]
    pub restricted_tiers: Vec<String>,
}

fn default_currency() -> String {
    "TWD".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct BundleCatalogFile {
    bundles: Vec<BundleDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct PotionCatalogFile {
    potions: Vec<PotionDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct UsageDefaultsFile {
    limits: BTreeMap<UsageResource, i64>,
}

#[derive(Debug, Clone)]
pub struct EconomyConfig {
    pub bundles: Vec<BundleDefinition>,
    pub potions: Vec<PotionDefinition>,
    /// Per-resource base limit; -1 means unlimited.
    pub usage_defaults: BTreeMap<UsageResource, i64>,
    /// Reset-calendar timezone, minutes east of UTC.
    pub policy_utc_offset_minutes: i32,
    /// How long the in-process bundle catalog cache stays fresh.
    pub catalog_cache_ttl_secs: u64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            bundles: default_bundles(),
            potions: default_potions(),
            usage_defaults: default_usage_limits(),
            policy_utc_offset_minutes: 480,
            catalog_cache_ttl_secs: 60,
        }
    }
}

impl EconomyConfig {
    /// Load catalogs from `data_dir`, keeping compiled-in defaults for any
    /// file that is missing or unreadable.
    pub fn load(data_dir: &str) -> LedgerResult<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(format!("{data_dir}/bundles.json")) {
            Ok(content) => {
                let file: BundleCatalogFile = serde_json::from_str(&content)?;
                config.bundles = file.bundles;
            }
            Err(e) => log::debug!("config: bundles.json not loaded ({e}), using built-in catalog"),
        }

        match std::fs::read_to_string(format!("{data_dir}/potions.json")) {
            Ok(content) => {
                let file: PotionCatalogFile = serde_json::from_str(&content)?;
                config.potions = file.potions;
            }
            Err(e) => log::debug!("config: potions.json not loaded ({e}), using built-in catalog"),
        }

        match std::fs::read_to_string(format!("{data_dir}/usage_limits.json")) {
            Ok(content) => {
                let file: UsageDefaultsFile = serde_json::from_str(&content)?;
                config.usage_defaults = file.limits;
            }
            Err(e) => log::debug!("config: usage_limits.json not loaded ({e}), using built-in limits"),
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        for bundle in &self.bundles {
            if bundle.price < 0 {
                return Err(LedgerError::Validation(format!(
                    "bundle '{}' has a negative price",
                    bundle.id
                )));
            }
            if bundle.contents.coins < 0 {
                return Err(LedgerError::Validation(format!(
                    "bundle '{}' grants negative coins",
                    bundle.id
                )));
            }
            if bundle.contents.entitlements.values().any(|v| *v < 0) {
                return Err(LedgerError::Validation(format!(
                    "bundle '{}' grants negative entitlements",
                    bundle.id
                )));
            }
        }
        for potion in &self.potions {
            if potion.duration_days == 0 || potion.duration_days > 365 {
                return Err(LedgerError::Validation(format!(
                    "potion '{}' duration must be within 1-365 days",
                    potion.potion_type
                )));
            }
        }
        Ok(())
    }

    /// Base limit for a resource; -1 (unlimited) when unconfigured.
    pub fn usage_limit(&self, resource: UsageResource) -> i64 {
        self.usage_defaults.get(&resource).copied().unwrap_or(-1)
    }

    pub fn potion(&self, potion_type: PotionType) -> Option<&PotionDefinition> {
        self.potions.iter().find(|p| p.potion_type == potion_type)
    }
}

fn default_bundles() -> Vec<BundleDefinition> {
    vec![
        BundleDefinition {
            id:    "starter_pack".into(),
            name:  "Starter Pack".into(),
            price: 99,
            currency: default_currency(),
            contents: BundleContents {
                coins: 300,
                entitlements: BTreeMap::from([(EntitlementType::PhotoUnlock, 5)]),
            },
            purchase_limit: PurchaseLimit::Once,
            active: true,
            order: 1,
        },
        BundleDefinition {
            id:    "weekly_coins".into(),
            name:  "Weekly Coin Bonus".into(),
            price: 150,
            currency: default_currency(),
            contents: BundleContents {
                coins: 520,
                entitlements: BTreeMap::new(),
            },
            purchase_limit: PurchaseLimit::Weekly,
            active: true,
            order: 2,
        },
        BundleDefinition {
            id:    "monthly_mega".into(),
            name:  "Monthly Mega Pack".into(),
            price: 990,
            currency: default_currency(),
            contents: BundleContents {
                coins: 3600,
                entitlements: BTreeMap::from([
                    (EntitlementType::PhotoUnlock, 20),
                    (EntitlementType::VideoUnlock, 5),
                    (EntitlementType::VoiceUnlock, 10),
                ]),
            },
            purchase_limit: PurchaseLimit::Monthly,
            active: true,
            order: 3,
        },
        BundleDefinition {
            id:    "creator_bundle".into(),
            name:  "Creator Bundle".into(),
            price: 450,
            currency: default_currency(),
            contents: BundleContents {
                coins: 1000,
                entitlements: BTreeMap::from([
                    (EntitlementType::CreateTicket, 10),
                    (EntitlementType::CharacterUnlock, 2),
                ]),
            },
            purchase_limit: PurchaseLimit::None,
            active: true,
            order: 4,
        },
    ]
}

fn default_potions() -> Vec<PotionDefinition> {
    vec![
        PotionDefinition {
            potion_type:      PotionType::MemoryBoost,
            price:            100,
            duration_days:    30,
            restricted_tiers: vec![],
        },
        PotionDefinition {
            potion_type:      PotionType::BrainBoost,
            price:            150,
            duration_days:    30,
            restricted_tiers: vec!["vvip".into()],
        },
    ]
}

fn default_usage_limits() -> BTreeMap<UsageResource, i64> {
    BTreeMap::from([
        (UsageResource::Conversation, 10),
        (UsageResource::Voice, 10),
        (UsageResource::Photo, 3),
        (UsageResource::Video, 0),
        (UsageResource::CharacterCreation, 3),
    ])
}
