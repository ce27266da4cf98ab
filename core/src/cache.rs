//! TTL cache for the bundle catalog.
//!
//! An explicit component instead of an ambient module-level cache: the TTL
//! is injected and every catalog write path calls `invalidate`.

use crate::config::BundleDefinition;
use crate::error::LedgerResult;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct CatalogCache {
    ttl:  Duration,
    slot: Mutex<Option<CacheSlot>>,
}

struct CacheSlot {
    loaded_at: Instant,
    bundles:   Vec<BundleDefinition>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: Mutex::new(None) }
    }

    /// Serve the cached catalog while fresh; otherwise run `load` and cache
    /// its result. A failed load leaves the cache empty rather than pinning
    /// an error.
    pub fn get_or_load(
        &self,
        load: impl FnOnce() -> LedgerResult<Vec<BundleDefinition>>,
    ) -> LedgerResult<Vec<BundleDefinition>> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(cached) = slot.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(cached.bundles.clone());
            }
        }
        let bundles = load()?;
        *slot = Some(CacheSlot {
            loaded_at: Instant::now(),
            bundles:   bundles.clone(),
        });
        Ok(bundles)
    }

    /// Drop the cached catalog. Called by every write path.
    pub fn invalidate(&self) {
        self.slot.lock().unwrap().take();
        log::debug!("catalog: cache invalidated");
    }
}
