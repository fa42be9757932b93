//! Cache reaping: whole-cache clears and per-region removal.
//!
//! The [`CacheReaper`] is the only component allowed to delete cached data.
//! `clear_all` is refused while any download is active; `remove_region`
//! instead cancels the region's job first, waits for its terminal
//! transition, and then deletes the cached tiles.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::TileCache;
use crate::error::{Error, Result};
use crate::region::RegionStore;
use crate::scheduler::DownloadScheduler;

/// Clears cached data and removes downloaded regions on demand.
pub struct CacheReaper {
    scheduler: Arc<DownloadScheduler>,
    cache: Arc<dyn TileCache>,
    store: Arc<RegionStore>,
}

impl CacheReaper {
    /// Create a reaper over the scheduler's cache and the region store.
    pub fn new(
        scheduler: Arc<DownloadScheduler>,
        cache: Arc<dyn TileCache>,
        store: Arc<RegionStore>,
    ) -> Self {
        Self {
            scheduler,
            cache,
            store,
        }
    }

    /// Remove all cached data and every stored region definition.
    ///
    /// Fails with [`Error::CacheBusy`] if any download job is active. The
    /// scheduler's registry stays locked for the duration of the clear so
    /// no new job can start mid-way.
    pub async fn clear_all(&self) -> Result<()> {
        let mut registry = self.scheduler.registry_guard().await;
        let active = registry.values().filter(|h| h.is_active()).count();
        if active > 0 {
            return Err(Error::CacheBusy { active });
        }

        self.cache.clear_all().await?;
        self.store.clear_all()?;

        // Finished job handles are stale once their cached data is gone.
        let hub = self.scheduler.observer_hub();
        for id in registry.keys() {
            hub.drop_job(id);
        }
        registry.clear();

        info!("cache and region store cleared");
        Ok(())
    }

    /// Remove one region's cached tiles, cancelling its job if active.
    ///
    /// The job (if any) reaches INACTIVE(CANCELLED) and its observers are
    /// notified before any cached data is deleted. Removing an absent
    /// region is a success no-op. The region's definition is kept; use
    /// [`RegionStore::remove`] to delete it.
    pub async fn remove_region(&self, region_id: &str) -> Result<()> {
        if let Some(terminal) = self.scheduler.cancel_and_remove(region_id).await {
            debug!(region = %region_id, state = ?terminal, "job stopped before removal");
        }

        let removed = self.cache.delete_region(region_id).await?;
        self.scheduler.observer_hub().drop_job(region_id);

        info!(region = %region_id, entries = removed, "tile region removed");
        Ok(())
    }
}
