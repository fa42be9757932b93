//! Persistent cache backend abstraction.
//!
//! The cache stores raw resource bytes keyed by (region id, resource id).
//! The interface is intentionally minimal and domain-agnostic; it imposes
//! no serialization opinions and is dyn-compatible so the scheduler and
//! reaper can share an `Arc<dyn TileCache>`.

use dashmap::DashMap;

use crate::transport::BoxFuture;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// I/O failure in a disk-backed provider.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Provider-specific failure.
    #[error("cache provider error: {0}")]
    Provider(String),
}

/// A cached resource together with its freshness.
#[derive(Debug, Clone)]
pub struct CachedResource {
    /// The resource payload.
    pub data: Vec<u8>,
    /// True if the backend considers the entry expired.
    pub expired: bool,
}

/// Byte-addressable cache keyed by region id + resource id.
pub trait TileCache: Send + Sync {
    /// Store a resource for a region, replacing any previous value.
    fn put(
        &self,
        region_id: &str,
        resource_id: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Retrieve a resource, reporting freshness.
    ///
    /// Returns `Ok(None)` on a miss.
    fn get(
        &self,
        region_id: &str,
        resource_id: &str,
    ) -> BoxFuture<'_, Result<Option<CachedResource>, CacheError>>;

    /// Delete every resource cached for a region.
    ///
    /// Returns the number of entries removed; deleting an absent region is
    /// a success no-op.
    fn delete_region(&self, region_id: &str) -> BoxFuture<'_, Result<usize, CacheError>>;

    /// Remove all cached data.
    fn clear_all(&self) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Current number of cached entries.
    fn entry_count(&self) -> u64;
}

/// In-memory cache provider.
///
/// Entries never expire; `CachedResource::expired` is always false. The map
/// is keyed by region id so whole-region deletes stay cheap.
#[derive(Debug, Default)]
pub struct MemoryTileCache {
    regions: DashMap<String, DashMap<String, Vec<u8>>>,
}

impl MemoryTileCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileCache for MemoryTileCache {
    fn put(
        &self,
        region_id: &str,
        resource_id: &str,
        data: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let region_id = region_id.to_string();
        let resource_id = resource_id.to_string();
        Box::pin(async move {
            self.regions
                .entry(region_id)
                .or_default()
                .insert(resource_id, data);
            Ok(())
        })
    }

    fn get(
        &self,
        region_id: &str,
        resource_id: &str,
    ) -> BoxFuture<'_, Result<Option<CachedResource>, CacheError>> {
        let region_id = region_id.to_string();
        let resource_id = resource_id.to_string();
        Box::pin(async move {
            let found = self.regions.get(&region_id).and_then(|resources| {
                resources.get(&resource_id).map(|data| CachedResource {
                    data: data.clone(),
                    expired: false,
                })
            });
            Ok(found)
        })
    }

    fn delete_region(&self, region_id: &str) -> BoxFuture<'_, Result<usize, CacheError>> {
        let region_id = region_id.to_string();
        Box::pin(async move {
            let removed = self
                .regions
                .remove(&region_id)
                .map(|(_, resources)| resources.len())
                .unwrap_or(0);
            Ok(removed)
        })
    }

    fn clear_all(&self) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.regions.clear();
            Ok(())
        })
    }

    fn entry_count(&self) -> u64 {
        self.regions.iter().map(|r| r.len() as u64).sum()
    }
}
