//! Concurrent download scheduling.
//!
//! The [`DownloadScheduler`] owns the registry of download jobs and spawns
//! one worker task per active job. Workers are independent; they share
//! state only through the [`ObserverHub`](crate::observer::ObserverHub) and
//! the cache, both of which serialize access internally.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilevault::{
//!     descriptor, DownloadScheduler, MemoryTileCache, NetworkRestriction, ObserverHub,
//!     SchedulerConfig, UnmeteredNetwork,
//! };
//!
//! let scheduler = DownloadScheduler::new(
//!     SchedulerConfig::default(),
//!     transport,
//!     Arc::new(MemoryTileCache::new()),
//!     Arc::new(UnmeteredNetwork),
//!     Arc::new(ObserverHub::new()),
//! );
//!
//! let descriptors = descriptor::resolve(&region)?;
//! let job = scheduler.start(&region, descriptors, NetworkRestriction::None).await;
//! let terminal = job.wait().await;
//! ```

mod job;
mod policy;
pub(crate) mod worker;

pub use job::{JobHandle, JobProgress, JobState, TerminalState};
pub use policy::{
    NetworkMonitor, NetworkRestriction, RetryPolicy, UnmeteredNetwork,
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::cache::TileCache;
use crate::descriptor::TileDescriptor;
use crate::observer::ObserverHub;
use crate::region::Region;
use crate::transport::TileTransport;

/// Default interval between restriction re-checks for deferred fetches.
pub const DEFAULT_DEFER_RECHECK_MS: u64 = 500;

/// Scheduler configuration.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Retry policy applied to transient transport errors.
    pub retry: RetryPolicy,
    /// How long a deferred fetch waits before re-checking the restriction.
    pub defer_recheck: Duration,
    /// Whether expired cached resources satisfy a fetch.
    pub accept_expired: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            defer_recheck: Duration::from_millis(DEFAULT_DEFER_RECHECK_MS),
            accept_expired: false,
        }
    }
}

impl SchedulerConfig {
    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the deferral re-check interval.
    pub fn with_defer_recheck(mut self, interval: Duration) -> Self {
        self.defer_recheck = interval;
        self
    }

    /// Accept expired cached resources.
    pub fn with_accept_expired(mut self, accept: bool) -> Self {
        self.accept_expired = accept;
        self
    }
}

type JobRegistry = HashMap<String, Arc<JobHandle>>;

/// Drives concurrent downloads of style packs and tile regions.
///
/// Constructed with its collaborators injected; the scheduler owns no
/// global state. At most one job per region id is active at a time:
/// [`start`](Self::start) on an already active id returns the existing
/// handle untouched.
pub struct DownloadScheduler {
    config: SchedulerConfig,
    transport: Arc<dyn TileTransport>,
    cache: Arc<dyn TileCache>,
    network: Arc<dyn NetworkMonitor>,
    hub: Arc<ObserverHub>,
    jobs: Mutex<JobRegistry>,
}

impl DownloadScheduler {
    /// Create a scheduler with explicit collaborators.
    pub fn new(
        config: SchedulerConfig,
        transport: Arc<dyn TileTransport>,
        cache: Arc<dyn TileCache>,
        network: Arc<dyn NetworkMonitor>,
        hub: Arc<ObserverHub>,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
            network,
            hub,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// The event hub jobs publish to.
    pub fn observer_hub(&self) -> &Arc<ObserverHub> {
        &self.hub
    }

    /// The cache jobs write into.
    pub fn cache(&self) -> &Arc<dyn TileCache> {
        &self.cache
    }

    /// Start downloading a region.
    ///
    /// Fetches the style pack first, then the tiles selected by the
    /// descriptors over the region's bounding box. If a job for this
    /// region id is already active, its handle is returned and no new
    /// work is scheduled.
    pub async fn start(
        &self,
        region: &Region,
        descriptors: Vec<TileDescriptor>,
        restriction: NetworkRestriction,
    ) -> Arc<JobHandle> {
        let mut jobs = self.jobs.lock().await;

        if let Some(existing) = jobs.get(&region.id) {
            if existing.is_active() {
                debug!(region = %region.id, "download already active, returning existing job");
                return existing.clone();
            }
        }

        // Style pack plus every tile across all descriptors.
        let required: u64 = 1 + descriptors
            .iter()
            .map(|d| d.required_tile_count(&region.bounding_box))
            .sum::<u64>();

        let handle = Arc::new(JobHandle::new(region.id.clone(), required));
        jobs.insert(region.id.clone(), handle.clone());

        let ctx = worker::WorkerContext {
            handle: handle.clone(),
            region: region.clone(),
            descriptors,
            restriction,
            config: self.config.clone(),
            transport: self.transport.clone(),
            cache: self.cache.clone(),
            network: self.network.clone(),
            hub: self.hub.clone(),
        };
        tokio::spawn(worker::run(ctx));

        handle
    }

    /// Look up the job handle for a region id, if one exists.
    pub async fn job(&self, region_id: &str) -> Option<Arc<JobHandle>> {
        self.jobs.lock().await.get(region_id).cloned()
    }

    /// Number of jobs currently active.
    pub async fn active_job_count(&self) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|h| h.is_active())
            .count()
    }

    /// Cancel a region's job (if any) and remove it from the registry.
    ///
    /// Waits for the worker's terminal transition so observers have been
    /// notified by the time this returns. Unknown ids return `None`.
    pub(crate) async fn cancel_and_remove(&self, region_id: &str) -> Option<TerminalState> {
        let handle = self.jobs.lock().await.remove(region_id)?;
        handle.cancel();
        let terminal = handle.wait().await;
        debug!(region = %region_id, state = ?terminal, "job removed");
        Some(terminal)
    }

    /// Lock the job registry for maintenance.
    ///
    /// The reaper holds this guard across its active-job check and the
    /// cache clear so no new job can start in between.
    pub(crate) async fn registry_guard(&self) -> MutexGuard<'_, JobRegistry> {
        self.jobs.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryTileCache;
    use crate::descriptor;
    use crate::region::test_support::rectangle_definition;
    use crate::region::ZoomRange;
    use crate::transport::{BoxFuture, FetchedResource, StylePackOptions, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport that always succeeds and counts fetches.
    #[derive(Default)]
    struct CountingTransport {
        style_fetches: AtomicUsize,
        tile_fetches: AtomicUsize,
    }

    impl TileTransport for CountingTransport {
        fn fetch_style_pack(
            &self,
            _style_uri: &str,
            _options: &StylePackOptions,
        ) -> BoxFuture<'_, Result<FetchedResource, TransportError>> {
            self.style_fetches.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(FetchedResource::new(vec![0u8; 64])) })
        }

        fn fetch_tile(
            &self,
            _style_uri: &str,
            _tile: crate::geo::TileCoord,
            _pixel_ratio: f32,
        ) -> BoxFuture<'_, Result<FetchedResource, TransportError>> {
            self.tile_fetches.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(FetchedResource::new(vec![0u8; 16])) })
        }
    }

    fn small_region(id: &str) -> Region {
        let mut def = rectangle_definition(id);
        def.zoom_range = ZoomRange::new(1, 2);
        def.into()
    }

    fn scheduler(transport: Arc<dyn TileTransport>) -> DownloadScheduler {
        DownloadScheduler::new(
            SchedulerConfig::default(),
            transport,
            Arc::new(MemoryTileCache::new()),
            Arc::new(UnmeteredNetwork),
            Arc::new(ObserverHub::new()),
        )
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler(transport.clone());
        let region = small_region("nantes");
        let descriptors = descriptor::resolve(&region).unwrap();

        let job = scheduler
            .start(&region, descriptors, NetworkRestriction::None)
            .await;
        assert_eq!(job.wait().await, TerminalState::Complete);

        let progress = job.progress();
        assert_eq!(
            progress.completed_resource_count,
            progress.required_resource_count
        );
        assert_eq!(transport.style_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_twice_returns_same_handle() {
        // A transport that never resolves keeps the first job active.
        struct StallingTransport;
        impl TileTransport for StallingTransport {
            fn fetch_style_pack(
                &self,
                _style_uri: &str,
                _options: &StylePackOptions,
            ) -> BoxFuture<'_, Result<FetchedResource, TransportError>> {
                Box::pin(futures::future::pending())
            }
            fn fetch_tile(
                &self,
                _style_uri: &str,
                _tile: crate::geo::TileCoord,
                _pixel_ratio: f32,
            ) -> BoxFuture<'_, Result<FetchedResource, TransportError>> {
                Box::pin(futures::future::pending())
            }
        }

        let scheduler = scheduler(Arc::new(StallingTransport));
        let region = small_region("nantes");
        let descriptors = descriptor::resolve(&region).unwrap();

        let first = scheduler
            .start(&region, descriptors.clone(), NetworkRestriction::None)
            .await;
        let second = scheduler
            .start(&region, descriptors, NetworkRestriction::None)
            .await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(scheduler.active_job_count().await, 1);

        first.cancel();
        assert_eq!(first.wait().await, TerminalState::Cancelled);
    }

    #[tokio::test]
    async fn test_restart_after_completion_reuses_cache() {
        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler(transport.clone());
        let region = small_region("nantes");
        let descriptors = descriptor::resolve(&region).unwrap();

        let job = scheduler
            .start(&region, descriptors.clone(), NetworkRestriction::None)
            .await;
        job.wait().await;
        let first_tiles = transport.tile_fetches.load(Ordering::SeqCst);
        assert!(first_tiles > 0);

        // Second run is served from cache, no new network fetches.
        let job = scheduler
            .start(&region, descriptors, NetworkRestriction::None)
            .await;
        assert_eq!(job.wait().await, TerminalState::Complete);
        assert_eq!(transport.tile_fetches.load(Ordering::SeqCst), first_tiles);
        assert_eq!(transport.style_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_jobs_for_distinct_regions_run_concurrently() {
        let transport = Arc::new(CountingTransport::default());
        let scheduler = scheduler(transport);
        let a = small_region("a");
        let b = small_region("b");

        let job_a = scheduler
            .start(&a, descriptor::resolve(&a).unwrap(), NetworkRestriction::None)
            .await;
        let job_b = scheduler
            .start(&b, descriptor::resolve(&b).unwrap(), NetworkRestriction::None)
            .await;

        assert_eq!(job_a.wait().await, TerminalState::Complete);
        assert_eq!(job_b.wait().await, TerminalState::Complete);
    }

    #[tokio::test]
    async fn test_cancel_and_remove_unknown_region() {
        let scheduler = scheduler(Arc::new(CountingTransport::default()));
        assert_eq!(scheduler.cancel_and_remove("ghost").await, None);
    }
}
