//! TileVault - Offline map tile region downloads
//!
//! This library manages offline geographic tile regions: defining a region
//! by polygon and zoom range, resolving its style into tile descriptors,
//! downloading the style pack and tiles concurrently with retry and
//! network-restriction policies, observing progress, and reclaiming cached
//! data when regions are removed.
//!
//! The typical flow:
//!
//! 1. Define and persist a region with [`RegionStore`].
//! 2. Resolve its style into descriptors with [`descriptor::resolve`].
//! 3. Start the download via [`DownloadScheduler::start`] and follow it
//!    through the [`ObserverHub`] or [`JobHandle::wait`].
//! 4. Remove regions or clear everything with the [`CacheReaper`].

pub mod cache;
pub mod descriptor;
pub mod error;
pub mod geo;
pub mod observer;
pub mod reaper;
pub mod region;
pub mod scheduler;
pub mod transport;

pub use cache::{CacheError, CachedResource, MemoryTileCache, TileCache};
pub use descriptor::TileDescriptor;
pub use error::{Error, Result};
pub use geo::{BoundingBox, LngLat, Polygon, TileCoord, TileRange};
pub use observer::{JobObserver, ObserverHub, SubscriptionId};
pub use reaper::CacheReaper;
pub use region::{
    GlyphsRasterizationMode, Region, RegionDefinition, RegionStore, ZoomRange,
};
pub use scheduler::{
    DownloadScheduler, JobHandle, JobProgress, JobState, NetworkMonitor, NetworkRestriction,
    RetryPolicy, SchedulerConfig, TerminalState, UnmeteredNetwork,
};
pub use transport::{
    FetchedResource, HttpTransport, StylePackOptions, TileTransport, TransportError,
};
