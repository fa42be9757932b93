//! Per-job download worker.
//!
//! One worker task runs per active job. The pipeline has two strict phases:
//! the style pack is fetched first, and tile fetches only start after it
//! succeeded; a style failure terminates the job without touching tiles.
//!
//! Every fetch goes through the same funnel: cancellation check, network
//! restriction check (disallowed attempts defer, they never fail), cache
//! lookup, then the network with bounded retry/backoff for transient
//! errors. Whatever happens, the worker performs the job's terminal
//! transition exactly once and publishes it as the final status update.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{JobHandle, TerminalState};
use super::policy::{NetworkMonitor, NetworkRestriction};
use super::SchedulerConfig;
use crate::cache::TileCache;
use crate::descriptor::TileDescriptor;
use crate::geo::TileCoord;
use crate::observer::ObserverHub;
use crate::region::Region;
use crate::transport::{FetchedResource, StylePackOptions, TileTransport, TransportError};

/// Resource id under which the style pack is cached.
pub(crate) const STYLE_PACK_RESOURCE: &str = "style-pack";

/// Everything a worker needs, bundled for the spawned task.
pub(crate) struct WorkerContext {
    pub handle: Arc<JobHandle>,
    pub region: Region,
    pub descriptors: Vec<TileDescriptor>,
    pub restriction: NetworkRestriction,
    pub config: SchedulerConfig,
    pub transport: Arc<dyn TileTransport>,
    pub cache: Arc<dyn TileCache>,
    pub network: Arc<dyn NetworkMonitor>,
    pub hub: Arc<ObserverHub>,
}

/// One resource the worker needs to acquire.
enum ResourceRequest<'a> {
    StylePack {
        style_uri: &'a str,
        options: StylePackOptions,
    },
    Tile {
        style_uri: &'a str,
        tile: TileCoord,
        pixel_ratio: f32,
    },
}

impl ResourceRequest<'_> {
    /// Cache key for the resource.
    fn resource_id(&self) -> String {
        match self {
            Self::StylePack { .. } => STYLE_PACK_RESOURCE.to_string(),
            Self::Tile {
                tile, pixel_ratio, ..
            } => tile_resource_id(*tile, *pixel_ratio),
        }
    }

    /// Issue the fetch against the transport.
    async fn fetch(
        &self,
        transport: &dyn TileTransport,
    ) -> Result<FetchedResource, TransportError> {
        match self {
            Self::StylePack { style_uri, options } => {
                transport.fetch_style_pack(style_uri, options).await
            }
            Self::Tile {
                style_uri,
                tile,
                pixel_ratio,
            } => transport.fetch_tile(style_uri, *tile, *pixel_ratio).await,
        }
    }
}

/// Cache key for one tile at a pixel ratio.
pub(crate) fn tile_resource_id(tile: TileCoord, pixel_ratio: f32) -> String {
    format!("{}/{}/{}@{}x", tile.zoom, tile.col, tile.row, pixel_ratio)
}

/// Outcome of one resource acquisition.
enum FetchOutcome {
    /// Got the bytes (from cache or network); value is the byte count.
    Done(u64),
    /// The job's cancellation token fired.
    Cancelled,
    /// Fatal transport error or exhausted retries.
    Failed(TransportError),
}

/// Run a download job to its terminal state.
pub(crate) async fn run(ctx: WorkerContext) {
    let job_id = ctx.handle.region_id().to_string();
    let token = ctx.handle.cancellation_token();

    ctx.handle.mark_active();
    info!(
        region = %job_id,
        descriptors = ctx.descriptors.len(),
        restriction = ?ctx.restriction,
        "download job started"
    );

    // Phase 1: style pack. Tiles are never fetched against an unloaded
    // style.
    let style_request = ResourceRequest::StylePack {
        style_uri: &ctx.region.style_uri,
        options: StylePackOptions {
            glyph_mode: ctx.region.glyph_mode,
            metadata: ctx.region.metadata.clone(),
        },
    };
    match acquire_resource(&ctx, &token, &style_request).await {
        FetchOutcome::Done(bytes) => {
            let progress = ctx.handle.record_completed(bytes);
            ctx.hub.status_changed(&job_id, &progress);
            debug!(region = %job_id, bytes, "style pack loaded");
        }
        FetchOutcome::Cancelled => return finish(&ctx, TerminalState::Cancelled),
        FetchOutcome::Failed(err) => {
            warn!(region = %job_id, error = %err, "style pack fetch failed");
            ctx.hub.error_occurred(&job_id, &err, true);
            return finish(&ctx, TerminalState::Failed);
        }
    }

    // Phase 2: tiles, restricted to the resolved descriptors.
    for descriptor in &ctx.descriptors {
        for tile in descriptor.tiles(&ctx.region.bounding_box) {
            let request = ResourceRequest::Tile {
                style_uri: descriptor.style_uri(),
                tile,
                pixel_ratio: descriptor.pixel_ratio(),
            };
            match acquire_resource(&ctx, &token, &request).await {
                FetchOutcome::Done(bytes) => {
                    let progress = ctx.handle.record_completed(bytes);
                    ctx.hub.status_changed(&job_id, &progress);
                }
                FetchOutcome::Cancelled => return finish(&ctx, TerminalState::Cancelled),
                FetchOutcome::Failed(err) => {
                    warn!(
                        region = %job_id,
                        zoom = tile.zoom,
                        row = tile.row,
                        col = tile.col,
                        error = %err,
                        "tile fetch failed"
                    );
                    ctx.hub.error_occurred(&job_id, &err, true);
                    return finish(&ctx, TerminalState::Failed);
                }
            }
        }
    }

    finish(&ctx, TerminalState::Complete);
}

/// Perform the terminal transition and publish the final status once.
///
/// Observers hear the terminal status before waiters on
/// [`JobHandle::wait`] are released, so code sequenced after `wait` (the
/// reaper dropping a job's observers, for one) cannot swallow it.
fn finish(ctx: &WorkerContext, terminal: TerminalState) {
    let job_id = ctx.handle.region_id();
    if let Some(final_progress) = ctx.handle.try_finish(terminal) {
        info!(region = %job_id, state = ?terminal, "download job finished");
        ctx.hub.status_changed(job_id, &final_progress);
        ctx.handle.announce_finished();
    }
}

/// The shared acquisition funnel: cache first, then the network under
/// restriction and retry policy.
async fn acquire_resource(
    ctx: &WorkerContext,
    token: &CancellationToken,
    request: &ResourceRequest<'_>,
) -> FetchOutcome {
    let region_id = ctx.handle.region_id();
    let resource_id = request.resource_id();

    if token.is_cancelled() {
        return FetchOutcome::Cancelled;
    }

    // Cache hit short-circuits the network entirely; this is what makes
    // re-downloads of an unchanged region cheap.
    match ctx.cache.get(region_id, &resource_id).await {
        Ok(Some(cached)) if !cached.expired || ctx.config.accept_expired => {
            debug!(region = %region_id, resource = %resource_id, "cache hit");
            return FetchOutcome::Done(cached.data.len() as u64);
        }
        Ok(_) => {}
        Err(e) => {
            // A broken cache read falls through to the network.
            warn!(region = %region_id, resource = %resource_id, error = %e, "cache read failed");
        }
    }

    let mut attempt: u32 = 0;
    loop {
        // Restriction check before every attempt. A disallowed fetch is
        // deferred, never counted as a failure.
        loop {
            if ctx.restriction.allows(ctx.network.is_metered()) {
                break;
            }
            debug!(
                region = %region_id,
                resource = %resource_id,
                restriction = ?ctx.restriction,
                "fetch deferred by network restriction"
            );
            tokio::select! {
                _ = token.cancelled() => return FetchOutcome::Cancelled,
                _ = tokio::time::sleep(ctx.config.defer_recheck) => {}
            }
        }

        // In-flight fetches are abandoned on cancellation, not awaited.
        let result = tokio::select! {
            _ = token.cancelled() => return FetchOutcome::Cancelled,
            result = request.fetch(ctx.transport.as_ref()) => result,
        };

        match result {
            Ok(resource) => {
                let bytes = resource.len();
                if let Err(e) = ctx
                    .cache
                    .put(region_id, &resource_id, resource.data.to_vec())
                    .await
                {
                    warn!(region = %region_id, resource = %resource_id, error = %e, "cache write failed");
                }
                return FetchOutcome::Done(bytes);
            }
            Err(err) if err.is_fatal() => return FetchOutcome::Failed(err),
            Err(err) => {
                attempt += 1;
                match ctx.config.retry.delay_for_attempt(attempt) {
                    Some(delay) => {
                        debug!(
                            region = %region_id,
                            resource = %resource_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient fetch error, retrying"
                        );
                        ctx.hub.error_occurred(region_id, &err, false);
                        tokio::select! {
                            _ = token.cancelled() => return FetchOutcome::Cancelled,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    None => {
                        return FetchOutcome::Failed(TransportError::fatal(format!(
                            "retries exhausted after {} attempts: {}",
                            attempt,
                            err.message()
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_resource_id_format() {
        let tile = TileCoord {
            row: 24640,
            col: 19295,
            zoom: 16,
        };
        assert_eq!(tile_resource_id(tile, 2.0), "16/19295/24640@2x");
    }

    #[test]
    fn test_style_pack_resource_id() {
        let request = ResourceRequest::StylePack {
            style_uri: "mapbox://styles/mapbox/standard",
            options: StylePackOptions::default(),
        };
        assert_eq!(request.resource_id(), STYLE_PACK_RESOURCE);
    }
}
