//! Tile and style-pack transport abstraction.
//!
//! The scheduler never talks to the network directly; it goes through the
//! [`TileTransport`] trait. This keeps the download pipeline testable with
//! scripted transports and lets embedders swap the backend.
//!
//! The trait is dyn-compatible: async methods return [`BoxFuture`] so the
//! scheduler can hold an `Arc<dyn TileTransport>`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::geo::TileCoord;
use crate::region::GlyphsRasterizationMode;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default request timeout for the HTTP transport.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A transport failure during a fetch.
///
/// Non-fatal errors are transient (timeouts, 5xx responses) and are retried
/// by the scheduler; fatal errors terminate the job immediately.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    fatal: bool,
}

impl TransportError {
    /// A non-fatal (retryable) transport error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    /// A fatal transport error; the job will not retry it.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    /// True if the error terminates the job without retries.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A successfully fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// The resource payload.
    pub data: Bytes,
}

impl FetchedResource {
    /// Wrap raw bytes as a fetched resource.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Options accompanying a style-pack fetch.
#[derive(Debug, Clone, Default)]
pub struct StylePackOptions {
    /// Glyph rasterization mode requested for the pack.
    pub glyph_mode: GlyphsRasterizationMode,
    /// Opaque caller metadata forwarded with the request.
    pub metadata: Vec<u8>,
}

/// Transport for style packs and individual tiles.
///
/// Implementations must be `Send + Sync`; the scheduler shares one transport
/// across all job workers.
pub trait TileTransport: Send + Sync {
    /// Fetch the style pack for a style URI.
    fn fetch_style_pack(
        &self,
        style_uri: &str,
        options: &StylePackOptions,
    ) -> BoxFuture<'_, Result<FetchedResource, TransportError>>;

    /// Fetch one tile resource.
    ///
    /// `pixel_ratio` selects the raster resolution variant.
    fn fetch_tile(
        &self,
        style_uri: &str,
        tile: TileCoord,
        pixel_ratio: f32,
    ) -> BoxFuture<'_, Result<FetchedResource, TransportError>>;
}

/// Production transport backed by reqwest.
///
/// Maps connection-level failures and 5xx responses to transient errors,
/// and 4xx responses to fatal errors (retrying a 404 will not help).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create a transport against the given tile service endpoint.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(endpoint, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::fatal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, url: String) -> Result<FetchedResource, TransportError> {
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::transient(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TransportError::transient(format!(
                "HTTP {} from {}",
                status, url
            )));
        }
        if !status.is_success() {
            return Err(TransportError::fatal(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| TransportError::transient(format!("failed to read body: {}", e)))?;
        Ok(FetchedResource { data })
    }

    fn style_pack_url(&self, style_uri: &str) -> String {
        format!("{}/style-packs/{}", self.endpoint, urlencode(style_uri))
    }

    fn tile_url(&self, style_uri: &str, tile: TileCoord, pixel_ratio: f32) -> String {
        format!(
            "{}/tiles/{}/{}/{}/{}@{}x",
            self.endpoint,
            urlencode(style_uri),
            tile.zoom,
            tile.col,
            tile.row,
            pixel_ratio
        )
    }
}

/// Minimal percent-encoding for path segments built from style URIs.
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

impl TileTransport for HttpTransport {
    fn fetch_style_pack(
        &self,
        style_uri: &str,
        _options: &StylePackOptions,
    ) -> BoxFuture<'_, Result<FetchedResource, TransportError>> {
        let url = self.style_pack_url(style_uri);
        Box::pin(self.get(url))
    }

    fn fetch_tile(
        &self,
        style_uri: &str,
        tile: TileCoord,
        pixel_ratio: f32,
    ) -> BoxFuture<'_, Result<FetchedResource, TransportError>> {
        let url = self.tile_url(style_uri, tile, pixel_ratio);
        Box::pin(self.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_fatal_flag() {
        assert!(!TransportError::transient("timeout").is_fatal());
        assert!(TransportError::fatal("HTTP 404").is_fatal());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::transient("connection reset");
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(err.message(), "connection reset");
    }

    #[test]
    fn test_fetched_resource_len() {
        let res = FetchedResource::new(vec![1u8, 2, 3]);
        assert_eq!(res.len(), 3);
        assert!(!res.is_empty());
        assert!(FetchedResource::new(Vec::new()).is_empty());
    }

    #[test]
    fn test_urlencode_style_uri() {
        assert_eq!(
            urlencode("mapbox://styles/mapbox/standard"),
            "mapbox%3A%2F%2Fstyles%2Fmapbox%2Fstandard"
        );
        assert_eq!(urlencode("plain-name_1.0~x"), "plain-name_1.0~x");
    }

    #[test]
    fn test_http_transport_urls() {
        let transport = HttpTransport::new("https://tiles.example.com/").unwrap();
        let tile = TileCoord {
            row: 24640,
            col: 19295,
            zoom: 16,
        };
        let url = transport.tile_url("base", tile, 2.0);
        assert_eq!(url, "https://tiles.example.com/tiles/base/16/19295/24640@2x");

        let style = transport.style_pack_url("base");
        assert_eq!(style, "https://tiles.example.com/style-packs/base");
    }
}
