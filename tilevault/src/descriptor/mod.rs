//! Tileset descriptors.
//!
//! A [`TileDescriptor`] is the abstract addressing of which tiles are needed
//! for one (style, zoom range, pixel ratio, glyph mode) combination. It is
//! derived from a region by [`resolve`], which is pure and deterministic:
//! identical regions always produce identical descriptor sets, which is what
//! makes re-downloads idempotent against the cache.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::{BoundingBox, TileCoord, TileRange};
use crate::region::{GlyphsRasterizationMode, Region, ZoomRange};

/// URI schemes accepted as style references.
const STYLE_SCHEMES: [&str; 4] = ["mapbox://", "http://", "https://", "file://"];

/// An immutable tileset descriptor.
///
/// The pixel ratio is stored by bit pattern so descriptors can be hashed
/// and compared exactly; use [`pixel_ratio`](Self::pixel_ratio) to read it
/// back as a float.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileDescriptor {
    style_uri: String,
    zoom_range: ZoomRange,
    pixel_ratio_bits: u32,
    glyph_mode: GlyphsRasterizationMode,
}

impl TileDescriptor {
    /// The style URI this descriptor addresses.
    pub fn style_uri(&self) -> &str {
        &self.style_uri
    }

    /// The inclusive zoom range.
    pub fn zoom_range(&self) -> ZoomRange {
        self.zoom_range
    }

    /// The pixel ratio as a float.
    pub fn pixel_ratio(&self) -> f32 {
        f32::from_bits(self.pixel_ratio_bits)
    }

    /// The glyph rasterization mode.
    pub fn glyph_mode(&self) -> GlyphsRasterizationMode {
        self.glyph_mode
    }

    /// Number of tiles needed to cover `bbox` across the descriptor's zoom
    /// range.
    pub fn required_tile_count(&self, bbox: &BoundingBox) -> u64 {
        (self.zoom_range.min..=self.zoom_range.max)
            .map(|zoom| TileRange::covering(bbox, zoom).count())
            .sum()
    }

    /// Enumerate the tiles covering `bbox`, shallowest zoom first, each
    /// level in row-major order. The order is deterministic.
    pub fn tiles<'a>(&'a self, bbox: &'a BoundingBox) -> impl Iterator<Item = TileCoord> + 'a {
        (self.zoom_range.min..=self.zoom_range.max)
            .flat_map(move |zoom| TileRange::covering(bbox, zoom).iter())
    }
}

/// Expand a region into its tileset descriptors.
///
/// Pure function of the region's (style, zoom range, pixel ratio, glyph
/// mode). A region carries one such combination, so the result is a single
/// descriptor; the `Vec` shape leaves room for callers that attach extra
/// descriptors to one download job.
///
/// Fails with [`Error::StyleResolution`] if the style reference has no
/// recognised scheme.
pub fn resolve(region: &Region) -> Result<Vec<TileDescriptor>> {
    let uri = region.style_uri.trim();
    if uri.is_empty() {
        return Err(Error::style(uri, "style reference is empty"));
    }
    if !STYLE_SCHEMES.iter().any(|s| uri.starts_with(s)) {
        return Err(Error::style(
            uri,
            format!("unrecognised scheme (expected one of {:?})", STYLE_SCHEMES),
        ));
    }

    Ok(vec![TileDescriptor {
        style_uri: uri.to_string(),
        zoom_range: region.zoom_range,
        pixel_ratio_bits: region.pixel_ratio.to_bits(),
        glyph_mode: region.glyph_mode,
    }])
}
