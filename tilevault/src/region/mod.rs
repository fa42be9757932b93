//! Offline region definitions.
//!
//! A [`Region`] names a geographic area to make available offline: polygon
//! geometry, a bounding box for coarse tile selection, a zoom range, a style
//! reference, a pixel ratio, the glyph rasterization mode, and an opaque
//! metadata blob. Regions are created through [`RegionStore::define`] which
//! validates and persists them.
//!
//! [`RegionStore::define`]: store::RegionStore::define

mod store;

pub use store::RegionStore;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::{BoundingBox, Polygon};

/// Where text glyphs are rasterized when rendering the offline region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlyphsRasterizationMode {
    /// All glyphs are fetched from the remote glyph source.
    #[default]
    None,
    /// Ideographic glyphs are rasterized locally, the rest fetched.
    IdeographsOnly,
    /// Every glyph is rasterized locally.
    AllLocal,
}

/// Inclusive zoom range for a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoomRange {
    /// Minimum zoom level.
    pub min: u8,
    /// Maximum zoom level.
    pub max: u8,
}

impl ZoomRange {
    /// Create a new zoom range.
    pub fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    /// Number of zoom levels in the range; zero for an inverted range.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.max - self.min) as usize + 1
        }
    }

    /// True for an inverted range, which validation rejects.
    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }
}

/// Caller-supplied inputs for defining a region.
///
/// Validated and persisted by [`RegionStore::define`]; the returned
/// [`Region`] is the durable record.
///
/// [`RegionStore::define`]: store::RegionStore::define
#[derive(Clone, Debug)]
pub struct RegionDefinition {
    /// Unique region identifier.
    pub id: String,
    /// Polygon geometry of the region.
    pub geometry: Polygon,
    /// Bounding box used for coarse tile selection.
    pub bounding_box: BoundingBox,
    /// Inclusive zoom range to download.
    pub zoom_range: ZoomRange,
    /// Style reference URI (e.g. `mapbox://styles/mapbox/standard-satellite`).
    pub style_uri: String,
    /// Pixel ratio affecting raster tile resolution; must be positive.
    pub pixel_ratio: f32,
    /// Glyph rasterization mode.
    pub glyph_mode: GlyphsRasterizationMode,
    /// Opaque caller metadata.
    pub metadata: Vec<u8>,
}

impl RegionDefinition {
    /// Create a definition with default pixel ratio, glyph mode and metadata.
    pub fn new(
        id: impl Into<String>,
        geometry: Polygon,
        bounding_box: BoundingBox,
        zoom_range: ZoomRange,
        style_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            geometry,
            bounding_box,
            zoom_range,
            style_uri: style_uri.into(),
            pixel_ratio: 1.0,
            glyph_mode: GlyphsRasterizationMode::default(),
            metadata: Vec::new(),
        }
    }

    /// Set the pixel ratio.
    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = ratio;
        self
    }

    /// Set the glyph rasterization mode.
    pub fn with_glyph_mode(mut self, mode: GlyphsRasterizationMode) -> Self {
        self.glyph_mode = mode;
        self
    }

    /// Attach opaque metadata.
    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate every invariant of the definition.
    ///
    /// Checked before any I/O: ring closure/winding/intersection, bounding
    /// box validity and containment of all vertices, zoom ordering, pixel
    /// ratio positivity, and the id character set.
    pub fn validate(&self) -> Result<()> {
        validate_id(&self.id)?;
        self.geometry
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;
        if !self.bounding_box.is_valid() {
            return Err(Error::validation("bounding box is malformed"));
        }
        if let Some(v) = self
            .geometry
            .vertices()
            .find(|v| !self.bounding_box.contains(*v))
        {
            return Err(Error::validation(format!(
                "vertex ({}, {}) lies outside the bounding box",
                v.lng, v.lat
            )));
        }
        if self.zoom_range.max < self.zoom_range.min {
            return Err(Error::validation(format!(
                "max zoom {} is below min zoom {}",
                self.zoom_range.max, self.zoom_range.min
            )));
        }
        if self.zoom_range.max > crate::geo::MAX_ZOOM {
            return Err(Error::validation(format!(
                "max zoom {} exceeds supported zoom {}",
                self.zoom_range.max,
                crate::geo::MAX_ZOOM
            )));
        }
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err(Error::validation(format!(
                "pixel ratio {} is not positive",
                self.pixel_ratio
            )));
        }
        Ok(())
    }
}

/// Region ids double as file names and cache key prefixes.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::validation("region id is empty"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::validation(format!(
            "region id '{}' contains characters outside [A-Za-z0-9._-]",
            id
        )));
    }
    Ok(())
}

/// A validated, persisted offline region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Unique region identifier.
    pub id: String,
    /// Polygon geometry.
    pub geometry: Polygon,
    /// Bounding box for coarse tile selection.
    pub bounding_box: BoundingBox,
    /// Inclusive zoom range.
    pub zoom_range: ZoomRange,
    /// Style reference URI.
    pub style_uri: String,
    /// Pixel ratio.
    pub pixel_ratio: f32,
    /// Glyph rasterization mode.
    pub glyph_mode: GlyphsRasterizationMode,
    /// Opaque caller metadata.
    pub metadata: Vec<u8>,
}

impl From<RegionDefinition> for Region {
    fn from(def: RegionDefinition) -> Self {
        Self {
            id: def.id,
            geometry: def.geometry,
            bounding_box: def.bounding_box,
            zoom_range: def.zoom_range,
            style_uri: def.style_uri,
            pixel_ratio: def.pixel_ratio,
            glyph_mode: def.glyph_mode,
            metadata: def.metadata,
        }
    }
}
