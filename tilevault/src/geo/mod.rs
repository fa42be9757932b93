//! Geographic primitives and Web Mercator tile math.
//!
//! Provides the polygon/bounding-box types used to define offline regions
//! and the conversions from geographic coordinates to Web Mercator tile
//! coordinates used for coarse tile selection.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Latitude limit of the Web Mercator projection.
pub const MAX_LAT: f64 = 85.05112878;

/// Southern latitude limit of the Web Mercator projection.
pub const MIN_LAT: f64 = -85.05112878;

/// Western longitude limit.
pub const MIN_LON: f64 = -180.0;

/// Eastern longitude limit.
pub const MAX_LON: f64 = 180.0;

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 22;

/// A longitude/latitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    /// Longitude in degrees (-180.0 to 180.0).
    pub lng: f64,
    /// Latitude in degrees (-90.0 to 90.0).
    pub lat: f64,
}

impl LngLat {
    /// Create a new coordinate.
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

/// An axis-aligned geographic bounding box.
///
/// Required input for region definitions, independent of the polygon
/// geometry; used for coarse tile selection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge in degrees.
    pub min_lng: f64,
    /// Southern edge in degrees.
    pub min_lat: f64,
    /// Eastern edge in degrees.
    pub max_lng: f64,
    /// Northern edge in degrees.
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> Self {
        Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        }
    }

    /// True if the box edges are finite and properly ordered.
    pub fn is_valid(&self) -> bool {
        self.min_lng.is_finite()
            && self.min_lat.is_finite()
            && self.max_lng.is_finite()
            && self.max_lat.is_finite()
            && self.min_lng <= self.max_lng
            && self.min_lat <= self.max_lat
            && self.min_lng >= MIN_LON
            && self.max_lng <= MAX_LON
            && self.min_lat >= -90.0
            && self.max_lat <= 90.0
    }

    /// True if the given point lies inside or on the box boundary.
    pub fn contains(&self, p: LngLat) -> bool {
        p.lng >= self.min_lng
            && p.lng <= self.max_lng
            && p.lat >= self.min_lat
            && p.lat <= self.max_lat
    }
}

/// Errors produced by polygon validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// A ring has fewer than four vertices (three distinct plus closure).
    TooFewVertices(usize),
    /// First and last vertex of a ring differ.
    RingNotClosed,
    /// The outer ring is wound clockwise.
    NotCounterClockwise,
    /// Two non-adjacent ring edges cross.
    SelfIntersecting,
    /// A vertex is not a finite coordinate.
    NonFiniteVertex,
    /// A hole ring is wound counter-clockwise.
    HoleNotClockwise,
    /// A hole is not contained within the outer ring.
    HoleOutsideOuter,
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewVertices(n) => write!(f, "ring has only {} vertices", n),
            Self::RingNotClosed => write!(f, "ring is not closed"),
            Self::NotCounterClockwise => write!(f, "outer ring is not counter-clockwise"),
            Self::SelfIntersecting => write!(f, "ring is self-intersecting"),
            Self::NonFiniteVertex => write!(f, "ring contains a non-finite vertex"),
            Self::HoleNotClockwise => write!(f, "hole ring is not clockwise"),
            Self::HoleOutsideOuter => {
                write!(f, "hole is not contained within the outer ring")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

/// A polygon with a closed outer ring and optional holes.
///
/// Vertices are ordered counter-clockwise per the right-hand rule and the
/// first/last vertex of every ring must be identical.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// The outer boundary ring.
    pub outer: Vec<LngLat>,
    /// Interior holes, if any.
    pub holes: Vec<Vec<LngLat>>,
}

impl Polygon {
    /// Create a polygon without holes.
    pub fn new(outer: Vec<LngLat>) -> Self {
        Self {
            outer,
            holes: Vec::new(),
        }
    }

    /// Create a polygon with interior holes.
    pub fn with_holes(outer: Vec<LngLat>, holes: Vec<Vec<LngLat>>) -> Self {
        Self { outer, holes }
    }

    /// Validate the polygon rings.
    ///
    /// Checks closure, vertex count, finiteness, and self-intersection of
    /// every ring; the outer ring must be counter-clockwise and each hole
    /// clockwise (right-hand rule) and strictly inside the outer ring.
    pub fn validate(&self) -> std::result::Result<(), GeometryError> {
        validate_ring(&self.outer)?;
        if signed_area(&self.outer) <= 0.0 {
            return Err(GeometryError::NotCounterClockwise);
        }
        for hole in &self.holes {
            validate_ring(hole)?;
            if signed_area(hole) >= 0.0 {
                return Err(GeometryError::HoleNotClockwise);
            }
            if !ring_contains_ring(&self.outer, hole) {
                return Err(GeometryError::HoleOutsideOuter);
            }
        }
        Ok(())
    }

    /// Iterate over every vertex of the outer ring and all holes.
    pub fn vertices(&self) -> impl Iterator<Item = LngLat> + '_ {
        self.outer
            .iter()
            .copied()
            .chain(self.holes.iter().flat_map(|h| h.iter().copied()))
    }
}

fn validate_ring(ring: &[LngLat]) -> std::result::Result<(), GeometryError> {
    if ring.len() < 4 {
        return Err(GeometryError::TooFewVertices(ring.len()));
    }
    if ring.iter().any(|p| !p.lng.is_finite() || !p.lat.is_finite()) {
        return Err(GeometryError::NonFiniteVertex);
    }
    let first = ring[0];
    let last = ring[ring.len() - 1];
    if first != last {
        return Err(GeometryError::RingNotClosed);
    }
    if ring_self_intersects(ring) {
        return Err(GeometryError::SelfIntersecting);
    }
    Ok(())
}

/// Twice the signed area of a closed ring (positive for counter-clockwise).
fn signed_area(ring: &[LngLat]) -> f64 {
    let mut area = 0.0;
    for w in ring.windows(2) {
        area += (w[1].lng - w[0].lng) * (w[1].lat + w[0].lat);
    }
    // Shoelace with the y-sum form: negative for CCW, so flip the sign.
    -area
}

/// Check whether any two non-adjacent edges of a closed ring cross.
fn ring_self_intersects(ring: &[LngLat]) -> bool {
    // Edges are (ring[i], ring[i+1]) for i in 0..n-1; the ring is closed so
    // the last edge ends at ring[0]. Adjacent edges share an endpoint and
    // are skipped, as is the first/last pair.
    let n = ring.len() - 1;
    for i in 0..n {
        for j in (i + 1)..n {
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            if segments_intersect(ring[i], ring[i + 1], ring[j], ring[j + 1]) {
                return true;
            }
        }
    }
    false
}

/// Ray-casting point-in-ring test over a closed ring.
fn point_in_ring(ring: &[LngLat], p: LngLat) -> bool {
    let n = ring.len() - 1;
    let mut inside = false;
    for i in 0..n {
        let a = ring[i];
        let b = ring[i + 1];
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let crossing = a.lng + (p.lat - a.lat) / (b.lat - a.lat) * (b.lng - a.lng);
            if p.lng < crossing {
                inside = !inside;
            }
        }
    }
    inside
}

/// True if every vertex of `hole` lies inside `outer` and no edge of the
/// two rings crosses.
fn ring_contains_ring(outer: &[LngLat], hole: &[LngLat]) -> bool {
    if !hole.iter().all(|p| point_in_ring(outer, *p)) {
        return false;
    }
    for i in 0..outer.len() - 1 {
        for j in 0..hole.len() - 1 {
            if segments_intersect(outer[i], outer[i + 1], hole[j], hole[j + 1]) {
                return false;
            }
        }
    }
    true
}

fn orientation(a: LngLat, b: LngLat, c: LngLat) -> f64 {
    (b.lng - a.lng) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lng - a.lng)
}

fn segments_intersect(p1: LngLat, p2: LngLat, q1: LngLat, q2: LngLat) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// A single Web Mercator tile coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Tile row (increases southward).
    pub row: u32,
    /// Tile column (increases eastward).
    pub col: u32,
    /// Zoom level.
    pub zoom: u8,
}

/// Converts geographic coordinates to the containing tile at a zoom level.
///
/// The latitude is clamped to the Web Mercator range before projection, so
/// polar inputs select the nearest valid tile row rather than failing.
#[inline]
pub fn tile_at(lng: f64, lat: f64, zoom: u8) -> TileCoord {
    let n = 2.0_f64.powi(zoom as i32);
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let lng = lng.clamp(MIN_LON, MAX_LON);

    let col = (((lng + 180.0) / 360.0 * n) as u32).min(n as u32 - 1);

    let lat_rad = lat * PI / 180.0;
    let row = ((((1.0 - lat_rad.tan().asinh() / PI) / 2.0) * n) as u32).min(n as u32 - 1);

    TileCoord { row, col, zoom }
}

/// The rectangle of tiles covering a bounding box at one zoom level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRange {
    /// Northernmost row.
    pub min_row: u32,
    /// Southernmost row.
    pub max_row: u32,
    /// Westernmost column.
    pub min_col: u32,
    /// Easternmost column.
    pub max_col: u32,
    /// Zoom level of the range.
    pub zoom: u8,
}

impl TileRange {
    /// Tiles covering `bbox` at the given zoom level.
    pub fn covering(bbox: &BoundingBox, zoom: u8) -> Self {
        // Row grows southward, so the north-west corner yields the minimum
        // row and column.
        let nw = tile_at(bbox.min_lng, bbox.max_lat, zoom);
        let se = tile_at(bbox.max_lng, bbox.min_lat, zoom);
        Self {
            min_row: nw.row,
            max_row: se.row,
            min_col: nw.col,
            max_col: se.col,
            zoom,
        }
    }

    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        let rows = (self.max_row - self.min_row + 1) as u64;
        let cols = (self.max_col - self.min_col + 1) as u64;
        rows * cols
    }

    /// Iterate the tiles in row-major order.
    pub fn iter(self) -> impl Iterator<Item = TileCoord> {
        let Self {
            min_row,
            max_row,
            min_col,
            max_col,
            zoom,
        } = self;
        (min_row..=max_row)
            .flat_map(move |row| (min_col..=max_col).map(move |col| TileCoord { row, col, zoom }))
    }
}
