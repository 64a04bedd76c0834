//! Tile grid math for the backend's map tiling scheme.
//!
//! The backend partitions the world into a Web-Mercator grid whose edge
//! length depends on zoom. Tiles are addressed by string keys of the form
//! `{zoom}_{x}_{y}_0_8_100`.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: u32 = 3;
pub const MAX_ZOOM: u32 = 15;

const TILES_PER_EDGE: [u32; 16] = [
    1, 1, 1, 40, 40, 80, 80, 320, 1000, 2000, 2000, 4000, 8000, 16000, 16000, 32000,
];

const KEY_SUFFIX: &str = "0_8_100";

/// Web-Mercator latitude limit; the projection diverges at the poles.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

/// Meters per degree of latitude used by [`BoundingRegion::from_square`].
const METERS_PER_LAT_DEGREE: f64 = 111_000.0;

pub fn clamp_zoom(zoom: u32) -> u32 {
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Grid edge length at `zoom`, clamped to `[3, 15]`.
pub fn tiles_per_edge(zoom: u32) -> u32 {
    TILES_PER_EDGE[clamp_zoom(zoom) as usize]
}

/// Row of `lat`. Latitudes past the Mercator limit land in the edge rows.
pub fn lat_to_tile_y(lat: f64, tiles_per_edge: u32) -> i64 {
    let rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (1.0 - (rad.tan() + 1.0 / rad.cos()).ln() / PI) / 2.0 * f64::from(tiles_per_edge);
    clamp_to_grid(y, tiles_per_edge)
}

/// Column of `lng`. The antimeridian at +180 belongs to the last column.
pub fn lng_to_tile_x(lng: f64, tiles_per_edge: u32) -> i64 {
    let x = (lng / 360.0 + 0.5) * f64::from(tiles_per_edge);
    clamp_to_grid(x, tiles_per_edge)
}

fn clamp_to_grid(index: f64, tiles_per_edge: u32) -> i64 {
    (index.trunc() as i64).clamp(0, i64::from(tiles_per_edge) - 1)
}

/// Longitude of the western edge of column `x`. Diagnostic only.
pub fn tile_x_to_lng(x: i64, tiles_per_edge: u32) -> f64 {
    x as f64 / f64::from(tiles_per_edge) * 360.0 - 180.0
}

/// Latitude of the northern edge of row `y`. Diagnostic only.
pub fn tile_y_to_lat(y: i64, tiles_per_edge: u32) -> f64 {
    let n = (1.0 - 2.0 * y as f64 / f64::from(tiles_per_edge)) * PI;
    n.sinh().atan().to_degrees()
}

/// Identifier of one tile at one zoom level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileKey {
    zoom: u32,
    x: i64,
    y: i64,
}

impl TileKey {
    pub fn new(zoom: u32, x: i64, y: i64) -> Self {
        Self { zoom, x, y }
    }

    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn x(&self) -> i64 {
        self.x
    }

    pub fn y(&self) -> i64 {
        self.y
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}", self.zoom, self.x, self.y, KEY_SUFFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed tile key \"{0}\"")]
pub struct TileKeyParseError(pub String);

impl FromStr for TileKey {
    type Err = TileKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TileKeyParseError(s.to_string());
        let mut parts = s.splitn(4, '_');
        let zoom = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let x = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        let y = parts.next().and_then(|p| p.parse().ok()).ok_or_else(err)?;
        if parts.next() != Some(KEY_SUFFIX) {
            return Err(err());
        }
        Ok(Self { zoom, x, y })
    }
}

impl TryFrom<String> for TileKey {
    type Error = TileKeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TileKey> for String {
    fn from(key: TileKey) -> Self {
        key.to_string()
    }
}

/// A lat/lng box together with the tiles covering it at one zoom.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingRegion {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
    zoom: u32,
    tiles: Vec<(i64, i64)>,
}

impl BoundingRegion {
    /// Builds the region for a box. Corners given out of order are normalized
    /// so that `min <= max` always holds.
    pub fn from_box(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64, zoom: u32) -> Self {
        let (min_lat, max_lat) = ordered(min_lat, max_lat);
        let (min_lng, max_lng) = ordered(min_lng, max_lng);
        let tpe = tiles_per_edge(zoom);
        let (x0, x1) = ordered(lng_to_tile_x(min_lng, tpe), lng_to_tile_x(max_lng, tpe));
        // Latitude grows northward while tile rows grow southward.
        let (y0, y1) = ordered(lat_to_tile_y(min_lat, tpe), lat_to_tile_y(max_lat, tpe));

        let tiles = (x0..=x1)
            .flat_map(|x| (y0..=y1).map(move |y| (x, y)))
            .collect();

        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
            zoom,
            tiles,
        }
    }

    pub fn from_range(lat_range: (f64, f64), lng_range: (f64, f64), zoom: u32) -> Self {
        Self::from_box(lat_range.0, lng_range.0, lat_range.1, lng_range.1, zoom)
    }

    /// A box of `radius_m` meters around a center point.
    pub fn from_square(center_lat: f64, center_lng: f64, radius_m: f64, zoom: u32) -> Self {
        let d_lat = radius_m / METERS_PER_LAT_DEGREE;
        let d_lng = radius_m / (METERS_PER_LAT_DEGREE * center_lat.to_radians().cos());
        Self::from_box(
            center_lat - d_lat,
            center_lng - d_lng,
            center_lat + d_lat,
            center_lng + d_lng,
            zoom,
        )
    }

    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn tiles(&self) -> &[(i64, i64)] {
        &self.tiles
    }

    pub fn tile_keys(&self) -> Vec<TileKey> {
        self.tiles
            .iter()
            .map(|&(x, y)| TileKey::new(self.zoom, x, y))
            .collect()
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }

    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }

    pub fn min_lng(&self) -> f64 {
        self.min_lng
    }

    pub fn max_lng(&self) -> f64 {
        self.max_lng
    }

    pub fn min_lat_e6(&self) -> i64 {
        to_e6(self.min_lat)
    }

    pub fn max_lat_e6(&self) -> i64 {
        to_e6(self.max_lat)
    }

    pub fn min_lng_e6(&self) -> i64 {
        to_e6(self.min_lng)
    }

    pub fn max_lng_e6(&self) -> i64 {
        to_e6(self.max_lng)
    }
}

impl fmt::Display for BoundingRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6},{:.6}]x[{:.6},{:.6}]@z{} ({} tiles)",
            self.min_lat,
            self.max_lat,
            self.min_lng,
            self.max_lng,
            self.zoom,
            self.tiles.len()
        )
    }
}

pub fn to_e6(degrees: f64) -> i64 {
    (degrees * 1e6).trunc() as i64
}

fn ordered<T: PartialOrd>(a: T, b: T) -> (T, T) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}
