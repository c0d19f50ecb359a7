//! Tile coordinate system and grid geometry
//! Supports rectangular and offset-row hexagonal lattices

use std::fmt;
use std::str::FromStr;

use crate::config::{GridShape, WallConfig};
use crate::error::WallError;

/// Slack added before flooring so exact cell origins survive float error.
const FLOOR_EPSILON: f64 = 1e-9;
/// Extra slack per unit of magnitude; float error grows with the coordinate.
const FLOOR_RELATIVE_EPSILON: f64 = 1e-12;

/// Floor a fractional cell index, tolerating rounding just below an integer
fn floor_cell(index: f64) -> i64 {
    (index + FLOOR_EPSILON + index.abs() * FLOOR_RELATIVE_EPSILON).floor() as i64
}

/// Integer cell position on the unbounded wall
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TileCoord {
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Neighbour one step away
    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Resolution tier
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Lod {
    Low,
    High,
}

impl Lod {
    /// Single threshold: strictly above it the high tier is used
    pub fn for_scale(scale: f64, threshold: f64) -> Self {
        if scale > threshold { Lod::High } else { Lod::Low }
    }

    pub fn index(self) -> u8 {
        match self {
            Lod::Low => 0,
            Lod::High => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Lod::Low),
            1 => Some(Lod::High),
            _ => None,
        }
    }

    pub fn is_high(self) -> bool {
        self == Lod::High
    }
}

/// Identity of one resolution tier of one cell
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TileKey {
    pub coord: TileCoord,
    pub lod: Lod,
}

impl TileKey {
    pub fn new(coord: TileCoord, lod: Lod) -> Self {
        Self { coord, lod }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.coord.x, self.coord.y, self.lod.index())
    }
}

impl FromStr for TileKey {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || WallError::MalformedKey(s.to_string());
        let mut parts = s.split(',');
        let x = parts.next().and_then(|p| p.trim().parse::<i64>().ok());
        let y = parts.next().and_then(|p| p.trim().parse::<i64>().ok());
        let lod = parts
            .next()
            .and_then(|p| p.trim().parse::<u8>().ok())
            .and_then(Lod::from_index);

        match (x, y, lod, parts.next()) {
            (Some(x), Some(y), Some(lod), None) => Ok(TileKey::new(TileCoord::new(x, y), lod)),
            _ => Err(malformed()),
        }
    }
}

/// Coordinate transforms for one grid shape
#[derive(Clone, Debug)]
pub struct GridGeometry {
    shape: GridShape,
    tile_width: f64,
    tile_height: f64,
    pitch_x: f64,
    pitch_y: f64,
    exclusion_radius: Option<f64>,
}

impl GridGeometry {
    pub fn new(config: &WallConfig) -> Self {
        let width = config.tile_width;
        let (tile_height, pitch_x, pitch_y) = match config.shape {
            GridShape::Rectangular => (config.tile_height, width, config.tile_height),
            GridShape::Hexagonal { gutter, row_overlap } => {
                let height = width * 60f64.to_radians().sin();
                (height, width + gutter, height * row_overlap)
            }
        };

        Self {
            shape: config.shape,
            tile_width: width,
            tile_height,
            pitch_x,
            pitch_y,
            exclusion_radius: config.exclusion_radius,
        }
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Drawn size of one tile in world pixels
    pub fn tile_size(&self) -> (f64, f64) {
        (self.tile_width, self.tile_height)
    }

    /// Distance between neighbouring cell origins along each axis
    pub fn pitch(&self) -> (f64, f64) {
        (self.pitch_x, self.pitch_y)
    }

    /// Horizontal shift applied to a row (odd hexagonal rows move half a pitch)
    pub fn row_shift(&self, row: i64) -> f64 {
        match self.shape {
            GridShape::Hexagonal { .. } if row.rem_euclid(2) == 1 => self.pitch_x / 2.0,
            _ => 0.0,
        }
    }

    /// Top-left corner of a cell in world space
    pub fn tile_to_world(&self, coord: TileCoord) -> (f64, f64) {
        (
            coord.x as f64 * self.pitch_x + self.row_shift(coord.y),
            coord.y as f64 * self.pitch_y,
        )
    }

    /// Cell containing a world position. Inverts `tile_to_world` for cell
    /// indices up to 1e9 in magnitude.
    pub fn world_to_tile(&self, wx: f64, wy: f64) -> TileCoord {
        let y = floor_cell(wy / self.pitch_y);
        let x = floor_cell((wx - self.row_shift(y)) / self.pitch_x);
        TileCoord::new(x, y)
    }

    /// Center of a cell in world space
    pub fn tile_center(&self, coord: TileCoord) -> (f64, f64) {
        let (x, y) = self.tile_to_world(coord);
        (x + self.tile_width / 2.0, y + self.tile_height / 2.0)
    }

    /// Whether a cell falls inside the reserved center region: its center lies
    /// within the exclusion radius of the center of cell (0,0), not of the
    /// world origin.
    pub fn is_excluded(&self, coord: TileCoord) -> bool {
        match self.exclusion_radius {
            Some(radius) => {
                let (ox, oy) = self.tile_center(TileCoord::new(0, 0));
                let (cx, cy) = self.tile_center(coord);
                (cx - ox).hypot(cy - oy) < radius
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> GridGeometry {
        GridGeometry::new(&WallConfig::default())
    }

    fn hex() -> GridGeometry {
        GridGeometry::new(&WallConfig::hexagonal())
    }

    #[test]
    fn test_round_trip_rectangular() {
        let geometry = rect();
        for x in -40..40 {
            for y in -40..40 {
                let c = TileCoord::new(x, y);
                let (wx, wy) = geometry.tile_to_world(c);
                assert_eq!(geometry.world_to_tile(wx, wy), c);
            }
        }
    }

    #[test]
    fn test_round_trip_hexagonal() {
        let geometry = hex();
        for x in -40..40 {
            for y in -40..40 {
                let c = TileCoord::new(x, y);
                let (wx, wy) = geometry.tile_to_world(c);
                assert_eq!(geometry.world_to_tile(wx, wy), c);
            }
        }
    }

    #[test]
    fn test_round_trip_far_from_origin() {
        let far = [
            (30_000_001, 30_000_001),
            (-30_000_001, 7),
            (123_456_789, -987_654_321),
            (1_000_000_000, -999_999_999),
            (-1_000_000_000, 1_000_000_000),
        ];
        for geometry in [rect(), hex()] {
            for (x, y) in far {
                let c = TileCoord::new(x, y);
                let (wx, wy) = geometry.tile_to_world(c);
                assert_eq!(geometry.world_to_tile(wx, wy), c);
            }
        }
    }

    #[test]
    fn test_world_to_tile_inside_far_cell() {
        let geometry = hex();
        let c = TileCoord::new(30_000_001, 30_000_001);
        let (cx, cy) = geometry.tile_center(c);
        assert_eq!(geometry.world_to_tile(cx, cy), c);
    }

    #[test]
    fn test_rectangular_tile_to_world() {
        let geometry = rect();
        assert_eq!(geometry.tile_to_world(TileCoord::new(2, -3)), (320.0, -270.0));
        assert_eq!(geometry.world_to_tile(-0.5, 89.5), TileCoord::new(-1, 0));
    }

    #[test]
    fn test_hexagonal_odd_rows_shift() {
        let geometry = hex();
        let (pitch_x, pitch_y) = geometry.pitch();
        let (w, h) = geometry.tile_size();
        assert!((h - w * 3f64.sqrt() / 2.0).abs() < 1e-9);
        assert!((pitch_x - (160.0 + 3.455)).abs() < 1e-9);
        assert!((pitch_y - h * 0.876).abs() < 1e-9);

        assert_eq!(geometry.tile_to_world(TileCoord::new(0, 0)).0, 0.0);
        assert!((geometry.tile_to_world(TileCoord::new(0, 1)).0 - pitch_x / 2.0).abs() < 1e-9);
        assert!((geometry.tile_to_world(TileCoord::new(0, -1)).0 - pitch_x / 2.0).abs() < 1e-9);
        assert_eq!(geometry.tile_to_world(TileCoord::new(0, 2)).0, 0.0);
    }

    #[test]
    fn test_exclusion_measured_from_center_cell() {
        let config = WallConfig {
            exclusion_radius: Some(100.0),
            ..WallConfig::default()
        };
        let geometry = GridGeometry::new(&config);
        // (-1,-1) centers at (-80,-45): near the world origin, far from (80,45)
        assert!(!geometry.is_excluded(TileCoord::new(-1, -1)));
        assert!(geometry.is_excluded(TileCoord::new(0, 0)));
        assert!(!geometry.is_excluded(TileCoord::new(1, 0)));
        assert!(geometry.is_excluded(TileCoord::new(0, 1)));
    }

    #[test]
    fn test_exclusion_zone() {
        let geometry = hex();
        assert!(geometry.is_excluded(TileCoord::new(0, 0)));
        assert!(geometry.is_excluded(TileCoord::new(1, 0)));
        assert!(!geometry.is_excluded(TileCoord::new(5, 5)));
        assert!(!rect().is_excluded(TileCoord::new(0, 0)));
    }

    #[test]
    fn test_tile_key_string_form() {
        let key = TileKey::new(TileCoord::new(-3, 4), Lod::High);
        assert_eq!(key.to_string(), "-3,4,1");
        assert_eq!("-3,4,1".parse::<TileKey>().unwrap(), key);
        assert!("3,4".parse::<TileKey>().is_err());
        assert!("3,4,2".parse::<TileKey>().is_err());
        assert!("3,4,0,9".parse::<TileKey>().is_err());
        assert!("a,b,0".parse::<TileKey>().is_err());
    }

    #[test]
    fn test_lod_threshold() {
        assert_eq!(Lod::for_scale(1.5, 1.5), Lod::Low);
        assert_eq!(Lod::for_scale(1.51, 1.5), Lod::High);
    }
}
