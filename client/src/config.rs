//! Wall configuration
//!
//! The observed wall variants differ only in constants: grid shape, tile size,
//! zoom bounds, LOD threshold and whether a center region is reserved. All of
//! them live here so a variant is a value, not a code path.

use std::time::Duration;

use crate::error::{Result, WallError};

/// Shape of the tile lattice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GridShape {
    /// Axis-aligned cells of `tile_width` x `tile_height`.
    Rectangular,
    /// Offset rows of hexagon-ish cells. Height is derived from the width.
    Hexagonal {
        /// Horizontal gap between neighbouring cells in world pixels.
        gutter: f64,
        /// Row pitch as a fraction of the cell height (< 1 removes seams).
        row_overlap: f64,
    },
}

/// Remote image service settings.
#[derive(Clone, Debug)]
pub struct ImageSourceConfig {
    /// URL with `{x}`, `{y}`, `{width}` and `{height}` placeholders.
    pub url_template: String,
    pub low_res: (u32, u32),
    pub high_res: (u32, u32),
    pub user_agent: String,
}

impl Default for ImageSourceConfig {
    fn default() -> Self {
        Self {
            url_template: "https://picsum.photos/seed/{x}_{y}/{width}/{height}.jpg".to_string(),
            low_res: (160, 90),
            high_res: (1600, 900),
            user_agent: "Wall/0.1".to_string(),
        }
    }
}

/// Loader execution context settings.
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Number of fetch threads on native targets.
    pub fetch_workers: usize,
    /// Maximum cached resources, `None` for unbounded.
    pub cache_max_entries: Option<usize>,
    /// Maximum decoded bytes held by the cache, `None` for unbounded.
    pub cache_max_bytes: Option<usize>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        // 512 entries, 256MB decoded
        Self {
            fetch_workers: 4,
            cache_max_entries: Some(512),
            cache_max_bytes: Some(256 * 1024 * 1024),
        }
    }
}

/// Gesture and animation tuning.
#[derive(Clone, Debug)]
pub struct InteractionConfig {
    /// Multiplicative zoom per wheel notch.
    pub zoom_step: f64,
    /// A press that moves further than this (screen px) is a drag.
    pub tap_slop: f64,
    /// A press held longer than this is not a tap.
    pub tap_timeout: Duration,
    pub hover_scale: f64,
    /// Fraction of the remaining distance covered per frame.
    pub hover_rate: f64,
    pub hover_epsilon: f64,
    pub recenter_rate: f64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            zoom_step: 1.1,
            tap_slop: 6.0,
            tap_timeout: Duration::from_millis(300),
            hover_scale: 1.2,
            hover_rate: 0.1,
            hover_epsilon: 0.01,
            recenter_rate: 0.15,
        }
    }
}

/// Complete configuration of one wall instance.
#[derive(Clone, Debug)]
pub struct WallConfig {
    pub shape: GridShape,
    pub tile_width: f64,
    /// Ignored for hexagonal grids.
    pub tile_height: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Scales strictly above this use the high resolution tier.
    pub lod_threshold: f64,
    /// Lower bound of the pan-ahead buffer, in tiles.
    pub min_buffer: i64,
    /// Buffer grows as `ceil(buffer_factor / scale)` when zoomed out.
    pub buffer_factor: f64,
    /// World-space radius around cell (0,0) kept free of tiles.
    pub exclusion_radius: Option<f64>,
    pub images: ImageSourceConfig,
    pub loader: LoaderConfig,
    pub interaction: InteractionConfig,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            shape: GridShape::Rectangular,
            tile_width: 160.0,
            tile_height: 90.0,
            min_zoom: 0.6,
            max_zoom: 2.0,
            lod_threshold: 1.5,
            min_buffer: 3,
            buffer_factor: 3.0,
            exclusion_radius: None,
            images: ImageSourceConfig::default(),
            loader: LoaderConfig::default(),
            interaction: InteractionConfig::default(),
        }
    }
}

impl WallConfig {
    /// Offset-row hexagonal wall with a reserved center region.
    ///
    /// Tile width, gutter and row overlap reproduce the observed hex layout.
    /// Zoom bounds, LOD threshold, exclusion radius and image tiers are
    /// chosen defaults.
    pub fn hexagonal() -> Self {
        Self {
            shape: GridShape::Hexagonal {
                gutter: 3.455,
                row_overlap: 0.876,
            },
            tile_width: 160.0,
            tile_height: 160.0 * 60f64.to_radians().sin(),
            // Chosen defaults from here on
            min_zoom: 0.5,
            max_zoom: 3.0,
            lod_threshold: 1.2,
            exclusion_radius: Some(240.0),
            images: ImageSourceConfig {
                low_res: (160, 160),
                high_res: (800, 800),
                ..ImageSourceConfig::default()
            },
            ..Self::default()
        }
    }

    /// Pick a preset from `WALL_GRID` (`rect` or `hex`) and apply
    /// `WALL_IMAGE_URL` if set. Unknown values fall back to the default.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("WALL_GRID").as_deref() {
            Ok("hex") | Ok("hexagonal") => Self::hexagonal(),
            Ok("rect") | Ok("rectangular") | Err(_) => Self::default(),
            Ok(other) => {
                log::warn!("Unknown WALL_GRID {:?}, using rectangular grid", other);
                Self::default()
            }
        };
        if let Ok(url) = std::env::var("WALL_IMAGE_URL") {
            config.images.url_template = url;
        }
        config
    }

    /// Reject values that would produce an invalid camera or geometry.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(WallError::InvalidConfig(msg.to_string()));

        if !(self.tile_width > 0.0) || !(self.tile_height > 0.0) {
            return invalid("tile dimensions must be positive");
        }
        if !(self.min_zoom > 0.0) || self.min_zoom > self.max_zoom {
            return invalid("zoom bounds must satisfy 0 < min_zoom <= max_zoom");
        }
        if self.min_buffer < 0 || self.buffer_factor < 0.0 {
            return invalid("buffer settings must not be negative");
        }
        if let GridShape::Hexagonal { gutter, row_overlap } = self.shape {
            if gutter < 0.0 {
                return invalid("hexagonal gutter must not be negative");
            }
            if !(row_overlap > 0.0 && row_overlap <= 1.0) {
                return invalid("hexagonal row overlap must be in (0, 1]");
            }
        }
        if self.interaction.zoom_step <= 1.0 {
            return invalid("zoom step must be greater than 1");
        }
        if self.loader.fetch_workers == 0 {
            return invalid("loader needs at least one fetch worker");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(WallConfig::default().validate().is_ok());
        assert!(WallConfig::hexagonal().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_zoom_bounds() {
        let config = WallConfig {
            min_zoom: 3.0,
            max_zoom: 1.0,
            ..WallConfig::default()
        };
        assert!(matches!(config.validate(), Err(WallError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_row_overlap_out_of_range() {
        let config = WallConfig {
            shape: GridShape::Hexagonal {
                gutter: 0.0,
                row_overlap: 1.5,
            },
            ..WallConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
