//! Visible-range query: which cells must be materialized for a camera

use std::collections::HashSet;

use super::geometry::{GridGeometry, TileCoord};
use super::viewport::ViewportState;
use crate::config::WallConfig;

/// Inclusive cell bounds
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VisibleRange {
    pub start_x: i64,
    pub end_x: i64,
    pub start_y: i64,
    pub end_y: i64,
}

impl VisibleRange {
    pub fn contains(&self, coord: TileCoord) -> bool {
        (self.start_x..=self.end_x).contains(&coord.x) && (self.start_y..=self.end_y).contains(&coord.y)
    }

    /// Number of cells in the range, before exclusions
    pub fn len(&self) -> usize {
        let w = (self.end_x - self.start_x + 1).max(0) as usize;
        let h = (self.end_y - self.start_y + 1).max(0) as usize;
        w * h
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (self.start_y..=self.end_y)
            .flat_map(move |y| (self.start_x..=self.end_x).map(move |x| TileCoord::new(x, y)))
    }
}

/// Buffer rule for the pan-ahead margin
#[derive(Clone, Copy, Debug)]
pub struct VisibleQuery {
    min_buffer: i64,
    buffer_factor: f64,
}

impl VisibleQuery {
    pub fn new(config: &WallConfig) -> Self {
        Self {
            min_buffer: config.min_buffer,
            buffer_factor: config.buffer_factor,
        }
    }

    /// Extra cells on each side, grows when zoomed out
    pub fn buffer(&self, scale: f64) -> i64 {
        let scaled = (self.buffer_factor / scale).ceil() as i64;
        self.min_buffer.max(scaled)
    }

    /// Cell bounds covering the canvas plus the buffer
    pub fn range(
        &self,
        geometry: &GridGeometry,
        state: &ViewportState,
        canvas_width: f64,
        canvas_height: f64,
    ) -> VisibleRange {
        let buffer = self.buffer(state.scale);
        let (pitch_x, pitch_y) = geometry.pitch();

        VisibleRange {
            start_x: ((-state.offset_x / state.scale) / pitch_x).floor() as i64 - buffer,
            end_x: ((canvas_width - state.offset_x) / (state.scale * pitch_x)).ceil() as i64 + buffer,
            start_y: ((-state.offset_y / state.scale) / pitch_y).floor() as i64 - buffer,
            end_y: ((canvas_height - state.offset_y) / (state.scale * pitch_y)).ceil() as i64 + buffer,
        }
    }

    /// The range with excluded cells removed
    pub fn required(
        &self,
        geometry: &GridGeometry,
        state: &ViewportState,
        canvas_width: f64,
        canvas_height: f64,
    ) -> HashSet<TileCoord> {
        let range = self.range(geometry, state, canvas_width, canvas_height);
        range.coords().filter(|c| !geometry.is_excluded(*c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(offset_x: f64, offset_y: f64, scale: f64) -> ViewportState {
        ViewportState {
            offset_x,
            offset_y,
            scale,
        }
    }

    #[test]
    fn test_range_at_origin() {
        let config = WallConfig::default();
        let geometry = GridGeometry::new(&config);
        let query = VisibleQuery::new(&config);

        let range = query.range(&geometry, &state(0.0, 0.0, 1.0), 800.0, 450.0);
        assert_eq!(
            range,
            VisibleRange {
                start_x: -3,
                end_x: 8,
                start_y: -3,
                end_y: 8,
            }
        );
        assert_eq!(range.len(), 144);
    }

    #[test]
    fn test_buffer_grows_when_zoomed_out() {
        let query = VisibleQuery::new(&WallConfig::default());
        assert_eq!(query.buffer(2.0), 3);
        assert_eq!(query.buffer(1.0), 3);
        assert_eq!(query.buffer(0.6), 5);
    }

    #[test]
    fn test_range_follows_pan() {
        let config = WallConfig::default();
        let geometry = GridGeometry::new(&config);
        let query = VisibleQuery::new(&config);

        let range = query.range(&geometry, &state(-1600.0, 900.0, 1.0), 800.0, 450.0);
        assert_eq!(range.start_x, 10 - 3);
        assert_eq!(range.end_x, 15 + 3);
        assert_eq!(range.start_y, -10 - 3);
        assert_eq!(range.end_y, -5 + 3);
    }

    #[test]
    fn test_required_skips_excluded_cells() {
        let config = WallConfig::hexagonal();
        let geometry = GridGeometry::new(&config);
        let query = VisibleQuery::new(&config);
        let s = state(400.0, 300.0, 1.0);

        let range = query.range(&geometry, &s, 800.0, 600.0);
        let required = query.required(&geometry, &s, 800.0, 600.0);

        assert!(!required.contains(&TileCoord::new(0, 0)));
        assert!(required.iter().all(|c| !geometry.is_excluded(*c)));
        let excluded = range.coords().filter(|c| geometry.is_excluded(*c)).count();
        assert!(excluded > 0);
        assert_eq!(required.len() + excluded, range.len());
    }

    #[test]
    fn test_required_is_idempotent() {
        let config = WallConfig::default();
        let geometry = GridGeometry::new(&config);
        let query = VisibleQuery::new(&config);
        let s = state(-321.5, 77.25, 1.3);

        assert_eq!(
            query.required(&geometry, &s, 1024.0, 768.0),
            query.required(&geometry, &s, 1024.0, 768.0)
        );
    }
}
