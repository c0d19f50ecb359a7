//! Wall camera: screen offset and scale with clamped zoom

use super::geometry::{GridGeometry, TileCoord};

/// Raw camera values, `screen = world * scale + offset`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale: f64,
}

/// Camera state with zoom bounds
#[derive(Clone, Debug)]
pub struct Viewport {
    state: ViewportState,
    min_zoom: f64,
    max_zoom: f64,
}

impl Viewport {
    pub fn new(offset_x: f64, offset_y: f64, scale: f64, min_zoom: f64, max_zoom: f64) -> Self {
        Self {
            state: ViewportState {
                offset_x,
                offset_y,
                scale: scale.clamp(min_zoom, max_zoom),
            },
            min_zoom,
            max_zoom,
        }
    }

    /// Default view: scale 1 with cell (0,0) centered on the canvas
    pub fn centered(
        geometry: &GridGeometry,
        canvas_width: f64,
        canvas_height: f64,
        min_zoom: f64,
        max_zoom: f64,
    ) -> Self {
        let mut viewport = Self::new(0.0, 0.0, 1.0, min_zoom, max_zoom);
        viewport.state = viewport.home(geometry, canvas_width, canvas_height);
        viewport
    }

    /// The state `centered` would produce for this canvas
    pub fn home(&self, geometry: &GridGeometry, canvas_width: f64, canvas_height: f64) -> ViewportState {
        let scale = 1.0_f64.clamp(self.min_zoom, self.max_zoom);
        let (cx, cy) = geometry.tile_center(TileCoord::new(0, 0));
        ViewportState {
            offset_x: canvas_width / 2.0 - cx * scale,
            offset_y: canvas_height / 2.0 - cy * scale,
            scale,
        }
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn scale(&self) -> f64 {
        self.state.scale
    }

    pub fn zoom_bounds(&self) -> (f64, f64) {
        (self.min_zoom, self.max_zoom)
    }

    /// Replace the state, clamping scale into bounds
    pub fn set_state(&mut self, state: ViewportState) {
        self.state = ViewportState {
            scale: state.scale.clamp(self.min_zoom, self.max_zoom),
            ..state
        };
    }

    /// Pan by screen pixel delta
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.state.offset_x += dx;
        self.state.offset_y += dy;
    }

    /// Multiply scale by `factor`, keeping the world point under the screen
    /// position fixed. Returns false when the clamped scale did not change.
    pub fn zoom_at(&mut self, factor: f64, screen_x: f64, screen_y: f64) -> bool {
        let old_scale = self.state.scale;
        let new_scale = (old_scale * factor).clamp(self.min_zoom, self.max_zoom);
        if (new_scale - old_scale).abs() < f64::EPSILON {
            return false;
        }

        let (wx, wy) = self.screen_to_world(screen_x, screen_y);
        self.state.scale = new_scale;
        self.state.offset_x = screen_x - wx * new_scale;
        self.state.offset_y = screen_y - wy * new_scale;
        true
    }

    pub fn world_to_screen(&self, wx: f64, wy: f64) -> (f64, f64) {
        (
            wx * self.state.scale + self.state.offset_x,
            wy * self.state.scale + self.state.offset_y,
        )
    }

    pub fn screen_to_world(&self, sx: f64, sy: f64) -> (f64, f64) {
        (
            (sx - self.state.offset_x) / self.state.scale,
            (sy - self.state.offset_y) / self.state.scale,
        )
    }

    /// Cell under a screen position
    pub fn tile_at(&self, geometry: &GridGeometry, sx: f64, sy: f64) -> TileCoord {
        let (wx, wy) = self.screen_to_world(sx, sy);
        geometry.world_to_tile(wx, wy)
    }
}
