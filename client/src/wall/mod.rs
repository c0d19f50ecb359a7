//! Infinite pan/zoom wall of image tiles
//!
//! `WallEngine` ties the pieces together: input moves the viewport, every
//! viewport change recomputes the required cell set and reconciles the
//! materialized tiles against it, and each frame drains loader responses
//! into the tiles that are still waiting for them.

pub mod animation;
pub mod cache;
pub mod geometry;
pub mod interaction;
pub mod lifecycle;
pub mod loader;
pub mod renderer;
pub mod surface;
pub mod viewport;
pub mod visible;

use std::collections::HashSet;

use log::{debug, info};
use web_time::Instant;

use crate::config::WallConfig;
use crate::error::Result;
use geometry::{GridGeometry, Lod, TileCoord};
use interaction::{InputEvent, InteractionController, WallEvent};
use lifecycle::{ApplyOutcome, LoadState, ReconcileReport, TileLifecycle};
use loader::TileLoader;
use surface::{SurfaceHandle, TileSurface};
use viewport::{Viewport, ViewportState};
use visible::VisibleQuery;

/// Axis-aligned rectangle in canvas pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRect {
    /// Grow or shrink about the center
    pub fn scaled(&self, factor: f64) -> Self {
        let width = self.width * factor;
        let height = self.height * factor;
        Self {
            x: self.x - (width - self.width) / 2.0,
            y: self.y - (height - self.height) / 2.0,
            width,
            height,
        }
    }
}

/// Coordinate label size in world pixels
pub const LABEL_SIZE: f64 = 14.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Emphasis {
    None,
    Selected,
    Hovered,
}

impl Emphasis {
    /// Hovered and selected tiles get the highlight outline
    pub fn is_highlighted(self) -> bool {
        self != Emphasis::None
    }
}

/// One tile to draw this frame
#[derive(Clone, Copy, Debug)]
pub struct TileDraw {
    pub handle: SurfaceHandle,
    pub coord: TileCoord,
    pub rect: ScreenRect,
    pub emphasis: Emphasis,
    /// Label font size in canvas pixels
    pub label_size: f64,
}

impl TileDraw {
    /// `x,y` text drawn at the tile center
    pub fn label(&self) -> String {
        self.coord.to_string()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.rect.x + self.rect.width / 2.0,
            self.rect.y + self.rect.height / 2.0,
        )
    }
}

/// What one `update` did
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameReport {
    pub reconcile: ReconcileReport,
    pub applied: usize,
    pub failed: usize,
    pub stale: usize,
    /// The required set was rebuilt this frame
    pub recomputed: bool,
    /// Another frame is needed even without input
    pub animating: bool,
}

/// The wall: viewport, visible set, tile lifecycle and loader
pub struct WallEngine<S: TileSurface> {
    config: WallConfig,
    geometry: GridGeometry,
    query: VisibleQuery,
    viewport: Viewport,
    canvas: (f64, f64),
    controller: InteractionController,
    lifecycle: TileLifecycle,
    loader: TileLoader,
    surface: S,
}

impl<S: TileSurface> WallEngine<S> {
    /// Build the wall centered on cell (0,0) and request the first visible set
    pub fn new(
        config: WallConfig,
        surface: S,
        loader: TileLoader,
        canvas_width: f64,
        canvas_height: f64,
    ) -> Result<Self> {
        config.validate()?;
        let geometry = GridGeometry::new(&config);
        let viewport = Viewport::centered(
            &geometry,
            canvas_width,
            canvas_height,
            config.min_zoom,
            config.max_zoom,
        );

        let mut engine = Self {
            query: VisibleQuery::new(&config),
            controller: InteractionController::new(&config.interaction),
            lifecycle: TileLifecycle::new(),
            canvas: (canvas_width, canvas_height),
            geometry,
            viewport,
            loader,
            surface,
            config,
        };
        let report = engine.refresh();
        info!(
            "Wall ready: {:?} grid, {} tiles requested",
            engine.geometry.shape(),
            report.created
        );
        Ok(engine)
    }

    /// Feed one input event; the visible set follows the viewport immediately
    pub fn handle_input(&mut self, event: InputEvent, now: Instant) -> Option<WallEvent> {
        let before = self.viewport.state();
        let emitted = self
            .controller
            .handle(event, now, &mut self.viewport, &self.geometry);
        if self.viewport.state() != before {
            self.refresh();
        }
        if let Some(WallEvent::TileActivated(coord)) = emitted {
            info!("Tile {} activated", coord);
        }
        emitted
    }

    pub fn resize(&mut self, canvas_width: f64, canvas_height: f64) {
        if (canvas_width, canvas_height) == self.canvas {
            return;
        }
        debug!("Canvas resized to {}x{}", canvas_width, canvas_height);
        self.canvas = (canvas_width, canvas_height);
        self.refresh();
    }

    /// Return to scale 1 with cell (0,0) centered
    pub fn recenter(&mut self, animated: bool) {
        let home = self
            .viewport
            .home(&self.geometry, self.canvas.0, self.canvas.1);
        self.controller.recenter(&mut self.viewport, home, animated);
        self.refresh();
    }

    /// Per-frame step: advance animations, reconcile, deliver loaded images
    pub fn update(&mut self) -> FrameReport {
        let before = self.viewport.state();
        let animating = self.controller.tick(&mut self.viewport).is_running();
        let mut report = FrameReport {
            animating,
            ..Default::default()
        };
        // Only the camera tween moves the viewport here
        if self.viewport.state() != before {
            report.reconcile = self.refresh();
            report.recomputed = true;
        }

        while let Some(response) = self.loader.poll() {
            match self.lifecycle.apply(response, &mut self.surface) {
                ApplyOutcome::Applied(_) => report.applied += 1,
                ApplyOutcome::Failed(_) => report.failed += 1,
                ApplyOutcome::Stale => report.stale += 1,
                ApplyOutcome::Ignored => {}
            }
        }
        report
    }

    fn refresh(&mut self) -> ReconcileReport {
        let state = self.viewport.state();
        let required = self
            .query
            .required(&self.geometry, &state, self.canvas.0, self.canvas.1);
        let lod = Lod::for_scale(state.scale, self.config.lod_threshold);
        self.lifecycle
            .reconcile(&required, lod, &mut self.surface, &mut self.loader)
    }

    /// Screen placement of every materialized tile, hovered tile last
    pub fn draw_list(&self) -> Vec<TileDraw> {
        let (tile_w, tile_h) = self.geometry.tile_size();
        let scale = self.viewport.scale();
        let hovered = self.controller.hovered();
        let selected = self.controller.selected();

        let mut draws: Vec<TileDraw> = self
            .lifecycle
            .records()
            .map(|record| {
                let coord = record.key.coord;
                let (wx, wy) = self.geometry.tile_to_world(coord);
                let (x, y) = self.viewport.world_to_screen(wx, wy);
                let rect = ScreenRect {
                    x,
                    y,
                    width: tile_w * scale,
                    height: tile_h * scale,
                };
                let emphasis = if hovered == Some(coord) {
                    Emphasis::Hovered
                } else if selected == Some(coord) {
                    Emphasis::Selected
                } else {
                    Emphasis::None
                };
                let rect = match emphasis {
                    Emphasis::Hovered => rect.scaled(self.controller.hover_scale()),
                    _ => rect,
                };
                TileDraw {
                    handle: record.surface,
                    coord,
                    rect,
                    emphasis,
                    label_size: LABEL_SIZE * scale,
                }
            })
            .collect();

        // Row-major for a stable order, emphasized tiles on top
        draws.sort_by_key(|d| (d.emphasis == Emphasis::Hovered, d.coord.y, d.coord.x));
        draws
    }

    pub fn config(&self) -> &WallConfig {
        &self.config
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport.state()
    }

    pub fn canvas_size(&self) -> (f64, f64) {
        self.canvas
    }

    pub fn lod(&self) -> Lod {
        self.lifecycle.lod()
    }

    /// Materialized coordinates
    pub fn visible_set(&self) -> HashSet<TileCoord> {
        self.lifecycle.visible_set()
    }

    pub fn lifecycle(&self) -> &TileLifecycle {
        &self.lifecycle
    }

    pub fn tile_count(&self) -> usize {
        self.lifecycle.len()
    }

    pub fn loaded_count(&self) -> usize {
        self.lifecycle
            .records()
            .filter(|r| r.load_state == LoadState::Loaded)
            .count()
    }

    pub fn pending_loads(&self) -> usize {
        self.loader.pending_count()
    }

    pub fn hovered(&self) -> Option<TileCoord> {
        self.controller.hovered()
    }

    pub fn selected(&self) -> Option<TileCoord> {
        self.controller.selected()
    }

    pub fn is_panning(&self) -> bool {
        self.controller.is_panning()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use image::RgbaImage;

    use cache::ResourceRef;
    use geometry::TileKey;
    use loader::{LoadRequest, LoadResponse, LoaderPort};
    use surface::SceneSurface;

    fn engine(config: WallConfig) -> (WallEngine<SceneSurface>, LoaderPort) {
        let (loader, port) = TileLoader::channel();
        let engine = WallEngine::new(config, SceneSurface::new(), loader, 800.0, 450.0).unwrap();
        (engine, port)
    }

    fn drain(port: &mut LoaderPort) -> Vec<LoadRequest> {
        let mut requests = Vec::new();
        while let Some(Some(request)) = port.requests.next().now_or_never() {
            requests.push(request);
        }
        requests
    }

    fn drag(engine: &mut WallEngine<SceneSurface>, dx: f64, dy: f64) {
        let now = Instant::now();
        engine.handle_input(InputEvent::PointerDown { x: 400.0, y: 225.0 }, now);
        engine.handle_input(
            InputEvent::PointerMove {
                x: 400.0 + dx,
                y: 225.0 + dy,
            },
            now,
        );
        engine.handle_input(
            InputEvent::PointerUp {
                x: 400.0 + dx,
                y: 225.0 + dy,
            },
            now,
        );
    }

    fn wheel_in(engine: &mut WallEngine<SceneSurface>, x: f64, y: f64, steps: usize) {
        for _ in 0..steps {
            engine.handle_input(InputEvent::Wheel { x, y, delta_y: -100.0 }, Instant::now());
        }
    }

    fn assert_materialized_matches_query(engine: &WallEngine<SceneSurface>) {
        let query = VisibleQuery::new(engine.config());
        let (w, h) = engine.canvas_size();
        let required = query.required(engine.geometry(), &engine.viewport(), w, h);
        assert_eq!(engine.visible_set(), required);
        assert_eq!(engine.surface().coords().collect::<HashSet<_>>(), required);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = WallConfig {
            min_zoom: 3.0,
            max_zoom: 1.0,
            ..WallConfig::default()
        };
        let (loader, _port) = TileLoader::channel();
        assert!(WallEngine::new(config, SceneSurface::new(), loader, 800.0, 450.0).is_err());
    }

    #[test]
    fn test_materialized_set_follows_viewport() {
        let (mut engine, _port) = engine(WallConfig::default());
        assert_materialized_matches_query(&engine);

        drag(&mut engine, -730.0, 410.0);
        assert_materialized_matches_query(&engine);

        wheel_in(&mut engine, 120.0, 80.0, 3);
        assert_materialized_matches_query(&engine);

        engine.handle_input(InputEvent::Wheel { x: 700.0, y: 20.0, delta_y: 100.0 }, Instant::now());
        engine.resize(1280.0, 720.0);
        assert_materialized_matches_query(&engine);
    }

    #[test]
    fn test_hexagonal_wall_skips_exclusion_zone() {
        let (mut engine, _port) = engine(WallConfig::hexagonal());
        assert!(engine.tile_count() > 0);
        assert!(!engine.visible_set().contains(&TileCoord::new(0, 0)));
        assert_materialized_matches_query(&engine);

        drag(&mut engine, 2000.0, 0.0);
        assert_materialized_matches_query(&engine);
    }

    #[test]
    fn test_origin_tile_requested_per_tier() {
        let (mut engine, mut port) = engine(WallConfig::default());
        let keys: Vec<String> = drain(&mut port).into_iter().map(|r| r.key).collect();
        assert!(keys.contains(&"0,0,0".to_string()));

        // Put world (0,0) at the canvas corner, then zoom about it
        let home = engine.viewport();
        drag(&mut engine, -home.offset_x, -home.offset_y);
        assert_eq!(engine.viewport().offset_x, 0.0);
        assert_eq!(engine.viewport().offset_y, 0.0);

        // 1.1^4 stays below the 1.5 threshold
        wheel_in(&mut engine, 0.0, 0.0, 4);
        assert_eq!(engine.lod(), Lod::Low);
        assert!(drain(&mut port).iter().all(|r| !r.high_res));

        wheel_in(&mut engine, 0.0, 0.0, 1);
        assert!(engine.viewport().scale > 1.5);
        assert_eq!(engine.lod(), Lod::High);

        let requests = drain(&mut port);
        assert!(requests.iter().any(|r| r.key == "0,0,1"));
        assert!(requests.iter().all(|r| r.high_res));
        assert!(engine.lifecycle().records().all(|r| r.key.lod == Lod::High));
        assert_materialized_matches_query(&engine);
    }

    #[test]
    fn test_loaded_response_reaches_surface() {
        let (mut engine, port) = engine(WallConfig::default());
        let resource = ResourceRef::new("blob:wall/1", RgbaImage::new(4, 4));
        port.responses
            .unbounded_send(LoadResponse::loaded("0,0,0".to_string(), resource.clone()))
            .unwrap();

        let report = engine.update();
        assert_eq!(report.applied, 1);
        assert_eq!(engine.loaded_count(), 1);

        let record = engine.lifecycle().record(TileCoord::new(0, 0)).unwrap();
        let element = engine.surface().element(record.surface).unwrap();
        assert_eq!(element.image.as_ref().map(|i| i.src()), Some("blob:wall/1"));
    }

    #[test]
    fn test_response_after_eviction_is_dropped() {
        let (mut engine, port) = engine(WallConfig::default());
        assert!(engine.visible_set().contains(&TileCoord::new(3, 4)));

        drag(&mut engine, -5000.0, -5000.0);
        assert!(!engine.visible_set().contains(&TileCoord::new(3, 4)));

        let key = TileKey::new(TileCoord::new(3, 4), Lod::Low).to_string();
        port.responses
            .unbounded_send(LoadResponse::loaded(key, ResourceRef::new("blob:wall/9", RgbaImage::new(1, 1))))
            .unwrap();
        let report = engine.update();
        assert_eq!(report.stale, 1);
        assert_eq!(report.applied, 0);
        assert_eq!(engine.loaded_count(), 0);
    }

    #[test]
    fn test_update_without_change_is_noop() {
        let (mut engine, mut port) = engine(WallConfig::default());
        drain(&mut port);

        let report = engine.update();
        assert!(report.reconcile.is_noop());
        assert!(!report.recomputed);
        assert!(!report.animating);
        assert!(drain(&mut port).is_empty());
    }

    #[test]
    fn test_draw_list_puts_hovered_tile_last() {
        let (mut engine, _port) = engine(WallConfig::default());
        // Canvas center is the center of cell (0,0)
        engine.handle_input(InputEvent::PointerMove { x: 400.0, y: 225.0 }, Instant::now());
        assert_eq!(engine.hovered(), Some(TileCoord::new(0, 0)));

        for _ in 0..5 {
            engine.update();
        }
        let draws = engine.draw_list();
        assert_eq!(draws.len(), engine.tile_count());

        let last = draws.last().unwrap();
        assert_eq!(last.coord, TileCoord::new(0, 0));
        assert_eq!(last.emphasis, Emphasis::Hovered);
        assert!(last.rect.width > 160.0);
        // Grows about its center
        assert!((last.rect.x + last.rect.width / 2.0 - 400.0).abs() < 1e-9);
        assert!(draws[..draws.len() - 1].iter().all(|d| d.emphasis != Emphasis::Hovered));
    }

    #[test]
    fn test_draws_carry_labels_and_highlights() {
        let (mut engine, _port) = engine(WallConfig::default());
        let now = Instant::now();
        // Tap cell (1,0), then hover cell (0,0)
        engine.handle_input(InputEvent::PointerDown { x: 500.0, y: 225.0 }, now);
        engine.handle_input(InputEvent::PointerUp { x: 500.0, y: 225.0 }, now);
        engine.handle_input(InputEvent::PointerMove { x: 400.0, y: 225.0 }, now);
        assert_eq!(engine.selected(), Some(TileCoord::new(1, 0)));

        let draws = engine.draw_list();
        let find = |x, y| {
            draws
                .iter()
                .find(|d| d.coord == TileCoord::new(x, y))
                .copied()
                .unwrap()
        };

        let hovered = find(0, 0);
        assert_eq!(hovered.label(), "0,0");
        assert_eq!(hovered.center(), (400.0, 225.0));
        assert!(hovered.emphasis.is_highlighted());

        let selected = find(1, 0);
        assert_eq!(selected.emphasis, Emphasis::Selected);
        assert!(selected.emphasis.is_highlighted());

        let plain = find(-2, 3);
        assert_eq!(plain.label(), "-2,3");
        assert!(!plain.emphasis.is_highlighted());
        assert!(draws.iter().all(|d| d.label_size == LABEL_SIZE));

        wheel_in(&mut engine, 400.0, 225.0, 2);
        let scale = engine.viewport().scale;
        assert!(engine
            .draw_list()
            .iter()
            .all(|d| (d.label_size - LABEL_SIZE * scale).abs() < 1e-9));
    }

    #[test]
    fn test_recenter_returns_home() {
        let (mut engine, _port) = engine(WallConfig::default());
        let home = engine.viewport();
        drag(&mut engine, 900.0, -300.0);
        wheel_in(&mut engine, 10.0, 10.0, 3);
        assert_ne!(engine.viewport(), home);

        engine.recenter(true);
        let mut frames = 0;
        loop {
            let report = engine.update();
            if !report.animating {
                break;
            }
            assert!(report.recomputed);
            assert_materialized_matches_query(&engine);
            frames += 1;
            assert!(frames < 1000);
        }
        assert!(frames > 0);
        assert!(!engine.update().recomputed);
        assert_eq!(engine.viewport(), home);
        assert_materialized_matches_query(&engine);

        drag(&mut engine, 50.0, 50.0);
        engine.recenter(false);
        assert_eq!(engine.viewport(), home);
    }

    #[test]
    fn test_screen_rect_scaled_about_center() {
        let rect = ScreenRect {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
        };
        let grown = rect.scaled(1.2);
        assert!((grown.width - 120.0).abs() < 1e-9);
        assert!((grown.x - 0.0).abs() < 1e-9);
        assert!((grown.y - 15.0).abs() < 1e-9);
    }
}
