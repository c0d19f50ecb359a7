//! Input handling: pan, wheel and pinch zoom, hover, selection, activation

use std::time::Duration;

use web_time::Instant;

use super::animation::{CameraTween, Tick, Tween};
use super::geometry::{GridGeometry, TileCoord};
use super::viewport::{Viewport, ViewportState};
use crate::config::InteractionConfig;

/// Discrete navigation keys
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavKey {
    Up,
    Down,
    Left,
    Right,
    Activate,
}

/// Backend-neutral input, positions in canvas pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    PointerDown { x: f64, y: f64 },
    PointerMove { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },
    PointerLeave,
    /// Negative `delta_y` zooms in
    Wheel { x: f64, y: f64, delta_y: f64 },
    TouchStart { id: u64, x: f64, y: f64 },
    TouchMove { id: u64, x: f64, y: f64 },
    TouchEnd { id: u64, x: f64, y: f64 },
    Key(NavKey),
}

/// Signals for collaborators outside the wall
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WallEvent {
    TileActivated(TileCoord),
}

#[derive(Clone, Copy, Debug)]
enum Gesture {
    Idle,
    Press {
        origin: (f64, f64),
        last: (f64, f64),
        started: Instant,
        within_slop: bool,
    },
    Pinch {
        distance: f64,
        midpoint: (f64, f64),
    },
}

/// Turns input into viewport changes and wall events
pub struct InteractionController {
    zoom_step: f64,
    tap_slop: f64,
    tap_timeout: Duration,
    hover_target: f64,
    recenter_rate: f64,
    gesture: Gesture,
    touches: Vec<(u64, (f64, f64))>,
    hovered: Option<TileCoord>,
    hover_scale: Tween,
    selected: Option<TileCoord>,
    recenter: Option<CameraTween>,
}

impl InteractionController {
    pub fn new(config: &InteractionConfig) -> Self {
        Self {
            zoom_step: config.zoom_step,
            tap_slop: config.tap_slop,
            tap_timeout: config.tap_timeout,
            hover_target: config.hover_scale,
            recenter_rate: config.recenter_rate,
            gesture: Gesture::Idle,
            touches: Vec::new(),
            hovered: None,
            hover_scale: Tween::new(1.0, config.hover_rate, config.hover_epsilon),
            selected: None,
            recenter: None,
        }
    }

    pub fn hovered(&self) -> Option<TileCoord> {
        self.hovered
    }

    /// Current draw scale of the hovered tile
    pub fn hover_scale(&self) -> f64 {
        self.hover_scale.value()
    }

    pub fn selected(&self) -> Option<TileCoord> {
        self.selected
    }

    pub fn is_panning(&self) -> bool {
        matches!(self.gesture, Gesture::Press { .. } | Gesture::Pinch { .. })
    }

    pub fn is_animating(&self) -> bool {
        self.recenter.is_some() || !self.hover_scale.is_settled()
    }

    pub fn handle(
        &mut self,
        event: InputEvent,
        now: Instant,
        viewport: &mut Viewport,
        geometry: &GridGeometry,
    ) -> Option<WallEvent> {
        match event {
            InputEvent::PointerDown { x, y } => {
                self.press(x, y, now);
                None
            }
            InputEvent::PointerMove { x, y } => {
                if !self.drag(x, y, viewport) {
                    let tile = Self::pickable(viewport.tile_at(geometry, x, y), geometry);
                    self.set_hovered(tile);
                }
                None
            }
            InputEvent::PointerUp { x, y } => {
                let activated = self.release(x, y, now, viewport, geometry);
                let tile = Self::pickable(viewport.tile_at(geometry, x, y), geometry);
                self.set_hovered(tile);
                activated
            }
            InputEvent::PointerLeave => {
                self.gesture = Gesture::Idle;
                self.set_hovered(None);
                None
            }
            InputEvent::Wheel { x, y, delta_y } => {
                self.recenter = None;
                let factor = if delta_y < 0.0 {
                    self.zoom_step
                } else if delta_y > 0.0 {
                    1.0 / self.zoom_step
                } else {
                    return None;
                };
                viewport.zoom_at(factor, x, y);
                None
            }
            InputEvent::TouchStart { id, x, y } => {
                self.touches.retain(|(t, _)| *t != id);
                self.touches.push((id, (x, y)));
                match self.touches.len() {
                    1 => self.press(x, y, now),
                    2 => {
                        if let Some((distance, midpoint)) = self.pinch_metrics() {
                            self.recenter = None;
                            self.gesture = Gesture::Pinch { distance, midpoint };
                        }
                    }
                    _ => {}
                }
                None
            }
            InputEvent::TouchMove { id, x, y } => {
                if let Some(touch) = self.touches.iter_mut().find(|(t, _)| *t == id) {
                    touch.1 = (x, y);
                }
                match self.gesture {
                    Gesture::Pinch { .. } => self.pinch(viewport),
                    _ => {
                        self.drag(x, y, viewport);
                    }
                }
                None
            }
            InputEvent::TouchEnd { id, x, y } => {
                self.touches.retain(|(t, _)| *t != id);
                match self.gesture {
                    Gesture::Press { .. } if self.touches.is_empty() => {
                        self.release(x, y, now, viewport, geometry)
                    }
                    // Lifting a finger ends a pinch without a tap
                    Gesture::Pinch { .. } => {
                        self.gesture = Gesture::Idle;
                        None
                    }
                    _ => None,
                }
            }
            InputEvent::Key(key) => self.navigate(key, geometry),
        }
    }

    /// Advance animations by one frame, writing camera changes to `viewport`
    pub fn tick(&mut self, viewport: &mut Viewport) -> Tick {
        let hover = self.hover_scale.tick();
        let camera = match self.recenter.as_mut() {
            Some(tween) => {
                let tick = tween.tick();
                viewport.set_state(tween.state());
                tick
            }
            None => Tick::Settled,
        };
        if !camera.is_running() {
            self.recenter = None;
        }
        hover.or(camera)
    }

    /// Return to `home`, at once or over the next frames
    pub fn recenter(&mut self, viewport: &mut Viewport, home: ViewportState, animated: bool) {
        if animated {
            self.recenter = Some(CameraTween::new(viewport.state(), home, self.recenter_rate));
        } else {
            self.recenter = None;
            viewport.set_state(home);
        }
    }

    fn press(&mut self, x: f64, y: f64, now: Instant) {
        self.recenter = None;
        self.gesture = Gesture::Press {
            origin: (x, y),
            last: (x, y),
            started: now,
            within_slop: true,
        };
    }

    /// Pan if a press is active; false when nothing is being dragged
    fn drag(&mut self, x: f64, y: f64, viewport: &mut Viewport) -> bool {
        let tap_slop = self.tap_slop;
        match &mut self.gesture {
            Gesture::Press {
                origin,
                last,
                within_slop,
                ..
            } => {
                viewport.pan(x - last.0, y - last.1);
                *last = (x, y);
                if (x - origin.0).hypot(y - origin.1) > tap_slop {
                    *within_slop = false;
                }
                true
            }
            _ => false,
        }
    }

    fn release(
        &mut self,
        x: f64,
        y: f64,
        now: Instant,
        viewport: &mut Viewport,
        geometry: &GridGeometry,
    ) -> Option<WallEvent> {
        self.drag(x, y, viewport);
        let gesture = std::mem::replace(&mut self.gesture, Gesture::Idle);
        let Gesture::Press {
            started,
            within_slop,
            ..
        } = gesture
        else {
            return None;
        };

        let is_tap = within_slop && now.saturating_duration_since(started) <= self.tap_timeout;
        if !is_tap {
            return None;
        }
        let tile = Self::pickable(viewport.tile_at(geometry, x, y), geometry)?;
        self.selected = Some(tile);
        Some(WallEvent::TileActivated(tile))
    }

    fn pinch(&mut self, viewport: &mut Viewport) {
        let Gesture::Pinch { distance, midpoint } = self.gesture else {
            return;
        };
        let Some((new_distance, new_midpoint)) = self.pinch_metrics() else {
            return;
        };
        self.recenter = None;

        viewport.pan(new_midpoint.0 - midpoint.0, new_midpoint.1 - midpoint.1);
        if distance > 0.0 && new_distance > 0.0 {
            viewport.zoom_at(new_distance / distance, new_midpoint.0, new_midpoint.1);
        }
        self.gesture = Gesture::Pinch {
            distance: new_distance,
            midpoint: new_midpoint,
        };
    }

    /// Distance and midpoint of the first two touches
    fn pinch_metrics(&self) -> Option<(f64, (f64, f64))> {
        let [(_, a), (_, b), ..] = self.touches.as_slice() else {
            return None;
        };
        let distance = (a.0 - b.0).hypot(a.1 - b.1);
        Some((distance, ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)))
    }

    fn navigate(&mut self, key: NavKey, geometry: &GridGeometry) -> Option<WallEvent> {
        let current = self.selected.unwrap_or(TileCoord::new(0, 0));
        let next = match key {
            NavKey::Up => current.offset(0, -1),
            NavKey::Down => current.offset(0, 1),
            NavKey::Left => current.offset(-1, 0),
            NavKey::Right => current.offset(1, 0),
            NavKey::Activate => {
                let selected = Self::pickable(self.selected?, geometry)?;
                return Some(WallEvent::TileActivated(selected));
            }
        };
        self.selected = Some(next);
        None
    }

    fn set_hovered(&mut self, tile: Option<TileCoord>) {
        if tile == self.hovered {
            return;
        }
        self.hovered = tile;
        match tile {
            Some(_) => {
                self.hover_scale.reset(1.0);
                self.hover_scale.retarget(self.hover_target);
            }
            None => self.hover_scale.retarget(1.0),
        }
    }

    fn pickable(tile: TileCoord, geometry: &GridGeometry) -> Option<TileCoord> {
        (!geometry.is_excluded(tile)).then_some(tile)
    }
}
