use std::sync::Arc;

use egui::{Align2, Color32, Context, FontId, FullOutput, LayerId, Painter, Stroke, StrokeKind, TopBottomPanel};
use egui_wgpu::{Renderer, RendererOptions, ScreenDescriptor};
use log::{info, trace, warn};
use web_time::Instant;
use wgpu::{Backends, ExperimentalFeatures, Features, Instance, InstanceDescriptor, MemoryHints, SurfaceError, Trace};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, TouchPhase, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window;

use crate::config::WallConfig;
#[cfg(not(target_arch = "wasm32"))]
use crate::wall::loader::HttpImageSource;
use crate::wall::geometry::TileCoord;
use crate::wall::interaction::{InputEvent, NavKey, WallEvent};
use crate::wall::loader::TileLoader;
use crate::wall::renderer::GpuTileSurface;
use crate::wall::{TileDraw, WallEngine};

/// Pixels per wheel line on platforms reporting line deltas
const LINE_HEIGHT: f64 = 40.0;

const OUTLINE: Color32 = Color32::from_rgb(0xdd, 0xdd, 0xdd);
const OUTLINE_HIGHLIGHT: Color32 = Color32::from_rgb(0x00, 0x80, 0x00);
const LABEL_COLOR: Color32 = Color32::from_rgb(0xff, 0x00, 0x00);

/// Window, GPU and UI state around one wall
pub struct State {
    pub window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub is_surface_configured: bool,
    resize_request: Option<PhysicalSize<u32>>,
    wall: WallEngine<GpuTileSurface>,
    cursor: (f64, f64),
    activated: Option<TileCoord>,
    ui_renderer: Renderer,
    egui_ctx: Context,
    egui_state: egui_winit::State,
    egui_output: Option<FullOutput>,
}

impl State {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let instance = Instance::new(&InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let surface: wgpu::Surface<'_> = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Wall Device"),
                required_features: Features::empty(),
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                experimental_features: ExperimentalFeatures::disabled(),
                memory_hints: MemoryHints::Performance,
                trace: Trace::Off,
            })
            .await?;

        let cap: wgpu::SurfaceCapabilities = surface.get_capabilities(&adapter);

        let texture_format = cap
            .formats
            .iter()
            .find(|format| format.is_srgb())
            .copied()
            .unwrap_or(cap.formats[0]);

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: texture_format,
            width: size.width,
            height: size.height,
            present_mode: cap.present_modes[0],
            alpha_mode: cap.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let wall_config = WallConfig::from_env();
        #[cfg(not(target_arch = "wasm32"))]
        let loader = TileLoader::spawn(
            &wall_config,
            HttpImageSource::new(&wall_config.images.user_agent)?,
        )?;
        #[cfg(target_arch = "wasm32")]
        let loader = TileLoader::spawn_web(&wall_config)?;

        let tiles = GpuTileSurface::new(&device, &queue, texture_format);
        let wall = WallEngine::new(
            wall_config,
            tiles,
            loader,
            size.width as f64,
            size.height as f64,
        )?;

        let ui_renderer = Renderer::new(&device, texture_format, RendererOptions {
            msaa_samples: 0,
            depth_stencil_format: None,
            dithering: false,
            predictable_texture_filtering: false,
        });
        let egui_ctx = Context::default();

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui_ctx.viewport_id(),
            window.as_ref(),
            egui_ctx.native_pixels_per_point(),
            window.theme(),
            None,
        );

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: false,
            resize_request: None,
            wall,
            cursor: (0.0, 0.0),
            activated: None,
            ui_renderer,
            egui_ctx,
            egui_state,
            egui_output: None,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            if !self.is_surface_configured {
                self.apply_size(width, height);
                self.is_surface_configured = true;
            } else {
                self.resize_request = Some(PhysicalSize::new(width, height));
            }
            self.wall.resize(width as f64, height as f64);
        }
    }

    fn apply_size(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Close the activated-tile overlay; false if none was open
    pub fn dismiss_overlay(&mut self) -> bool {
        self.activated.take().is_some()
    }

    /// Route a window event to the UI, then to the wall. True if consumed.
    pub fn handle_input(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(self.window.as_ref(), event);
        if response.consumed {
            return true;
        }

        let Some(input) = self.translate(event) else {
            return false;
        };
        if let Some(WallEvent::TileActivated(coord)) = self.wall.handle_input(input, Instant::now()) {
            self.activated = Some(coord);
        }
        true
    }

    fn translate(&mut self, event: &WindowEvent) -> Option<InputEvent> {
        let (x, y) = self.cursor;
        match event {
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x, position.y);
                Some(InputEvent::PointerMove {
                    x: position.x,
                    y: position.y,
                })
            }
            WindowEvent::CursorLeft { .. } => Some(InputEvent::PointerLeave),
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => Some(InputEvent::PointerDown { x, y }),
                ElementState::Released => Some(InputEvent::PointerUp { x, y }),
            },
            WindowEvent::MouseWheel { delta, .. } => {
                // winit reports scrolling up as positive
                let delta_y = match delta {
                    MouseScrollDelta::LineDelta(_, lines) => -(*lines as f64) * LINE_HEIGHT,
                    MouseScrollDelta::PixelDelta(pos) => -pos.y,
                };
                Some(InputEvent::Wheel { x, y, delta_y })
            }
            WindowEvent::Touch(touch) => {
                let (id, x, y) = (touch.id, touch.location.x, touch.location.y);
                Some(match touch.phase {
                    TouchPhase::Started => InputEvent::TouchStart { id, x, y },
                    TouchPhase::Moved => InputEvent::TouchMove { id, x, y },
                    TouchPhase::Ended | TouchPhase::Cancelled => InputEvent::TouchEnd { id, x, y },
                })
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                let key = match code {
                    KeyCode::ArrowUp => NavKey::Up,
                    KeyCode::ArrowDown => NavKey::Down,
                    KeyCode::ArrowLeft => NavKey::Left,
                    KeyCode::ArrowRight => NavKey::Right,
                    KeyCode::Enter | KeyCode::Space => NavKey::Activate,
                    KeyCode::KeyR | KeyCode::Home => {
                        self.wall.recenter(true);
                        return None;
                    }
                    _ => return None,
                };
                Some(InputEvent::Key(key))
            }
            _ => None,
        }
    }

    pub fn update(&mut self) {
        let frame = self.wall.update();
        if frame.applied + frame.failed + frame.stale > 0 {
            trace!(
                "{} tiles loaded, {} failed, {} stale",
                frame.applied,
                frame.failed,
                frame.stale
            );
        }

        let viewport = self.wall.viewport();
        let status = format!(
            "tiles {} | loaded {} | pending {} | scale {:.2} | {:?}",
            self.wall.tile_count(),
            self.wall.loaded_count(),
            self.wall.pending_loads(),
            viewport.scale,
            self.wall.lod(),
        );
        let draws = self.wall.draw_list();
        let overlay = self.activated;
        let mut recenter = false;
        let mut close_overlay = false;

        let input = self.egui_state.take_egui_input(self.window.as_ref());
        let output = self.egui_ctx.run(input, |ctx| {
            let painter = ctx.layer_painter(LayerId::background());
            let pixels_per_point = ctx.pixels_per_point();
            for draw in &draws {
                paint_tile_overlay(&painter, draw, pixels_per_point);
            }

            TopBottomPanel::top("wall").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    if ui.button("Recenter").clicked() {
                        recenter = true;
                    }
                    ui.label(&status);
                });
            });
            if let Some(coord) = overlay {
                egui::Window::new(format!("Tile {}", coord))
                    .collapsible(false)
                    .resizable(false)
                    .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
                    .show(ctx, |ui| {
                        ui.label(format!("Cell ({}, {}) activated", coord.x, coord.y));
                        if ui.button("Close").clicked() {
                            close_overlay = true;
                        }
                    });
            }
        });
        self.egui_output = Some(output);

        if recenter {
            info!("Recentering wall");
            self.wall.recenter(true);
        }
        if close_overlay {
            self.activated = None;
        }
    }

    pub fn render(&mut self) -> Result<(), SurfaceError> {
        self.window.request_redraw();

        if !self.is_surface_configured {
            return Ok(());
        }

        if let Some(PhysicalSize { width, height }) = self.resize_request.take() {
            self.apply_size(width, height)
        }

        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(_) => {
                self.surface.configure(&self.device, &self.config);
                self.surface.get_current_texture()?
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        let mut ui = self.egui_output.take().map(|output| self.prepare_ui(output, &mut encoder));
        let draws = self.wall.draw_list();

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Wall Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    occlusion_query_set: None,
                    timestamp_writes: None,
                })
                .forget_lifetime();

            self.wall
                .surface()
                .render(&mut render_pass, &draws, self.config.width, self.config.height);

            if let Some(ui) = &ui {
                self.ui_renderer.render(&mut render_pass, &ui.primitives, &ui.descriptor);
            }
        }

        let mut commands = ui
            .as_mut()
            .map(|ui| std::mem::take(&mut ui.commands))
            .unwrap_or_default();
        commands.push(encoder.finish());
        self.queue.submit(commands);
        frame.present();

        if let Some(ui) = ui {
            for id in ui.textures_free {
                self.ui_renderer.free_texture(&id)
            }
        }

        Ok(())
    }

    fn prepare_ui(&mut self, output: FullOutput, encoder: &mut wgpu::CommandEncoder) -> UiFrame {
        let FullOutput {
            platform_output,
            textures_delta,
            shapes,
            pixels_per_point,
            viewport_output,
        } = output;

        for _ in viewport_output {
            warn!("Viewport change is not handled!")
        }

        self.egui_state.handle_platform_output(self.window.as_ref(), platform_output);

        for (id, delta) in textures_delta.set {
            self.ui_renderer.update_texture(&self.device, &self.queue, id, &delta);
        }
        let descriptor = ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point,
        };
        let primitives = self.egui_ctx.tessellate(shapes, pixels_per_point);
        let commands = self.ui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &primitives,
            &descriptor,
        );

        UiFrame {
            primitives,
            descriptor,
            commands,
            textures_free: textures_delta.free,
        }
    }
}

/// Outline and `x,y` label over one tile
fn paint_tile_overlay(painter: &Painter, draw: &TileDraw, pixels_per_point: f32) {
    let points = |v: f64| v as f32 / pixels_per_point;
    let rect = egui::Rect::from_min_size(
        egui::pos2(points(draw.rect.x), points(draw.rect.y)),
        egui::vec2(points(draw.rect.width), points(draw.rect.height)),
    );
    let outline = if draw.emphasis.is_highlighted() {
        OUTLINE_HIGHLIGHT
    } else {
        OUTLINE
    };
    painter.rect_stroke(rect, 0.0, Stroke::new(1.0, outline), StrokeKind::Inside);

    let (cx, cy) = draw.center();
    painter.text(
        egui::pos2(points(cx), points(cy)),
        Align2::CENTER_CENTER,
        draw.label(),
        FontId::proportional(points(draw.label_size)),
        LABEL_COLOR,
    );
}

/// egui output prepared for one frame
struct UiFrame {
    primitives: Vec<egui::ClippedPrimitive>,
    descriptor: ScreenDescriptor,
    commands: Vec<wgpu::CommandBuffer>,
    textures_free: Vec<egui::TextureId>,
}
