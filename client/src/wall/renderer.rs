//! wgpu tile surface: one texture per materialized tile, redrawn every frame

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::cache::ResourceRef;
use super::geometry::TileCoord;
use super::surface::{SurfaceHandle, TileSurface};
use super::{Emphasis, ScreenRect, TileDraw};

/// Vertex for tile rendering
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct TileVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub tint: [f32; 4],
}

impl TileVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x2,
        2 => Float32x4,
    ];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<TileVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Tile indices for a quad (2 triangles)
const TILE_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Placeholder color (#f0f0f0)
const PLACEHOLDER_RGBA: [u8; 4] = [240, 240, 240, 255];

const TINT_NONE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const TINT_SELECTED: [f32; 4] = [0.75, 1.0, 0.75, 1.0];
/// rgba(0, 0, 0, 0.5) over the placeholder
const TINT_SHADOW: [f32; 4] = [0.0, 0.0, 0.0, 0.5];
const SHADOW_SPREAD: f64 = 1.04;
const SHADOW_OFFSET_Y: f64 = 5.0;

struct GpuTile {
    coord: TileCoord,
    texture: Option<(wgpu::Texture, wgpu::BindGroup)>,
}

/// Canvas-style surface backed by wgpu textures
pub struct GpuTileSurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    render_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    index_buffer: wgpu::Buffer,
    placeholder: wgpu::BindGroup,
    tiles: HashMap<SurfaceHandle, GpuTile>,
    next_handle: u64,
}

impl GpuTileSurface {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, texture_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Tile Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shader/tile.wgsl").into()),
        });

        // Bind group layout for texture + sampler
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Tile Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Tile Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Tile Render Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[TileVertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: texture_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Tile Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        // Index buffer (shared for all tiles)
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Tile Index Buffer"),
            contents: bytemuck::cast_slice(&TILE_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let placeholder_pixels = image::RgbaImage::from_pixel(1, 1, image::Rgba(PLACEHOLDER_RGBA));
        let (_, placeholder) = upload_texture(
            device,
            queue,
            &bind_group_layout,
            &sampler,
            &placeholder_pixels,
            "Tile Placeholder",
        );

        Self {
            device: device.clone(),
            queue: queue.clone(),
            render_pipeline,
            bind_group_layout,
            sampler,
            index_buffer,
            placeholder,
            tiles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Number of tiles currently holding a texture
    pub fn texture_count(&self) -> usize {
        self.tiles.values().filter(|t| t.texture.is_some()).count()
    }

    /// Draw tiles in list order; tiles without pixels get the placeholder
    pub fn render(
        &self,
        render_pass: &mut wgpu::RenderPass<'_>,
        draws: &[TileDraw],
        viewport_width: u32,
        viewport_height: u32,
    ) {
        if draws.is_empty() || viewport_width == 0 || viewport_height == 0 {
            return;
        }

        let quads = build_quads(draws, viewport_width, viewport_height);
        let vertices: Vec<TileVertex> = quads.iter().flat_map(|(quad, _)| *quad).collect();
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Vertex Buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });

        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));

        for (i, (_, fill)) in quads.iter().enumerate() {
            let bind_group = match fill {
                QuadFill::Tile(handle) => self
                    .tiles
                    .get(handle)
                    .and_then(|tile| tile.texture.as_ref())
                    .map(|(_, bind_group)| bind_group)
                    .unwrap_or(&self.placeholder),
                QuadFill::Shadow => &self.placeholder,
            };
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw_indexed(0..6, (i * 4) as i32, 0..1);
        }
    }
}

impl TileSurface for GpuTileSurface {
    fn materialize(&mut self, coord: TileCoord) -> SurfaceHandle {
        self.next_handle += 1;
        let handle = SurfaceHandle(self.next_handle);
        self.tiles.insert(handle, GpuTile { coord, texture: None });
        handle
    }

    fn update(&mut self, handle: SurfaceHandle, image: &ResourceRef) {
        let Some(tile) = self.tiles.get_mut(&handle) else {
            return;
        };
        let label = format!("Wall Tile {}", tile.coord);
        tile.texture = Some(upload_texture(
            &self.device,
            &self.queue,
            &self.bind_group_layout,
            &self.sampler,
            image.image(),
            &label,
        ));
    }

    fn destroy(&mut self, handle: SurfaceHandle) {
        if let Some(GpuTile {
            texture: Some((texture, _)),
            ..
        }) = self.tiles.remove(&handle)
        {
            texture.destroy();
        }
    }
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    rgba: &image::RgbaImage,
    label: &str,
) -> (wgpu::Texture, wgpu::BindGroup) {
    let (width, height) = rgba.dimensions();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );

    let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&texture_view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    });

    (texture, bind_group)
}

/// What a quad samples from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QuadFill {
    Tile(SurfaceHandle),
    /// Tinted placeholder under the hovered tile
    Shadow,
}

/// Quads in draw order; the hovered tile gets a drop shadow first
fn build_quads(
    draws: &[TileDraw],
    viewport_width: u32,
    viewport_height: u32,
) -> Vec<([TileVertex; 4], QuadFill)> {
    let mut quads = Vec::with_capacity(draws.len() + 1);
    for draw in draws {
        if draw.emphasis == Emphasis::Hovered {
            let mut shadow = draw.rect.scaled(SHADOW_SPREAD);
            shadow.y += SHADOW_OFFSET_Y;
            quads.push((
                create_quad(shadow, TINT_SHADOW, viewport_width, viewport_height),
                QuadFill::Shadow,
            ));
        }
        let tint = match draw.emphasis {
            Emphasis::Selected => TINT_SELECTED,
            Emphasis::None | Emphasis::Hovered => TINT_NONE,
        };
        quads.push((
            create_quad(draw.rect, tint, viewport_width, viewport_height),
            QuadFill::Tile(draw.handle),
        ));
    }
    quads
}

/// Quad vertices for a screen rect
fn create_quad(rect: ScreenRect, tint: [f32; 4], viewport_width: u32, viewport_height: u32) -> [TileVertex; 4] {
    let (x0, y0) = screen_to_ndc(rect.x as f32, rect.y as f32, viewport_width, viewport_height);
    let (x1, y1) = screen_to_ndc(
        (rect.x + rect.width) as f32,
        (rect.y + rect.height) as f32,
        viewport_width,
        viewport_height,
    );

    [
        TileVertex {
            position: [x0, y0, 0.0],
            tex_coords: [0.0, 0.0],
            tint,
        },
        TileVertex {
            position: [x1, y0, 0.0],
            tex_coords: [1.0, 0.0],
            tint,
        },
        TileVertex {
            position: [x1, y1, 0.0],
            tex_coords: [1.0, 1.0],
            tint,
        },
        TileVertex {
            position: [x0, y1, 0.0],
            tex_coords: [0.0, 1.0],
            tint,
        },
    ]
}

/// Convert screen coordinates to NDC
pub fn screen_to_ndc(x: f32, y: f32, viewport_width: u32, viewport_height: u32) -> (f32, f32) {
    let ndc_x = (x / viewport_width as f32) * 2.0 - 1.0;
    let ndc_y = 1.0 - (y / viewport_height as f32) * 2.0;
    (ndc_x, ndc_y)
}
