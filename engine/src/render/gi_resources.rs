//! GPU resources of the GI pipeline
//!
//! Every buffer the compute passes bind, sized from the probe grid layout and
//! the page pool. Per-probe and per-page state lives in flat storage arrays
//! indexed by probe index or physical page id. The temporal atlases are a
//! ping-pong pair: `history_slot` names the one read as history this frame,
//! the other is written, and [`GiResources::swap_history`] flips them.
//!
//! Buffer map (element types match the WGSL declarations):
//!
//! | Buffer            | Element          | Count                         |
//! |-------------------|------------------|-------------------------------|
//! | depth / normals   | f32 / vec4       | width × height                |
//! | half depth/normal | f32 / vec4       | half width × half height      |
//! | anchors           | ProbeAnchor (32) | probe count                   |
//! | atlases           | vec2<u32> (8)    | probe count × tile²           |
//! | meta atlas        | vec2<f32> (8)    | probe count × tile²           |
//! | card depth/mat.   | u32              | physical pages × page²        |
//! | card radiance     | vec4<f32>        | physical pages × page²        |
//! | SH probes         | rgba16f texture  | grid_x × grid_y × 7 layers    |

use bytemuck::Zeroable;
use glam::Vec3;

use super::gpu_context::{GpuContext, padded_size};
use super::resource_registry::GpuResource;
use super::uniforms::{FrameUniforms, GpuProbeAnchor, LightLutsUniform, WorldProbeUniforms};
use crate::error::{GiError, GiResult};
use crate::gi::atlas::{MetaTexel, RadianceTexel};
use crate::gi::config::GiConfig;
use crate::gi::dda::CounterSnapshot;
use crate::gi::image::ImagePlane;
use crate::gi::occupancy::OccupancyVolume;
use crate::gi::page_table::SurfaceCacheWork;
use crate::gi::pipeline::FrameInputs;
use crate::gi::probe_grid::{ProbeAnchor, ProbeGridLayout};
use crate::gi::sh9::{SH_PLANES, Sh9ProjectionTable};
use crate::gi::work_items::{CaptureWorkItem, CardMeta, RelightWorkItem};

/// Format of the SH9 probe texture array.
pub const SH_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

const VEC4_BYTES: u64 = 16;
const TEXEL_BYTES: u64 = std::mem::size_of::<RadianceTexel>() as u64;

static_assertions::const_assert_eq!(std::mem::size_of::<RadianceTexel>(), 8);
static_assertions::const_assert_eq!(std::mem::size_of::<MetaTexel>(), 8);

/// Screen-sized buffers, recreated on resize.
pub struct ScreenBuffers {
    pub depth: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub albedo_metallic: wgpu::Buffer,
    pub direct: wgpu::Buffer,
    pub indirect: wgpu::Buffer,
    pub combined: wgpu::Buffer,
    pub half_depth: wgpu::Buffer,
    pub half_normals: wgpu::Buffer,
    pub half_indirect: wgpu::Buffer,
}

/// Probe-grid buffers, recreated on resize.
pub struct ProbeBuffers {
    pub anchors: wgpu::Buffer,
    pub trace_atlas: wgpu::Buffer,
    pub meta_atlas: wgpu::Buffer,
    pub temporal: [wgpu::Buffer; 2],
    pub spatial_atlas: wgpu::Buffer,
    pub sh_table: wgpu::Buffer,
    pub sh_texture: wgpu::Texture,
    /// Write-only storage view for the SH9 pass
    pub sh_storage_view: wgpu::TextureView,
    /// Sampled view for the gather pass
    pub sh_sampled_view: wgpu::TextureView,
}

/// Surface cache and volume buffers.
pub struct SurfaceBuffers {
    pub card_meta: wgpu::Buffer,
    pub card_depth: wgpu::Buffer,
    pub card_material: wgpu::Buffer,
    pub card_radiance: wgpu::Buffer,
    pub page_directory: wgpu::Buffer,
    pub occupancy: wgpu::Buffer,
    pub capture_items: wgpu::Buffer,
    pub relight_items: wgpu::Buffer,
    pub triangles: wgpu::Buffer,
    pub counters: wgpu::Buffer,
}

/// Uniform blocks at bindings 12, 13 and 14.
pub struct UniformBuffers {
    pub frame: wgpu::Buffer,
    pub world: wgpu::Buffer,
    pub luts: wgpu::Buffer,
}

/// All GPU state of the GI pipeline.
pub struct GiResources {
    pub layout: ProbeGridLayout,
    pub screen: ScreenBuffers,
    pub probes: ProbeBuffers,
    pub surface: SurfaceBuffers,
    pub uniforms: UniformBuffers,
    history_slot: usize,
    capture_count: u32,
    relight_count: u32,
}

impl GiResources {
    pub fn new(ctx: &GpuContext, config: &GiConfig, width: u32, height: u32) -> GiResult<Self> {
        if width == 0 || height == 0 {
            return Err(GiError::resource(format!("invalid resolution {width}x{height}")));
        }
        let layout = ProbeGridLayout::new(width, height, config.probe_spacing, config.tile_size);
        let resources = Self {
            screen: ScreenBuffers::new(ctx, &layout),
            probes: ProbeBuffers::new(ctx, &layout),
            surface: SurfaceBuffers::new(ctx, config),
            uniforms: UniformBuffers::new(ctx),
            layout,
            history_slot: 0,
            capture_count: 0,
            relight_count: 0,
        };
        log::info!(
            "[GiResources] {}x{} pixels, {} probes, {} physical pages",
            width, height, layout.probe_count(), config.max_physical_pages
        );
        Ok(resources)
    }

    /// Recreate screen and probe buffers for a new resolution. History is
    /// dropped. Returns the replaced GPU objects, empty when nothing changed.
    pub fn resize(
        &mut self,
        ctx: &GpuContext,
        config: &GiConfig,
        width: u32,
        height: u32,
    ) -> GiResult<Vec<GpuResource>> {
        if width == 0 || height == 0 {
            return Err(GiError::resource(format!("invalid resolution {width}x{height}")));
        }
        let layout = ProbeGridLayout::new(width, height, config.probe_spacing, config.tile_size);
        if layout == self.layout {
            return Ok(Vec::new());
        }
        log::info!(
            "[GiResources] Resize {}x{} -> {}x{}",
            self.layout.width, self.layout.height, width, height
        );
        self.layout = layout;
        let screen = std::mem::replace(&mut self.screen, ScreenBuffers::new(ctx, &layout));
        let probes = std::mem::replace(&mut self.probes, ProbeBuffers::new(ctx, &layout));
        self.history_slot = 0;

        let mut retired = screen.into_resources();
        retired.extend(probes.into_resources());
        Ok(retired)
    }

    #[inline]
    pub fn history_slot(&self) -> usize {
        self.history_slot
    }

    #[inline]
    pub fn output_slot(&self) -> usize {
        1 - self.history_slot
    }

    /// Temporal history read this frame.
    pub fn history_atlas(&self) -> &wgpu::Buffer {
        &self.probes.temporal[self.history_slot]
    }

    /// Temporal output written this frame.
    pub fn filtered_atlas(&self) -> &wgpu::Buffer {
        &self.probes.temporal[self.output_slot()]
    }

    pub fn swap_history(&mut self) {
        self.history_slot = self.output_slot();
    }

    #[inline]
    pub fn capture_count(&self) -> u32 {
        self.capture_count
    }

    #[inline]
    pub fn relight_count(&self) -> u32 {
        self.relight_count
    }

    /// Upload the full-resolution G-buffer planes.
    pub fn upload_gbuffer(&self, ctx: &GpuContext, inputs: &FrameInputs) -> GiResult<()> {
        let (w, h) = (self.layout.width, self.layout.height);
        if inputs.depth.width() != w || inputs.depth.height() != h {
            return Err(GiError::resource(format!(
                "G-buffer is {}x{}, resources are {w}x{h}",
                inputs.depth.width(),
                inputs.depth.height()
            )));
        }
        ctx.write_buffer(&self.screen.depth, inputs.depth.texels());
        ctx.write_buffer(&self.screen.normals, &vec4_plane(inputs.normals, |_| 0.0));
        let metallic = inputs.metallic.texels();
        ctx.write_buffer(&self.screen.albedo_metallic, &vec4_plane(inputs.albedo, |i| metallic[i]));
        ctx.write_buffer(&self.screen.direct, &vec4_plane(inputs.direct, |_| 1.0));
        Ok(())
    }

    /// Upload the occupancy cells, growing the buffer if the window grew.
    pub fn upload_volume(&mut self, ctx: &GpuContext, volume: &OccupancyVolume) {
        let bytes: &[u8] = bytemuck::cast_slice(volume.cells());
        ensure_capacity(ctx, &mut self.surface.occupancy, "gi_occupancy", bytes.len() as u64);
        ctx.queue.write_buffer(&self.surface.occupancy, 0, bytes);
    }

    /// Upload this frame's work items, card placements and page directory.
    pub fn upload_surface_work(
        &mut self,
        ctx: &GpuContext,
        work: &SurfaceCacheWork,
        card_meta: &[CardMeta],
        directory: &[u32],
    ) {
        let triangles: Vec<[f32; 4]> =
            work.triangles.iter().flat_map(|t| t.iter().map(|v| v.extend(0.0).to_array())).collect();
        let s = &mut self.surface;
        write_growing(ctx, &mut s.capture_items, "gi_capture_items", &work.capture);
        write_growing(ctx, &mut s.relight_items, "gi_relight_items", &work.relight);
        write_growing(ctx, &mut s.triangles, "gi_triangles", &triangles);
        write_growing(ctx, &mut s.card_meta, "gi_card_meta", card_meta);
        write_growing(ctx, &mut s.page_directory, "gi_page_directory", directory);
        self.capture_count = work.capture.len() as u32;
        self.relight_count = work.relight.len() as u32;
    }

    pub fn upload_uniforms(
        &self,
        ctx: &GpuContext,
        frame: &FrameUniforms,
        world: &WorldProbeUniforms,
        luts: &LightLutsUniform,
    ) {
        ctx.queue.write_buffer(&self.uniforms.frame, 0, bytemuck::bytes_of(frame));
        ctx.queue.write_buffer(&self.uniforms.world, 0, bytemuck::bytes_of(world));
        ctx.queue.write_buffer(&self.uniforms.luts, 0, bytemuck::bytes_of(luts));
    }

    pub fn reset_counters(&self, ctx: &GpuContext) {
        ctx.write_buffer(&self.surface.counters, &[0u32; 4]);
    }

    pub fn read_counters(&self, ctx: &GpuContext) -> GiResult<CounterSnapshot> {
        let slots: Vec<u32> = ctx.read_buffer(&self.surface.counters)?;
        let slot = |i: usize| slots.get(i).copied().unwrap_or(0);
        Ok(CounterSnapshot { rays: slot(0), hits: slot(1), misses: slot(2), out_of_bounds_starts: slot(3) })
    }

    pub fn read_anchors(&self, ctx: &GpuContext) -> GiResult<Vec<ProbeAnchor>> {
        let raw: Vec<GpuProbeAnchor> = ctx.read_buffer(&self.probes.anchors)?;
        Ok(raw.iter().take(self.layout.probe_count() as usize).map(GpuProbeAnchor::to_anchor).collect())
    }

    /// Full-resolution composite of the last recorded frame.
    pub fn read_combined(&self, ctx: &GpuContext) -> GiResult<ImagePlane<Vec3>> {
        self.read_rgb_plane(ctx, &self.screen.combined)
    }

    /// Full-resolution indirect diffuse of the last recorded frame.
    pub fn read_indirect(&self, ctx: &GpuContext) -> GiResult<ImagePlane<Vec3>> {
        self.read_rgb_plane(ctx, &self.screen.indirect)
    }

    fn read_rgb_plane(&self, ctx: &GpuContext, buffer: &wgpu::Buffer) -> GiResult<ImagePlane<Vec3>> {
        let texels: Vec<[f32; 4]> = ctx.read_buffer(buffer)?;
        let (w, h) = (self.layout.width, self.layout.height);
        Ok(ImagePlane::from_fn(w, h, |x, y| {
            let [r, g, b, _] = texels.get((y * w + x) as usize).copied().unwrap_or_default();
            Vec3::new(r, g, b)
        }))
    }
}

impl ScreenBuffers {
    fn into_resources(self) -> Vec<GpuResource> {
        [
            self.depth,
            self.normals,
            self.albedo_metallic,
            self.direct,
            self.indirect,
            self.combined,
            self.half_depth,
            self.half_normals,
            self.half_indirect,
        ]
        .into_iter()
        .map(GpuResource::Buffer)
        .collect()
    }

    fn new(ctx: &GpuContext, layout: &ProbeGridLayout) -> Self {
        let full = layout.width as u64 * layout.height as u64;
        let (hw, hh) = layout.half_resolution();
        let half = hw as u64 * hh as u64;
        Self {
            depth: ctx.create_empty_storage_buffer("gi_depth", full * 4),
            normals: ctx.create_empty_storage_buffer("gi_normals", full * VEC4_BYTES),
            albedo_metallic: ctx.create_empty_storage_buffer("gi_albedo_metallic", full * VEC4_BYTES),
            direct: ctx.create_empty_storage_buffer("gi_direct", full * VEC4_BYTES),
            indirect: ctx.create_empty_storage_buffer("gi_indirect", full * VEC4_BYTES),
            combined: ctx.create_empty_storage_buffer("gi_combined", full * VEC4_BYTES),
            half_depth: ctx.create_empty_storage_buffer("gi_half_depth", half * 4),
            half_normals: ctx.create_empty_storage_buffer("gi_half_normals", half * VEC4_BYTES),
            half_indirect: ctx.create_empty_storage_buffer("gi_half_indirect", half * VEC4_BYTES),
        }
    }
}

impl ProbeBuffers {
    fn into_resources(self) -> Vec<GpuResource> {
        let [t0, t1] = self.temporal;
        let mut out: Vec<GpuResource> = [
            self.anchors,
            self.trace_atlas,
            self.meta_atlas,
            t0,
            t1,
            self.spatial_atlas,
            self.sh_table,
        ]
        .into_iter()
        .map(GpuResource::Buffer)
        .collect();
        out.push(GpuResource::Texture(self.sh_texture));
        out
    }

    fn new(ctx: &GpuContext, layout: &ProbeGridLayout) -> Self {
        let probes = layout.probe_count() as u64;
        let texels = layout.atlas_texels() as u64;
        let sh_texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gi_sh_probes"),
            size: wgpu::Extent3d {
                width: layout.grid_x,
                height: layout.grid_y,
                depth_or_array_layers: SH_PLANES as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SH_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = |label| {
            sh_texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                ..Default::default()
            })
        };
        let sh_storage_view = view("gi_sh_probes_storage");
        let sh_sampled_view = view("gi_sh_probes_sampled");
        let table = Sh9ProjectionTable::new(layout.tile_size).gpu_table();

        Self {
            anchors: ctx.create_empty_storage_buffer(
                "gi_probe_anchors",
                probes * std::mem::size_of::<GpuProbeAnchor>() as u64,
            ),
            trace_atlas: ctx.create_empty_storage_buffer("gi_trace_atlas", texels * TEXEL_BYTES),
            meta_atlas: ctx.create_empty_storage_buffer("gi_meta_atlas", texels * TEXEL_BYTES),
            temporal: [
                ctx.create_empty_storage_buffer("gi_temporal_atlas_0", texels * TEXEL_BYTES),
                ctx.create_empty_storage_buffer("gi_temporal_atlas_1", texels * TEXEL_BYTES),
            ],
            spatial_atlas: ctx.create_empty_storage_buffer("gi_spatial_atlas", texels * TEXEL_BYTES),
            sh_table: ctx.create_storage_buffer("gi_sh_table", &table),
            sh_texture,
            sh_storage_view,
            sh_sampled_view,
        }
    }
}

impl SurfaceBuffers {
    fn new(ctx: &GpuContext, config: &GiConfig) -> Self {
        let page_texels = config.max_physical_pages as u64 * config.page_size as u64 * config.page_size as u64;
        Self {
            card_meta: ctx.create_empty_storage_buffer(
                "gi_card_meta",
                config.max_physical_pages as u64 * std::mem::size_of::<CardMeta>() as u64,
            ),
            card_depth: ctx.create_empty_storage_buffer("gi_card_depth", page_texels * 4),
            card_material: ctx.create_empty_storage_buffer("gi_card_material", page_texels * 4),
            card_radiance: ctx.create_empty_storage_buffer("gi_card_radiance", page_texels * VEC4_BYTES),
            page_directory: ctx.create_empty_storage_buffer("gi_page_directory", 0),
            occupancy: ctx.create_empty_storage_buffer("gi_occupancy", 0),
            capture_items: ctx.create_empty_storage_buffer(
                "gi_capture_items",
                std::mem::size_of::<CaptureWorkItem>() as u64,
            ),
            relight_items: ctx.create_empty_storage_buffer(
                "gi_relight_items",
                std::mem::size_of::<RelightWorkItem>() as u64,
            ),
            triangles: ctx.create_empty_storage_buffer("gi_triangles", 3 * VEC4_BYTES),
            counters: ctx.create_empty_storage_buffer("gi_debug_counters", 4 * 4),
        }
    }
}

impl UniformBuffers {
    fn new(ctx: &GpuContext) -> Self {
        Self {
            frame: ctx.create_uniform_buffer("gi_frame_uniforms", &FrameUniforms::zeroed()),
            world: ctx.create_uniform_buffer("gi_world_uniforms", &WorldProbeUniforms::default()),
            luts: ctx.create_uniform_buffer("gi_light_luts", &LightLutsUniform::zeroed()),
        }
    }
}

fn vec4_plane(plane: &ImagePlane<Vec3>, w: impl Fn(usize) -> f32) -> Vec<[f32; 4]> {
    plane.texels().iter().enumerate().map(|(i, v)| v.extend(w(i)).to_array()).collect()
}

/// Replace `buffer` with a larger one when `bytes` does not fit.
fn ensure_capacity(ctx: &GpuContext, buffer: &mut wgpu::Buffer, label: &str, bytes: u64) {
    if bytes > buffer.size() {
        let size = padded_size(bytes.next_power_of_two());
        log::debug!("[GiResources] Growing '{}' {} -> {} bytes", label, buffer.size(), size);
        *buffer = ctx.create_empty_storage_buffer(label, size);
    }
}

fn write_growing<T: bytemuck::Pod>(ctx: &GpuContext, buffer: &mut wgpu::Buffer, label: &str, data: &[T]) {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    if bytes.is_empty() {
        return;
    }
    ensure_capacity(ctx, buffer, label, bytes.len() as u64);
    ctx.queue.write_buffer(buffer, 0, bytes);
}
