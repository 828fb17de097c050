//! Uniform Structs for the GI Compute Shaders
//!
//! GPU-compatible uniform blocks shared by every GI pass. Layouts must match
//! `engine/shaders/gi_common.wgsl` exactly; all members are 16-byte vectors so
//! the Rust and WGSL offsets agree without implicit padding.

use glam::{Mat4, Vec3};

use crate::gi::config::GiConfig;
use crate::gi::image::CameraMatrices;
use crate::gi::occupancy::{LUT_SIZE, LightLuts, VolumeWindow};
use crate::gi::probe_grid::{ProbeAnchor, ProbeGridLayout};

/// Frame state block, `@binding(12)`.
///
/// WGSL layout (336 bytes):
///   offset   0: view (mat4x4<f32>)
///   offset  64: proj (mat4x4<f32>)
///   offset 128: inv_view (mat4x4<f32>)
///   offset 192: inv_proj (mat4x4<f32>)
///   offset 256: resolution (vec4<f32>)     xy = full, zw = half
///   offset 272: camera_pos (vec4<f32>)
///   offset 288: frame (vec4<u32>)          index, enabled, gather source, debug counters
///   offset 304: tint_intensity (vec4<f32>) rgb = tint, w = intensity
///   offset 320: sky_radiance (vec4<f32>)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub resolution: [f32; 4],
    pub camera_pos: [f32; 4],
    pub frame: [u32; 4],
    pub tint_intensity: [f32; 4],
    pub sky_radiance: [f32; 4],
}

/// World-probe state block, `@binding(13)`.
///
/// WGSL layout (128 bytes):
///   offset   0: grid (vec4<u32>)              grid_x, grid_y, spacing, tile_size
///   offset  16: volume_origin (vec4<i32>)     xyz, w = chunk size
///   offset  32: ring_offset (vec4<u32>)       xyz, w = page size
///   offset  48: volume_resolution (vec4<u32>) xyz, w = probe count
///   offset  64: trace (vec4<u32>)             max steps, rays/texel, page batch, probe batch
///   offset  80: counts (vec4<u32>)            capture items, relight items, footprint, spatial radius
///   offset  96: params0 (vec4<f32>)           voxel size, normal bias, max distance, depth threshold
///   offset 112: params1 (vec4<f32>)           temporal alpha, reject threshold, sigma, 0
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WorldProbeUniforms {
    pub grid: [u32; 4],
    pub volume_origin: [i32; 4],
    pub ring_offset: [u32; 4],
    pub volume_resolution: [u32; 4],
    pub trace: [u32; 4],
    pub counts: [u32; 4],
    pub params0: [f32; 4],
    pub params1: [f32; 4],
}

/// Hit-shading lookup tables, `@binding(14)`.
///
/// Scalars are packed four per `vec4` (uniform arrays stride at 16 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightLutsUniform {
    pub light_colors: [[f32; 4]; LUT_SIZE],
    pub block_scalars: [[f32; 4]; LUT_SIZE / 4],
    pub sun_scalars: [[f32; 4]; LUT_SIZE / 4],
    pub sun_color: [f32; 4],
}

/// Probe anchor as stored on the GPU (`ProbeAnchor` in WGSL).
///
/// Positions stay in f32 so anchors far from the origin keep their precision;
/// the RGBA16F export lives on [`crate::gi::ProbeAnchors`].
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuProbeAnchor {
    pub position_validity: [f32; 4],
    pub normal: [f32; 4],
}

pub const FRAME_UNIFORMS_SIZE: usize = 336;
pub const WORLD_PROBE_UNIFORMS_SIZE: usize = 128;
pub const LIGHT_LUTS_UNIFORM_SIZE: usize = 400;
pub const GPU_PROBE_ANCHOR_SIZE: usize = 32;

const _: () = {
    assert!(
        std::mem::size_of::<FrameUniforms>() == FRAME_UNIFORMS_SIZE,
        "FrameUniforms must be 336 bytes to match WGSL"
    );
    assert!(
        std::mem::size_of::<WorldProbeUniforms>() == WORLD_PROBE_UNIFORMS_SIZE,
        "WorldProbeUniforms must be 128 bytes to match WGSL"
    );
    assert!(
        std::mem::size_of::<LightLutsUniform>() == LIGHT_LUTS_UNIFORM_SIZE,
        "LightLutsUniform must be 400 bytes to match WGSL"
    );
    assert!(
        std::mem::size_of::<GpuProbeAnchor>() == GPU_PROBE_ANCHOR_SIZE,
        "GpuProbeAnchor must be 32 bytes to match WGSL"
    );
};

static_assertions::const_assert_eq!(std::mem::align_of::<FrameUniforms>(), 4);
static_assertions::const_assert_eq!(std::mem::size_of::<WorldProbeUniforms>() % 16, 0);

fn mat(m: Mat4) -> [[f32; 4]; 4] {
    m.to_cols_array_2d()
}

fn vec4(v: Vec3, w: f32) -> [f32; 4] {
    v.extend(w).to_array()
}

impl FrameUniforms {
    pub fn new(camera: &CameraMatrices, layout: &ProbeGridLayout, frame_index: u32, config: &GiConfig) -> Self {
        let (half_w, half_h) = layout.half_resolution();
        Self {
            view: mat(camera.view),
            proj: mat(camera.proj),
            inv_view: mat(camera.inv_view),
            inv_proj: mat(camera.inv_proj),
            resolution: [layout.width as f32, layout.height as f32, half_w as f32, half_h as f32],
            camera_pos: vec4(camera.eye(), 1.0),
            frame: [
                frame_index,
                config.enabled as u32,
                config.gather_source.as_gpu(),
                config.debug_counters as u32,
            ],
            tint_intensity: vec4(config.tint, config.intensity),
            sky_radiance: vec4(config.sky_radiance, 0.0),
        }
    }

    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.frame[0]
    }

    #[inline]
    pub fn full_resolution(&self) -> (u32, u32) {
        (self.resolution[0] as u32, self.resolution[1] as u32)
    }

    #[inline]
    pub fn half_resolution(&self) -> (u32, u32) {
        (self.resolution[2] as u32, self.resolution[3] as u32)
    }
}

impl WorldProbeUniforms {
    pub fn new(
        config: &GiConfig,
        layout: &ProbeGridLayout,
        window: &VolumeWindow,
        capture_count: u32,
        relight_count: u32,
    ) -> Self {
        Self {
            grid: [layout.grid_x, layout.grid_y, layout.spacing, layout.tile_size],
            volume_origin: [window.origin.x, window.origin.y, window.origin.z, window.chunk_size as i32],
            ring_offset: [window.ring_offset.x, window.ring_offset.y, window.ring_offset.z, config.page_size],
            volume_resolution: [
                window.resolution.x,
                window.resolution.y,
                window.resolution.z,
                layout.probe_count(),
            ],
            trace: [
                config.max_dda_steps,
                config.rays_per_texel,
                config.texels_per_page_per_frame,
                config.probe_texels_per_frame,
            ],
            counts: [capture_count, relight_count, config.anchor_footprint, config.spatial_radius],
            params0: [
                window.voxel_size,
                config.normal_bias,
                config.max_trace_distance(),
                config.depth_discontinuity_threshold,
            ],
            params1: [
                config.temporal_alpha,
                config.hit_distance_reject_threshold,
                config.hit_distance_sigma,
                0.0,
            ],
        }
    }

    #[inline]
    pub fn probe_count(&self) -> u32 {
        self.volume_resolution[3]
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.ring_offset[3]
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.grid[3]
    }
}

impl From<&LightLuts> for LightLutsUniform {
    fn from(luts: &LightLuts) -> Self {
        let mut out = Self {
            light_colors: [[0.0; 4]; LUT_SIZE],
            block_scalars: [[0.0; 4]; LUT_SIZE / 4],
            sun_scalars: [[0.0; 4]; LUT_SIZE / 4],
            sun_color: vec4(luts.sun_color, 0.0),
        };
        for i in 0..LUT_SIZE {
            out.light_colors[i] = vec4(luts.light_colors[i], 0.0);
            out.block_scalars[i / 4][i % 4] = luts.block_scalars[i];
            out.sun_scalars[i / 4][i % 4] = luts.sun_scalars[i];
        }
        out
    }
}

impl From<&ProbeAnchor> for GpuProbeAnchor {
    fn from(a: &ProbeAnchor) -> Self {
        Self {
            position_validity: vec4(a.position, a.validity),
            normal: vec4(a.normal, 0.0),
        }
    }
}

impl GpuProbeAnchor {
    pub fn to_anchor(&self) -> ProbeAnchor {
        let [x, y, z, validity] = self.position_validity;
        let [nx, ny, nz, _] = self.normal;
        ProbeAnchor { position: Vec3::new(x, y, z), normal: Vec3::new(nx, ny, nz), validity }
    }
}
