//! GI Configuration
//!
//! Centralizes every tunable of the probe GI pipeline: probe placement,
//! surface-cache paging, tracing budgets, filter strengths and the final
//! composite. `Default` gives the shipping values; JSON files can override any
//! subset of fields.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{GiError, GiResult};

/// Where the screen-space gather reads probe radiance from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatherSource {
    /// Irradiance evaluated from the projected SH9 coefficients.
    #[default]
    Sh9,
    /// Nearest octahedral texel of the filtered atlas (debug/visualization).
    Atlas,
}

impl GatherSource {
    pub fn as_gpu(self) -> u32 {
        match self {
            GatherSource::Sh9 => 0,
            GatherSource::Atlas => 1,
        }
    }
}

/// Configuration for the whole GI pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiConfig {
    /// Master toggle; when off the combine pass outputs direct lighting only.
    pub enabled: bool,

    // Probe placement
    /// Screen-space probe spacing in full-resolution pixels
    pub probe_spacing: u32,
    /// Octahedral tile edge length in texels (tile_size² directions per probe)
    pub tile_size: u32,
    /// Edge length of the NxN depth-variance footprint used by the anchor pass
    pub anchor_footprint: u32,
    /// Depth variance above which a probe is flagged as an edge probe
    pub depth_discontinuity_threshold: f32,

    // Surface cache paging
    /// Physical page edge length in texels
    pub page_size: u32,
    /// Number of physical pages backing the surface cache
    pub max_physical_pages: u32,
    /// Virtual pages idle for longer than this many frames are unmapped
    pub max_idle_frames: u64,

    // Tracing
    /// Voxel edge length in world units
    pub voxel_size: f32,
    /// Occupancy chunk edge length in cells (one card per chunk face)
    pub chunk_size: u32,
    /// DDA step budget per ray
    pub max_dda_steps: u32,
    /// Rays per surface-cache texel per visit
    pub rays_per_texel: u32,
    /// Surface-cache texels visited per page per frame
    pub texels_per_page_per_frame: u32,
    /// Probe atlas texels traced per probe per frame
    pub probe_texels_per_frame: u32,
    /// Ray origin offset along the surface normal (world units)
    pub normal_bias: f32,
    /// Radiance returned by rays that leave the volume
    pub sky_radiance: Vec3,
    /// Colour multiplied with the per-cell sun scalar
    pub sun_color: Vec3,
    /// Increment the atomic debug counters
    pub debug_counters: bool,

    // Filtering
    /// History weight for traced texels (0 = current only)
    pub temporal_alpha: f32,
    /// Relative hit-distance change that rejects history
    pub hit_distance_reject_threshold: f32,
    /// Spatial filter radius in texels
    pub spatial_radius: u32,
    /// Hit-distance edge-stopping sigma (world units)
    pub hit_distance_sigma: f32,

    // Gather / composite
    pub gather_source: GatherSource,
    /// Indirect diffuse multiplier
    pub intensity: f32,
    /// Indirect diffuse tint (linear RGB)
    pub tint: Vec3,
}

impl Default for GiConfig {
    fn default() -> Self {
        Self {
            enabled: true,

            probe_spacing: 8,
            tile_size: 8,
            anchor_footprint: 3,
            depth_discontinuity_threshold: 1.0e-5,

            page_size: 16,
            max_physical_pages: 1024,
            max_idle_frames: 120,

            voxel_size: 1.0,
            chunk_size: 16,
            max_dda_steps: 64,
            rays_per_texel: 1,
            texels_per_page_per_frame: 32,
            probe_texels_per_frame: 16,
            normal_bias: 0.05,
            sky_radiance: Vec3::new(0.35, 0.45, 0.6),
            sun_color: Vec3::new(1.0, 0.95, 0.85),
            debug_counters: false,

            temporal_alpha: 0.9,
            hit_distance_reject_threshold: 0.3,
            spatial_radius: 1,
            hit_distance_sigma: 4.0,

            gather_source: GatherSource::Sh9,
            intensity: 1.0,
            tint: Vec3::ONE,
        }
    }
}

impl GiConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> GiResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        log::info!("[GiConfig] Loaded {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate a JSON config.
    pub fn from_json(text: &str) -> GiResult<Self> {
        let config: GiConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> GiResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the passes cannot run with.
    pub fn validate(&self) -> GiResult<()> {
        fn nonzero(name: &str, v: u32) -> GiResult<()> {
            if v == 0 {
                return Err(GiError::config(format!("{name} must be > 0")));
            }
            Ok(())
        }
        nonzero("probe_spacing", self.probe_spacing)?;
        nonzero("tile_size", self.tile_size)?;
        nonzero("anchor_footprint", self.anchor_footprint)?;
        nonzero("page_size", self.page_size)?;
        nonzero("max_physical_pages", self.max_physical_pages)?;
        nonzero("chunk_size", self.chunk_size)?;
        nonzero("max_dda_steps", self.max_dda_steps)?;
        nonzero("rays_per_texel", self.rays_per_texel)?;
        nonzero("texels_per_page_per_frame", self.texels_per_page_per_frame)?;
        nonzero("probe_texels_per_frame", self.probe_texels_per_frame)?;

        if self.tile_size > 16 {
            return Err(GiError::config("tile_size must be <= 16 (one workgroup per tile)"));
        }
        if !(0.0..=1.0).contains(&self.temporal_alpha) {
            return Err(GiError::config("temporal_alpha must be in [0, 1]"));
        }
        if !(self.voxel_size > 0.0) || !self.voxel_size.is_finite() {
            return Err(GiError::config("voxel_size must be finite and > 0"));
        }
        if !(self.hit_distance_sigma > 0.0) {
            return Err(GiError::config("hit_distance_sigma must be > 0"));
        }
        if self.hit_distance_reject_threshold < 0.0 || self.depth_discontinuity_threshold < 0.0 {
            return Err(GiError::config("thresholds must be >= 0"));
        }
        if self.normal_bias < 0.0 || self.intensity < 0.0 {
            return Err(GiError::config("normal_bias and intensity must be >= 0"));
        }
        Ok(())
    }

    /// Longest distance a probe or surface-cache ray can travel.
    pub fn max_trace_distance(&self) -> f32 {
        self.max_dda_steps as f32 * self.voxel_size * 3f32.sqrt()
    }
}
