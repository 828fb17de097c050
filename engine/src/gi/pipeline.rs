//! CPU GI pipeline
//!
//! Sequences the CPU reference passes for one frame in the same order the GPU
//! dispatcher records them:
//!
//! ```text
//! anchor → downsample → capture → relight → probe trace → temporal
//!        → spatial → SH9 → gather → upsample → combine
//! ```
//!
//! All per-probe and per-page state lives in flat arenas owned by
//! [`CpuGiPipeline`]. The temporal ping-pong slots swap at the end of
//! [`CpuGiPipeline::render_frame`].
//!
//! # Example
//!
//! ```ignore
//! let mut gi = CpuGiPipeline::new(GiConfig::default(), 320, 180)?;
//! gi.rebuild_cards(&volume);
//! let stats = gi.render_frame(&inputs, &volume)?;
//! let image = gi.combined();
//! ```

use glam::Vec3;

use super::anchor::{AnchorParams, run_probe_anchor};
use super::atlas::{AtlasPingPong, MetaAtlas, MetaTexel, ProbeAtlas, RadianceTexel};
use super::capture::run_scene_capture;
use super::card_atlas::CardAtlas;
use super::card_builder::{FACES_PER_CHUNK, MeshCard, build_cards};
use super::combine::{CombineParams, run_combine, run_upsample};
use super::config::GiConfig;
use super::dda::{CounterSnapshot, DebugCounters};
use super::downsample::run_downsample;
use super::gather::{ProbeRadiance, run_gather};
use super::image::{CameraMatrices, ImagePlane};
use super::occupancy::{LightLuts, OccupancyVolume};
use super::page_table::{PageTable, PageTableStats, apply_card_rebuild, build_work_items};
use super::probe_grid::{ProbeAnchors, ProbeGridLayout};
use super::probe_trace::{SurfaceCacheView, run_probe_trace};
use super::relight::{TraceParams, run_voxel_relight};
use super::sh9::{Sh9, Sh9ProjectionTable, run_sh9_projection};
use super::spatial::{SpatialParams, run_spatial_filter};
use super::temporal::{TemporalParams, TemporalStats, run_temporal_filter};
use crate::error::{GiError, GiResult};

/// Per-frame G-buffer inputs, all at full resolution.
pub struct FrameInputs<'a> {
    /// Depth buffer, `[0, 1]`, 1 = far plane
    pub depth: &'a ImagePlane<f32>,
    /// World normals encoded `[-1, 1] → [0, 1]`
    pub normals: &'a ImagePlane<Vec3>,
    pub albedo: &'a ImagePlane<Vec3>,
    pub metallic: &'a ImagePlane<f32>,
    pub direct: &'a ImagePlane<Vec3>,
    pub camera: CameraMatrices,
}

/// Summary of one frame for logging and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub frame_index: u32,
    pub valid_probes: u32,
    pub captured_pages: u32,
    pub relit_texels: u32,
    pub traced_texels: u32,
    pub temporal: TemporalStats,
    pub pages: PageTableStats,
    pub counters: CounterSnapshot,
}

/// Software implementation of the full GI frame.
pub struct CpuGiPipeline {
    config: GiConfig,
    layout: ProbeGridLayout,
    luts: LightLuts,
    counters: DebugCounters,
    frame_index: u32,

    // Probe side
    anchors: ProbeAnchors,
    trace_atlas: ProbeAtlas,
    meta_atlas: MetaAtlas,
    filtered: AtlasPingPong,
    spatial: ProbeAtlas,
    sh: Vec<Sh9>,
    sh_table: Sh9ProjectionTable,

    // Surface cache
    cards: Vec<MeshCard>,
    cards_built: bool,
    page_table: PageTable,
    card_atlas: CardAtlas,

    // Screen buffers
    half_depth: ImagePlane<f32>,
    half_normals: ImagePlane<Vec3>,
    half_indirect: ImagePlane<Vec3>,
    indirect: ImagePlane<Vec3>,
    combined: ImagePlane<Vec3>,
}

impl CpuGiPipeline {
    pub fn new(config: GiConfig, width: u32, height: u32) -> GiResult<Self> {
        config.validate()?;
        if width == 0 || height == 0 {
            return Err(GiError::config(format!("invalid resolution {width}x{height}")));
        }
        let layout = ProbeGridLayout::new(width, height, config.probe_spacing, config.tile_size);
        let (hw, hh) = layout.half_resolution();
        log::info!(
            "[CpuGiPipeline] {}x{} pixels, {}x{} probes, {}² texel tiles",
            width, height, layout.grid_x, layout.grid_y, layout.tile_size
        );
        Ok(Self {
            luts: LightLuts::default().with_sun_color(config.sun_color),
            counters: DebugCounters::new(config.debug_counters),
            frame_index: 0,

            anchors: ProbeAnchors::new(layout),
            trace_atlas: ProbeAtlas::for_layout(&layout, RadianceTexel::ZERO),
            meta_atlas: MetaAtlas::for_layout(&layout, MetaTexel::EMPTY),
            filtered: AtlasPingPong::new(&layout),
            spatial: ProbeAtlas::for_layout(&layout, RadianceTexel::ZERO),
            sh: Vec::new(),
            sh_table: Sh9ProjectionTable::new(config.tile_size),

            cards: Vec::new(),
            cards_built: false,
            page_table: PageTable::new(0, config.max_physical_pages, config.page_size),
            card_atlas: CardAtlas::new(config.page_size, config.max_physical_pages),

            half_depth: ImagePlane::new(hw, hh, 1.0),
            half_normals: ImagePlane::new(hw, hh, Vec3::splat(0.5)),
            half_indirect: ImagePlane::new(hw, hh, Vec3::ZERO),
            indirect: ImagePlane::new(width, height, Vec3::ZERO),
            combined: ImagePlane::new(width, height, Vec3::ZERO),

            layout,
            config,
        })
    }

    pub fn config(&self) -> &GiConfig {
        &self.config
    }

    pub fn layout(&self) -> &ProbeGridLayout {
        &self.layout
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn anchors(&self) -> &ProbeAnchors {
        &self.anchors
    }

    /// Persistent per-texel trace results (before filtering).
    pub fn trace_atlas(&self) -> &ProbeAtlas {
        &self.trace_atlas
    }

    pub fn meta_atlas(&self) -> &MetaAtlas {
        &self.meta_atlas
    }

    /// Spatially filtered atlas of the last frame.
    pub fn filtered_atlas(&self) -> &ProbeAtlas {
        &self.spatial
    }

    pub fn sh_probes(&self) -> &[Sh9] {
        &self.sh
    }

    pub fn cards(&self) -> &[MeshCard] {
        &self.cards
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn card_atlas(&self) -> &CardAtlas {
        &self.card_atlas
    }

    pub fn counters(&self) -> &DebugCounters {
        &self.counters
    }

    pub fn luts_mut(&mut self) -> &mut LightLuts {
        &mut self.luts
    }

    pub fn half_indirect(&self) -> &ImagePlane<Vec3> {
        &self.half_indirect
    }

    /// Full-resolution indirect diffuse of the last frame.
    pub fn indirect(&self) -> &ImagePlane<Vec3> {
        &self.indirect
    }

    /// Final composite of the last frame.
    pub fn combined(&self) -> &ImagePlane<Vec3> {
        &self.combined
    }

    /// Enable or disable GI. Disabled frames output direct lighting only.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Replace the configuration, reallocating whatever its sizes affect.
    pub fn set_config(&mut self, config: GiConfig) -> GiResult<()> {
        config.validate()?;
        let sizes_changed = config.probe_spacing != self.config.probe_spacing
            || config.tile_size != self.config.tile_size
            || config.page_size != self.config.page_size
            || config.max_physical_pages != self.config.max_physical_pages;
        if sizes_changed {
            *self = Self::new(config, self.layout.width, self.layout.height)?;
            return Ok(());
        }
        self.luts.sun_color = config.sun_color;
        self.counters.set_enabled(config.debug_counters);
        self.config = config;
        Ok(())
    }

    /// Reallocate screen-sized resources. History is dropped.
    pub fn resize(&mut self, width: u32, height: u32) -> GiResult<()> {
        if width == 0 || height == 0 {
            return Err(GiError::config(format!("invalid resolution {width}x{height}")));
        }
        let layout = ProbeGridLayout::new(width, height, self.config.probe_spacing, self.config.tile_size);
        if layout == self.layout {
            return Ok(());
        }
        log::info!(
            "[CpuGiPipeline] Resize {}x{} -> {}x{}",
            self.layout.width, self.layout.height, width, height
        );
        self.layout = layout;
        self.anchors.resize(layout);
        self.trace_atlas.resize(&layout, RadianceTexel::ZERO);
        self.meta_atlas.resize(&layout, MetaTexel::EMPTY);
        self.filtered.resize(&layout);
        self.spatial.resize(&layout, RadianceTexel::ZERO);
        self.sh.clear();

        let (hw, hh) = layout.half_resolution();
        self.half_depth = ImagePlane::new(hw, hh, 1.0);
        self.half_normals = ImagePlane::new(hw, hh, Vec3::splat(0.5));
        self.half_indirect = ImagePlane::new(hw, hh, Vec3::ZERO);
        self.indirect = ImagePlane::new(width, height, Vec3::ZERO);
        self.combined = ImagePlane::new(width, height, Vec3::ZERO);
        Ok(())
    }

    /// Rebuild mesh cards after the occupancy volume changed. Resident pages
    /// whose card still exists are recaptured on the next frame.
    pub fn rebuild_cards(&mut self, volume: &OccupancyVolume) {
        let virtual_pages = volume.window().chunk_count() * FACES_PER_CHUNK;
        if virtual_pages != self.page_table.virtual_pages() {
            self.page_table.resize_virtual(virtual_pages);
        }
        let cards = build_cards(volume);
        let rebuild = apply_card_rebuild(&mut self.page_table, &self.cards, &cards);
        self.cards = cards;
        self.cards_built = true;
        log::info!(
            "[CpuGiPipeline] {} mesh cards over {} virtual pages ({} recaptured, {} unmapped)",
            self.cards.len(),
            virtual_pages,
            rebuild.dirtied,
            rebuild.unmapped
        );
    }

    fn check_inputs(&self, inputs: &FrameInputs) -> GiResult<()> {
        let (w, h) = (self.layout.width, self.layout.height);
        let sizes = [
            ("depth", inputs.depth.width(), inputs.depth.height()),
            ("normals", inputs.normals.width(), inputs.normals.height()),
            ("albedo", inputs.albedo.width(), inputs.albedo.height()),
            ("metallic", inputs.metallic.width(), inputs.metallic.height()),
            ("direct", inputs.direct.width(), inputs.direct.height()),
        ];
        for (name, iw, ih) in sizes {
            if iw != w || ih != h {
                return Err(GiError::resource(format!("{name} input is {iw}x{ih}, expected {w}x{h}")));
            }
        }
        Ok(())
    }

    fn trace_params(&self, texels_per_frame: u32) -> TraceParams {
        TraceParams {
            max_dda_steps: self.config.max_dda_steps,
            rays_per_texel: self.config.rays_per_texel,
            texels_per_frame,
            normal_bias: self.config.normal_bias,
            sky_radiance: self.config.sky_radiance,
        }
    }

    /// Run one frame. Inputs must match the current resolution.
    pub fn render_frame(&mut self, inputs: &FrameInputs, volume: &OccupancyVolume) -> GiResult<FrameStats> {
        self.check_inputs(inputs)?;
        let frame = self.frame_index;
        let mut stats = FrameStats { frame_index: frame, ..Default::default() };

        let combine_params = self.combine_params();

        if !self.config.enabled {
            self.indirect.fill(Vec3::ZERO);
            run_combine(
                inputs.direct,
                &self.indirect,
                inputs.albedo,
                inputs.metallic,
                inputs.depth,
                &combine_params,
                &mut self.combined,
            );
            self.frame_index = frame.wrapping_add(1);
            return Ok(stats);
        }

        if !self.cards_built {
            self.rebuild_cards(volume);
        }
        self.page_table.begin_frame(frame as u64);
        let counters = self.counters.enabled().then_some(&self.counters);

        // Anchor + downsample
        let anchor_params = AnchorParams {
            depth_discontinuity_threshold: self.config.depth_discontinuity_threshold,
            footprint: self.config.anchor_footprint,
        };
        run_probe_anchor(inputs.depth, inputs.normals, &inputs.camera, &anchor_params, &mut self.anchors);
        stats.valid_probes = self.anchors.valid_count() as u32;
        run_downsample(inputs.depth, inputs.normals, &mut self.half_depth, &mut self.half_normals);

        // Surface cache: capture → relight
        let work = build_work_items(&mut self.page_table, &self.cards);
        let card_meta = self.page_table.gpu_card_meta(&self.cards);
        stats.captured_pages = run_scene_capture(&work.capture, &card_meta, &work.triangles, &mut self.card_atlas) as u32;
        let relight_params = self.trace_params(self.config.texels_per_page_per_frame);
        stats.relit_texels = run_voxel_relight(
            &work.relight,
            &card_meta,
            &mut self.card_atlas,
            volume,
            &self.luts,
            &relight_params,
            frame,
            counters,
        );

        // Probe trace
        let directory = self.page_table.gpu_table();
        let surface = SurfaceCacheView { directory: &directory, card_meta: &card_meta, atlas: &self.card_atlas };
        let probe_params = self.trace_params(self.config.probe_texels_per_frame);
        stats.traced_texels = run_probe_trace(
            &self.anchors,
            &mut self.trace_atlas,
            &mut self.meta_atlas,
            volume,
            &self.luts,
            Some(&surface),
            &probe_params,
            self.config.max_trace_distance(),
            frame,
            counters,
        );

        // Temporal → spatial → SH9
        let temporal_params = TemporalParams {
            texels_per_frame: self.config.probe_texels_per_frame,
            temporal_alpha: self.config.temporal_alpha,
            hit_distance_reject_threshold: self.config.hit_distance_reject_threshold,
        };
        let (history, output) = self.filtered.history_and_output();
        stats.temporal = run_temporal_filter(&self.trace_atlas, history, output, &self.anchors, &temporal_params, frame);

        let spatial_params = SpatialParams {
            radius: self.config.spatial_radius,
            hit_distance_sigma: self.config.hit_distance_sigma,
        };
        run_spatial_filter(self.filtered.output(), &self.meta_atlas, &self.anchors, &spatial_params, &mut self.spatial);
        run_sh9_projection(&self.spatial, &self.meta_atlas, &self.anchors, &self.sh_table, &mut self.sh);

        // Gather → upsample → combine
        let radiance = ProbeRadiance::select(self.config.gather_source, &self.sh, &self.spatial);
        run_gather(
            &self.half_depth,
            &self.half_normals,
            &inputs.camera,
            &self.anchors,
            &radiance,
            &mut self.half_indirect,
        );
        run_upsample(
            &self.half_indirect,
            &self.half_depth,
            &self.half_normals,
            inputs.depth,
            inputs.normals,
            &inputs.camera,
            &mut self.indirect,
        );
        run_combine(
            inputs.direct,
            &self.indirect,
            inputs.albedo,
            inputs.metallic,
            inputs.depth,
            &combine_params,
            &mut self.combined,
        );

        // End of frame
        self.filtered.swap();
        self.page_table.evict_stale(self.config.max_idle_frames);
        stats.pages = self.page_table.stats();
        stats.counters = self.counters.snapshot();
        self.frame_index = frame.wrapping_add(1);

        log::debug!(
            "[CpuGiPipeline] Frame {}: {} valid probes, {} pages captured, {} texels relit, {} probe texels traced",
            frame, stats.valid_probes, stats.captured_pages, stats.relit_texels, stats.traced_texels
        );
        Ok(stats)
    }

    fn combine_params(&self) -> CombineParams {
        CombineParams {
            enabled: self.config.enabled,
            intensity: self.config.intensity,
            tint: self.config.tint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::math::encode_normal_unorm;
    use crate::gi::occupancy::{OccupancyCell, VolumeWindow};
    use glam::{IVec3, UVec3, Vec2};

    /// Floor at y = 0 (cells y = -1 solid), lit by sun from above.
    fn floor_volume() -> OccupancyVolume {
        let window = VolumeWindow::new(IVec3::new(-8, -2, -8), UVec3::splat(16), 1.0, 8);
        let mut vol = OccupancyVolume::new(window);
        vol.fill_box(IVec3::new(-8, -2, -8), IVec3::new(7, -1, 7), OccupancyCell::new(1, 0, 0, 0));
        vol.fill_box(IVec3::new(-8, 0, -8), IVec3::new(7, 13, 7), OccupancyCell::air(0, 15));
        vol
    }

    struct Frame {
        depth: ImagePlane<f32>,
        normals: ImagePlane<Vec3>,
        albedo: ImagePlane<Vec3>,
        metallic: ImagePlane<f32>,
        direct: ImagePlane<Vec3>,
        camera: CameraMatrices,
    }

    fn floor_frame(w: u32, h: u32) -> Frame {
        let camera = CameraMatrices::look_at(Vec3::new(0.0, 4.0, 3.0), Vec3::ZERO, 60f32.to_radians(), 1.0, 0.1, 100.0);
        let depth = ImagePlane::from_fn(w, h, |x, y| {
            let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
            let near = camera.world_position(uv, 0.0);
            let far = camera.world_position(uv, 1.0);
            if near.y <= far.y {
                return 1.0;
            }
            let t = near.y / (near.y - far.y);
            camera.project(near + (far - near) * t).map(|(_, d)| d).unwrap_or(1.0)
        });
        Frame {
            depth,
            normals: ImagePlane::new(w, h, encode_normal_unorm(Vec3::Y)),
            albedo: ImagePlane::new(w, h, Vec3::ONE),
            metallic: ImagePlane::new(w, h, 0.0),
            direct: ImagePlane::new(w, h, Vec3::new(0.1, 0.0, 0.0)),
            camera,
        }
    }

    fn inputs(f: &Frame) -> FrameInputs<'_> {
        FrameInputs {
            depth: &f.depth,
            normals: &f.normals,
            albedo: &f.albedo,
            metallic: &f.metallic,
            direct: &f.direct,
            camera: f.camera,
        }
    }

    fn small_config() -> GiConfig {
        GiConfig {
            probe_spacing: 8,
            tile_size: 4,
            page_size: 8,
            max_physical_pages: 64,
            max_dda_steps: 32,
            debug_counters: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_runs_and_outputs_are_finite() {
        let vol = floor_volume();
        let f = floor_frame(32, 32);
        let mut gi = CpuGiPipeline::new(small_config(), 32, 32).unwrap();
        let stats = gi.render_frame(&inputs(&f), &vol).unwrap();
        assert!(stats.valid_probes > 0);
        assert!(stats.captured_pages > 0);
        assert!(stats.traced_texels > 0);
        assert!(stats.counters.rays > 0);
        assert!(gi.combined().texels().iter().all(|v| v.is_finite()));
        assert_eq!(gi.frame_index(), 1);
        gi.page_table().validate().unwrap();
    }

    #[test]
    fn test_indirect_accumulates_on_lit_floor() {
        let vol = floor_volume();
        let f = floor_frame(32, 32);
        let mut gi = CpuGiPipeline::new(small_config(), 32, 32).unwrap();
        for _ in 0..4 {
            gi.render_frame(&inputs(&f), &vol).unwrap();
        }
        let lit = gi.indirect().texels().iter().filter(|v| v.length() > 0.0).count();
        assert!(lit > 0);
        // Combined never drops below direct with non-negative indirect.
        for (c, d) in gi.combined().texels().iter().zip(f.direct.texels()) {
            assert!(c.x >= d.x - 1e-6);
        }
    }

    #[test]
    fn test_disabled_outputs_direct() {
        let vol = floor_volume();
        let f = floor_frame(16, 16);
        let mut gi = CpuGiPipeline::new(small_config(), 16, 16).unwrap();
        gi.set_enabled(false);
        let stats = gi.render_frame(&inputs(&f), &vol).unwrap();
        assert_eq!(stats.traced_texels, 0);
        assert_eq!(gi.combined().texels(), f.direct.texels());
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let vol = floor_volume();
        let f = floor_frame(16, 16);
        let mut gi = CpuGiPipeline::new(small_config(), 32, 32).unwrap();
        let err = gi.render_frame(&inputs(&f), &vol).unwrap_err();
        assert!(matches!(err, GiError::Resource(_)));
    }

    #[test]
    fn test_resize_reallocates_probe_arenas() {
        let mut gi = CpuGiPipeline::new(small_config(), 32, 32).unwrap();
        gi.resize(64, 16).unwrap();
        assert_eq!(gi.layout().grid_x, 8);
        assert_eq!(gi.layout().grid_y, 2);
        assert_eq!(gi.anchors().as_slice().len(), 16);
        assert_eq!(gi.half_indirect().width(), 32);
        assert!(gi.resize(0, 16).is_err());
    }

    #[test]
    fn test_rebuild_unmaps_removed_cards() {
        let mut vol = floor_volume();
        let f = floor_frame(16, 16);
        let mut gi = CpuGiPipeline::new(small_config(), 16, 16).unwrap();
        gi.render_frame(&inputs(&f), &vol).unwrap();
        assert!(gi.page_table().stats().resident > 0);

        vol.fill_box(IVec3::new(-8, -2, -8), IVec3::new(7, -1, 7), OccupancyCell::air(0, 15));
        gi.rebuild_cards(&vol);
        assert!(gi.cards().is_empty());
        assert_eq!(gi.page_table().stats().resident, 0);
        gi.page_table().validate().unwrap();
    }

    #[test]
    fn test_voxel_edit_keeps_untouched_cache() {
        let mut vol = floor_volume();
        let f = floor_frame(16, 16);
        let mut gi = CpuGiPipeline::new(small_config(), 16, 16).unwrap();
        let first = gi.render_frame(&inputs(&f), &vol).unwrap();
        for _ in 0..3 {
            gi.render_frame(&inputs(&f), &vol).unwrap();
        }
        let before = gi.cards().to_vec();

        // One block on top of the floor in the +X/+Z chunk column
        vol.set(IVec3::new(3, 0, 3), OccupancyCell::new(1, 0, 0, 0));
        gi.rebuild_cards(&vol);

        let untouched: Vec<u32> = gi
            .cards()
            .iter()
            .filter(|c| before.contains(c))
            .filter_map(|c| gi.page_table().physical_page(c.virtual_page_index))
            .collect();
        assert!(!untouched.is_empty());
        let alpha = |gi: &CpuGiPipeline| -> f32 {
            let atlas = gi.card_atlas();
            untouched
                .iter()
                .flat_map(|&p| (0..atlas.texels_per_page()).map(move |t| (p, t)))
                .map(|(p, t)| atlas.radiance(p, t).w)
                .sum()
        };
        let accumulated = alpha(&gi);
        assert!(accumulated > 0.0);

        let second = gi.render_frame(&inputs(&f), &vol).unwrap();
        assert!(second.captured_pages < first.captured_pages);
        assert!(alpha(&gi) >= accumulated);
        gi.page_table().validate().unwrap();
    }
}
