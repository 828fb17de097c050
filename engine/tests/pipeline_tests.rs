//! Pipeline Tests - CPU reference frames
//!
//! Whole-frame behaviour of `CpuGiPipeline` on a small voxel floor, plus the
//! per-pass numeric properties the GPU shaders are held to.

use glam::{IVec3, UVec3, Vec2, Vec3};
use voxel_gi_engine::gi::atlas::{MetaAtlas, MetaTexel, ProbeAtlas, RadianceTexel};
use voxel_gi_engine::gi::combine::{CombineParams, combine_pixel};
use voxel_gi_engine::gi::math::encode_normal_unorm;
use voxel_gi_engine::gi::sh9::{Sh9, Sh9ProjectionTable, project_probe};
use voxel_gi_engine::gi::temporal::reject_history;
use voxel_gi_engine::gi::{
    CameraMatrices, CpuGiPipeline, FrameInputs, GiConfig, ImagePlane, OccupancyCell, OccupancyVolume,
    VolumeWindow,
};

// ============================================================================
// Scene helpers
// ============================================================================

/// Solid floor below y = 0, lit air above.
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

impl Frame {
    fn inputs(&self) -> FrameInputs<'_> {
        FrameInputs {
            depth: &self.depth,
            normals: &self.normals,
            albedo: &self.albedo,
            metallic: &self.metallic,
            direct: &self.direct,
            camera: self.camera,
        }
    }
}

/// Camera looking down at the floor. Columns at or right of `sky_from_x` see sky.
fn floor_frame(w: u32, h: u32, sky_from_x: u32) -> Frame {
    let camera = CameraMatrices::look_at(Vec3::new(0.0, 4.0, 3.0), Vec3::ZERO, 60f32.to_radians(), 1.0, 0.1, 100.0);
    let depth = ImagePlane::from_fn(w, h, |x, y| {
        if x >= sky_from_x {
            return 1.0;
        }
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

fn test_config() -> GiConfig {
    GiConfig {
        probe_spacing: 8,
        tile_size: 4,
        page_size: 8,
        max_physical_pages: 64,
        max_idle_frames: 1000,
        max_dda_steps: 32,
        texels_per_page_per_frame: 64,
        debug_counters: true,
        ..Default::default()
    }
}

// ============================================================================
// Frame-level properties
// ============================================================================

#[test]
fn test_invalid_probes_produce_zero_tiles() {
    let vol = floor_volume();
    let f = floor_frame(32, 32, 16);
    let mut gi = CpuGiPipeline::new(test_config(), 32, 32).unwrap();
    for _ in 0..3 {
        gi.render_frame(&f.inputs(), &vol).unwrap();
    }

    let mut invalid = 0;
    for (probe, anchor) in gi.anchors().as_slice().iter().enumerate() {
        if anchor.is_valid() {
            continue;
        }
        invalid += 1;
        let probe = probe as u32;
        assert!(gi.filtered_atlas().tile(probe).iter().all(|t| *t == RadianceTexel::ZERO));
        assert_eq!(gi.sh_probes()[probe as usize], Sh9::ZERO);
    }
    assert!(invalid > 0, "right half of the frame should be sky");
    assert!(gi.anchors().valid_count() > 0);
}

#[test]
fn test_relight_weight_grows_by_one_per_frame() {
    let vol = floor_volume();
    let f = floor_frame(32, 32, 32);
    let mut gi = CpuGiPipeline::new(test_config(), 32, 32).unwrap();
    gi.render_frame(&f.inputs(), &vol).unwrap();

    let mut previous: Vec<f32> = gi.card_atlas().radiance_texels().iter().map(|v| v.w).collect();
    for _ in 0..3 {
        gi.render_frame(&f.inputs(), &vol).unwrap();
        let current: Vec<f32> = gi.card_atlas().radiance_texels().iter().map(|v| v.w).collect();
        let mut grown = 0;
        for (before, after) in previous.iter().zip(&current) {
            assert!(after >= before, "weight decreased {before} -> {after}");
            assert!(after - before <= 1.0);
            if after - before == 1.0 {
                grown += 1;
            }
        }
        assert!(grown > 0);
        previous = current;
    }
}

#[test]
fn test_frames_are_deterministic() {
    let vol = floor_volume();
    let f = floor_frame(32, 32, 24);
    let mut a = CpuGiPipeline::new(test_config(), 32, 32).unwrap();
    let mut b = CpuGiPipeline::new(test_config(), 32, 32).unwrap();
    for _ in 0..3 {
        let sa = a.render_frame(&f.inputs(), &vol).unwrap();
        let sb = b.render_frame(&f.inputs(), &vol).unwrap();
        assert_eq!(sa.traced_texels, sb.traced_texels);
        assert_eq!(sa.counters, sb.counters);
    }
    assert_eq!(a.combined().texels(), b.combined().texels());
}

#[test]
fn test_counters_track_relight_and_probe_rays() {
    let vol = floor_volume();
    let f = floor_frame(32, 32, 32);
    let mut gi = CpuGiPipeline::new(test_config(), 32, 32).unwrap();
    let stats = gi.render_frame(&f.inputs(), &vol).unwrap();
    let c = stats.counters;
    assert!(c.rays > 0);
    assert!(c.hits > 0);
    assert_eq!(c.rays, c.hits + c.misses + c.out_of_bounds_starts);
}

// ============================================================================
// Pass properties
// ============================================================================

#[test]
fn test_sh9_constant_radiance_round_trip() {
    let tile = 8;
    let radiance = Vec3::new(1.0, 0.5, 0.25);
    let atlas = ProbeAtlas::new(tile, 1, RadianceTexel::new(radiance, 3.0));
    let meta = MetaAtlas::new(tile, 1, MetaTexel::new(1.0, 0));
    let sh = project_probe(&atlas, &meta, 0, &Sh9ProjectionTable::new(tile));

    let expected = radiance * 0.282095 * 4.0 * std::f32::consts::PI;
    assert!((sh.coeffs[0] - expected).abs().max_element() < 0.05, "{:?}", sh.coeffs[0]);
    for c in &sh.coeffs[1..] {
        assert!(c.abs().max_element() < 0.1, "{c:?}");
    }
}

#[test]
fn test_disocclusion_discards_history() {
    let current = RadianceTexel::new(Vec3::ONE, 5.0);
    let history = RadianceTexel::new(Vec3::ZERO, 20.0);
    assert!(reject_history(&current, &history, 0.3));
    assert!(!reject_history(&current, &RadianceTexel::new(Vec3::ZERO, 5.5), 0.3));
}

#[test]
fn test_combine_example() {
    let params = CombineParams { enabled: true, intensity: 1.0, tint: Vec3::ONE };
    let out = combine_pixel(Vec3::X, Vec3::Y, Vec3::ONE, 0.0, 0.5, &params);
    assert!((out - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
}

#[test]
fn test_metallic_surfaces_ignore_indirect() {
    let params = CombineParams { enabled: true, intensity: 1.0, tint: Vec3::ONE };
    let direct = Vec3::new(0.3, 0.2, 0.1);
    let out = combine_pixel(direct, Vec3::splat(1000.0), Vec3::ONE, 1.0, 0.5, &params);
    assert!((out - direct).length() < 1e-6);
}
