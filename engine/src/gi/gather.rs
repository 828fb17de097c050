//! Screen-Space Gather Pass (CPU reference)
//!
//! Interpolates the four probes surrounding each half-resolution pixel:
//!
//! ```text
//! w = bilinear · exp(-Δdepth² · 8) · max(dot(n_pixel, n_probe), 0)^4 · validity
//! ```
//!
//! `Δdepth` is the view-depth difference relative to the pixel's view depth.
//! Sky pixels return zero before any probe is read, and a weight sum below
//! [`MIN_GATHER_WEIGHT`] also returns zero. Matches `gather.wgsl`.

use glam::{Vec2, Vec3};

use super::atlas::ProbeAtlas;
use super::config::GatherSource;
use super::image::{CameraMatrices, ImagePlane};
use super::math::{SKY_DEPTH, decode_normal_checked, direction_to_tile_texel};
use super::probe_grid::{ProbeAnchors, ProbeGridLayout};
use super::sh9::Sh9;

pub const MIN_GATHER_WEIGHT: f32 = 0.001;
const DEPTH_SHARPNESS: f32 = 8.0;
const NORMAL_POWER: i32 = 4;

/// Probe data the gather reads from.
#[derive(Clone, Copy)]
pub enum ProbeRadiance<'a> {
    Sh9(&'a [Sh9]),
    Atlas(&'a ProbeAtlas),
}

impl<'a> ProbeRadiance<'a> {
    pub fn select(source: GatherSource, sh: &'a [Sh9], atlas: &'a ProbeAtlas) -> Self {
        match source {
            GatherSource::Sh9 => ProbeRadiance::Sh9(sh),
            GatherSource::Atlas => ProbeRadiance::Atlas(atlas),
        }
    }

    /// Outgoing diffuse radiance of `probe` for a surface facing `n`.
    pub fn evaluate(&self, probe: u32, n: Vec3) -> Vec3 {
        match self {
            ProbeRadiance::Sh9(sh) => sh.get(probe as usize).map(|s| s.diffuse(n)).unwrap_or(Vec3::ZERO),
            ProbeRadiance::Atlas(atlas) => {
                let (tx, ty) = direction_to_tile_texel(n, atlas.tile_size());
                atlas.get(probe, ty * atlas.tile_size() + tx).radiance()
            }
        }
    }
}

/// The four probes bounding a full-resolution position, with bilinear weights.
pub fn bounding_probes(layout: &ProbeGridLayout, pixel: Vec2) -> [(u32, f32); 4] {
    let half = (layout.spacing / 2) as f32;
    // Probe (x, y) sits at pixel center x * spacing + spacing / 2 + 0.5.
    let g = (pixel - Vec2::splat(half + 0.5)) / layout.spacing as f32;
    let max = Vec2::new((layout.grid_x - 1) as f32, (layout.grid_y - 1) as f32);
    let g = g.clamp(Vec2::ZERO, max);
    let g0 = g.floor();
    let f = g - g0;
    let x0 = g0.x as u32;
    let y0 = g0.y as u32;
    let x1 = (x0 + 1).min(layout.grid_x - 1);
    let y1 = (y0 + 1).min(layout.grid_y - 1);
    [
        (layout.probe_index(x0, y0), (1.0 - f.x) * (1.0 - f.y)),
        (layout.probe_index(x1, y0), f.x * (1.0 - f.y)),
        (layout.probe_index(x0, y1), (1.0 - f.x) * f.y),
        (layout.probe_index(x1, y1), f.x * f.y),
    ]
}

/// Full gather weight of one probe for a pixel.
pub fn probe_weight(
    bilinear: f32,
    pixel_view_depth: f32,
    pixel_normal: Vec3,
    anchors: &ProbeAnchors,
    camera: &CameraMatrices,
    probe: u32,
) -> f32 {
    let anchor = anchors.get(probe);
    if !anchor.is_valid() || bilinear <= 0.0 {
        return 0.0;
    }
    let probe_depth = camera.view_depth(anchor.position);
    let d = (pixel_view_depth - probe_depth) / pixel_view_depth.max(1.0e-3);
    let depth_w = (-d * d * DEPTH_SHARPNESS).exp();
    let normal_w = pixel_normal.dot(anchor.normal).max(0.0).powi(NORMAL_POWER);
    let w = bilinear * depth_w * normal_w * anchor.validity;
    if w.is_finite() { w } else { 0.0 }
}

/// Gather one half-resolution pixel.
pub fn gather_pixel(
    hx: u32,
    hy: u32,
    half_depth: &ImagePlane<f32>,
    half_normals: &ImagePlane<Vec3>,
    camera: &CameraMatrices,
    anchors: &ProbeAnchors,
    radiance: &ProbeRadiance,
) -> Vec3 {
    let depth = half_depth.get(hx, hy);
    if !depth.is_finite() || depth >= SKY_DEPTH {
        return Vec3::ZERO;
    }
    let Some(normal) = decode_normal_checked(half_normals.get(hx, hy)) else {
        return Vec3::ZERO;
    };
    let layout = anchors.layout();
    // Center of the 2×2 full-resolution block this half pixel covers.
    let pixel = Vec2::new(hx as f32 * 2.0 + 1.0, hy as f32 * 2.0 + 1.0);
    let uv = pixel / Vec2::new(layout.width as f32, layout.height as f32);
    let world = camera.world_position(uv, depth);
    let view_depth = camera.view_depth(world);

    let mut sum = Vec3::ZERO;
    let mut weight_sum = 0.0;
    for (probe, bilinear) in bounding_probes(layout, pixel) {
        let w = probe_weight(bilinear, view_depth, normal, anchors, camera, probe);
        if w <= 0.0 {
            continue;
        }
        sum += radiance.evaluate(probe, normal) * w;
        weight_sum += w;
    }
    if weight_sum < MIN_GATHER_WEIGHT {
        return Vec3::ZERO;
    }
    let out = sum / weight_sum;
    if out.is_finite() { out } else { Vec3::ZERO }
}

/// Gather the whole half-resolution indirect buffer.
pub fn run_gather(
    half_depth: &ImagePlane<f32>,
    half_normals: &ImagePlane<Vec3>,
    camera: &CameraMatrices,
    anchors: &ProbeAnchors,
    radiance: &ProbeRadiance,
    output: &mut ImagePlane<Vec3>,
) {
    for hy in 0..output.height() {
        for hx in 0..output.width() {
            let v = gather_pixel(hx, hy, half_depth, half_normals, camera, anchors, radiance);
            output.set(hx, hy, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::math::encode_normal_unorm;
    use crate::gi::probe_grid::{PROBE_VALID, ProbeAnchor};

    fn camera() -> CameraMatrices {
        CameraMatrices::look_at(Vec3::new(0.0, 10.0, 6.0), Vec3::ZERO, 60f32.to_radians(), 1.0, 0.1, 100.0)
    }

    /// 16×16 image over a floor at y = 0, anchors reconstructed at cell centers.
    fn floor_setup() -> (ImagePlane<f32>, ImagePlane<Vec3>, ProbeAnchors, CameraMatrices) {
        let cam = camera();
        let layout = ProbeGridLayout::new(16, 16, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        for cy in 0..2 {
            for cx in 0..2 {
                let (px, py) = layout.cell_center_pixel(cx, cy);
                let uv = Vec2::new((px as f32 + 0.5) / 16.0, (py as f32 + 0.5) / 16.0);
                let pos = floor_point(&cam, uv);
                anchors.set(layout.probe_index(cx, cy), ProbeAnchor { position: pos, normal: Vec3::Y, validity: PROBE_VALID });
            }
        }
        let depth = ImagePlane::from_fn(8, 8, |x, y| {
            let uv = Vec2::new((x as f32 * 2.0 + 1.0) / 16.0, (y as f32 * 2.0 + 1.0) / 16.0);
            cam.project(floor_point(&cam, uv)).map(|(_, d)| d).unwrap_or(1.0)
        });
        let normals = ImagePlane::new(8, 8, encode_normal_unorm(Vec3::Y));
        (depth, normals, anchors, cam)
    }

    fn floor_point(cam: &CameraMatrices, uv: Vec2) -> Vec3 {
        let near = cam.world_position(uv, 0.0);
        let far = cam.world_position(uv, 1.0);
        let t = near.y / (near.y - far.y);
        near + (far - near) * t
    }

    fn sh_const(l: Vec3, n: usize) -> Vec<Sh9> {
        let mut sh = Sh9::ZERO;
        sh.coeffs[0] = l * 0.282_095 * 4.0 * std::f32::consts::PI;
        vec![sh; n]
    }

    #[test]
    fn test_bounding_probes_weights_sum_to_one() {
        let layout = ProbeGridLayout::new(64, 64, 8, 4);
        for p in [Vec2::new(4.5, 4.5), Vec2::new(9.0, 17.0), Vec2::new(63.0, 1.0)] {
            let probes = bounding_probes(&layout, p);
            let s: f32 = probes.iter().map(|(_, w)| w).sum();
            assert!((s - 1.0).abs() < 1e-5);
        }
        // Exactly on probe (1, 2).
        let probes = bounding_probes(&layout, Vec2::new(12.5, 20.5));
        assert_eq!(probes[0], (layout.probe_index(1, 2), 1.0));
    }

    #[test]
    fn test_constant_probes_reproduce_radiance() {
        let (depth, normals, anchors, cam) = floor_setup();
        let sh = sh_const(Vec3::new(0.5, 0.25, 1.0), 4);
        let mut out = ImagePlane::new(8, 8, Vec3::ZERO);
        run_gather(&depth, &normals, &cam, &anchors, &ProbeRadiance::Sh9(&sh), &mut out);
        for v in out.texels() {
            assert!((*v - Vec3::new(0.5, 0.25, 1.0)).length() < 1e-3, "{v:?}");
        }
    }

    #[test]
    fn test_invalid_probe_has_zero_weight() {
        let (depth, _normals, mut anchors, cam) = floor_setup();
        anchors.set(0, ProbeAnchor::INVALID);
        for hy in 0..8 {
            for hx in 0..8 {
                let pixel = Vec2::new(hx as f32 * 2.0 + 1.0, hy as f32 * 2.0 + 1.0);
                let uv = pixel / 16.0;
                let vd = cam.view_depth(cam.world_position(uv, depth.get(hx, hy)));
                for (probe, bil) in bounding_probes(anchors.layout(), pixel) {
                    if probe == 0 {
                        assert_eq!(probe_weight(bil, vd, Vec3::Y, &anchors, &cam, probe), 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_sky_and_all_invalid_output_zero() {
        let (mut depth, normals, anchors, cam) = floor_setup();
        depth.set(3, 3, 1.0);
        let sh = sh_const(Vec3::ONE, 4);
        let r = ProbeRadiance::Sh9(&sh);
        assert_eq!(gather_pixel(3, 3, &depth, &normals, &cam, &anchors, &r), Vec3::ZERO);

        let none = ProbeAnchors::new(*anchors.layout());
        assert_eq!(gather_pixel(2, 2, &depth, &normals, &cam, &none, &r), Vec3::ZERO);
    }

    #[test]
    fn test_back_facing_probes_rejected() {
        let (depth, _, anchors, cam) = floor_setup();
        let down = ImagePlane::new(8, 8, encode_normal_unorm(-Vec3::Y));
        let sh = sh_const(Vec3::ONE, 4);
        let v = gather_pixel(4, 4, &depth, &down, &cam, &anchors, &ProbeRadiance::Sh9(&sh));
        assert_eq!(v, Vec3::ZERO);
    }
}
