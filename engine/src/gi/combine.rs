//! Upsample/Combine Pass (CPU reference)
//!
//! # Upsample
//!
//! Each full-resolution pixel blends the four surrounding half-resolution
//! indirect texels:
//!
//! ```text
//! w = bilinear · exp(-r² · 64) · max(dot(n_full, n_half), 0)^8
//! ```
//!
//! `r` is the relative linear view-depth difference. When every weight is
//! rejected the closest-depth non-sky texel is used instead.
//!
//! # Combine
//!
//! ```text
//! output = direct + indirect · albedo · (1 - metallic) · intensity · tint
//! ```
//!
//! Disabled GI or sky pixels output `direct` unchanged. Matches
//! `upsample.wgsl` and `combine.wgsl`.

use glam::{Vec2, Vec3};

use super::image::{CameraMatrices, ImagePlane};
use super::math::{SKY_DEPTH, decode_normal_checked, sanitize};

/// Weight sums below this fall back to the nearest-depth texel.
pub const MIN_UPSAMPLE_WEIGHT: f32 = 1.0e-4;
const DEPTH_SHARPNESS: f32 = 64.0;
const NORMAL_POWER: i32 = 8;

#[inline]
fn is_sky(depth: f32) -> bool {
    !depth.is_finite() || depth >= SKY_DEPTH
}

/// Linear view depth of a pixel at `pixel` (full-resolution coordinates).
fn linear_depth(camera: &CameraMatrices, pixel: Vec2, size: Vec2, depth: f32) -> f32 {
    -camera.view_position(pixel / size, depth).z
}

/// Upsample one full-resolution pixel.
#[allow(clippy::too_many_arguments)]
pub fn upsample_pixel(
    x: u32,
    y: u32,
    half_indirect: &ImagePlane<Vec3>,
    half_depth: &ImagePlane<f32>,
    half_normals: &ImagePlane<Vec3>,
    depth: &ImagePlane<f32>,
    normals: &ImagePlane<Vec3>,
    camera: &CameraMatrices,
) -> Vec3 {
    let d = depth.get(x, y);
    if is_sky(d) {
        return Vec3::ZERO;
    }
    let size = Vec2::new(depth.width() as f32, depth.height() as f32);
    let center = linear_depth(camera, Vec2::new(x as f32 + 0.5, y as f32 + 0.5), size, d);
    let normal = decode_normal_checked(normals.get(x, y));

    let h = Vec2::new((x as f32 + 0.5) * 0.5 - 0.5, (y as f32 + 0.5) * 0.5 - 0.5);
    let h0 = h.floor();
    let f = h - h0;
    let taps = [
        (0, 0, (1.0 - f.x) * (1.0 - f.y)),
        (1, 0, f.x * (1.0 - f.y)),
        (0, 1, (1.0 - f.x) * f.y),
        (1, 1, f.x * f.y),
    ];

    let mut sum = Vec3::ZERO;
    let mut weight_sum = 0.0;
    let mut nearest: Option<(f32, Vec3)> = None;
    for (dx, dy, bilinear) in taps {
        let hx = (h0.x as i64 + dx).clamp(0, half_depth.width() as i64 - 1);
        let hy = (h0.y as i64 + dy).clamp(0, half_depth.height() as i64 - 1);
        let hd = half_depth.get_clamped(hx, hy);
        if is_sky(hd) {
            continue;
        }
        // Half texel (hx, hy) is centered on full-resolution coordinate 2h + 1.
        let pixel = Vec2::new(hx as f32 * 2.0 + 1.0, hy as f32 * 2.0 + 1.0);
        let r = (center - linear_depth(camera, pixel, size, hd)) / center.max(1.0e-3);
        let value = sanitize(half_indirect.get_clamped(hx, hy));
        if nearest.is_none_or(|(best, _)| r.abs() < best) {
            nearest = Some((r.abs(), value));
        }

        let normal_w = match (normal, decode_normal_checked(half_normals.get_clamped(hx, hy))) {
            (Some(n), Some(hn)) => n.dot(hn).max(0.0).powi(NORMAL_POWER),
            _ => 0.0,
        };
        let w = bilinear * (-r * r * DEPTH_SHARPNESS).exp() * normal_w;
        if !(w > 0.0) || !w.is_finite() {
            continue;
        }
        sum += value * w;
        weight_sum += w;
    }

    if weight_sum >= MIN_UPSAMPLE_WEIGHT {
        sanitize(sum / weight_sum)
    } else {
        nearest.map(|(_, v)| v).unwrap_or(Vec3::ZERO)
    }
}

/// Upsample the whole half-resolution indirect buffer.
#[allow(clippy::too_many_arguments)]
pub fn run_upsample(
    half_indirect: &ImagePlane<Vec3>,
    half_depth: &ImagePlane<f32>,
    half_normals: &ImagePlane<Vec3>,
    depth: &ImagePlane<f32>,
    normals: &ImagePlane<Vec3>,
    camera: &CameraMatrices,
    output: &mut ImagePlane<Vec3>,
) {
    for y in 0..output.height() {
        for x in 0..output.width() {
            let v = upsample_pixel(x, y, half_indirect, half_depth, half_normals, depth, normals, camera);
            output.set(x, y, v);
        }
    }
}

/// Composite parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CombineParams {
    pub enabled: bool,
    pub intensity: f32,
    pub tint: Vec3,
}

/// Combine one pixel.
pub fn combine_pixel(direct: Vec3, indirect: Vec3, albedo: Vec3, metallic: f32, depth: f32, params: &CombineParams) -> Vec3 {
    if !params.enabled || is_sky(depth) {
        return direct;
    }
    let diffuse_weight = (1.0 - metallic).clamp(0.0, 1.0);
    direct + sanitize(indirect) * albedo * diffuse_weight * params.intensity * params.tint
}

/// Combine full-resolution direct lighting with upsampled indirect diffuse.
pub fn run_combine(
    direct: &ImagePlane<Vec3>,
    indirect: &ImagePlane<Vec3>,
    albedo: &ImagePlane<Vec3>,
    metallic: &ImagePlane<f32>,
    depth: &ImagePlane<f32>,
    params: &CombineParams,
    output: &mut ImagePlane<Vec3>,
) {
    for y in 0..output.height() {
        for x in 0..output.width() {
            let v = combine_pixel(
                direct.get(x, y),
                indirect.get(x, y),
                albedo.get(x, y),
                metallic.get(x, y),
                depth.get(x, y),
                params,
            );
            output.set(x, y, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::math::encode_normal_unorm;

    fn params() -> CombineParams {
        CombineParams { enabled: true, intensity: 1.0, tint: Vec3::ONE }
    }

    #[test]
    fn test_combine_adds_indirect() {
        let out = combine_pixel(Vec3::X, Vec3::Y, Vec3::ONE, 0.0, 0.5, &params());
        assert_eq!(out, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_metallic_blocks_indirect() {
        let out = combine_pixel(Vec3::X, Vec3::splat(1000.0), Vec3::ONE, 1.0, 0.5, &params());
        assert_eq!(out, Vec3::X);
    }

    #[test]
    fn test_bypass_when_disabled_or_sky() {
        let off = CombineParams { enabled: false, ..params() };
        assert_eq!(combine_pixel(Vec3::X, Vec3::Y, Vec3::ONE, 0.0, 0.5, &off), Vec3::X);
        assert_eq!(combine_pixel(Vec3::X, Vec3::Y, Vec3::ONE, 0.0, 1.0, &params()), Vec3::X);
    }

    #[test]
    fn test_intensity_and_tint_scale_indirect() {
        let p = CombineParams { enabled: true, intensity: 2.0, tint: Vec3::new(1.0, 0.5, 0.0) };
        let out = combine_pixel(Vec3::ZERO, Vec3::ONE, Vec3::splat(0.5), 0.5, 0.5, &p);
        assert!((out - Vec3::new(0.5, 0.25, 0.0)).length() < 1e-6);
    }

    fn camera() -> CameraMatrices {
        CameraMatrices::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 60f32.to_radians(), 1.0, 0.1, 100.0)
    }

    #[test]
    fn test_upsample_flat_input_is_constant() {
        let cam = camera();
        let depth = ImagePlane::new(8, 8, 0.98);
        let normals = ImagePlane::new(8, 8, encode_normal_unorm(Vec3::Z));
        let half_depth = ImagePlane::new(4, 4, 0.98);
        let half_normals = ImagePlane::new(4, 4, encode_normal_unorm(Vec3::Z));
        let half = ImagePlane::new(4, 4, Vec3::new(0.2, 0.4, 0.6));
        let mut out = ImagePlane::new(8, 8, Vec3::ZERO);
        run_upsample(&half, &half_depth, &half_normals, &depth, &normals, &cam, &mut out);
        for v in out.texels() {
            assert!((*v - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-5);
        }
    }

    #[test]
    fn test_upsample_respects_depth_edges() {
        let cam = camera();
        // Left half near, right half far.
        let depth = ImagePlane::from_fn(8, 8, |x, _| if x < 4 { 0.95 } else { 0.995 });
        let normals = ImagePlane::new(8, 8, encode_normal_unorm(Vec3::Z));
        let half_depth = ImagePlane::from_fn(4, 4, |x, _| if x < 2 { 0.95 } else { 0.995 });
        let half_normals = ImagePlane::new(4, 4, encode_normal_unorm(Vec3::Z));
        let half = ImagePlane::from_fn(4, 4, |x, _| if x < 2 { Vec3::ZERO } else { Vec3::ONE });
        let mut out = ImagePlane::new(8, 8, Vec3::ZERO);
        run_upsample(&half, &half_depth, &half_normals, &depth, &normals, &cam, &mut out);
        // Pixel 3 borders the far side but must not pick up its radiance.
        assert!(out.get(3, 4).x < 1e-3, "{:?}", out.get(3, 4));
        assert!(out.get(4, 4).x > 0.999, "{:?}", out.get(4, 4));
    }

    #[test]
    fn test_upsample_sky_is_zero_and_fallback_nearest() {
        let cam = camera();
        let mut depth = ImagePlane::new(4, 4, 0.98);
        depth.set(0, 0, 1.0);
        let normals = ImagePlane::new(4, 4, encode_normal_unorm(Vec3::Z));
        let half_depth = ImagePlane::new(2, 2, 0.98);
        // Half normals face away: every weight is rejected.
        let half_normals = ImagePlane::new(2, 2, encode_normal_unorm(-Vec3::Z));
        let half = ImagePlane::new(2, 2, Vec3::splat(0.7));
        let mut out = ImagePlane::new(4, 4, Vec3::ONE);
        run_upsample(&half, &half_depth, &half_normals, &depth, &normals, &cam, &mut out);
        assert_eq!(out.get(0, 0), Vec3::ZERO);
        assert_eq!(out.get(2, 2), Vec3::splat(0.7));
    }
}
