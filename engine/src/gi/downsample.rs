//! Half-resolution depth/normal downsample (CPU reference)
//!
//! Each half-res texel keeps the nearest-to-camera sample of its 2×2 block
//! together with that sample's normal, so thin foreground geometry survives.
//! Matches `downsample.wgsl`.

use glam::Vec3;

use super::image::ImagePlane;

/// Downsample full-resolution depth and encoded normals into half resolution.
pub fn run_downsample(
    depth: &ImagePlane<f32>,
    normals: &ImagePlane<Vec3>,
    half_depth: &mut ImagePlane<f32>,
    half_normals: &mut ImagePlane<Vec3>,
) {
    for hy in 0..half_depth.height() {
        for hx in 0..half_depth.width() {
            let mut best_depth = f32::INFINITY;
            let mut best_normal = Vec3::splat(0.5);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let x = (hx * 2 + dx) as i64;
                let y = (hy * 2 + dy) as i64;
                let d = depth.get_clamped(x, y);
                if d.is_finite() && d < best_depth {
                    best_depth = d;
                    best_normal = normals.get_clamped(x, y);
                }
            }
            if !best_depth.is_finite() {
                best_depth = 1.0;
            }
            half_depth.set(hx, hy, best_depth);
            half_normals.set(hx, hy, best_normal);
        }
    }
}
