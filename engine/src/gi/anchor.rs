//! Probe Anchor Pass (CPU reference)
//!
//! Reconstructs one world-space anchor per probe cell from the primary depth
//! and world-normal buffers. Matches `probe_anchor.wgsl`.

use glam::{Vec2, Vec3};

use super::image::{CameraMatrices, ImagePlane};
use super::math::{SKY_DEPTH, decode_normal_checked};
use super::probe_grid::{PROBE_EDGE, PROBE_VALID, ProbeAnchor, ProbeAnchors};

/// Parameters for the anchor pass.
#[derive(Clone, Copy, Debug)]
pub struct AnchorParams {
    /// Depth variance above which the probe is an edge probe
    pub depth_discontinuity_threshold: f32,
    /// NxN samples spread across the probe cell
    pub footprint: u32,
}

/// Sample offsets (in pixels from the cell origin) of an NxN footprint
/// spread evenly over a cell of `spacing` pixels.
pub fn footprint_offsets(spacing: u32, footprint: u32) -> Vec<u32> {
    let n = footprint.max(1);
    (0..n)
        .map(|i| (((i as f32 + 0.5) / n as f32) * spacing as f32).floor() as u32)
        .collect()
}

/// Depth variance over the cell's sampling footprint.
pub fn cell_depth_variance(
    depth: &ImagePlane<f32>,
    cell_x: u32,
    cell_y: u32,
    spacing: u32,
    footprint: u32,
) -> f32 {
    let offsets = footprint_offsets(spacing, footprint);
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u32;
    for &oy in &offsets {
        for &ox in &offsets {
            let x = (cell_x * spacing + ox) as i64;
            let y = (cell_y * spacing + oy) as i64;
            let d = depth.get_clamped(x, y) as f64;
            sum += d;
            sum_sq += d * d;
            count += 1;
        }
    }
    let n = count as f64;
    let mean = sum / n;
    ((sum_sq / n) - mean * mean).max(0.0) as f32
}

/// Anchor for a single probe cell.
pub fn anchor_probe(
    depth: &ImagePlane<f32>,
    normals: &ImagePlane<Vec3>,
    camera: &CameraMatrices,
    anchors: &ProbeAnchors,
    params: &AnchorParams,
    cell_x: u32,
    cell_y: u32,
) -> ProbeAnchor {
    let layout = anchors.layout();
    let (px, py) = layout.cell_center_pixel(cell_x, cell_y);
    let d = depth.get(px, py);

    if !d.is_finite() || d >= SKY_DEPTH {
        return ProbeAnchor::INVALID;
    }

    // A degenerate normal invalidates the probe before anything normalizes it.
    let Some(normal) = decode_normal_checked(normals.get(px, py)) else {
        return ProbeAnchor::INVALID;
    };

    let uv = Vec2::new(
        (px as f32 + 0.5) / layout.width as f32,
        (py as f32 + 0.5) / layout.height as f32,
    );
    let position = camera.world_position(uv, d);
    if !position.is_finite() {
        return ProbeAnchor::INVALID;
    }

    let variance = cell_depth_variance(depth, cell_x, cell_y, layout.spacing, params.footprint);
    let validity = if variance > params.depth_discontinuity_threshold {
        PROBE_EDGE
    } else {
        PROBE_VALID
    };

    ProbeAnchor { position, normal, validity }
}

/// Run the anchor pass over every probe cell.
pub fn run_probe_anchor(
    depth: &ImagePlane<f32>,
    normals: &ImagePlane<Vec3>,
    camera: &CameraMatrices,
    params: &AnchorParams,
    anchors: &mut ProbeAnchors,
) {
    let layout = *anchors.layout();
    for cy in 0..layout.grid_y {
        for cx in 0..layout.grid_x {
            let anchor = anchor_probe(depth, normals, camera, anchors, params, cx, cy);
            anchors.set(layout.probe_index(cx, cy), anchor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::math::encode_normal_unorm;
    use crate::gi::probe_grid::{PROBE_INVALID, ProbeGridLayout};

    fn camera() -> CameraMatrices {
        CameraMatrices::look_at(
            Vec3::new(0.0, 4.0, 0.0),
            Vec3::new(0.0, 0.0, -4.0),
            60f32.to_radians(),
            1.0,
            0.1,
            100.0,
        )
    }

    fn params() -> AnchorParams {
        AnchorParams { depth_discontinuity_threshold: 1.0e-5, footprint: 3 }
    }

    fn up_normals(w: u32, h: u32) -> ImagePlane<Vec3> {
        ImagePlane::new(w, h, encode_normal_unorm(Vec3::Y))
    }

    #[test]
    fn test_sky_probe_invalid() {
        let layout = ProbeGridLayout::new(16, 16, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        let depth = ImagePlane::new(16, 16, 1.0f32);
        run_probe_anchor(&depth, &up_normals(16, 16), &camera(), &params(), &mut anchors);
        for a in anchors.as_slice() {
            assert_eq!(a.validity, PROBE_INVALID);
            assert_eq!(a.position, Vec3::ZERO);
        }
    }

    #[test]
    fn test_flat_depth_valid() {
        let layout = ProbeGridLayout::new(16, 16, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        let depth = ImagePlane::new(16, 16, 0.98f32);
        run_probe_anchor(&depth, &up_normals(16, 16), &camera(), &params(), &mut anchors);
        for a in anchors.as_slice() {
            assert_eq!(a.validity, PROBE_VALID);
            assert!((a.normal - Vec3::Y).length() < 1e-6);
            assert!(a.position.is_finite());
        }
    }

    #[test]
    fn test_checkerboard_depth_marks_edge() {
        let layout = ProbeGridLayout::new(16, 16, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        let depth = ImagePlane::from_fn(16, 16, |x, y| if (x + y) % 2 == 0 { 0.95 } else { 0.99 });
        run_probe_anchor(&depth, &up_normals(16, 16), &camera(), &params(), &mut anchors);
        for a in anchors.as_slice() {
            assert_eq!(a.validity, PROBE_EDGE);
        }
    }

    #[test]
    fn test_degenerate_normal_invalid_without_nan() {
        let layout = ProbeGridLayout::new(8, 8, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        let depth = ImagePlane::new(8, 8, 0.98f32);
        let normals = ImagePlane::new(8, 8, Vec3::splat(0.5));
        run_probe_anchor(&depth, &normals, &camera(), &params(), &mut anchors);
        let a = anchors.get(0);
        assert_eq!(a.validity, PROBE_INVALID);
        assert!(!a.normal.is_nan());
        assert!(!a.position.is_nan());
    }

    #[test]
    fn test_footprint_offsets_cover_cell() {
        assert_eq!(footprint_offsets(8, 3), vec![1, 4, 6]);
        assert_eq!(footprint_offsets(8, 1), vec![4]);
    }

    #[test]
    fn test_reconstruction_matches_projection() {
        let cam = camera();
        let layout = ProbeGridLayout::new(16, 16, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        let depth = ImagePlane::new(16, 16, 0.97f32);
        run_probe_anchor(&depth, &up_normals(16, 16), &cam, &params(), &mut anchors);
        let a = anchors.get(layout.probe_index(1, 1));
        let (uv, d) = cam.project(a.position).unwrap();
        let (px, py) = layout.cell_center_pixel(1, 1);
        assert!((uv.x - (px as f32 + 0.5) / 16.0).abs() < 1e-4);
        assert!((uv.y - (py as f32 + 0.5) / 16.0).abs() < 1e-4);
        assert!((d - 0.97).abs() < 1e-4);
    }
}
