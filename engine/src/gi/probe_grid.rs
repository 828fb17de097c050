//! Screen-space probe grid layout and the per-frame probe anchor arena.
//!
//! Probes live in a flat array indexed by `y * grid_x + x`; octahedral atlas
//! tiles use the same index. Nothing here keeps identity across frames: the
//! anchor pass overwrites every entry each frame.

use glam::Vec3;
use half::f16;

use super::math::encode_normal_unorm;

pub const PROBE_INVALID: f32 = 0.0;
pub const PROBE_EDGE: f32 = 0.5;
pub const PROBE_VALID: f32 = 1.0;

/// Dimensions of the probe grid for one camera resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeGridLayout {
    /// Full-resolution width in pixels
    pub width: u32,
    /// Full-resolution height in pixels
    pub height: u32,
    /// Probe spacing in pixels
    pub spacing: u32,
    /// Probes along X
    pub grid_x: u32,
    /// Probes along Y
    pub grid_y: u32,
    /// Octahedral tile edge length
    pub tile_size: u32,
}

impl ProbeGridLayout {
    pub fn new(width: u32, height: u32, spacing: u32, tile_size: u32) -> Self {
        let spacing = spacing.max(1);
        Self {
            width,
            height,
            spacing,
            grid_x: width.div_ceil(spacing).max(1),
            grid_y: height.div_ceil(spacing).max(1),
            tile_size: tile_size.max(1),
        }
    }

    #[inline]
    pub fn probe_count(&self) -> u32 {
        self.grid_x * self.grid_y
    }

    #[inline]
    pub fn probe_index(&self, x: u32, y: u32) -> u32 {
        y * self.grid_x + x
    }

    #[inline]
    pub fn probe_coord(&self, index: u32) -> (u32, u32) {
        (index % self.grid_x, index / self.grid_x)
    }

    #[inline]
    pub fn texels_per_probe(&self) -> u32 {
        self.tile_size * self.tile_size
    }

    /// Total texels in the probe atlas arena.
    #[inline]
    pub fn atlas_texels(&self) -> usize {
        self.probe_count() as usize * self.texels_per_probe() as usize
    }

    /// Full-resolution pixel nearest the center of probe cell `(x, y)`.
    pub fn cell_center_pixel(&self, x: u32, y: u32) -> (u32, u32) {
        let half = self.spacing / 2;
        let px = (x * self.spacing + half).min(self.width.saturating_sub(1));
        let py = (y * self.spacing + half).min(self.height.saturating_sub(1));
        (px, py)
    }

    /// Half-resolution dimensions used by gather/upsample.
    pub fn half_resolution(&self) -> (u32, u32) {
        (self.width.div_ceil(2).max(1), self.height.div_ceil(2).max(1))
    }
}

/// Reconstructed anchor for one probe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeAnchor {
    pub position: Vec3,
    pub normal: Vec3,
    /// 0 = invalid, 0.5 = edge/partial, 1 = valid
    pub validity: f32,
}

impl ProbeAnchor {
    pub const INVALID: ProbeAnchor = ProbeAnchor {
        position: Vec3::ZERO,
        normal: Vec3::ZERO,
        validity: PROBE_INVALID,
    };

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validity > PROBE_INVALID
    }
}

/// Flat arena of probe anchors, recreated when the grid layout changes.
#[derive(Clone, Debug)]
pub struct ProbeAnchors {
    layout: ProbeGridLayout,
    anchors: Vec<ProbeAnchor>,
}

impl ProbeAnchors {
    pub fn new(layout: ProbeGridLayout) -> Self {
        Self {
            layout,
            anchors: vec![ProbeAnchor::INVALID; layout.probe_count() as usize],
        }
    }

    /// Reallocate for a new layout. Returns true if anything changed.
    pub fn resize(&mut self, layout: ProbeGridLayout) -> bool {
        if layout == self.layout {
            return false;
        }
        log::info!(
            "[ProbeAnchors] Resizing probe grid {}x{} -> {}x{}",
            self.layout.grid_x, self.layout.grid_y, layout.grid_x, layout.grid_y
        );
        *self = Self::new(layout);
        true
    }

    #[inline]
    pub fn layout(&self) -> &ProbeGridLayout {
        &self.layout
    }

    #[inline]
    pub fn get(&self, index: u32) -> &ProbeAnchor {
        &self.anchors[index as usize]
    }

    #[inline]
    pub fn set(&mut self, index: u32, anchor: ProbeAnchor) {
        self.anchors[index as usize] = anchor;
    }

    #[inline]
    pub fn as_slice(&self) -> &[ProbeAnchor] {
        &self.anchors
    }

    pub fn valid_count(&self) -> usize {
        self.anchors.iter().filter(|a| a.is_valid()).count()
    }

    /// Position + validity plane (RGBA16F layout).
    pub fn encoded_position_validity(&self) -> Vec<[f16; 4]> {
        self.anchors
            .iter()
            .map(|a| {
                [
                    f16::from_f32(a.position.x),
                    f16::from_f32(a.position.y),
                    f16::from_f32(a.position.z),
                    f16::from_f32(a.validity),
                ]
            })
            .collect()
    }

    /// Encoded normal plane (RGBA16F, `[-1, 1]` mapped to `[0, 1]`).
    pub fn encoded_normals(&self) -> Vec<[f16; 4]> {
        self.anchors
            .iter()
            .map(|a| {
                if !a.is_valid() {
                    return [f16::ZERO; 4];
                }
                let e = encode_normal_unorm(a.normal);
                [f16::from_f32(e.x), f16::from_f32(e.y), f16::from_f32(e.z), f16::ONE]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_rounds_up() {
        let layout = ProbeGridLayout::new(1920, 1080, 8, 8);
        assert_eq!(layout.grid_x, 240);
        assert_eq!(layout.grid_y, 135);
        let odd = ProbeGridLayout::new(100, 50, 16, 8);
        assert_eq!((odd.grid_x, odd.grid_y), (7, 4));
    }

    #[test]
    fn test_cell_center_clamped_to_image() {
        let layout = ProbeGridLayout::new(100, 50, 16, 8);
        assert_eq!(layout.cell_center_pixel(0, 0), (8, 8));
        // Last column center would be 104, clamped to 99.
        assert_eq!(layout.cell_center_pixel(6, 3), (99, 49));
    }

    #[test]
    fn test_index_round_trip() {
        let layout = ProbeGridLayout::new(64, 32, 8, 4);
        for i in 0..layout.probe_count() {
            let (x, y) = layout.probe_coord(i);
            assert_eq!(layout.probe_index(x, y), i);
        }
    }

    #[test]
    fn test_resize_only_on_change() {
        let layout = ProbeGridLayout::new(64, 32, 8, 4);
        let mut anchors = ProbeAnchors::new(layout);
        assert!(!anchors.resize(layout));
        assert!(anchors.resize(ProbeGridLayout::new(128, 32, 8, 4)));
        assert_eq!(anchors.as_slice().len(), 16 * 4);
    }

    #[test]
    fn test_invalid_normal_encodes_zero() {
        let anchors = ProbeAnchors::new(ProbeGridLayout::new(8, 8, 8, 4));
        let normals = anchors.encoded_normals();
        assert_eq!(normals[0], [f16::ZERO; 4]);
    }
}
