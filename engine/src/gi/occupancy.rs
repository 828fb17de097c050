//! Voxel occupancy volume (read-only input to the tracers)
//!
//! Cells are packed `u32`s addressed through a toroidal window so the volume
//! can follow the camera without moving data:
//!
//! ```text
//! local   = world_cell - origin            (valid iff 0 <= local < resolution)
//! storage = (local + ring_offset) % resolution
//! ```
//!
//! Packed cell layout:
//! - bits  0..4   block light level (0-15)
//! - bits  4..8   sun light level (0-15)
//! - bits  8..16  light colour id (index into the light colour LUT)
//! - bits 16..32  material index (0 = empty)

use glam::{IVec3, UVec3, Vec3};

/// Entries in each lighting LUT.
pub const LUT_SIZE: usize = 16;

/// Packed occupancy cell.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OccupancyCell(pub u32);

impl OccupancyCell {
    pub const EMPTY: OccupancyCell = OccupancyCell(0);

    pub fn new(material: u16, light_id: u8, block_light: u8, sun_light: u8) -> Self {
        Self(
            (block_light as u32 & 0xF)
                | ((sun_light as u32 & 0xF) << 4)
                | ((light_id as u32) << 8)
                | ((material as u32) << 16),
        )
    }

    /// Empty cell carrying light levels only.
    pub fn air(block_light: u8, sun_light: u8) -> Self {
        Self::new(0, 0, block_light, sun_light)
    }

    #[inline]
    pub fn block_light(self) -> u32 {
        self.0 & 0xF
    }

    #[inline]
    pub fn sun_light(self) -> u32 {
        (self.0 >> 4) & 0xF
    }

    #[inline]
    pub fn light_id(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    #[inline]
    pub fn material(self) -> u32 {
        self.0 >> 16
    }

    #[inline]
    pub fn is_occupied(self) -> bool {
        self.material() != 0
    }
}

/// Toroidal window placement of the volume in world cell space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeWindow {
    /// World cell at local (0, 0, 0)
    pub origin: IVec3,
    /// Storage offset of local (0, 0, 0)
    pub ring_offset: UVec3,
    /// Cells per axis
    pub resolution: UVec3,
    /// Cell edge length in world units
    pub voxel_size: f32,
    /// Chunk edge length in cells
    pub chunk_size: u32,
}

impl VolumeWindow {
    pub fn new(origin: IVec3, resolution: UVec3, voxel_size: f32, chunk_size: u32) -> Self {
        Self { origin, ring_offset: UVec3::ZERO, resolution, voxel_size, chunk_size: chunk_size.max(1) }
    }

    /// Storage coordinate of a world cell, `None` outside the window.
    pub fn storage_coord(&self, world_cell: IVec3) -> Option<UVec3> {
        let local = world_cell - self.origin;
        let res = self.resolution.as_ivec3();
        if local.cmplt(IVec3::ZERO).any() || local.cmpge(res).any() {
            return None;
        }
        let wrapped = (local.as_uvec3() + self.ring_offset) % self.resolution;
        Some(wrapped)
    }

    #[inline]
    pub fn contains(&self, world_cell: IVec3) -> bool {
        self.storage_coord(world_cell).is_some()
    }

    #[inline]
    pub fn storage_index(&self, storage: UVec3) -> usize {
        let r = self.resolution;
        (storage.z as usize * r.y as usize + storage.y as usize) * r.x as usize + storage.x as usize
    }

    /// Chunks per axis in storage space.
    pub fn chunk_grid(&self) -> UVec3 {
        (self.resolution + UVec3::splat(self.chunk_size - 1)) / self.chunk_size
    }

    pub fn chunk_count(&self) -> u32 {
        let g = self.chunk_grid();
        g.x * g.y * g.z
    }

    /// Chunk slot of a storage coordinate.
    pub fn chunk_slot(&self, storage: UVec3) -> u32 {
        let g = self.chunk_grid();
        let c = storage / self.chunk_size;
        (c.z * g.y + c.y) * g.x + c.x
    }

    /// World cell containing a world-space point.
    #[inline]
    pub fn world_cell_of(&self, p: Vec3) -> IVec3 {
        (p / self.voxel_size).floor().as_ivec3()
    }
}

/// Light colour and scalar lookup tables used to shade ray hits.
#[derive(Clone, Debug, PartialEq)]
pub struct LightLuts {
    pub light_colors: [Vec3; LUT_SIZE],
    pub block_scalars: [f32; LUT_SIZE],
    pub sun_scalars: [f32; LUT_SIZE],
    pub sun_color: Vec3,
}

impl Default for LightLuts {
    fn default() -> Self {
        let mut light_colors = [Vec3::new(1.0, 0.85, 0.6); LUT_SIZE];
        light_colors[1] = Vec3::new(1.0, 0.45, 0.15); // lava / fire
        light_colors[2] = Vec3::new(0.4, 0.6, 1.0); // cold crystal
        light_colors[3] = Vec3::new(0.5, 1.0, 0.5);
        let mut block_scalars = [0.0; LUT_SIZE];
        let mut sun_scalars = [0.0; LUT_SIZE];
        for i in 0..LUT_SIZE {
            let t = i as f32 / (LUT_SIZE - 1) as f32;
            block_scalars[i] = t * t;
            sun_scalars[i] = t * t;
        }
        Self { light_colors, block_scalars, sun_scalars, sun_color: Vec3::new(1.0, 0.95, 0.85) }
    }
}

impl LightLuts {
    pub fn with_sun_color(mut self, sun_color: Vec3) -> Self {
        self.sun_color = sun_color;
        self
    }

    /// Light emitted by an occupied cell.
    pub fn emission(&self, cell: OccupancyCell) -> Vec3 {
        self.light_colors[cell.light_id() as usize % LUT_SIZE]
            * self.block_scalars[cell.block_light() as usize]
    }

    /// Light arriving at the face of a hit, read from the empty cell in front of it.
    pub fn ambient(&self, cell: OccupancyCell) -> Vec3 {
        self.light_colors[cell.light_id() as usize % LUT_SIZE] * self.block_scalars[cell.block_light() as usize]
            + self.sun_color * self.sun_scalars[cell.sun_light() as usize]
    }

    /// Radiance leaving a hit: emission of the hit cell plus the light level
    /// of the last empty cell before it.
    pub fn shade_hit(&self, hit: OccupancyCell, previous: Option<OccupancyCell>) -> Vec3 {
        let ambient = previous.map(|p| self.ambient(p)).unwrap_or(Vec3::ZERO);
        self.emission(hit) + ambient
    }
}

/// Dense toroidal occupancy volume.
#[derive(Clone, Debug)]
pub struct OccupancyVolume {
    window: VolumeWindow,
    cells: Vec<OccupancyCell>,
}

impl OccupancyVolume {
    pub fn new(window: VolumeWindow) -> Self {
        let r = window.resolution;
        let len = r.x as usize * r.y as usize * r.z as usize;
        Self { window, cells: vec![OccupancyCell::EMPTY; len] }
    }

    #[inline]
    pub fn window(&self) -> &VolumeWindow {
        &self.window
    }

    /// Raw storage, in storage-index order (GPU upload layout).
    pub fn cells(&self) -> &[OccupancyCell] {
        &self.cells
    }

    /// Cell at a world cell coordinate, `None` outside the window.
    #[inline]
    pub fn cell(&self, world_cell: IVec3) -> Option<OccupancyCell> {
        self.window
            .storage_coord(world_cell)
            .map(|s| self.cells[self.window.storage_index(s)])
    }

    /// Write a cell. Returns false (and writes nothing) outside the window.
    pub fn set(&mut self, world_cell: IVec3, cell: OccupancyCell) -> bool {
        match self.window.storage_coord(world_cell) {
            Some(s) => {
                let i = self.window.storage_index(s);
                self.cells[i] = cell;
                true
            }
            None => false,
        }
    }

    /// Fill an inclusive world-cell box.
    pub fn fill_box(&mut self, min: IVec3, max: IVec3, cell: OccupancyCell) {
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    self.set(IVec3::new(x, y, z), cell);
                }
            }
        }
    }

    /// Move the window to a new origin without moving stored data.
    ///
    /// Cells that stay inside keep their storage slot; slots that now map to
    /// newly exposed world cells are cleared to `EMPTY`.
    pub fn scroll_to(&mut self, new_origin: IVec3) {
        let old = self.window;
        if new_origin == old.origin {
            return;
        }
        let res = old.resolution.as_ivec3();
        let delta = new_origin - old.origin;
        let ring = (old.ring_offset.as_ivec3() + delta).rem_euclid(res);

        self.window.origin = new_origin;
        self.window.ring_offset = ring.as_uvec3();

        // Clear every storage slot whose world cell was not inside the old window.
        for z in 0..res.z {
            for y in 0..res.y {
                for x in 0..res.x {
                    let world = new_origin + IVec3::new(x, y, z);
                    if !old.contains(world) {
                        if let Some(s) = self.window.storage_coord(world) {
                            let i = self.window.storage_index(s);
                            self.cells[i] = OccupancyCell::EMPTY;
                        }
                    }
                }
            }
        }
        log::debug!(
            "[OccupancyVolume] Scrolled window {:?} -> {:?} (ring {:?})",
            old.origin, new_origin, self.window.ring_offset
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> VolumeWindow {
        VolumeWindow::new(IVec3::new(-8, 0, -8), UVec3::new(16, 16, 16), 1.0, 8)
    }

    #[test]
    fn test_cell_packing() {
        let c = OccupancyCell::new(300, 7, 12, 9);
        assert_eq!(c.material(), 300);
        assert_eq!(c.light_id(), 7);
        assert_eq!(c.block_light(), 12);
        assert_eq!(c.sun_light(), 9);
        assert!(c.is_occupied());
        assert!(!OccupancyCell::air(15, 15).is_occupied());
    }

    #[test]
    fn test_storage_coord_bounds() {
        let w = window();
        assert_eq!(w.storage_coord(IVec3::new(-8, 0, -8)), Some(UVec3::ZERO));
        assert_eq!(w.storage_coord(IVec3::new(7, 15, 7)), Some(UVec3::new(15, 15, 15)));
        assert_eq!(w.storage_coord(IVec3::new(8, 0, 0)), None);
        assert_eq!(w.storage_coord(IVec3::new(0, -1, 0)), None);
    }

    #[test]
    fn test_chunk_slots() {
        let w = window();
        assert_eq!(w.chunk_grid(), UVec3::new(2, 2, 2));
        assert_eq!(w.chunk_count(), 8);
        assert_eq!(w.chunk_slot(UVec3::new(0, 0, 0)), 0);
        assert_eq!(w.chunk_slot(UVec3::new(8, 0, 0)), 1);
        assert_eq!(w.chunk_slot(UVec3::new(15, 15, 15)), 7);
    }

    #[test]
    fn test_scroll_keeps_overlap_and_clears_new() {
        let mut vol = OccupancyVolume::new(window());
        let solid = OccupancyCell::new(1, 0, 0, 0);
        vol.set(IVec3::new(0, 4, 0), solid);
        vol.set(IVec3::new(-8, 4, 0), solid);

        vol.scroll_to(IVec3::new(-4, 0, -8));
        // Still inside the window and unchanged.
        assert_eq!(vol.cell(IVec3::new(0, 4, 0)), Some(solid));
        // Scrolled out.
        assert_eq!(vol.cell(IVec3::new(-8, 4, 0)), None);
        // Newly exposed cells are empty even though they reuse old storage.
        for x in 8..12 {
            assert_eq!(vol.cell(IVec3::new(x, 4, 0)), Some(OccupancyCell::EMPTY));
        }
        assert_eq!(vol.window().ring_offset, UVec3::new(4, 0, 0));
    }

    #[test]
    fn test_shade_hit_uses_previous_cell_light() {
        let luts = LightLuts::default();
        let hit = OccupancyCell::new(2, 0, 0, 0);
        let lit_air = OccupancyCell::air(0, 15);
        let dark = luts.shade_hit(hit, Some(OccupancyCell::air(0, 0)));
        let bright = luts.shade_hit(hit, Some(lit_air));
        assert_eq!(dark, Vec3::ZERO);
        assert!((bright - luts.sun_color).length() < 1e-6);
        let lamp = OccupancyCell::new(3, 1, 15, 0);
        assert!((luts.shade_hit(lamp, None) - luts.light_colors[1]).length() < 1e-6);
    }
}
