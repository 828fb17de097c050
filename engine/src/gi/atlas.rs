//! Probe octahedral atlases
//!
//! One square tile per probe, stored contiguously by probe index:
//! `texel = probe_index * tile² + ty * tile + tx`.
//!
//! - radiance atlas: rgb radiance + log1p hit distance, 16-bit float/channel
//! - meta atlas: confidence in `[0, 1]` + bit flags reinterpreted as f32 bits
//!
//! The temporal filter output lives in a two-slot ping-pong whose roles swap
//! at the end of every frame.

use glam::Vec3;
use half::f16;

use super::math::{decode_hit_distance, encode_hit_distance, sanitize};
use super::probe_grid::ProbeGridLayout;

/// Texel was produced by a ray that hit geometry.
pub const META_FLAG_HIT: u32 = 1 << 0;
/// Texel radiance came from the relit surface cache.
pub const META_FLAG_SURFACE_CACHE: u32 = 1 << 1;
/// Ray started outside the occupancy volume.
pub const META_FLAG_OUT_OF_BOUNDS: u32 = 1 << 2;

/// One radiance atlas texel (RGBA16F).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RadianceTexel {
    pub rgba: [f16; 4],
}

impl RadianceTexel {
    pub const ZERO: RadianceTexel = RadianceTexel { rgba: [f16::ZERO; 4] };

    /// Encode radiance and a world-space hit distance.
    pub fn new(radiance: Vec3, hit_distance: f32) -> Self {
        let r = sanitize(radiance);
        Self {
            rgba: [
                f16::from_f32(r.x),
                f16::from_f32(r.y),
                f16::from_f32(r.z),
                f16::from_f32(encode_hit_distance(hit_distance)),
            ],
        }
    }

    /// Build from already-encoded channels (alpha is log1p distance).
    pub fn from_encoded(radiance: Vec3, encoded_distance: f32) -> Self {
        let r = sanitize(radiance);
        let a = if encoded_distance.is_finite() { encoded_distance.max(0.0) } else { 0.0 };
        Self {
            rgba: [f16::from_f32(r.x), f16::from_f32(r.y), f16::from_f32(r.z), f16::from_f32(a)],
        }
    }

    #[inline]
    pub fn radiance(&self) -> Vec3 {
        Vec3::new(self.rgba[0].to_f32(), self.rgba[1].to_f32(), self.rgba[2].to_f32())
    }

    #[inline]
    pub fn encoded_distance(&self) -> f32 {
        self.rgba[3].to_f32()
    }

    #[inline]
    pub fn hit_distance(&self) -> f32 {
        decode_hit_distance(self.encoded_distance())
    }
}

/// One meta atlas texel (2 × 32-bit float).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MetaTexel {
    pub confidence: f32,
    /// Flag bits stored through `f32::from_bits`
    pub flag_bits: f32,
}

impl MetaTexel {
    pub const EMPTY: MetaTexel = MetaTexel { confidence: 0.0, flag_bits: 0.0 };

    pub fn new(confidence: f32, flags: u32) -> Self {
        let c = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { confidence: c, flag_bits: f32::from_bits(flags) }
    }

    #[inline]
    pub fn flags(&self) -> u32 {
        self.flag_bits.to_bits()
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags() & flag != 0
    }
}

/// Generic per-probe tiled arena.
#[derive(Clone, Debug, PartialEq)]
pub struct TiledAtlas<T> {
    tile_size: u32,
    probe_count: u32,
    texels: Vec<T>,
}

impl<T: Copy> TiledAtlas<T> {
    pub fn new(tile_size: u32, probe_count: u32, value: T) -> Self {
        let len = (tile_size * tile_size) as usize * probe_count as usize;
        Self { tile_size, probe_count, texels: vec![value; len] }
    }

    pub fn for_layout(layout: &ProbeGridLayout, value: T) -> Self {
        Self::new(layout.tile_size, layout.probe_count(), value)
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    #[inline]
    pub fn probe_count(&self) -> u32 {
        self.probe_count
    }

    #[inline]
    pub fn texels_per_tile(&self) -> u32 {
        self.tile_size * self.tile_size
    }

    #[inline]
    pub fn index(&self, probe: u32, texel: u32) -> usize {
        probe as usize * self.texels_per_tile() as usize + texel as usize
    }

    #[inline]
    pub fn get(&self, probe: u32, texel: u32) -> T {
        self.texels[self.index(probe, texel)]
    }

    #[inline]
    pub fn set(&mut self, probe: u32, texel: u32, value: T) {
        let i = self.index(probe, texel);
        self.texels[i] = value;
    }

    /// Texel `(tx, ty)` of a tile, coordinates clamped to the tile.
    #[inline]
    pub fn get_xy_clamped(&self, probe: u32, tx: i32, ty: i32) -> T {
        let max = self.tile_size as i32 - 1;
        let x = tx.clamp(0, max) as u32;
        let y = ty.clamp(0, max) as u32;
        self.get(probe, y * self.tile_size + x)
    }

    pub fn tile(&self, probe: u32) -> &[T] {
        let start = self.index(probe, 0);
        &self.texels[start..start + self.texels_per_tile() as usize]
    }

    pub fn tile_mut(&mut self, probe: u32) -> &mut [T] {
        let start = self.index(probe, 0);
        let len = self.texels_per_tile() as usize;
        &mut self.texels[start..start + len]
    }

    pub fn texels(&self) -> &[T] {
        &self.texels
    }

    pub fn fill(&mut self, value: T) {
        self.texels.fill(value);
    }

    /// Reallocate when the probe grid changes. Returns true if reallocated.
    pub fn resize(&mut self, layout: &ProbeGridLayout, value: T) -> bool {
        if layout.tile_size == self.tile_size && layout.probe_count() == self.probe_count {
            return false;
        }
        *self = Self::for_layout(layout, value);
        true
    }
}

pub type ProbeAtlas = TiledAtlas<RadianceTexel>;
pub type MetaAtlas = TiledAtlas<MetaTexel>;

/// Two named atlas slots whose roles (history / output) swap every frame.
#[derive(Clone, Debug)]
pub struct AtlasPingPong {
    slots: [ProbeAtlas; 2],
    /// Slot holding last frame's output
    history: usize,
}

impl AtlasPingPong {
    pub fn new(layout: &ProbeGridLayout) -> Self {
        Self {
            slots: [
                ProbeAtlas::for_layout(layout, RadianceTexel::ZERO),
                ProbeAtlas::for_layout(layout, RadianceTexel::ZERO),
            ],
            history: 0,
        }
    }

    pub fn resize(&mut self, layout: &ProbeGridLayout) -> bool {
        let a = self.slots[0].resize(layout, RadianceTexel::ZERO);
        let b = self.slots[1].resize(layout, RadianceTexel::ZERO);
        if a || b {
            self.history = 0;
        }
        a || b
    }

    #[inline]
    pub fn history_slot(&self) -> usize {
        self.history
    }

    #[inline]
    pub fn output_slot(&self) -> usize {
        1 - self.history
    }

    pub fn history(&self) -> &ProbeAtlas {
        &self.slots[self.history]
    }

    /// The slot written this frame (after the temporal pass: this frame's result).
    pub fn output(&self) -> &ProbeAtlas {
        &self.slots[self.output_slot()]
    }

    /// Borrow history read-only and the output slot mutably.
    pub fn history_and_output(&mut self) -> (&ProbeAtlas, &mut ProbeAtlas) {
        let (a, b) = self.slots.split_at_mut(1);
        if self.history == 0 {
            (&a[0], &mut b[0])
        } else {
            (&b[0], &mut a[0])
        }
    }

    /// End of frame: this frame's output becomes next frame's history.
    pub fn swap(&mut self) {
        self.history = self.output_slot();
    }
}
