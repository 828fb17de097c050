//! Paged card atlas: captured depth + material and the relit surface cache.
//!
//! All three planes are flat arrays indexed by
//! `physical_page * page_size² + ty * page_size + tx`.

use glam::{Vec3, Vec4};
use half::f16;

use super::math::{decode_normal_u8, encode_normal_u8};

/// Depth written to texels no triangle covers.
pub const FAR_DEPTH: f32 = 65504.0;

/// Material texel: encoded normal + validity (0 or 255).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialTexel {
    pub rgba: [u8; 4],
}

impl MaterialTexel {
    pub const CLEARED: MaterialTexel = MaterialTexel { rgba: [0; 4] };

    pub fn covered(normal: Vec3) -> Self {
        let [r, g, b] = encode_normal_u8(normal);
        Self { rgba: [r, g, b, 255] }
    }

    #[inline]
    pub fn is_covered(&self) -> bool {
        self.rgba[3] == 255
    }

    pub fn normal(&self) -> Vec3 {
        decode_normal_u8([self.rgba[0], self.rgba[1], self.rgba[2]])
    }

    /// Packed little-endian `u32` (GPU layout).
    pub fn packed(&self) -> u32 {
        u32::from_le_bytes(self.rgba)
    }
}

#[derive(Clone, Debug)]
pub struct CardAtlas {
    page_size: u32,
    pages: u32,
    depth: Vec<f16>,
    material: Vec<MaterialTexel>,
    /// rgb = running-average radiance, a = invocation count
    radiance: Vec<Vec4>,
}

impl CardAtlas {
    pub fn new(page_size: u32, pages: u32) -> Self {
        let len = (page_size * page_size) as usize * pages as usize;
        Self {
            page_size,
            pages,
            depth: vec![f16::from_f32(FAR_DEPTH); len],
            material: vec![MaterialTexel::CLEARED; len],
            radiance: vec![Vec4::ZERO; len],
        }
    }

    #[inline]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[inline]
    pub fn pages(&self) -> u32 {
        self.pages
    }

    #[inline]
    pub fn texels_per_page(&self) -> u32 {
        self.page_size * self.page_size
    }

    #[inline]
    pub fn index(&self, page: u32, texel: u32) -> usize {
        page as usize * self.texels_per_page() as usize + texel as usize
    }

    #[inline]
    pub fn depth(&self, page: u32, texel: u32) -> f32 {
        self.depth[self.index(page, texel)].to_f32()
    }

    #[inline]
    pub fn material(&self, page: u32, texel: u32) -> MaterialTexel {
        self.material[self.index(page, texel)]
    }

    #[inline]
    pub fn radiance(&self, page: u32, texel: u32) -> Vec4 {
        self.radiance[self.index(page, texel)]
    }

    pub fn set_capture(&mut self, page: u32, texel: u32, depth: f32, material: MaterialTexel) {
        let i = self.index(page, texel);
        self.depth[i] = f16::from_f32(depth);
        self.material[i] = material;
    }

    pub fn set_radiance(&mut self, page: u32, texel: u32, value: Vec4) {
        let i = self.index(page, texel);
        self.radiance[i] = value;
    }

    /// Reset a page to the cleared capture state and zero its surface cache.
    pub fn clear_page(&mut self, page: u32) {
        let start = self.index(page, 0);
        let end = start + self.texels_per_page() as usize;
        self.depth[start..end].fill(f16::from_f32(FAR_DEPTH));
        self.material[start..end].fill(MaterialTexel::CLEARED);
        self.radiance[start..end].fill(Vec4::ZERO);
    }

    pub fn depth_texels(&self) -> &[f16] {
        &self.depth
    }

    pub fn material_texels(&self) -> &[MaterialTexel] {
        &self.material
    }

    pub fn radiance_texels(&self) -> &[Vec4] {
        &self.radiance
    }

    pub fn covered_count(&self, page: u32) -> usize {
        let start = self.index(page, 0);
        self.material[start..start + self.texels_per_page() as usize]
            .iter()
            .filter(|m| m.is_covered())
            .count()
    }
}
