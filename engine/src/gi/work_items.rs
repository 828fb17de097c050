//! Fixed-layout dispatch descriptors shared by the CPU passes and the
//! capture/relight compute shaders.
//!
//! One record per dispatched unit of work (one workgroup per record on the
//! GPU). Records are immutable for the duration of a dispatch.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Capture one physical page from a triangle range.
///
/// WGSL: `struct CaptureWorkItem { physical_page_id: u32, triangle_offset: u32, triangle_count: u32 }`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct CaptureWorkItem {
    pub physical_page_id: u32,
    /// First triangle in the shared triangle buffer
    pub triangle_offset: u32,
    pub triangle_count: u32,
}

/// Relight one resident physical page.
///
/// WGSL: `struct RelightWorkItem { physical_page_id: u32, chunk_slot: u32, patch_id: u32, virtual_page_index: u32 }`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct RelightWorkItem {
    pub physical_page_id: u32,
    pub chunk_slot: u32,
    /// Stable card identity; seeds the ray hash
    pub patch_id: u32,
    pub virtual_page_index: u32,
}

/// Card placement for one physical page (64 bytes, std430).
///
/// WGSL:
/// ```wgsl
/// struct CardMeta {
///     origin_extent_u: vec4<f32>,
///     axis_u_extent_v: vec4<f32>,
///     axis_v_patch: vec4<f32>,   // w = bitcast<f32>(patch_id)
///     normal_flags: vec4<f32>,   // w = bitcast<f32>(flags)
/// }
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Default, Pod, Zeroable)]
pub struct CardMeta {
    pub origin_extent_u: [f32; 4],
    pub axis_u_extent_v: [f32; 4],
    pub axis_v_patch: [f32; 4],
    pub normal_flags: [f32; 4],
}

/// Physical page holds a live card.
pub const CARD_FLAG_RESIDENT: u32 = 1;

const _: () = assert!(std::mem::size_of::<CaptureWorkItem>() == 12);
const _: () = assert!(std::mem::size_of::<RelightWorkItem>() == 16);
const _: () = assert!(std::mem::size_of::<CardMeta>() == 64);

impl CardMeta {
    pub fn new(
        origin: Vec3,
        axis_u: Vec3,
        axis_v: Vec3,
        normal: Vec3,
        extent_u: f32,
        extent_v: f32,
        patch_id: u32,
    ) -> Self {
        Self {
            origin_extent_u: origin.extend(extent_u).to_array(),
            axis_u_extent_v: axis_u.extend(extent_v).to_array(),
            axis_v_patch: axis_v.extend(f32::from_bits(patch_id)).to_array(),
            normal_flags: normal.extend(f32::from_bits(CARD_FLAG_RESIDENT)).to_array(),
        }
    }

    pub fn origin(&self) -> Vec3 {
        Vec3::from_slice(&self.origin_extent_u[..3])
    }

    pub fn axis_u(&self) -> Vec3 {
        Vec3::from_slice(&self.axis_u_extent_v[..3])
    }

    pub fn axis_v(&self) -> Vec3 {
        Vec3::from_slice(&self.axis_v_patch[..3])
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_slice(&self.normal_flags[..3])
    }

    /// `(extent_u, extent_v)` in world units.
    pub fn extent(&self) -> (f32, f32) {
        (self.origin_extent_u[3], self.axis_u_extent_v[3])
    }

    /// Card-plane coordinates `(u, v)` and signed distance of a world point.
    pub fn project(&self, p: Vec3) -> (Vec2, f32) {
        let d = p - self.origin();
        (Vec2::new(d.dot(self.axis_u()), d.dot(self.axis_v())), d.dot(self.normal()))
    }

    /// World point at the center of texel `(tx, ty)` of a `page_size` page.
    pub fn texel_center(&self, tx: u32, ty: u32, page_size: u32) -> Vec3 {
        let (eu, ev) = self.extent();
        let u = (tx as f32 + 0.5) / page_size as f32 * eu;
        let v = (ty as f32 + 0.5) / page_size as f32 * ev;
        self.origin() + self.axis_u() * u + self.axis_v() * v
    }

    /// Texel covering a world point, `None` outside the card rectangle.
    pub fn texel_of(&self, p: Vec3, page_size: u32) -> Option<(u32, u32)> {
        let (eu, ev) = self.extent();
        if eu <= 0.0 || ev <= 0.0 {
            return None;
        }
        let (uv, _) = self.project(p);
        let f = uv / Vec2::new(eu, ev);
        if !(0.0..=1.0).contains(&f.x) || !(0.0..=1.0).contains(&f.y) {
            return None;
        }
        let max = page_size - 1;
        Some((((f.x * page_size as f32) as u32).min(max), ((f.y * page_size as f32) as u32).min(max)))
    }

    pub fn patch_id(&self) -> u32 {
        self.axis_v_patch[3].to_bits()
    }

    pub fn is_resident(&self) -> bool {
        self.normal_flags[3].to_bits() & CARD_FLAG_RESIDENT != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_items_cast_to_u32_words() {
        let items = [
            RelightWorkItem { physical_page_id: 3, chunk_slot: 7, patch_id: 99, virtual_page_index: 42 },
            RelightWorkItem { physical_page_id: 4, chunk_slot: 7, patch_id: 100, virtual_page_index: 43 },
        ];
        let words: &[u32] = bytemuck::cast_slice(&items);
        assert_eq!(words, &[3, 7, 99, 42, 4, 7, 100, 43]);

        let capture = [CaptureWorkItem { physical_page_id: 1, triangle_offset: 12, triangle_count: 6 }];
        let words: &[u32] = bytemuck::cast_slice(&capture);
        assert_eq!(words, &[1, 12, 6]);
    }

    #[test]
    fn test_card_meta_bit_fields() {
        let meta = CardMeta::new(Vec3::ZERO, Vec3::Z, Vec3::X, Vec3::Y, 16.0, 8.0, 0xDEAD_BEEF);
        assert_eq!(meta.patch_id(), 0xDEAD_BEEF);
        assert!(meta.is_resident());
        assert!(!CardMeta::default().is_resident());
    }
}
