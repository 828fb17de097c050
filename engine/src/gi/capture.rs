//! Scene Capture Pass (CPU reference)
//!
//! Rasterizes a card's triangle range into its physical page. Each texel
//! center on the card plane is tested against every triangle projected into
//! the card's UV frame; the outermost covering triangle (largest signed
//! distance along the card normal) wins. Matches `scene_capture.wgsl`.

use glam::{Vec2, Vec3};

use super::card_atlas::{CardAtlas, FAR_DEPTH, MaterialTexel};
use super::card_builder::Triangle;
use super::work_items::{CaptureWorkItem, CardMeta};

/// Barycentric slack so texel centers on shared edges are covered once at least.
const EDGE_EPSILON: f32 = 1.0e-5;

/// Triangle covering a point in card space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coverage {
    /// Signed distance along the card normal
    pub depth: f32,
    /// Triangle normal, flipped into the card's hemisphere
    pub normal: Vec3,
}

fn barycentric(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Option<Vec3> {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let den = v0.x * v1.y - v1.x * v0.y;
    if den.abs() < 1.0e-12 {
        return None;
    }
    let v = (v2.x * v1.y - v1.x * v2.y) / den;
    let w = (v0.x * v2.y - v2.x * v0.y) / den;
    let u = 1.0 - v - w;
    (u >= -EDGE_EPSILON && v >= -EDGE_EPSILON && w >= -EDGE_EPSILON).then_some(Vec3::new(u, v, w))
}

/// Outermost coverage of the card-space point `uv` by `triangles`.
pub fn cover_point(card: &CardMeta, uv: Vec2, triangles: &[Triangle]) -> Option<Coverage> {
    let mut best: Option<Coverage> = None;
    for tri in triangles {
        let (a, da) = card.project(tri[0]);
        let (b, db) = card.project(tri[1]);
        let (c, dc) = card.project(tri[2]);
        let Some(bary) = barycentric(uv, a, b, c) else { continue };
        let depth = bary.x * da + bary.y * db + bary.z * dc;

        let n = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
        let len = n.length();
        if !(len > 1.0e-12) {
            continue;
        }
        let mut normal = n / len;
        if normal.dot(card.normal()) < 0.0 {
            normal = -normal;
        }
        if best.map(|b| depth > b.depth).unwrap_or(true) {
            best = Some(Coverage { depth, normal });
        }
    }
    best
}

/// Capture one work item into its physical page.
///
/// The page's surface cache is reset: freshly mapped or recaptured pages
/// restart radiance accumulation from zero.
pub fn capture_page(
    item: &CaptureWorkItem,
    card: &CardMeta,
    triangles: &[Triangle],
    atlas: &mut CardAtlas,
) {
    let page = item.physical_page_id;
    let size = atlas.page_size();
    let start = item.triangle_offset as usize;
    let end = (start + item.triangle_count as usize).min(triangles.len());
    let range = triangles.get(start..end).unwrap_or(&[]);
    let (extent_u, extent_v) = card.extent();

    atlas.clear_page(page);
    for ty in 0..size {
        for tx in 0..size {
            let texel = ty * size + tx;
            let uv = Vec2::new(
                (tx as f32 + 0.5) / size as f32 * extent_u,
                (ty as f32 + 0.5) / size as f32 * extent_v,
            );
            match cover_point(card, uv, range) {
                Some(cov) => atlas.set_capture(page, texel, cov.depth, MaterialTexel::covered(cov.normal)),
                None => atlas.set_capture(page, texel, FAR_DEPTH, MaterialTexel::CLEARED),
            }
        }
    }
}

/// Capture every item. `card_meta` is indexed by physical page.
pub fn run_scene_capture(
    items: &[CaptureWorkItem],
    card_meta: &[CardMeta],
    triangles: &[Triangle],
    atlas: &mut CardAtlas,
) -> usize {
    let mut captured = 0;
    for item in items {
        let Some(card) = card_meta.get(item.physical_page_id as usize).filter(|m| m.is_resident()) else {
            log::warn!("[SceneCapture] No card for physical page {}", item.physical_page_id);
            continue;
        };
        capture_page(item, card, triangles, atlas);
        captured += 1;
    }
    captured
}
