//! Voxel DDA Relight Pass (CPU reference)
//!
//! Refreshes the surface cache of resident card pages by tracing
//! cosine-weighted hemisphere rays through the occupancy volume. Work is
//! spread over frames: each frame visits one batch of `texels_per_page_per_frame`
//! texels per page (see [`super::schedule`]).
//!
//! Accumulation is a running average: `rgb = (rgb * n + sample) / (n + 1)`,
//! `a = n + 1`. Only covered texels are visited; every visit adds exactly one
//! to alpha whatever the rays hit. Matches `voxel_relight.wgsl`.

use glam::{Vec3, Vec4};

use super::card_atlas::CardAtlas;
use super::dda::{DebugCounters, TraceOutcome, trace_ray};
use super::math::{HashRng, cosine_hemisphere, ray_seed, sanitize};
use super::occupancy::{LightLuts, OccupancyVolume};
use super::schedule::is_texel_scheduled;
use super::work_items::{CardMeta, RelightWorkItem};

/// Tracing parameters shared by the relight and probe trace passes.
#[derive(Clone, Copy, Debug)]
pub struct TraceParams {
    pub max_dda_steps: u32,
    pub rays_per_texel: u32,
    /// Per-page (relight) or per-probe (probe trace) texel budget
    pub texels_per_frame: u32,
    pub normal_bias: f32,
    pub sky_radiance: Vec3,
}

/// Radiance carried back along a ray.
pub fn shade_outcome(outcome: &TraceOutcome, luts: &LightLuts, sky: Vec3) -> Vec3 {
    match outcome {
        TraceOutcome::Hit(hit) => sanitize(luts.shade_hit(hit.cell, hit.previous)),
        TraceOutcome::Miss { .. } | TraceOutcome::OutOfBoundsStart => sky,
    }
}

/// Fold one sample into a running-average texel.
#[inline]
pub fn accumulate(previous: Vec4, sample: Vec3) -> Vec4 {
    let count = if previous.w.is_finite() { previous.w.max(0.0) } else { 0.0 };
    let old = sanitize(previous.truncate());
    let rgb = sanitize((old * count + sample) / (count + 1.0));
    rgb.extend(count + 1.0)
}

/// Relight one page. Returns the number of texels visited.
#[allow(clippy::too_many_arguments)]
pub fn relight_page(
    item: &RelightWorkItem,
    card: &CardMeta,
    atlas: &mut CardAtlas,
    volume: &OccupancyVolume,
    luts: &LightLuts,
    params: &TraceParams,
    frame_index: u32,
    counters: Option<&DebugCounters>,
) -> u32 {
    let page = item.physical_page_id;
    let size = atlas.page_size();
    let total = atlas.texels_per_page();
    let rays = params.rays_per_texel.max(1);
    let mut visited = 0;

    for texel in 0..total {
        if !is_texel_scheduled(texel, params.texels_per_frame, frame_index, page, total) {
            continue;
        }
        let material = atlas.material(page, texel);
        if !material.is_covered() {
            continue;
        }

        let (tx, ty) = (texel % size, texel / size);
        let depth = atlas.depth(page, texel);
        let normal = material.normal().normalize_or(card.normal());
        let surface = card.texel_center(tx, ty, size) + card.normal() * depth;
        let origin = surface + normal * params.normal_bias;

        let mut sum = Vec3::ZERO;
        for ray in 0..rays {
            let mut rng = HashRng::new(ray_seed(item.patch_id, frame_index, texel, ray));
            let dir = cosine_hemisphere(normal, rng.next_f32(), rng.next_f32());
            let outcome = trace_ray(volume, origin, dir, params.max_dda_steps, counters);
            sum += shade_outcome(&outcome, luts, params.sky_radiance);
        }
        let sample = sanitize(sum / rays as f32);
        let updated = accumulate(atlas.radiance(page, texel), sample);
        atlas.set_radiance(page, texel, updated);
        visited += 1;
    }
    visited
}

/// Relight every work item. `card_meta` is indexed by physical page.
#[allow(clippy::too_many_arguments)]
pub fn run_voxel_relight(
    items: &[RelightWorkItem],
    card_meta: &[CardMeta],
    atlas: &mut CardAtlas,
    volume: &OccupancyVolume,
    luts: &LightLuts,
    params: &TraceParams,
    frame_index: u32,
    counters: Option<&DebugCounters>,
) -> u32 {
    let mut visited = 0;
    for item in items {
        let Some(card) = card_meta.get(item.physical_page_id as usize) else { continue };
        visited += relight_page(item, card, atlas, volume, luts, params, frame_index, counters);
    }
    log::debug!("[VoxelRelight] Frame {}: {} pages, {} texels", frame_index, items.len(), visited);
    visited
}
