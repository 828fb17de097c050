//! Probe Octahedral Trace Pass (CPU reference)
//!
//! Fills the persistent trace atlas one batch of texels per probe per frame.
//! Each scheduled texel traces the octahedral direction through its center
//! (plus jittered extra rays) from the probe anchor, offset along the anchor
//! normal. Hits are shaded from the relit surface cache when a resident card
//! covers the hit face, otherwise from the light LUTs. Matches
//! `probe_trace.wgsl`.

use glam::{Vec2, Vec3};

use super::atlas::{
    META_FLAG_HIT, META_FLAG_OUT_OF_BOUNDS, META_FLAG_SURFACE_CACHE, MetaAtlas, MetaTexel,
    ProbeAtlas, RadianceTexel,
};
use super::card_atlas::CardAtlas;
use super::card_builder::virtual_page_index;
use super::dda::{DebugCounters, TraceHit, TraceOutcome, trace_ray};
use super::math::{HashRng, octahedral_decode, ray_seed, sanitize};
use super::occupancy::{LightLuts, OccupancyVolume};
use super::page_table::PAGE_UNMAPPED;
use super::probe_grid::ProbeAnchors;
use super::relight::TraceParams;
use super::schedule::is_texel_scheduled;
use super::work_items::CardMeta;

/// Confidence written for rays that escape to the sky.
pub const MISS_CONFIDENCE: f32 = 0.5;

/// Read-only view of the surface cache in GPU layout.
#[derive(Clone, Copy)]
pub struct SurfaceCacheView<'a> {
    /// `chunk_slot * 6 + face` → physical page (`PAGE_UNMAPPED` if none)
    pub directory: &'a [u32],
    /// Indexed by physical page
    pub card_meta: &'a [CardMeta],
    pub atlas: &'a CardAtlas,
}

impl SurfaceCacheView<'_> {
    /// Relit radiance at a hit, `None` when no accumulated card texel covers it.
    pub fn lookup(&self, volume: &OccupancyVolume, hit: &TraceHit, origin: Vec3, dir: Vec3) -> Option<Vec3> {
        let window = volume.window();
        let storage = window.storage_coord(hit.world_cell)?;
        let slot = window.chunk_slot(storage);
        let page = *self.directory.get(virtual_page_index(slot, hit.face) as usize)?;
        if page == PAGE_UNMAPPED {
            return None;
        }
        let card = self.card_meta.get(page as usize)?;
        if !card.is_resident() {
            return None;
        }
        let size = self.atlas.page_size();
        let (tx, ty) = card.texel_of(hit.position(origin, dir), size)?;
        let texel = ty * size + tx;
        if !self.atlas.material(page, texel).is_covered() {
            return None;
        }
        let value = self.atlas.radiance(page, texel);
        (value.w > 0.0).then(|| sanitize(value.truncate()))
    }
}

/// Output of tracing one probe texel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeSample {
    pub radiance: Vec3,
    pub hit_distance: f32,
    pub confidence: f32,
    pub flags: u32,
}

/// Trace all rays of one probe texel.
#[allow(clippy::too_many_arguments)]
pub fn trace_probe_texel(
    origin: Vec3,
    probe: u32,
    tx: u32,
    ty: u32,
    tile: u32,
    volume: &OccupancyVolume,
    luts: &LightLuts,
    surface: Option<&SurfaceCacheView>,
    params: &TraceParams,
    max_trace_distance: f32,
    frame_index: u32,
    counters: Option<&DebugCounters>,
) -> ProbeSample {
    let rays = params.rays_per_texel.max(1);
    let texel = ty * tile + tx;
    let mut radiance = Vec3::ZERO;
    let mut distance = 0.0;
    let mut confidence = 0.0;
    let mut flags = 0;

    for ray in 0..rays {
        // Ray 0 goes through the texel center; the rest jitter inside it.
        let jitter = if ray == 0 {
            Vec2::splat(0.5)
        } else {
            let mut rng = HashRng::new(ray_seed(probe, frame_index, texel, ray));
            Vec2::new(rng.next_f32(), rng.next_f32())
        };
        let uv = (Vec2::new(tx as f32, ty as f32) + jitter) / tile as f32;
        let dir = octahedral_decode(uv);
        let outcome = trace_ray(volume, origin, dir, params.max_dda_steps, counters);
        match outcome {
            TraceOutcome::Hit(hit) => {
                let cached = surface.and_then(|s| s.lookup(volume, &hit, origin, dir));
                let shaded = match cached {
                    Some(c) => {
                        flags |= META_FLAG_SURFACE_CACHE;
                        c
                    }
                    None => luts.shade_hit(hit.cell, hit.previous),
                };
                radiance += sanitize(shaded);
                distance += hit.distance;
                confidence += 1.0;
                flags |= META_FLAG_HIT;
            }
            TraceOutcome::Miss { .. } => {
                radiance += params.sky_radiance;
                distance += max_trace_distance;
                confidence += MISS_CONFIDENCE;
            }
            TraceOutcome::OutOfBoundsStart => {
                radiance += params.sky_radiance;
                distance += max_trace_distance;
                confidence += MISS_CONFIDENCE;
                flags |= META_FLAG_OUT_OF_BOUNDS;
            }
        }
    }

    let n = rays as f32;
    ProbeSample {
        radiance: sanitize(radiance / n),
        hit_distance: distance / n,
        confidence: confidence / n,
        flags,
    }
}

/// Trace this frame's batch for every valid probe. Untraced texels and
/// invalid probes are left untouched. Returns texels traced.
#[allow(clippy::too_many_arguments)]
pub fn run_probe_trace(
    anchors: &ProbeAnchors,
    trace_atlas: &mut ProbeAtlas,
    meta_atlas: &mut MetaAtlas,
    volume: &OccupancyVolume,
    luts: &LightLuts,
    surface: Option<&SurfaceCacheView>,
    params: &TraceParams,
    max_trace_distance: f32,
    frame_index: u32,
    counters: Option<&DebugCounters>,
) -> u32 {
    let layout = *anchors.layout();
    let tile = layout.tile_size;
    let total = layout.texels_per_probe();
    let mut traced = 0;

    for probe in 0..layout.probe_count() {
        let anchor = anchors.get(probe);
        if !anchor.is_valid() {
            continue;
        }
        let origin = anchor.position + anchor.normal * params.normal_bias;
        for texel in 0..total {
            if !is_texel_scheduled(texel, params.texels_per_frame, frame_index, probe, total) {
                continue;
            }
            let sample = trace_probe_texel(
                origin,
                probe,
                texel % tile,
                texel / tile,
                tile,
                volume,
                luts,
                surface,
                params,
                max_trace_distance,
                frame_index,
                counters,
            );
            trace_atlas.set(probe, texel, RadianceTexel::new(sample.radiance, sample.hit_distance));
            meta_atlas.set(probe, texel, MetaTexel::new(sample.confidence, sample.flags));
            traced += 1;
        }
    }
    log::debug!("[ProbeTrace] Frame {}: {} texels traced", frame_index, traced);
    traced
}
