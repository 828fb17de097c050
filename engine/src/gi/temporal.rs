//! Octahedral Temporal Filter (CPU reference)
//!
//! Blends this frame's traced probe texels with last frame's filtered output.
//! Uses the same batch rule as the probe trace pass, so only texels refreshed
//! this frame are considered:
//!
//! - invalid probe: whole tile written as zero
//! - untraced texel: current copied through bit-for-bit
//! - history hit distance ≈0, or relative hit-distance change above the
//!   reject threshold: current only (disocclusion)
//! - otherwise: history clamped to the 3×3 neighbourhood of current, then
//!   `mix(current, clamped_history, alpha)`
//!
//! Matches `temporal_filter.wgsl`.

use glam::Vec4;

use super::atlas::{ProbeAtlas, RadianceTexel};
use super::probe_grid::ProbeAnchors;
use super::schedule::is_texel_scheduled;

/// History hit distances below this carry no information.
pub const MIN_HISTORY_DISTANCE: f32 = 1.0e-4;

#[derive(Clone, Copy, Debug)]
pub struct TemporalParams {
    pub texels_per_frame: u32,
    pub temporal_alpha: f32,
    pub hit_distance_reject_threshold: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TemporalStats {
    pub blended: u32,
    pub rejected: u32,
    pub passed_through: u32,
}

/// True when history must be discarded for this texel.
pub fn reject_history(current: &RadianceTexel, history: &RadianceTexel, threshold: f32) -> bool {
    let hist_d = history.hit_distance();
    if !(hist_d > MIN_HISTORY_DISTANCE) {
        return true;
    }
    let cur_d = current.hit_distance();
    let rel = (hist_d - cur_d).abs() / cur_d.max(MIN_HISTORY_DISTANCE);
    !(rel <= threshold)
}

/// Min/max of `(rgb, encoded distance)` over the 3×3 neighbourhood inside the tile.
fn neighbourhood_bounds(current: &ProbeAtlas, probe: u32, tx: i32, ty: i32) -> (Vec4, Vec4) {
    let mut lo = Vec4::splat(f32::MAX);
    let mut hi = Vec4::splat(f32::MIN);
    for dy in -1..=1 {
        for dx in -1..=1 {
            let t = current.get_xy_clamped(probe, tx + dx, ty + dy);
            let v = t.radiance().extend(t.encoded_distance());
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    (lo, hi)
}

/// Filter every tile of `current` against `history` into `output`.
pub fn run_temporal_filter(
    current: &ProbeAtlas,
    history: &ProbeAtlas,
    output: &mut ProbeAtlas,
    anchors: &ProbeAnchors,
    params: &TemporalParams,
    frame_index: u32,
) -> TemporalStats {
    let tile = current.tile_size();
    let total = current.texels_per_tile();
    let alpha = params.temporal_alpha.clamp(0.0, 1.0);
    let mut stats = TemporalStats::default();

    for probe in 0..current.probe_count() {
        if !anchors.get(probe).is_valid() {
            output.tile_mut(probe).fill(RadianceTexel::ZERO);
            continue;
        }
        for texel in 0..total {
            let cur = current.get(probe, texel);
            if !is_texel_scheduled(texel, params.texels_per_frame, frame_index, probe, total) {
                output.set(probe, texel, cur);
                stats.passed_through += 1;
                continue;
            }
            let hist = history.get(probe, texel);
            if reject_history(&cur, &hist, params.hit_distance_reject_threshold) {
                output.set(probe, texel, cur);
                stats.rejected += 1;
                continue;
            }

            let (lo, hi) = neighbourhood_bounds(current, probe, (texel % tile) as i32, (texel / tile) as i32);
            let h = hist.radiance().extend(hist.encoded_distance()).clamp(lo, hi);
            let c = cur.radiance().extend(cur.encoded_distance());
            let blended = c.lerp(h, alpha);
            output.set(probe, texel, RadianceTexel::from_encoded(blended.truncate(), blended.w));
            stats.blended += 1;
        }
    }
    log::debug!(
        "[TemporalFilter] Frame {}: {} blended, {} rejected, {} passed through",
        frame_index, stats.blended, stats.rejected, stats.passed_through
    );
    stats
}
