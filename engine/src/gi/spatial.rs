//! Octahedral Spatial Filter (CPU reference)
//!
//! Edge-aware blur inside each probe tile:
//!
//! ```text
//! w = confidence_n * exp(-((hit_n - hit_c) / sigma)^2)
//! ```
//!
//! Neighbours are limited to the tile; directions from other probes never
//! mix. Zero-confidence neighbours add nothing. Matches `spatial_filter.wgsl`.

use glam::Vec4;

use super::atlas::{MetaAtlas, ProbeAtlas, RadianceTexel};
use super::probe_grid::ProbeAnchors;

/// Weight sums below this fall back to the unfiltered center texel.
pub const MIN_WEIGHT_SUM: f32 = 1.0e-6;

#[derive(Clone, Copy, Debug)]
pub struct SpatialParams {
    pub radius: u32,
    pub hit_distance_sigma: f32,
}

/// Edge-stopping weight for one neighbour.
#[inline]
pub fn spatial_weight(confidence: f32, hit_center: f32, hit_neighbour: f32, sigma: f32) -> f32 {
    if !(confidence > 0.0) {
        return 0.0;
    }
    let x = (hit_neighbour - hit_center) / sigma.max(1.0e-6);
    confidence * (-x * x).exp()
}

/// Filter one texel of a valid probe.
pub fn filter_texel(
    input: &ProbeAtlas,
    meta: &MetaAtlas,
    probe: u32,
    tx: u32,
    ty: u32,
    params: &SpatialParams,
) -> RadianceTexel {
    let tile = input.tile_size() as i32;
    let r = params.radius as i32;
    let center = input.get(probe, ty * input.tile_size() + tx);
    let hit_c = center.hit_distance();

    let mut sum = Vec4::ZERO;
    let mut weight_sum = 0.0;
    for dy in -r..=r {
        for dx in -r..=r {
            let x = tx as i32 + dx;
            let y = ty as i32 + dy;
            if x < 0 || y < 0 || x >= tile || y >= tile {
                continue;
            }
            let texel = (y * tile + x) as u32;
            let n = input.get(probe, texel);
            let w = spatial_weight(meta.get(probe, texel).confidence, hit_c, n.hit_distance(), params.hit_distance_sigma);
            if w <= 0.0 {
                continue;
            }
            sum += n.radiance().extend(n.encoded_distance()) * w;
            weight_sum += w;
        }
    }
    if weight_sum < MIN_WEIGHT_SUM {
        return center;
    }
    let v = sum / weight_sum;
    RadianceTexel::from_encoded(v.truncate(), v.w)
}

/// Filter every tile; invalid probes produce an all-zero tile.
pub fn run_spatial_filter(
    input: &ProbeAtlas,
    meta: &MetaAtlas,
    anchors: &ProbeAnchors,
    params: &SpatialParams,
    output: &mut ProbeAtlas,
) {
    let tile = input.tile_size();
    for probe in 0..input.probe_count() {
        if !anchors.get(probe).is_valid() {
            output.tile_mut(probe).fill(RadianceTexel::ZERO);
            continue;
        }
        for ty in 0..tile {
            for tx in 0..tile {
                let t = filter_texel(input, meta, probe, tx, ty, params);
                output.set(probe, ty * tile + tx, t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::atlas::MetaTexel;
    use crate::gi::probe_grid::{PROBE_EDGE, ProbeAnchor, ProbeGridLayout};
    use glam::Vec3;

    fn anchors(validity: f32) -> ProbeAnchors {
        let mut a = ProbeAnchors::new(ProbeGridLayout::new(16, 8, 8, 4));
        a.set(0, ProbeAnchor { position: Vec3::ZERO, normal: Vec3::Y, validity });
        a
    }

    fn split_tile() -> ProbeAtlas {
        // Left half near and dark, right half far and bright.
        let mut atlas = ProbeAtlas::new(4, 2, RadianceTexel::ZERO);
        for ty in 0..4 {
            for tx in 0..4 {
                let t = if tx < 2 {
                    RadianceTexel::new(Vec3::splat(0.0), 1.0)
                } else {
                    RadianceTexel::new(Vec3::splat(1.0), 30.0)
                };
                atlas.set(0, ty * 4 + tx, t);
                atlas.set(1, ty * 4 + tx, RadianceTexel::new(Vec3::ONE, 5.0));
            }
        }
        atlas
    }

    #[test]
    fn test_invalid_probe_tile_exactly_zero() {
        let input = split_tile();
        let meta = MetaAtlas::new(4, 2, MetaTexel::new(1.0, 0));
        let mut output = ProbeAtlas::new(4, 2, RadianceTexel::new(Vec3::ONE, 1.0));
        // Probe 1 keeps its default invalid anchor.
        run_spatial_filter(&input, &meta, &anchors(PROBE_EDGE), &SpatialParams { radius: 1, hit_distance_sigma: 4.0 }, &mut output);
        assert!(output.tile(1).iter().all(|t| *t == RadianceTexel::ZERO));
        assert!(output.tile(0).iter().any(|t| *t != RadianceTexel::ZERO));
    }

    #[test]
    fn test_small_sigma_preserves_edge() {
        let input = split_tile();
        let meta = MetaAtlas::new(4, 2, MetaTexel::new(1.0, 0));
        let mut output = ProbeAtlas::new(4, 2, RadianceTexel::ZERO);
        let params = SpatialParams { radius: 1, hit_distance_sigma: 0.5 };
        run_spatial_filter(&input, &meta, &anchors(1.0), &params, &mut output);
        // Texel (1, 1) borders the bright half but must stay dark.
        assert!(output.get(0, 5).radiance().x < 1e-3);
        assert!(output.get(0, 6).radiance().x > 0.999);
    }

    #[test]
    fn test_large_sigma_smooths() {
        let input = split_tile();
        let meta = MetaAtlas::new(4, 2, MetaTexel::new(1.0, 0));
        let mut output = ProbeAtlas::new(4, 2, RadianceTexel::ZERO);
        let params = SpatialParams { radius: 1, hit_distance_sigma: 1.0e6 };
        run_spatial_filter(&input, &meta, &anchors(1.0), &params, &mut output);
        // 3×3 around (1, 1): 3 bright of 9.
        assert!((output.get(0, 5).radiance().x - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_confidence_neighbours_do_not_bleed() {
        let input = split_tile();
        let mut meta = MetaAtlas::new(4, 2, MetaTexel::new(1.0, 0));
        for ty in 0..4 {
            for tx in 2..4 {
                meta.set(0, ty * 4 + tx, MetaTexel::EMPTY);
            }
        }
        let mut output = ProbeAtlas::new(4, 2, RadianceTexel::ZERO);
        let params = SpatialParams { radius: 1, hit_distance_sigma: 1.0e6 };
        run_spatial_filter(&input, &meta, &anchors(1.0), &params, &mut output);
        assert_eq!(output.get(0, 5).radiance(), Vec3::ZERO);
        // All-zero-confidence neighbourhood keeps the center value.
        assert_eq!(output.get(0, 7), input.get(0, 7));
    }
}
