//! SH9 Projection (CPU reference)
//!
//! Projects each filtered probe tile onto the 9 real spherical harmonics of
//! degree ≤ 2. Each octahedral texel is integrated with 4×4 sub-samples so
//! the per-texel basis integrals and solid angles are accurate even for small
//! tiles; the table is built once per tile size.
//!
//! ```text
//! c_k = 4π · Σ conf·L·∫Y_k  /  Σ conf·Ω
//! ```
//!
//! Confidence-weighted normalization keeps partially-traced probes unbiased.
//! Matches `sh9_project.wgsl`.

use std::f32::consts::PI;

use glam::{Vec2, Vec3};
use half::f16;

use super::atlas::{MetaAtlas, ProbeAtlas};
use super::math::{octahedral_point, octahedral_solid_angle};
use super::probe_grid::ProbeAnchors;

pub const SH_COEFFS: usize = 9;
/// RGBA16F output planes: 9 × rgb = 27 floats in 7 × 4 slots.
pub const SH_PLANES: usize = 7;
/// Sub-samples per texel axis used when integrating the basis.
pub const SUBSAMPLES: u32 = 4;

const Y00: f32 = 0.282_095;
const Y1: f32 = 0.488_603;
const Y2_A: f32 = 1.092_548;
const Y20: f32 = 0.315_392;
const Y22: f32 = 0.546_274;

/// Convolution weights of the clamped cosine lobe per band.
const A0: f32 = PI;
const A1: f32 = 2.0 * PI / 3.0;
const A2: f32 = PI / 4.0;

/// Real SH basis, order Y00, Y1-1, Y10, Y11, Y2-2, Y2-1, Y20, Y21, Y22.
pub fn sh_basis(d: Vec3) -> [f32; SH_COEFFS] {
    [
        Y00,
        Y1 * d.y,
        Y1 * d.z,
        Y1 * d.x,
        Y2_A * d.x * d.y,
        Y2_A * d.y * d.z,
        Y20 * (3.0 * d.z * d.z - 1.0),
        Y2_A * d.x * d.z,
        Y22 * (d.x * d.x - d.y * d.y),
    ]
}

/// Nine RGB coefficients for one probe.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sh9 {
    pub coeffs: [Vec3; SH_COEFFS],
}

impl Default for Sh9 {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Sh9 {
    pub const ZERO: Sh9 = Sh9 { coeffs: [Vec3::ZERO; SH_COEFFS] };

    /// Irradiance `E(n)` from the cosine-convolved expansion.
    pub fn irradiance(&self, n: Vec3) -> Vec3 {
        let y = sh_basis(n);
        let mut e = self.coeffs[0] * (A0 * y[0]);
        for k in 1..4 {
            e += self.coeffs[k] * (A1 * y[k]);
        }
        for k in 4..9 {
            e += self.coeffs[k] * (A2 * y[k]);
        }
        e.max(Vec3::ZERO)
    }

    /// Outgoing diffuse radiance for a white Lambertian surface: `E / π`.
    pub fn diffuse(&self, n: Vec3) -> Vec3 {
        self.irradiance(n) / PI
    }

    /// Flatten into 7 RGBA16F texels: `[c0.rgb, c1.rgb, …, c8.rgb, 0]`.
    pub fn pack(&self) -> [[f16; 4]; SH_PLANES] {
        let mut flat = [0.0f32; SH_PLANES * 4];
        for (k, c) in self.coeffs.iter().enumerate() {
            flat[k * 3] = c.x;
            flat[k * 3 + 1] = c.y;
            flat[k * 3 + 2] = c.z;
        }
        let mut out = [[f16::ZERO; 4]; SH_PLANES];
        for (i, v) in flat.iter().enumerate() {
            out[i / 4][i % 4] = f16::from_f32(*v);
        }
        out
    }

    pub fn unpack(planes: &[[f16; 4]; SH_PLANES]) -> Self {
        let mut sh = Sh9::ZERO;
        for k in 0..SH_COEFFS {
            let get = |i: usize| planes[i / 4][i % 4].to_f32();
            sh.coeffs[k] = Vec3::new(get(k * 3), get(k * 3 + 1), get(k * 3 + 2));
        }
        sh
    }
}

/// Per-texel basis integrals and solid angles for one tile size.
#[derive(Clone, Debug)]
pub struct Sh9ProjectionTable {
    tile_size: u32,
    /// `∫ Y_k dω` over each texel
    basis: Vec<[f32; SH_COEFFS]>,
    /// Solid angle of each texel
    solid_angle: Vec<f32>,
}

impl Sh9ProjectionTable {
    pub fn new(tile_size: u32) -> Self {
        let n = tile_size * SUBSAMPLES;
        // Area of one sub-sample in the [-1, 1]² parameterization.
        let area = (2.0 / n as f32) * (2.0 / n as f32);
        let texels = (tile_size * tile_size) as usize;
        let mut basis = vec![[0.0; SH_COEFFS]; texels];
        let mut solid_angle = vec![0.0; texels];

        for ty in 0..tile_size {
            for tx in 0..tile_size {
                let t = (ty * tile_size + tx) as usize;
                for sy in 0..SUBSAMPLES {
                    for sx in 0..SUBSAMPLES {
                        let uv = Vec2::new(
                            (tx * SUBSAMPLES + sx) as f32 + 0.5,
                            (ty * SUBSAMPLES + sy) as f32 + 0.5,
                        ) / n as f32;
                        let p = octahedral_point(uv);
                        let dw = octahedral_solid_angle(p, area);
                        let y = sh_basis(p.normalize());
                        for k in 0..SH_COEFFS {
                            basis[t][k] += y[k] * dw;
                        }
                        solid_angle[t] += dw;
                    }
                }
            }
        }
        Self { tile_size, basis, solid_angle }
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn basis(&self, texel: u32) -> &[f32; SH_COEFFS] {
        &self.basis[texel as usize]
    }

    pub fn solid_angle(&self, texel: u32) -> f32 {
        self.solid_angle[texel as usize]
    }

    /// Flattened `[Ω, ∫Y_0 … ∫Y_8]` per texel (10 floats), GPU upload layout.
    pub fn gpu_table(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.basis.len() * 10);
        for (b, w) in self.basis.iter().zip(&self.solid_angle) {
            out.push(*w);
            out.extend_from_slice(b);
        }
        out
    }
}

/// Weight sums below this produce a zero probe.
const MIN_WEIGHT: f32 = 1.0e-6;

/// Project one probe tile.
pub fn project_probe(atlas: &ProbeAtlas, meta: &MetaAtlas, probe: u32, table: &Sh9ProjectionTable) -> Sh9 {
    let mut acc = [Vec3::ZERO; SH_COEFFS];
    let mut weight = 0.0;
    for texel in 0..atlas.texels_per_tile() {
        let conf = meta.get(probe, texel).confidence;
        if !(conf > 0.0) {
            continue;
        }
        let radiance = atlas.get(probe, texel).radiance() * conf;
        let b = table.basis(texel);
        for k in 0..SH_COEFFS {
            acc[k] += radiance * b[k];
        }
        weight += conf * table.solid_angle(texel);
    }
    if weight < MIN_WEIGHT {
        return Sh9::ZERO;
    }
    let scale = 4.0 * PI / weight;
    Sh9 { coeffs: acc.map(|c| c * scale) }
}

/// Project every probe; invalid probes yield zero coefficients.
pub fn run_sh9_projection(
    atlas: &ProbeAtlas,
    meta: &MetaAtlas,
    anchors: &ProbeAnchors,
    table: &Sh9ProjectionTable,
    out: &mut Vec<Sh9>,
) {
    out.clear();
    out.extend((0..atlas.probe_count()).map(|probe| {
        if anchors.get(probe).is_valid() {
            project_probe(atlas, meta, probe, table)
        } else {
            Sh9::ZERO
        }
    }));
}

/// Pack all probes into seven planes of `probe_count` texels each.
pub fn pack_planes(probes: &[Sh9]) -> [Vec<[f16; 4]>; SH_PLANES] {
    let mut planes: [Vec<[f16; 4]>; SH_PLANES] = Default::default();
    for sh in probes {
        let packed = sh.pack();
        for (plane, texel) in planes.iter_mut().zip(packed) {
            plane.push(texel);
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::atlas::{MetaTexel, RadianceTexel};
    use crate::gi::math::tile_texel_direction;

    fn constant_atlas(tile: u32, radiance: Vec3) -> (ProbeAtlas, MetaAtlas) {
        (
            ProbeAtlas::new(tile, 1, RadianceTexel::new(radiance, 4.0)),
            MetaAtlas::new(tile, 1, MetaTexel::new(1.0, 0)),
        )
    }

    #[test]
    fn test_table_solid_angles_cover_sphere() {
        let table = Sh9ProjectionTable::new(8);
        let total: f32 = (0..64).map(|t| table.solid_angle(t)).sum();
        assert!((total - 4.0 * PI).abs() < 0.01, "{total}");
    }

    #[test]
    fn test_constant_radiance_projects_to_dc_only() {
        let l = Vec3::new(1.0, 0.5, 0.25);
        for tile in [4, 8] {
            let (atlas, meta) = constant_atlas(tile, l);
            let table = Sh9ProjectionTable::new(tile);
            let sh = project_probe(&atlas, &meta, 0, &table);
            let expected = l * Y00 * 4.0 * PI;
            assert!((sh.coeffs[0] - expected).abs().max_element() < 0.05, "{:?}", sh.coeffs[0]);
            for k in 1..SH_COEFFS {
                assert!(sh.coeffs[k].abs().max_element() < 0.1, "c{k} = {:?}", sh.coeffs[k]);
            }
            // Constant radiance is reproduced by the diffuse evaluation.
            assert!((sh.diffuse(Vec3::Y) - l).abs().max_element() < 0.01);
        }
    }

    #[test]
    fn test_partial_confidence_stays_unbiased() {
        let l = Vec3::splat(2.0);
        let (atlas, mut meta) = constant_atlas(8, l);
        for t in 0..32 {
            meta.set(0, t, MetaTexel::EMPTY);
        }
        let sh = project_probe(&atlas, &meta, 0, &Sh9ProjectionTable::new(8));
        assert!((sh.coeffs[0] - l * Y00 * 4.0 * PI).abs().max_element() < 0.05);
    }

    #[test]
    fn test_directional_signal_has_linear_band() {
        let tile = 8;
        let mut atlas = ProbeAtlas::new(tile, 1, RadianceTexel::ZERO);
        let meta = MetaAtlas::new(tile, 1, MetaTexel::new(1.0, 0));
        for ty in 0..tile {
            for tx in 0..tile {
                let d = tile_texel_direction(tx, ty, tile);
                atlas.set(0, ty * tile + tx, RadianceTexel::new(Vec3::splat(d.y.max(0.0)), 4.0));
            }
        }
        let sh = project_probe(&atlas, &meta, 0, &Sh9ProjectionTable::new(tile));
        assert!(sh.coeffs[1].x > 0.3);
        assert!(sh.irradiance(Vec3::Y).x > sh.irradiance(-Vec3::Y).x);
    }

    #[test]
    fn test_zero_confidence_probe_is_zero() {
        let (atlas, _) = constant_atlas(4, Vec3::ONE);
        let meta = MetaAtlas::new(4, 1, MetaTexel::EMPTY);
        let sh = project_probe(&atlas, &meta, 0, &Sh9ProjectionTable::new(4));
        assert_eq!(sh, Sh9::ZERO);
    }

    #[test]
    fn test_pack_layout() {
        let mut sh = Sh9::ZERO;
        for k in 0..SH_COEFFS {
            sh.coeffs[k] = Vec3::new(k as f32, k as f32 + 0.25, k as f32 + 0.5);
        }
        let planes = sh.pack();
        // c1.g lives at flat index 4: plane 1, channel 0.
        assert_eq!(planes[1][0].to_f32(), 1.25);
        assert_eq!(planes[6][3], f16::ZERO);
        assert_eq!(Sh9::unpack(&planes), sh);
    }
}
