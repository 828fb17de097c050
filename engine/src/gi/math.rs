//! Shared GI math: octahedral mapping, normal/hit-distance encoding and the
//! versioned per-ray hash.
//!
//! Every function here has a WGSL twin in `engine/shaders/gi_common.wgsl`.
//! Keep the two in lockstep; the CPU reference passes and the compute shaders
//! must agree on directions, encodings and random streams.

use glam::{Vec2, Vec3};

/// Version tag folded into every ray seed. Bump when the hash or its input
/// order changes so cached/golden results can be invalidated deliberately.
pub const RAY_HASH_VERSION: u32 = 1;

/// Decoded normals shorter than this (before normalization) are degenerate.
pub const NORMAL_EPSILON: f32 = 1.0e-4;

/// Depth values at or above this are treated as sky.
pub const SKY_DEPTH: f32 = 0.9999;

/// Number of steps used by the 8-bit normal encoding. Using 254 instead of 255
/// puts 0.0 exactly on a code (127), so axis-aligned normals decode exactly.
const NORMAL_U8_STEPS: f32 = 254.0;

#[inline]
fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 { 1.0 } else { -1.0 }
}

// ============================================================================
// Octahedral mapping
// ============================================================================

/// Map a unit direction to octahedral coordinates in `[0, 1]²`.
pub fn octahedral_encode(dir: Vec3) -> Vec2 {
    let l1 = dir.x.abs() + dir.y.abs() + dir.z.abs();
    if l1 <= f32::EPSILON {
        return Vec2::splat(0.5);
    }
    let mut p = Vec2::new(dir.x, dir.y) / l1;
    if dir.z < 0.0 {
        p = Vec2::new(
            (1.0 - p.y.abs()) * sign_not_zero(p.x),
            (1.0 - p.x.abs()) * sign_not_zero(p.y),
        );
    }
    p * 0.5 + Vec2::splat(0.5)
}

/// Unnormalized point on the unit octahedron (`|x| + |y| + |z| = 1`) for
/// octahedral coordinates in `[0, 1]²`.
pub fn octahedral_point(uv: Vec2) -> Vec3 {
    let f = uv * 2.0 - Vec2::ONE;
    let z = 1.0 - f.x.abs() - f.y.abs();
    if z < 0.0 {
        Vec3::new(
            (1.0 - f.y.abs()) * sign_not_zero(f.x),
            (1.0 - f.x.abs()) * sign_not_zero(f.y),
            z,
        )
    } else {
        Vec3::new(f.x, f.y, z)
    }
}

/// Unit direction for octahedral coordinates in `[0, 1]²`.
#[inline]
pub fn octahedral_decode(uv: Vec2) -> Vec3 {
    octahedral_point(uv).normalize()
}

/// Direction through the center of texel `(tx, ty)` of a `tile`×`tile` tile.
#[inline]
pub fn tile_texel_direction(tx: u32, ty: u32, tile: u32) -> Vec3 {
    let uv = Vec2::new(
        (tx as f32 + 0.5) / tile as f32,
        (ty as f32 + 0.5) / tile as f32,
    );
    octahedral_decode(uv)
}

/// Texel coordinate inside a tile for a direction (nearest texel).
pub fn direction_to_tile_texel(dir: Vec3, tile: u32) -> (u32, u32) {
    let uv = octahedral_encode(dir);
    let max = tile.saturating_sub(1) as f32;
    let tx = (uv.x * tile as f32).floor().clamp(0.0, max) as u32;
    let ty = (uv.y * tile as f32).floor().clamp(0.0, max) as u32;
    (tx, ty)
}

/// Differential solid angle of an octahedral-map area element.
///
/// `area` is measured in the `[-1, 1]²` parameterization. For a point `p` on
/// the unit octahedron the mapping `p / |p|` scales area by `1 / |p|³`.
#[inline]
pub fn octahedral_solid_angle(point: Vec3, area: f32) -> f32 {
    let len = point.length();
    area / (len * len * len)
}

// ============================================================================
// Encodings
// ============================================================================

/// `[-1, 1]` normal to `[0, 1]` storage (RGBA16F outputs).
#[inline]
pub fn encode_normal_unorm(n: Vec3) -> Vec3 {
    n * 0.5 + Vec3::splat(0.5)
}

/// `[0, 1]` storage back to `[-1, 1]` without normalizing.
#[inline]
pub fn decode_normal_unorm(e: Vec3) -> Vec3 {
    e * 2.0 - Vec3::ONE
}

/// Encode a normal into three bytes for the material atlas.
pub fn encode_normal_u8(n: Vec3) -> [u8; 3] {
    let e = encode_normal_unorm(n.clamp(Vec3::splat(-1.0), Vec3::ONE));
    [
        (e.x * NORMAL_U8_STEPS).round() as u8,
        (e.y * NORMAL_U8_STEPS).round() as u8,
        (e.z * NORMAL_U8_STEPS).round() as u8,
    ]
}

/// Decode a material-atlas normal (not renormalized).
pub fn decode_normal_u8(c: [u8; 3]) -> Vec3 {
    let e = Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32) / NORMAL_U8_STEPS;
    decode_normal_unorm(e)
}

/// Decode a `[0, 1]` normal and normalize it, rejecting degenerate input.
///
/// Returns `None` when the decoded vector is shorter than [`NORMAL_EPSILON`],
/// so callers never normalize a zero vector.
pub fn decode_normal_checked(encoded: Vec3) -> Option<Vec3> {
    let n = decode_normal_unorm(encoded);
    let len = n.length();
    if !len.is_finite() || len < NORMAL_EPSILON {
        return None;
    }
    Some(n / len)
}

/// log1p hit-distance encoding for the radiance atlas alpha channel.
///
/// Negative and non-finite distances clamp to zero before encoding.
#[inline]
pub fn encode_hit_distance(distance: f32) -> f32 {
    let d = if distance.is_finite() { distance.max(0.0) } else { 0.0 };
    d.ln_1p()
}

/// Inverse of [`encode_hit_distance`].
#[inline]
pub fn decode_hit_distance(encoded: f32) -> f32 {
    if encoded.is_finite() { encoded.max(0.0).exp_m1() } else { 0.0 }
}

/// Replace non-finite components with zero.
#[inline]
pub fn sanitize(v: Vec3) -> Vec3 {
    Vec3::new(
        if v.x.is_finite() { v.x } else { 0.0 },
        if v.y.is_finite() { v.y } else { 0.0 },
        if v.z.is_finite() { v.z } else { 0.0 },
    )
}

#[inline]
pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

// ============================================================================
// Hashing / sampling
// ============================================================================

/// PCG-style 32-bit permutation.
#[inline]
pub fn pcg_hash(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

#[inline]
pub fn hash_combine(seed: u32, v: u32) -> u32 {
    pcg_hash(seed ^ v.wrapping_add(0x9e37_79b9).wrapping_add(seed << 6).wrapping_add(seed >> 2))
}

/// Seed for one ray: `(key, frame, texel, ray)` where `key` is the patch id
/// for surface-cache rays and the probe index for probe rays.
pub fn ray_seed(key: u32, frame: u32, texel: u32, ray: u32) -> u32 {
    let mut h = pcg_hash(RAY_HASH_VERSION);
    h = hash_combine(h, key);
    h = hash_combine(h, frame);
    h = hash_combine(h, texel);
    hash_combine(h, ray)
}

/// Small deterministic stream on top of [`pcg_hash`].
#[derive(Clone, Copy, Debug)]
pub struct HashRng {
    state: u32,
}

impl HashRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.state = pcg_hash(self.state);
        self.state
    }

    /// Uniform float in `[0, 1)`.
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16_777_216.0
    }
}

/// Orthonormal basis around a unit vector (Duff et al. 2017).
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = if n.z >= 0.0 { 1.0 } else { -1.0 };
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let t = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bt = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (t, bt)
}

/// Cosine-weighted direction in the hemisphere around `n`.
pub fn cosine_hemisphere(n: Vec3, u1: f32, u2: f32) -> Vec3 {
    let r = u1.sqrt();
    let phi = std::f32::consts::TAU * u2;
    let (t, bt) = orthonormal_basis(n);
    let local = Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u1).max(0.0).sqrt());
    (t * local.x + bt * local.y + n * local.z).normalize_or(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_octahedral_round_trip_axes() {
        for dir in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z] {
            let back = octahedral_decode(octahedral_encode(dir));
            assert!((back - dir).length() < 1e-5, "{dir:?} -> {back:?}");
        }
    }

    #[test]
    fn test_octahedral_round_trip_diagonals() {
        let dirs = [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 0.5, -0.3),
            Vec3::new(0.2, -0.9, -0.1),
            Vec3::new(-0.7, -0.7, 0.1),
        ];
        for d in dirs {
            let dir = d.normalize();
            let back = octahedral_decode(octahedral_encode(dir));
            assert!((back - dir).length() < 1e-5);
        }
    }

    #[test]
    fn test_octahedral_point_on_unit_octahedron() {
        for i in 0..16 {
            for j in 0..16 {
                let uv = Vec2::new((i as f32 + 0.5) / 16.0, (j as f32 + 0.5) / 16.0);
                let p = octahedral_point(uv);
                assert!((p.x.abs() + p.y.abs() + p.z.abs() - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_octahedral_solid_angle_sums_to_sphere() {
        let n = 64;
        let area = (2.0 / n as f32) * (2.0 / n as f32);
        let mut total = 0.0;
        for i in 0..n {
            for j in 0..n {
                let uv = Vec2::new((i as f32 + 0.5) / n as f32, (j as f32 + 0.5) / n as f32);
                total += octahedral_solid_angle(octahedral_point(uv), area);
            }
        }
        let sphere = 4.0 * std::f32::consts::PI;
        assert!((total - sphere).abs() / sphere < 0.01, "total {total}");
    }

    #[test]
    fn test_direction_to_tile_texel_matches_center() {
        let tile = 8;
        for ty in 0..tile {
            for tx in 0..tile {
                let dir = tile_texel_direction(tx, ty, tile);
                assert_eq!(direction_to_tile_texel(dir, tile), (tx, ty));
            }
        }
    }

    #[test]
    fn test_normal_u8_axis_aligned_exact() {
        for n in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z] {
            assert_eq!(decode_normal_u8(encode_normal_u8(n)), n);
        }
    }

    #[test]
    fn test_decode_normal_checked_rejects_zero() {
        // (0.5, 0.5, 0.5) decodes to the zero vector.
        assert!(decode_normal_checked(Vec3::splat(0.5)).is_none());
        let n = decode_normal_checked(Vec3::new(0.5, 1.0, 0.5)).unwrap();
        assert!((n - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_hit_distance_encoding() {
        assert_eq!(encode_hit_distance(0.0), 0.0);
        assert_eq!(encode_hit_distance(-3.0), 0.0);
        assert_eq!(encode_hit_distance(f32::NAN), 0.0);
        assert_eq!(encode_hit_distance(f32::INFINITY), 0.0);
        let d = 12.5;
        assert!((decode_hit_distance(encode_hit_distance(d)) - d).abs() < 1e-4);
    }

    #[test]
    fn test_ray_seed_deterministic_and_spread() {
        assert_eq!(ray_seed(3, 10, 7, 0), ray_seed(3, 10, 7, 0));
        assert_ne!(ray_seed(3, 10, 7, 0), ray_seed(3, 11, 7, 0));
        assert_ne!(ray_seed(3, 10, 7, 0), ray_seed(4, 10, 7, 0));
        assert_ne!(ray_seed(3, 10, 7, 0), ray_seed(3, 10, 8, 0));
    }

    #[test]
    fn test_cosine_hemisphere_stays_above_surface() {
        let n = Vec3::new(0.3, -0.8, 0.52).normalize();
        let mut rng = HashRng::new(ray_seed(1, 2, 3, 4));
        for _ in 0..256 {
            let d = cosine_hemisphere(n, rng.next_f32(), rng.next_f32());
            assert!((d.length() - 1.0).abs() < 1e-4);
            assert!(d.dot(n) >= -1e-4);
        }
    }

    #[test]
    fn test_orthonormal_basis_negative_z() {
        let (t, b) = orthonormal_basis(-Vec3::Z);
        assert!(t.dot(-Vec3::Z).abs() < 1e-6);
        assert!(b.dot(-Vec3::Z).abs() < 1e-6);
        assert!(t.dot(b).abs() < 1e-6);
    }
}
