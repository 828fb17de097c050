//! Mesh card generation from the occupancy volume.
//!
//! One card per (chunk, face direction) that has at least one exposed voxel
//! face pointing that way. Every exposed face becomes a quad (two triangles)
//! in the shared triangle list the capture pass rasterizes into the card's
//! page.
//!
//! The card plane sits on the outermost face layer of its chunk so the
//! captured signed distance is ≈0 for coplanar geometry and negative for
//! recessed faces.

use std::collections::BTreeMap;

use glam::{IVec3, Vec2, Vec3};

use super::dda::FACE_NORMALS;
use super::math::{hash_combine, pcg_hash};
use super::occupancy::OccupancyVolume;
use super::work_items::CardMeta;

/// Face directions per chunk slot; the virtual page index is `slot * 6 + face`.
pub const FACES_PER_CHUNK: u32 = 6;

/// Virtual page index of a (chunk slot, face) pair.
#[inline]
pub fn virtual_page_index(chunk_slot: u32, face: u32) -> u32 {
    chunk_slot * FACES_PER_CHUNK + face
}

/// World-space triangle.
pub type Triangle = [Vec3; 3];

/// Oriented planar proxy for one chunk face direction.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshCard {
    /// Stable identity derived from world chunk coordinate and face
    pub patch_id: u32,
    pub chunk_slot: u32,
    pub face: u32,
    pub virtual_page_index: u32,
    /// World-space corner at (u, v) = (0, 0) on the card plane
    pub origin: Vec3,
    pub axis_u: Vec3,
    pub axis_v: Vec3,
    pub normal: Vec3,
    pub extent_u: f32,
    pub extent_v: f32,
    /// Exposed faces as triangles (world space)
    pub triangles: Vec<Triangle>,
}

impl MeshCard {
    pub fn gpu_meta(&self) -> CardMeta {
        CardMeta::new(
            self.origin,
            self.axis_u,
            self.axis_v,
            self.normal,
            self.extent_u,
            self.extent_v,
            self.patch_id,
        )
    }
}

/// Tangent axes `(u, v)` for a face: the two other axes, positive direction.
pub fn face_axes(face: u32) -> (usize, usize, usize) {
    let n = (face / 2) as usize;
    (n, (n + 1) % 3, (n + 2) % 3)
}

fn unit(axis: usize) -> Vec3 {
    let mut v = Vec3::ZERO;
    v[axis] = 1.0;
    v
}

fn patch_id(chunk: IVec3, face: u32) -> u32 {
    let mut h = pcg_hash(face);
    h = hash_combine(h, chunk.x as u32);
    h = hash_combine(h, chunk.y as u32);
    hash_combine(h, chunk.z as u32)
}

/// Corners of the exposed face `face` of `cell`, counter-clockwise seen from
/// outside, in voxel units.
fn face_quad(cell: IVec3, face: u32) -> [Vec3; 4] {
    let (n, a, b) = face_axes(face);
    let positive = face % 2 == 0;
    let mut base = cell.as_vec3();
    if positive {
        base[n] += 1.0;
    }
    let ea = unit(a);
    let eb = unit(b);
    if positive {
        [base, base + ea, base + ea + eb, base + eb]
    } else {
        [base, base + eb, base + ea + eb, base + ea]
    }
}

#[derive(Default)]
struct CardAccum {
    chunk_slot: u32,
    plane: Option<f32>,
    min_uv: Vec2,
    max_uv: Vec2,
    triangles: Vec<Triangle>,
}

/// Build every card of the volume, sorted by virtual page index.
pub fn build_cards(volume: &OccupancyVolume) -> Vec<MeshCard> {
    let window = *volume.window();
    let voxel = window.voxel_size;
    let res = window.resolution.as_ivec3();
    let chunk = window.chunk_size as i32;
    let mut cards: BTreeMap<([i32; 3], u32), CardAccum> = BTreeMap::new();

    for z in 0..res.z {
        for y in 0..res.y {
            for x in 0..res.x {
                let world = window.origin + IVec3::new(x, y, z);
                let Some(cell) = volume.cell(world) else { continue };
                if !cell.is_occupied() {
                    continue;
                }
                for face in 0..FACES_PER_CHUNK {
                    let neighbour = world + FACE_NORMALS[face as usize];
                    let exposed = volume.cell(neighbour).map(|c| !c.is_occupied()).unwrap_or(true);
                    if !exposed {
                        continue;
                    }
                    let chunk_coord = world.div_euclid(IVec3::splat(chunk));
                    let (n, a, b) = face_axes(face);
                    let quad = face_quad(world, face).map(|c| c * voxel);
                    let plane = quad[0][n];
                    let uv_min = Vec2::new(quad[0][a].min(quad[2][a]), quad[0][b].min(quad[2][b]));
                    let uv_max = Vec2::new(quad[0][a].max(quad[2][a]), quad[0][b].max(quad[2][b]));

                    let acc = cards.entry((chunk_coord.to_array(), face)).or_insert_with(|| {
                        let storage = window
                            .storage_coord(world)
                            .unwrap_or_default();
                        CardAccum {
                            chunk_slot: window.chunk_slot(storage),
                            min_uv: Vec2::splat(f32::MAX),
                            max_uv: Vec2::splat(f32::MIN),
                            ..Default::default()
                        }
                    });
                    // Outermost layer along the face normal.
                    acc.plane = Some(match acc.plane {
                        None => plane,
                        Some(p) if face % 2 == 0 => p.max(plane),
                        Some(p) => p.min(plane),
                    });
                    acc.min_uv = acc.min_uv.min(uv_min);
                    acc.max_uv = acc.max_uv.max(uv_max);
                    acc.triangles.push([quad[0], quad[1], quad[2]]);
                    acc.triangles.push([quad[0], quad[2], quad[3]]);
                }
            }
        }
    }

    let mut out: Vec<MeshCard> = cards
        .into_iter()
        .filter_map(|((chunk_coord, face), acc)| {
            let plane = acc.plane?;
            let (n, a, b) = face_axes(face);
            let mut origin = Vec3::ZERO;
            origin[n] = plane;
            origin[a] = acc.min_uv.x;
            origin[b] = acc.min_uv.y;
            let extent = acc.max_uv - acc.min_uv;
            Some(MeshCard {
                patch_id: patch_id(IVec3::from_array(chunk_coord), face),
                chunk_slot: acc.chunk_slot,
                face,
                virtual_page_index: virtual_page_index(acc.chunk_slot, face),
                origin,
                axis_u: unit(a),
                axis_v: unit(b),
                normal: FACE_NORMALS[face as usize].as_vec3(),
                extent_u: extent.x,
                extent_v: extent.y,
                triangles: acc.triangles,
            })
        })
        .collect();
    out.sort_by_key(|c| c.virtual_page_index);
    log::debug!("[CardBuilder] Built {} cards", out.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gi::occupancy::{OccupancyCell, VolumeWindow};
    use glam::UVec3;

    fn floor_volume() -> OccupancyVolume {
        let window = VolumeWindow::new(IVec3::ZERO, UVec3::splat(8), 1.0, 8);
        let mut vol = OccupancyVolume::new(window);
        vol.fill_box(IVec3::new(0, 0, 0), IVec3::new(7, 0, 7), OccupancyCell::new(1, 0, 0, 0));
        vol
    }

    #[test]
    fn test_floor_produces_up_card_on_surface() {
        let cards = build_cards(&floor_volume());
        let up = cards.iter().find(|c| c.face == 2).expect("+Y card");
        assert_eq!(up.normal, Vec3::Y);
        assert_eq!(up.origin.y, 1.0);
        assert_eq!((up.extent_u, up.extent_v), (8.0, 8.0));
        assert_eq!(up.triangles.len(), 8 * 8 * 2);
        // Every triangle lies in the card plane.
        let meta = up.gpu_meta();
        for tri in &up.triangles {
            for v in tri {
                assert_eq!(meta.project(*v).1, 0.0);
            }
        }
    }

    #[test]
    fn test_virtual_index_and_uniqueness() {
        let cards = build_cards(&floor_volume());
        let mut ids: Vec<u32> = cards.iter().map(|c| c.virtual_page_index).collect();
        ids.dedup();
        assert_eq!(ids.len(), cards.len());
        for c in &cards {
            assert_eq!(c.virtual_page_index, c.chunk_slot * 6 + c.face);
        }
    }

    #[test]
    fn test_face_quad_winding_matches_normal() {
        for face in 0..6 {
            let q = face_quad(IVec3::ZERO, face);
            let n = (q[1] - q[0]).cross(q[2] - q[0]).normalize();
            assert_eq!(n, FACE_NORMALS[face as usize].as_vec3(), "face {face}");
        }
    }

    #[test]
    fn test_texel_mapping_round_trip() {
        let cards = build_cards(&floor_volume());
        let up = cards.iter().find(|c| c.face == 2).unwrap();
        let meta = up.gpu_meta();
        let p = meta.texel_center(5, 9, 16);
        assert_eq!(meta.texel_of(p, 16), Some((5, 9)));
        assert_eq!(meta.texel_of(Vec3::new(-1.0, 1.0, 0.0), 16), None);
    }
}
