//! Voxel DDA ray marcher (Amanatides & Woo) over the occupancy volume.
//!
//! Marching happens in voxel units; distances are reported in world units.
//! A ray whose origin lies outside the window never touches storage and is
//! reported as [`TraceOutcome::OutOfBoundsStart`], which callers shade as a
//! miss.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec3, Vec3};

use super::occupancy::{OccupancyCell, OccupancyVolume};

/// Face normals indexed by face id: +X, -X, +Y, -Y, +Z, -Z.
pub const FACE_NORMALS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

/// Face id for the face whose outward normal opposes a step along `axis`.
#[inline]
fn entry_face(axis: usize, step: i32) -> u32 {
    // Stepping +X enters the cell through its -X face.
    (axis as u32) * 2 + if step > 0 { 1 } else { 0 }
}

/// Face id of an axis-aligned unit normal, `None` for anything else.
pub fn face_of_normal(n: Vec3) -> Option<u32> {
    FACE_NORMALS
        .iter()
        .position(|f| (f.as_vec3() - n).length_squared() < 1.0e-6)
        .map(|i| i as u32)
}

/// Hit record of a traced ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceHit {
    /// World-space distance from the origin to the entry point
    pub distance: f32,
    /// World cell that stopped the ray
    pub world_cell: IVec3,
    pub cell: OccupancyCell,
    /// Last empty cell visited before the hit (`None` if the ray started inside)
    pub previous: Option<OccupancyCell>,
    /// Entered face, index into [`FACE_NORMALS`]
    pub face: u32,
}

impl TraceHit {
    /// World-space point where the ray entered the hit cell.
    pub fn position(&self, origin: Vec3, dir: Vec3) -> Vec3 {
        origin + dir * self.distance
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TraceOutcome {
    Hit(TraceHit),
    /// Left the volume or ran out of steps
    Miss { distance: f32 },
    /// Origin was outside the volume; nothing was read
    OutOfBoundsStart,
}

impl TraceOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, TraceOutcome::Hit(_))
    }
}

/// Optional atomic counters `{rays, hits, misses, out_of_bounds_starts}`.
///
/// Mirrors the 4×u32 storage buffer on the GPU; increments are skipped
/// entirely unless enabled.
#[derive(Debug, Default)]
pub struct DebugCounters {
    enabled: bool,
    slots: [AtomicU32; 4],
}

/// Plain snapshot of [`DebugCounters`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub rays: u32,
    pub hits: u32,
    pub misses: u32,
    pub out_of_bounds_starts: u32,
}

impl DebugCounters {
    pub const RAYS: usize = 0;
    pub const HITS: usize = 1;
    pub const MISSES: usize = 2;
    pub const OUT_OF_BOUNDS_STARTS: usize = 3;

    pub fn new(enabled: bool) -> Self {
        Self { enabled, slots: Default::default() }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn record(&self, outcome: &TraceOutcome) {
        if !self.enabled {
            return;
        }
        self.slots[Self::RAYS].fetch_add(1, Ordering::Relaxed);
        let slot = match outcome {
            TraceOutcome::Hit(_) => Self::HITS,
            TraceOutcome::Miss { .. } => Self::MISSES,
            TraceOutcome::OutOfBoundsStart => Self::OUT_OF_BOUNDS_STARTS,
        };
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            rays: self.slots[Self::RAYS].load(Ordering::Relaxed),
            hits: self.slots[Self::HITS].load(Ordering::Relaxed),
            misses: self.slots[Self::MISSES].load(Ordering::Relaxed),
            out_of_bounds_starts: self.slots[Self::OUT_OF_BOUNDS_STARTS].load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

/// March `dir` from `origin` (world units) for at most `max_steps` cells.
pub fn trace_ray(
    volume: &OccupancyVolume,
    origin: Vec3,
    dir: Vec3,
    max_steps: u32,
    counters: Option<&DebugCounters>,
) -> TraceOutcome {
    let outcome = march(volume, origin, dir, max_steps);
    if let Some(c) = counters {
        c.record(&outcome);
    }
    outcome
}

fn march(volume: &OccupancyVolume, origin: Vec3, dir: Vec3, max_steps: u32) -> TraceOutcome {
    let window = volume.window();
    let voxel = window.voxel_size;

    if !origin.is_finite() || !dir.is_finite() || dir.length_squared() < 1.0e-12 {
        return TraceOutcome::OutOfBoundsStart;
    }
    let dir = dir.normalize();
    let p = origin / voxel;
    let mut cell = p.floor().as_ivec3();

    let Some(start) = volume.cell(cell) else {
        return TraceOutcome::OutOfBoundsStart;
    };
    if start.is_occupied() {
        let a = dir.abs();
        let axis = if a.x >= a.y && a.x >= a.z { 0 } else if a.y >= a.z { 1 } else { 2 };
        let step = if dir[axis] >= 0.0 { 1 } else { -1 };
        return TraceOutcome::Hit(TraceHit {
            distance: 0.0,
            world_cell: cell,
            cell: start,
            previous: None,
            face: entry_face(axis, step),
        });
    }

    let step = IVec3::new(
        if dir.x >= 0.0 { 1 } else { -1 },
        if dir.y >= 0.0 { 1 } else { -1 },
        if dir.z >= 0.0 { 1 } else { -1 },
    );
    let mut t_max = Vec3::ZERO;
    let mut t_delta = Vec3::ZERO;
    for axis in 0..3 {
        if dir[axis].abs() < 1.0e-8 {
            t_max[axis] = f32::INFINITY;
            t_delta[axis] = f32::INFINITY;
        } else {
            let boundary = if step[axis] > 0 { cell[axis] as f32 + 1.0 } else { cell[axis] as f32 };
            t_max[axis] = (boundary - p[axis]) / dir[axis];
            t_delta[axis] = 1.0 / dir[axis].abs();
        }
    }

    let mut previous = start;
    let mut t = 0.0;
    for _ in 0..max_steps {
        let axis = if t_max.x < t_max.y {
            if t_max.x < t_max.z { 0 } else { 2 }
        } else if t_max.y < t_max.z {
            1
        } else {
            2
        };
        t = t_max[axis];
        t_max[axis] += t_delta[axis];
        cell[axis] += step[axis];

        let Some(c) = volume.cell(cell) else {
            return TraceOutcome::Miss { distance: t * voxel };
        };
        if c.is_occupied() {
            return TraceOutcome::Hit(TraceHit {
                distance: t * voxel,
                world_cell: cell,
                cell: c,
                previous: Some(previous),
                face: entry_face(axis, step[axis]),
            });
        }
        previous = c;
    }
    TraceOutcome::Miss { distance: t * voxel }
}
