//! Flat 2D image planes and camera matrices used by the CPU passes.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Row-major 2D arena of texels.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePlane<T> {
    width: u32,
    height: u32,
    texels: Vec<T>,
}

impl<T: Copy> ImagePlane<T> {
    /// Create a plane filled with `value`.
    pub fn new(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            texels: vec![value; (width as usize) * (height as usize)],
        }
    }

    /// Build a plane from `f(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut texels = Vec::with_capacity((width as usize) * (height as usize));
        for y in 0..height {
            for x in 0..width {
                texels.push(f(x, y));
            }
        }
        Self { width, height, texels }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn texels(&self) -> &[T] {
        &self.texels
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.texels[self.index(x, y)]
    }

    /// Fetch with coordinates clamped to the plane edges.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> T {
        let cx = x.clamp(0, self.width as i64 - 1) as u32;
        let cy = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(cx, cy)
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let i = self.index(x, y);
        self.texels[i] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.texels.fill(value);
    }
}

/// View/projection matrices and their inverses for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub proj: Mat4,
    pub inv_view: Mat4,
    pub inv_proj: Mat4,
}

impl CameraMatrices {
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
        }
    }

    /// Right-handed look-at camera with a `[0, 1]` depth perspective.
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y, aspect, near, far);
        Self::new(view, proj)
    }

    /// View-space position for a screen UV in `[0, 1]²` (y down) and depth.
    pub fn view_position(&self, uv: Vec2, depth: f32) -> Vec3 {
        let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
        let v = self.inv_proj * ndc;
        if v.w.abs() <= f32::EPSILON {
            return Vec3::ZERO;
        }
        v.truncate() / v.w
    }

    /// World-space position: `invView · (invProjection · NDC(u, v, depth))`.
    pub fn world_position(&self, uv: Vec2, depth: f32) -> Vec3 {
        let view_pos = self.view_position(uv, depth);
        self.inv_view.transform_point3(view_pos)
    }

    /// Distance in front of the camera (positive) for a world position.
    pub fn view_depth(&self, world: Vec3) -> f32 {
        -self.view.transform_point3(world).z
    }

    /// Camera position in world space.
    pub fn eye(&self) -> Vec3 {
        self.inv_view.transform_point3(Vec3::ZERO)
    }

    /// Project a world position to depth-buffer space `(uv, depth)`.
    pub fn project(&self, world: Vec3) -> Option<(Vec2, f32)> {
        let clip = self.proj * self.view * world.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some((Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5), ndc.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_clamped_fetch() {
        let plane = ImagePlane::from_fn(4, 3, |x, y| x + y * 10);
        assert_eq!(plane.get(2, 1), 12);
        assert_eq!(plane.get_clamped(-5, 1), 10);
        assert_eq!(plane.get_clamped(9, 9), 23);
    }

    #[test]
    fn test_reconstruct_projected_point() {
        let cam = CameraMatrices::look_at(
            Vec3::new(0.0, 2.0, 6.0),
            Vec3::ZERO,
            60f32.to_radians(),
            16.0 / 9.0,
            0.1,
            200.0,
        );
        let world = Vec3::new(1.0, 0.5, -2.0);
        let (uv, depth) = cam.project(world).unwrap();
        let back = cam.world_position(uv, depth);
        assert!((back - world).length() < 1e-3, "{back:?}");
        assert!(cam.view_depth(world) > 0.0);
        assert!((cam.eye() - Vec3::new(0.0, 2.0, 6.0)).length() < 1e-4);
    }
}
