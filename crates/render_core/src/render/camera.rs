//! Camera projection and view matrices
//!
//! Projections target Vulkan clip space: depth in [0, 1] and y pointing
//! down, so no extra coordinate flip is needed before upload. View matrices
//! are built from an orthonormal basis (`u` right, `v` down, `w` forward) and
//! the inverse is kept alongside for lighting in world space.

use crate::foundation::math::{Mat4, Vec3};

/// Projection plus view transform of the active viewpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    projection: Mat4,
    view: Mat4,
    inverse_view: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: Mat4::identity(),
            view: Mat4::identity(),
            inverse_view: Mat4::identity(),
        }
    }
}

impl Camera {
    /// Camera with identity matrices
    pub fn new() -> Self {
        Self::default()
    }

    /// Perspective camera at `position` looking at `target`, with -y as up
    pub fn perspective(position: Vec3, target: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self::new();
        camera.set_perspective_projection(fov_y, aspect, near, far);
        camera.set_view_target(position, target, Vec3::new(0.0, -1.0, 0.0));
        camera
    }

    /// Orthographic box mapping [left, right] x [top, bottom] x [near, far] to clip space
    pub fn set_orthographic_projection(
        &mut self,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) {
        let mut projection = Mat4::identity();
        projection[(0, 0)] = 2.0 / (right - left);
        projection[(1, 1)] = 2.0 / (bottom - top);
        projection[(2, 2)] = 1.0 / (far - near);
        projection[(0, 3)] = -(right + left) / (right - left);
        projection[(1, 3)] = -(bottom + top) / (bottom - top);
        projection[(2, 3)] = -near / (far - near);
        self.projection = projection;
    }

    /// Perspective frustum; `fov_y` in radians
    pub fn set_perspective_projection(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        let tan_half_fov_y = (fov_y / 2.0).tan();
        let mut projection = Mat4::zeros();
        projection[(0, 0)] = 1.0 / (aspect * tan_half_fov_y);
        projection[(1, 1)] = 1.0 / tan_half_fov_y;
        projection[(2, 2)] = far / (far - near);
        projection[(3, 2)] = 1.0;
        projection[(2, 3)] = -(far * near) / (far - near);
        self.projection = projection;
    }

    /// Look from `position` along `direction`
    ///
    /// A zero direction or one parallel to `up` leaves the view unchanged.
    pub fn set_view_direction(&mut self, position: Vec3, direction: Vec3, up: Vec3) {
        let Some(w) = direction.try_normalize(f32::EPSILON) else {
            log::warn!("Camera view direction is zero, view unchanged");
            return;
        };
        let Some(u) = w.cross(&up).try_normalize(f32::EPSILON) else {
            log::warn!("Camera view direction is parallel to up, view unchanged");
            return;
        };
        let v = w.cross(&u);
        self.set_view_basis(u, v, w, position);
    }

    /// Look from `position` at `target`
    pub fn set_view_target(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.set_view_direction(position, target - position, up);
    }

    /// Look from `position` with Tait-Bryan angles applied in Y, X, Z order
    pub fn set_view_yxz(&mut self, position: Vec3, rotation: Vec3) {
        let (s3, c3) = rotation.z.sin_cos();
        let (s2, c2) = rotation.x.sin_cos();
        let (s1, c1) = rotation.y.sin_cos();
        let u = Vec3::new(c1 * c3 + s1 * s2 * s3, c2 * s3, c1 * s2 * s3 - c3 * s1);
        let v = Vec3::new(c3 * s1 * s2 - c1 * s3, c2 * c3, c1 * c3 * s2 + s1 * s3);
        let w = Vec3::new(c2 * s1, -s2, c1 * c2);
        self.set_view_basis(u, v, w, position);
    }

    fn set_view_basis(&mut self, u: Vec3, v: Vec3, w: Vec3, position: Vec3) {
        #[rustfmt::skip]
        let view = Mat4::new(
            u.x, u.y, u.z, -u.dot(&position),
            v.x, v.y, v.z, -v.dot(&position),
            w.x, w.y, w.z, -w.dot(&position),
            0.0, 0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let inverse_view = Mat4::new(
            u.x, v.x, w.x, position.x,
            u.y, v.y, w.y, position.y,
            u.z, v.z, w.z, position.z,
            0.0, 0.0, 0.0, 1.0,
        );
        self.view = view;
        self.inverse_view = inverse_view;
        log::trace!("Camera view updated, position {position:?}");
    }

    /// Projection matrix
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }

    /// World to view matrix
    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    /// View to world matrix
    pub fn inverse_view(&self) -> &Mat4 {
        &self.inverse_view
    }

    /// Projection times view
    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World-space camera position
    pub fn position(&self) -> Vec3 {
        self.inverse_view.fixed_view::<3, 1>(0, 3).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    fn project(camera: &Camera, point: Vec3) -> Vec3 {
        let clip = camera.projection_view() * Vec4::new(point.x, point.y, point.z, 1.0);
        clip.xyz() / clip.w
    }

    #[test]
    fn test_perspective_depth_range() {
        let mut camera = Camera::new();
        camera.set_perspective_projection(FRAC_PI_2, 1.0, 0.1, 100.0);

        assert_relative_eq!(project(&camera, Vec3::new(0.0, 0.0, 0.1)).z, 0.0, epsilon = 1e-5);
        assert_relative_eq!(project(&camera, Vec3::new(0.0, 0.0, 100.0)).z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_maps_box_to_clip_space() {
        let mut camera = Camera::new();
        camera.set_orthographic_projection(-2.0, 2.0, -1.0, 1.0, 0.0, 10.0);

        assert_relative_eq!(
            project(&camera, Vec3::new(2.0, 1.0, 10.0)),
            Vec3::new(1.0, 1.0, 1.0),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            project(&camera, Vec3::new(-2.0, -1.0, 0.0)),
            Vec3::new(-1.0, -1.0, 0.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_view_target_puts_target_ahead() {
        let mut camera = Camera::new();
        let position = Vec3::new(0.0, 0.0, -5.0);
        camera.set_view_target(position, Vec3::zeros(), Vec3::new(0.0, -1.0, 0.0));

        let eye = camera.view() * Vec4::new(position.x, position.y, position.z, 1.0);
        assert_relative_eq!(eye.xyz(), Vec3::zeros(), epsilon = 1e-6);

        let target = camera.view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target.xyz(), Vec3::new(0.0, 0.0, 5.0), epsilon = 1e-6);
        assert_relative_eq!(camera.position(), position, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_view_inverts_view() {
        let mut camera = Camera::new();
        camera.set_view_yxz(Vec3::new(1.0, -2.0, 3.0), Vec3::new(0.3, -1.1, 0.4));
        assert_relative_eq!(
            camera.inverse_view() * camera.view(),
            Mat4::identity(),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_yxz_without_rotation_matches_forward_direction() {
        let mut by_angles = Camera::new();
        by_angles.set_view_yxz(Vec3::new(0.0, 0.0, -2.0), Vec3::zeros());

        let mut by_direction = Camera::new();
        by_direction.set_view_direction(
            Vec3::new(0.0, 0.0, -2.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, -1.0, 0.0),
        );
        assert_relative_eq!(by_angles.view(), by_direction.view(), epsilon = 1e-6);
    }

    #[test]
    fn test_zero_direction_keeps_view() {
        let mut camera = Camera::new();
        camera.set_view_direction(Vec3::new(1.0, 1.0, 1.0), Vec3::zeros(), Vec3::y());
        assert_eq!(camera.view(), &Mat4::identity());
    }
}
