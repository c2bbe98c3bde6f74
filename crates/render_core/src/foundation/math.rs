//! Math utilities and types
//!
//! nalgebra aliases for the renderer plus the object transform pushed to
//! shaders every draw.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Position, Tait-Bryan rotation and scale of a drawable object
///
/// Rotation is applied in Y (yaw), X (pitch), Z (roll) order, matching the
/// camera's `set_view_yxz`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Translation
    pub translation: Vec3,
    /// Rotation angles in radians (x = pitch, y = yaw, z = roll)
    pub rotation: Vec3,
    /// Per-axis scale
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::zeros(),
            rotation: Vec3::zeros(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with only a translation
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Rotation matrix for the YXZ angles
    pub fn rotation_matrix(&self) -> Mat3 {
        let yaw = nalgebra::Rotation3::from_axis_angle(&Vec3::y_axis(), self.rotation.y);
        let pitch = nalgebra::Rotation3::from_axis_angle(&Vec3::x_axis(), self.rotation.x);
        let roll = nalgebra::Rotation3::from_axis_angle(&Vec3::z_axis(), self.rotation.z);
        (yaw * pitch * roll).into_inner()
    }

    /// Model matrix: translate * rotate(YXZ) * scale
    pub fn to_matrix(&self) -> Mat4 {
        let rotation = self.rotation_matrix().to_homogeneous();
        Mat4::new_translation(&self.translation)
            * rotation
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Inverse-transpose of the model matrix for transforming normals
    ///
    /// Computed analytically: `R * S^-1`, so a zero scale component yields
    /// infinities rather than a panic.
    pub fn normal_matrix(&self) -> Mat3 {
        let inverse_scale = Vec3::new(1.0 / self.scale.x, 1.0 / self.scale.y, 1.0 / self.scale.z);
        self.rotation_matrix() * Mat3::from_diagonal(&inverse_scale)
    }
}

/// Column-major array form of a 4x4 matrix, as GPU uniform layouts expect
pub fn mat4_to_cols(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}

/// Column-major 4x4 array form of a 3x3 matrix (padded with identity)
pub fn mat3_to_padded_cols(matrix: &Mat3) -> [[f32; 4]; 4] {
    mat4_to_cols(&matrix.to_homogeneous())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_transform() {
        let transform = Transform::default();
        assert_relative_eq!(transform.to_matrix(), Mat4::identity());
        assert_relative_eq!(transform.normal_matrix(), Mat3::identity());
    }

    #[test]
    fn test_translation_is_last_column() {
        let transform = Transform::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let cols = mat4_to_cols(&transform.to_matrix());
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn test_normal_matrix_inverts_scale() {
        let transform = Transform {
            scale: Vec3::new(2.0, 4.0, 0.5),
            ..Default::default()
        };
        let normal = transform.normal_matrix();
        assert_relative_eq!(normal[(0, 0)], 0.5);
        assert_relative_eq!(normal[(1, 1)], 0.25);
        assert_relative_eq!(normal[(2, 2)], 2.0);
    }

    #[test]
    fn test_yaw_rotates_x_towards_negative_z() {
        let transform = Transform {
            rotation: Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0),
            ..Default::default()
        };
        let rotated = transform.rotation_matrix() * Vec3::x();
        assert_relative_eq!(rotated, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
    }
}
