//! Rigid-body transform algebra.
//!
//! A [`Transform`] is a proper rotation plus a translation.  It is the value
//! type flowing through the whole workspace: link offsets, joints, sensor
//! readings, calibration offsets and the heading correction are all
//! `Transform`s.
//!
//! Composition follows the usual convention: `a * b` is `b` followed by `a`,
//! so a chain written root-to-leaf reads left to right.
//!
//! # Example
//!
//! ```rust
//! use imumocap_kinematics::transform::Transform;
//!
//! // 1 m up, then rotated 90° about the vertical axis.
//! let pelvis = Transform::from_translation(0.0, 1.0, 0.0) * Transform::rot_y(90.0);
//! let knee = Transform::from_translation(0.0, 0.0, 0.5);
//!
//! let world = pelvis * knee;
//! let p = world.translation();
//! assert!((p.x - 0.5).abs() < 1e-9);
//! assert!((p.y - 1.0).abs() < 1e-9);
//!
//! let back = world * world.inverse();
//! assert!(back.approx_eq(&Transform::identity(), 1e-9));
//! ```

use std::ops::Mul;

use imumocap_types::{Axis, MocapError};
use nalgebra::{Matrix3, Point3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// How far a quaternion norm may stray from one before it is rejected rather
/// than renormalised.
pub const QUATERNION_NORM_TOLERANCE: f64 = 1e-3;

// ────────────────────────────────────────────────────────────────────────────
// Transform
// ────────────────────────────────────────────────────────────────────────────

/// A rigid 3-D pose: proper rotation followed by translation.
///
/// The rotation is always orthonormal with determinant +1; every constructor
/// either produces one by construction or validates its input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformData", into = "TransformData")]
pub struct Transform {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from an already valid rotation and a translation.
    pub fn from_parts(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Rotation about the X axis, in degrees.
    pub fn rot_x(degrees: f64) -> Self {
        Self::from_rotation(Rotation3::from_axis_angle(
            &Vector3::x_axis(),
            degrees.to_radians(),
        ))
    }

    /// Rotation about the Y (vertical) axis, in degrees.
    pub fn rot_y(degrees: f64) -> Self {
        Self::from_rotation(Rotation3::from_axis_angle(
            &Vector3::y_axis(),
            degrees.to_radians(),
        ))
    }

    /// Rotation about the Z axis, in degrees.
    pub fn rot_z(degrees: f64) -> Self {
        Self::from_rotation(Rotation3::from_axis_angle(
            &Vector3::z_axis(),
            degrees.to_radians(),
        ))
    }

    /// Pure rotation about the vertical axis, in radians.
    pub fn yaw(radians: f64) -> Self {
        Self::from_rotation(Rotation3::from_axis_angle(&Vector3::y_axis(), radians))
    }

    /// Elemental rotations combined as `Rz(z) · Ry(y) · Rx(x)`: the X
    /// rotation is applied first, Z last.  Angles in degrees.
    pub fn from_euler_degrees(x: f64, y: f64, z: f64) -> Self {
        Self::rot_z(z) * Self::rot_y(y) * Self::rot_x(x)
    }

    /// Build from a quaternion in `(w, x, y, z)` order.
    ///
    /// Quaternions within [`QUATERNION_NORM_TOLERANCE`] of unit length are
    /// renormalised; anything else (including NaN/inf components) is a
    /// [`MocapError::InvalidRotation`].
    pub fn from_quaternion(w: f64, x: f64, y: f64, z: f64) -> Result<Self, MocapError> {
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        if !norm.is_finite() || (norm - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
            return Err(MocapError::InvalidRotation(format!(
                "quaternion ({w}, {x}, {y}, {z}) has norm {norm}"
            )));
        }
        let unit = UnitQuaternion::from_quaternion(q);
        Ok(Self::from_rotation(unit.to_rotation_matrix()))
    }

    /// Build from a 3×3 matrix, rejecting anything that is not a proper
    /// rotation within `tolerance`.
    pub fn from_rotation_matrix(matrix: Matrix3<f64>, tolerance: f64) -> Result<Self, MocapError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(MocapError::InvalidRotation(
                "matrix has non-finite entries".to_string(),
            ));
        }
        let orthogonality = (matrix.transpose() * matrix - Matrix3::identity()).amax();
        if orthogonality > tolerance {
            return Err(MocapError::InvalidRotation(format!(
                "matrix is not orthonormal (error {orthogonality:e})"
            )));
        }
        let det = matrix.determinant();
        if (det - 1.0).abs() > tolerance {
            return Err(MocapError::InvalidRotation(format!(
                "matrix determinant is {det}, expected +1"
            )));
        }
        Ok(Self::from_rotation(Rotation3::from_matrix_unchecked(matrix)))
    }

    /// Pure translation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::new(x, y, z),
        }
    }

    /// Same rotation, translation replaced.
    pub fn with_translation(self, translation: Vector3<f64>) -> Self {
        Self {
            translation,
            ..self
        }
    }

    /// Same rotation, zero translation.
    pub fn rotation_only(self) -> Self {
        Self::from_rotation(self.rotation)
    }

    fn from_rotation(rotation: Rotation3<f64>) -> Self {
        Self {
            rotation,
            translation: Vector3::zeros(),
        }
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    /// Rotation as a unit quaternion in `[w, x, y, z]` order, with `w >= 0`.
    pub fn quaternion(&self) -> [f64; 4] {
        let q = UnitQuaternion::from_rotation_matrix(&self.rotation);
        let sign = if q.w < 0.0 { -1.0 } else { 1.0 };
        [sign * q.w, sign * q.i, sign * q.j, sign * q.k]
    }

    /// `a.compose(b)` is `b` followed by `a`; identical to `a * b`.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * other.translation,
        }
    }

    /// Exact algebraic inverse.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// World direction of the given local basis axis (a column of the
    /// rotation matrix).
    pub fn rotation_axis(&self, axis: Axis) -> Vector3<f64> {
        self.rotation.matrix().column(axis.index()).into_owned()
    }

    /// Map a point from this transform's child frame into its parent frame.
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// Element-wise comparison of rotation matrices and translations.
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.rotation.matrix() - other.rotation.matrix()).amax() <= tolerance
            && (self.translation - other.translation).amax() <= tolerance
    }

    /// Angle of the relative rotation between `self` and `other`, radians.
    pub fn angle_to(&self, other: &Self) -> f64 {
        self.rotation.rotation_to(&other.rotation).angle()
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        self.compose(&rhs)
    }
}

impl Mul<&Transform> for &Transform {
    type Output = Transform;

    fn mul(self, rhs: &Transform) -> Transform {
        self.compose(rhs)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire form
// ────────────────────────────────────────────────────────────────────────────

/// Serialised form: quaternion `[w, x, y, z]` and translation `[x, y, z]`.
#[derive(Serialize, Deserialize)]
struct TransformData {
    rotation: [f64; 4],
    #[serde(default)]
    translation: [f64; 3],
}

impl From<Transform> for TransformData {
    fn from(t: Transform) -> Self {
        Self {
            rotation: t.quaternion(),
            translation: [t.translation.x, t.translation.y, t.translation.z],
        }
    }
}

impl TryFrom<TransformData> for Transform {
    type Error = MocapError;

    fn try_from(data: TransformData) -> Result<Self, Self::Error> {
        let [w, x, y, z] = data.rotation;
        let [tx, ty, tz] = data.translation;
        Ok(Transform::from_quaternion(w, x, y, z)?.with_translation(Vector3::new(tx, ty, tz)))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
