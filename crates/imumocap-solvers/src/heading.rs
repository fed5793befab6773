//! Heading ("north") correction.
//!
//! IMUs report orientation against an arbitrary, possibly drifting,
//! real-world reference such as magnetic north.  [`HeadingSolver::set`]
//! measures the yaw of one reference reading (usually the pelvis) and stores
//! the pure yaw rotation that turns it to face world +Z;
//! [`HeadingSolver::apply`] then left-multiplies every reading of a frame by
//! that correction.
//!
//! The yaw is measured on a configurable basis column of the reference
//! orientation: [`Axis::Z`] for a sensor worn upright, [`Axis::X`] for the
//! alternative mounting.  The column is projected onto the ground plane by
//! dropping its vertical (Y) component, and the yaw is
//! `atan2(x, z)`, zero when the projection points along +Z.

use imumocap_kinematics::{Readings, Transform};
use imumocap_types::{Axis, MocapError};
use tracing::{info, warn};

/// Horizontal projections shorter than this are treated as vertical.
pub const MIN_HORIZONTAL_NORM: f64 = 1e-6;

/// Yaw (radians, about +Y) of `axis` of `global` after projection onto the
/// ground plane.
///
/// Fails with [`MocapError::DegenerateHeading`] when the axis is too close
/// to vertical for the heading to be defined.
pub fn heading_yaw(global: &Transform, axis: Axis) -> Result<f64, MocapError> {
    let forward = global.rotation_axis(axis);
    let horizontal_norm = forward.x.hypot(forward.z);
    if horizontal_norm.is_nan() || horizontal_norm < MIN_HORIZONTAL_NORM {
        return Err(MocapError::DegenerateHeading { horizontal_norm });
    }
    Ok((forward.x / horizontal_norm).atan2(forward.z / horizontal_norm))
}

/// Holds the single yaw correction applied to every sensor reading.
#[derive(Debug, Clone)]
pub struct HeadingSolver {
    axis: Axis,
    yaw: f64,
    correction: Transform,
}

impl Default for HeadingSolver {
    fn default() -> Self {
        Self::new(Axis::Z)
    }
}

impl HeadingSolver {
    /// Solver measuring yaw on the given basis column, starting with no
    /// correction.
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            yaw: 0.0,
            correction: Transform::identity(),
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Yaw measured by the last successful [`HeadingSolver::set`], radians.
    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    /// The stored correction, `rot_y(-yaw)`.
    pub fn correction(&self) -> &Transform {
        &self.correction
    }

    /// Re-anchor the heading on `global`.
    ///
    /// Returns the measured yaw.  On a degenerate reference the previous
    /// correction is kept and the error is returned.
    pub fn set(&mut self, global: &Transform) -> Result<f64, MocapError> {
        match heading_yaw(global, self.axis) {
            Ok(yaw) => {
                self.yaw = yaw;
                self.correction = Transform::yaw(-yaw);
                info!(yaw_deg = yaw.to_degrees(), axis = %self.axis, "heading set");
                Ok(yaw)
            }
            Err(e) => {
                warn!(error = %e, "heading reference degenerate; keeping previous heading");
                Err(e)
            }
        }
    }

    /// Drop the correction.
    pub fn reset(&mut self) {
        self.yaw = 0.0;
        self.correction = Transform::identity();
    }

    pub fn apply_one(&self, global: &Transform) -> Transform {
        self.correction * *global
    }

    /// Corrected copy of a frame of readings.
    pub fn apply(&self, readings: &Readings) -> Readings {
        readings
            .iter()
            .map(|(name, global)| (name.clone(), self.apply_one(global)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    const TOL: f64 = 1e-9;

    #[test]
    fn forward_along_z_has_zero_yaw() {
        let mut solver = HeadingSolver::default();
        let pelvis = Transform::rot_x(-15.0);
        assert!(solver.set(&pelvis).unwrap().abs() < TOL);

        let readings: Readings = [("pelvis".to_string(), pelvis)].into();
        let corrected = solver.apply(&readings);
        assert!(heading_yaw(&corrected["pelvis"], Axis::Z).unwrap().abs() < TOL);
        assert!(corrected["pelvis"].approx_eq(&pelvis, TOL));
    }

    #[test]
    fn diagonal_forward_measures_45_degrees() {
        // Z column of rot_y(45°) is (1, 0, 1) / √2.
        let yawed = Transform::rot_y(45.0);
        let z = yawed.rotation_axis(Axis::Z);
        assert!((z.x - z.z).abs() < TOL && z.y.abs() < TOL);
        assert!((heading_yaw(&yawed, Axis::Z).unwrap() - FRAC_PI_4).abs() < TOL);

        // Tilting the sensor does not change the projected direction.
        let tilted = yawed * Transform::rot_x(-30.0);
        assert!((heading_yaw(&tilted, Axis::Z).unwrap() - FRAC_PI_4).abs() < TOL);
    }

    #[test]
    fn apply_removes_reference_yaw() {
        let mut solver = HeadingSolver::new(Axis::Z);
        let reference = Transform::rot_y(-130.0) * Transform::rot_x(20.0);
        let yaw = solver.set(&reference).unwrap();
        assert!((yaw.to_degrees() + 130.0).abs() < 1e-6);

        let corrected = solver.apply_one(&reference);
        assert!(heading_yaw(&corrected, Axis::Z).unwrap().abs() < TOL);
        assert!(corrected.approx_eq(&Transform::rot_x(20.0), 1e-6));
    }

    #[test]
    fn correction_is_pure_yaw() {
        let mut solver = HeadingSolver::default();
        solver.set(&Transform::from_euler_degrees(20.0, 60.0, -35.0)).unwrap();
        let up = solver.correction().rotation_axis(Axis::Y);
        assert!((up.y - 1.0).abs() < TOL);
        assert_eq!(solver.correction().translation(), nalgebra::Vector3::zeros());
    }

    #[test]
    fn apply_leaves_input_untouched() {
        let mut solver = HeadingSolver::default();
        solver.set(&Transform::rot_y(90.0)).unwrap();
        let readings: Readings = [
            ("pelvis".to_string(), Transform::rot_y(90.0)),
            ("left_thigh".to_string(), Transform::rot_x(10.0)),
        ]
        .into();
        let before = readings.clone();
        let corrected = solver.apply(&readings);
        assert_eq!(readings, before);
        assert_eq!(corrected.len(), 2);
        assert!(corrected["pelvis"].approx_eq(&Transform::identity(), 1e-6));
        assert!(corrected["left_thigh"]
            .approx_eq(&(Transform::rot_y(-90.0) * Transform::rot_x(10.0)), 1e-6));
    }

    #[test]
    fn vertical_reference_is_degenerate_and_keeps_previous() {
        let mut solver = HeadingSolver::default();
        solver.set(&Transform::rot_y(30.0)).unwrap();
        let previous = *solver.correction();

        // rot_x(90°) turns the Z column straight down.
        let err = solver.set(&Transform::rot_x(90.0)).unwrap_err();
        assert!(matches!(err, MocapError::DegenerateHeading { .. }));
        assert!(solver.correction().approx_eq(&previous, TOL));
        assert!((solver.yaw().to_degrees() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn x_axis_convention() {
        // Sensor whose X axis points along world +Z.
        let mut solver = HeadingSolver::new(Axis::X);
        assert!(solver.set(&Transform::rot_y(-90.0)).unwrap().abs() < 1e-6);

        // Same orientation measured on Z is a quarter turn off.
        assert!((heading_yaw(&Transform::rot_y(-90.0), Axis::Z).unwrap().to_degrees() + 90.0).abs() < 1e-6);
    }

    #[test]
    fn reset_restores_identity() {
        let mut solver = HeadingSolver::default();
        solver.set(&Transform::rot_y(70.0)).unwrap();
        solver.reset();
        assert!(solver.correction().approx_eq(&Transform::identity(), TOL));
        assert_eq!(solver.yaw(), 0.0);
    }
}
