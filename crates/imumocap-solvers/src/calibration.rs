//! Sensor-to-link calibration.
//!
//! A sensor strapped to a limb never sits exactly aligned with the model's
//! link frame.  While the subject holds the reference pose, each reading `G`
//! is compared with where the rest pose says the link is, and the difference
//! is stored on the tree as that link's calibration offset `C`:
//!
//! ```text
//! C = (A_rest · R)⁻¹ · G
//! ```
//!
//! where `A_rest` is the link's parent frame with every ancestor at rest and
//! `R` the link's rest joint.  Feeding the same `G` through
//! [`KinematicTree::set_joint_from_imu_global`] then yields `R` exactly.
//!
//! # Example
//!
//! ```rust
//! use imumocap_kinematics::{KinematicTree, Link, Readings, Transform};
//! use imumocap_solvers::calibration::calibrate;
//!
//! let mut tree = KinematicTree::new(Link::new("pelvis")).unwrap();
//!
//! // The pelvis sensor is mounted 30° off.
//! let readings: Readings = [("pelvis".to_string(), Transform::rot_x(30.0))].into();
//! calibrate(&mut tree, &readings).unwrap();
//!
//! tree.apply_imu_globals(&readings);
//! assert!(tree.root().joint().approx_eq(&Transform::identity(), 1e-9));
//! ```

use imumocap_kinematics::{KinematicTree, Readings, Transform};
use imumocap_types::MocapError;
use tracing::info;

/// Outcome of a [`calibrate`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationReport {
    /// Links that received an offset, in pre-order.
    pub calibrated: Vec<String>,
    /// Links without a reading; they behave as if their offset were identity.
    pub uncalibrated: Vec<String>,
}

/// Offset that maps a link at rest onto the sensor reading taken at rest.
///
/// `rest_parent_frame` is the frame the link's joint acts in with every
/// ancestor at rest, `rest_joint` the link's authored joint.  Only rotations
/// take part.
pub fn calibration_offset(
    rest_parent_frame: &Transform,
    rest_joint: &Transform,
    global: &Transform,
) -> Transform {
    let rest_world = rest_parent_frame.rotation_only() * rest_joint.rotation_only();
    rest_world.inverse() * global.rotation_only()
}

/// Compute and store a calibration offset for every link named in
/// `readings`.
///
/// All previous offsets are replaced: links absent from `readings` end up
/// uncalibrated.  A name that matches no link fails the call with
/// [`MocapError::UnknownLink`] before any offset is written.  Current joint
/// values are not touched.
pub fn calibrate(
    tree: &mut KinematicTree,
    readings: &Readings,
) -> Result<CalibrationReport, MocapError> {
    for name in readings.keys() {
        tree.id(name)?;
    }

    let offsets: Vec<Option<Transform>> = tree
        .links()
        .map(|link| {
            readings.get(link.name()).map(|global| {
                let frame = tree.rest_parent_frame(link.id());
                calibration_offset(&frame, link.rest_joint(), global)
            })
        })
        .collect();

    let mut report = CalibrationReport::default();
    let ids: Vec<_> = tree.links().map(|l| l.id()).collect();
    for (id, offset) in ids.into_iter().zip(offsets) {
        let name = tree.name(id).to_string();
        match offset {
            Some(_) => report.calibrated.push(name),
            None => report.uncalibrated.push(name),
        }
        tree.set_calibration(id, offset);
    }

    info!(
        calibrated = report.calibrated.len(),
        uncalibrated = report.uncalibrated.len(),
        "calibration offsets updated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imumocap_kinematics::Link;

    const TOL: f64 = 1e-6;

    fn arm() -> Link {
        Link::new("shoulder")
            .with_offset(Transform::from_translation(0.2, 1.4, 0.0) * Transform::rot_z(-90.0))
            .with_joint(Transform::rot_x(10.0))
            .with_child(
                Link::new("upper_arm")
                    .with_offset(Transform::from_translation(0.0, 0.15, 0.0))
                    .with_joint(Transform::rot_y(-20.0))
                    .with_child(
                        Link::new("forearm")
                            .with_offset(Transform::from_translation(0.0, 0.3, 0.0) * Transform::rot_x(5.0))
                            .with_child(Link::new("hand")),
                    ),
            )
    }

    fn readings(pairs: &[(&str, Transform)]) -> Readings {
        pairs.iter().map(|(n, t)| (n.to_string(), *t)).collect()
    }

    #[test]
    fn rest_readings_roundtrip_to_rest_joints() {
        let mut tree = KinematicTree::new(arm()).unwrap();
        let rest = readings(&[
            ("shoulder", Transform::from_euler_degrees(3.0, 170.0, -8.0)),
            ("upper_arm", Transform::from_euler_degrees(-45.0, 12.0, 60.0)),
            ("forearm", Transform::rot_z(135.0)),
            ("hand", Transform::from_euler_degrees(90.0, 0.0, 90.0)),
        ]);
        calibrate(&mut tree, &rest).unwrap();

        // Move everything away from rest, then feed the rest readings again.
        for name in ["shoulder", "upper_arm", "forearm", "hand"] {
            tree.set_joint(name, Transform::rot_y(77.0)).unwrap();
        }
        tree.apply_imu_globals(&rest);

        for link in tree.links() {
            assert!(
                link.joint().approx_eq(link.rest_joint(), TOL),
                "{} did not return to rest",
                link.name()
            );
        }
    }

    #[test]
    fn calibration_uses_rest_pose_not_current_pose() {
        let mut tree = KinematicTree::new(arm()).unwrap();
        let rest = readings(&[
            ("shoulder", Transform::rot_y(15.0)),
            ("forearm", Transform::rot_x(-40.0)),
        ]);
        let mut expected = tree.clone();
        calibrate(&mut expected, &rest).unwrap();

        tree.set_joint("upper_arm", Transform::rot_z(50.0)).unwrap();
        calibrate(&mut tree, &rest).unwrap();

        let forearm = tree.id("forearm").unwrap();
        assert!(tree
            .calibration(forearm)
            .unwrap()
            .approx_eq(expected.calibration(forearm).unwrap(), TOL));
        // Joints are left alone.
        let upper = tree.id("upper_arm").unwrap();
        assert!(tree.joint(upper).approx_eq(&Transform::rot_z(50.0), TOL));
    }

    #[test]
    fn single_link_identity_scenario() {
        let mut tree = KinematicTree::new(Link::new("root")).unwrap();
        let identity = readings(&[("root", Transform::identity())]);
        calibrate(&mut tree, &identity).unwrap();
        tree.apply_imu_globals(&identity);
        assert!(tree.root().joint().approx_eq(&Transform::identity(), TOL));
    }

    #[test]
    fn two_link_child_following_parent_scenario() {
        let root = Link::new("parent").with_child(
            Link::new("child").with_offset(Transform::from_translation(0.0, 0.4, 0.0)),
        );
        let mut tree = KinematicTree::new(root).unwrap();
        calibrate(
            &mut tree,
            &readings(&[("parent", Transform::identity()), ("child", Transform::identity())]),
        )
        .unwrap();

        tree.apply_imu_globals(&readings(&[
            ("parent", Transform::rot_y(90.0)),
            ("child", Transform::rot_y(90.0)),
        ]));

        let child = tree.id("child").unwrap();
        let parent = tree.id("parent").unwrap();
        assert!(tree.joint(parent).approx_eq(&Transform::rot_y(90.0), TOL));
        assert!(tree.joint(child).approx_eq(&Transform::identity(), TOL));
    }

    #[test]
    fn authored_parent_yaw_cancels_for_child() {
        let root = Link::new("parent")
            .with_joint(Transform::rot_y(90.0))
            .with_child(Link::new("child"));
        let mut tree = KinematicTree::new(root).unwrap();
        let yawed = readings(&[
            ("parent", Transform::rot_y(90.0)),
            ("child", Transform::rot_y(90.0)),
        ]);
        calibrate(&mut tree, &yawed).unwrap();
        tree.apply_imu_globals(&yawed);

        let child = tree.id("child").unwrap();
        assert!(tree.joint(child).approx_eq(&Transform::identity(), TOL));
        assert!(tree.root().joint().approx_eq(&Transform::rot_y(90.0), TOL));
    }

    #[test]
    fn links_without_readings_stay_uncalibrated() {
        let mut tree = KinematicTree::new(arm()).unwrap();
        let report = calibrate(
            &mut tree,
            &readings(&[("shoulder", Transform::identity()), ("forearm", Transform::identity())]),
        )
        .unwrap();
        assert_eq!(report.calibrated, ["shoulder", "forearm"]);
        assert_eq!(report.uncalibrated, ["upper_arm", "hand"]);
        assert!(tree.link("hand").unwrap().calibration().is_none());
    }

    #[test]
    fn recalibration_replaces_previous_offsets() {
        let mut tree = KinematicTree::new(arm()).unwrap();
        calibrate(
            &mut tree,
            &readings(&[("shoulder", Transform::rot_x(20.0)), ("hand", Transform::rot_x(20.0))]),
        )
        .unwrap();
        assert_eq!(tree.calibrated_count(), 2);

        calibrate(&mut tree, &readings(&[("shoulder", Transform::rot_x(-5.0))])).unwrap();
        assert_eq!(tree.calibrated_count(), 1);
        assert!(tree.link("hand").unwrap().calibration().is_none());
    }

    #[test]
    fn unknown_link_fails_without_writing() {
        let mut tree = KinematicTree::new(arm()).unwrap();
        calibrate(&mut tree, &readings(&[("hand", Transform::rot_z(10.0))])).unwrap();

        let err = calibrate(
            &mut tree,
            &readings(&[("shoulder", Transform::identity()), ("tail", Transform::identity())]),
        )
        .unwrap_err();
        assert_eq!(err, MocapError::UnknownLink("tail".to_string()));
        assert_eq!(tree.calibrated_count(), 1);
        assert!(tree.link("hand").unwrap().calibration().is_some());
    }

    #[test]
    fn offset_formula_reduces_for_identity_rest_joint() {
        let frame = Transform::rot_z(25.0);
        let global = Transform::rot_x(-60.0);
        let offset = calibration_offset(&frame, &Transform::identity(), &global);
        assert!(offset.approx_eq(&(frame.inverse() * global), TOL));
    }
}
