//! `imumocap-kinematics` – rigid transforms and the named skeletal tree.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform`][transform::Transform]: immutable rigid
//!   pose (proper rotation + translation) with composition, inversion and
//!   Euler/quaternion constructors.
//! - [`tree`] – [`KinematicTree`][tree::KinematicTree]: uniquely named links
//!   in a strict tree, forward kinematics, pose snapshots and the
//!   sensor-to-joint conversion
//!   [`set_joint_from_imu_global`][tree::KinematicTree::set_joint_from_imu_global].
//!
//! # World convention
//!
//! Right-handed, +Y up, +Z forward.  Heading is a rotation about Y and the
//! floor is the plane `y = 0`.

pub mod transform;
pub mod tree;

pub use transform::Transform;
pub use tree::{DriveReport, KinematicTree, Link, LinkId, LinkRef, PoseSnapshot, Readings};

use imumocap_types::Axis;

/// World vertical axis.
pub const UP: Axis = Axis::Y;

/// World forward axis that heading correction aligns the model with.
pub const FORWARD: Axis = Axis::Z;
