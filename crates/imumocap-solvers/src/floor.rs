//! Floor contact.
//!
//! After every link is posed for a frame, [`solve_floor`] finds the lowest
//! link origin and shifts the whole body vertically so that it rests on the
//! ground plane `y = 0`.  The shift is written into the root joint's
//! translation; no rotation changes.  Nothing is remembered between frames:
//! both the pose and the lowest link can change every tick.

use imumocap_kinematics::{KinematicTree, LinkId};
use nalgebra::Vector3;
use tracing::trace;

/// Height spreads at or below this are treated as flat (no shift).
pub const MIN_HEIGHT_SPREAD: f64 = 1e-9;

/// Result of one [`solve_floor`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloorContact {
    /// Lowest link before the shift, `None` for a flat pose.
    pub lowest: Option<LinkId>,
    /// World height of the lowest link origin before the shift.
    pub height: f64,
    /// Vertical shift applied to the whole pose.
    pub shift: f64,
}

/// Shift the pose so its lowest link origin sits at `y = 0`.
///
/// The world-space shift `d = (0, -min_y, 0)` is expressed in the root's
/// parent-offset frame and added to the root joint translation, so every
/// link moves by exactly `d`.  A pose whose links all share one height is
/// left untouched.
pub fn solve_floor(tree: &mut KinematicTree) -> FloorContact {
    let poses = tree.world_poses();

    let mut lowest: Option<(LinkId, f64)> = None;
    let mut highest = f64::NEG_INFINITY;
    for (link, pose) in tree.links().zip(&poses) {
        let y = pose.translation().y;
        if lowest.is_none_or(|(_, min)| y < min) {
            lowest = Some((link.id(), y));
        }
        highest = highest.max(y);
    }

    let Some((lowest_id, height)) = lowest else {
        return FloorContact {
            lowest: None,
            height: 0.0,
            shift: 0.0,
        };
    };
    if highest - height <= MIN_HEIGHT_SPREAD {
        return FloorContact {
            lowest: None,
            height,
            shift: 0.0,
        };
    }

    let shift = -height;
    let root = tree.root();
    let root_id = root.id();
    let local_shift = root.parent_offset().rotation().inverse() * Vector3::new(0.0, shift, 0.0);
    let joint = *root.joint();
    tree.set_joint_at(root_id, joint.with_translation(joint.translation() + local_shift));

    trace!(lowest = tree.name(lowest_id), shift, "floor contact");
    FloorContact {
        lowest: Some(lowest_id),
        height,
        shift,
    }
}
