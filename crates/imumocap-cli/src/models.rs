//! Built-in skeleton models.
//!
//! Dimensions are in metres for an adult of roughly 1.75 m.  Every link
//! frame starts aligned with the world: +Y up, +Z forward, +X to the
//! subject's left.

use clap::ValueEnum;
use imumocap_kinematics::{KinematicTree, Link, Transform};
use imumocap_types::MocapError;
use serde::{Deserialize, Serialize};

/// Model selectable from the command line and the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    /// Pelvis, legs, feet and toes.
    #[default]
    LowerBody,
    /// Lower body plus spine, head and arms.
    Body,
    /// Left hand: wrist, thumb and four fingers.
    LeftHand,
    /// Right hand: wrist, thumb and four fingers.
    RightHand,
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::LowerBody => write!(f, "lower_body"),
            Model::Body => write!(f, "body"),
            Model::LeftHand => write!(f, "left_hand"),
            Model::RightHand => write!(f, "right_hand"),
        }
    }
}

impl std::str::FromStr for Model {
    type Err = MocapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lower_body" | "lower-body" => Ok(Model::LowerBody),
            "body" => Ok(Model::Body),
            "left_hand" | "left-hand" => Ok(Model::LeftHand),
            "right_hand" | "right-hand" => Ok(Model::RightHand),
            other => Err(MocapError::InvalidConfig(format!("unknown model '{other}'"))),
        }
    }
}

impl Model {
    pub fn tree(self) -> Result<KinematicTree, MocapError> {
        match self {
            Model::LowerBody => lower_body(),
            Model::Body => body(),
            Model::LeftHand => hand(Side::Left),
            Model::RightHand => hand(Side::Right),
        }
    }

    /// Links that carry no sensor in the reference setups.
    pub fn unsensored_links(self) -> &'static [&'static str] {
        match self {
            Model::LowerBody | Model::Body => &["left_toe", "right_toe"],
            Model::LeftHand | Model::RightHand => &[],
        }
    }
}

const PELVIS_HEIGHT: f64 = 0.97;

fn leg(side: &str, x: f64) -> Link {
    Link::new(format!("{side}_upper_leg"))
        .with_offset(Transform::from_translation(x, -0.05, 0.0))
        .with_child(
            Link::new(format!("{side}_lower_leg"))
                .with_offset(Transform::from_translation(0.0, -0.44, 0.0))
                .with_child(
                    Link::new(format!("{side}_foot"))
                        .with_offset(Transform::from_translation(0.0, -0.42, 0.0))
                        .with_child(
                            Link::new(format!("{side}_toe"))
                                .with_offset(Transform::from_translation(0.0, -0.06, 0.14)),
                        ),
                ),
        )
}

fn arm(side: &str, sign: f64) -> Link {
    Link::new(format!("{side}_shoulder"))
        .with_offset(Transform::from_translation(sign * 0.04, 0.12, 0.0))
        .with_child(
            Link::new(format!("{side}_upper_arm"))
                .with_offset(Transform::from_translation(sign * 0.16, 0.0, 0.0) * Transform::rot_z(sign * 10.0))
                .with_child(
                    Link::new(format!("{side}_forearm"))
                        .with_offset(Transform::from_translation(0.0, -0.29, 0.0))
                        .with_child(
                            Link::new(format!("{side}_hand"))
                                .with_offset(Transform::from_translation(0.0, -0.26, 0.0)),
                        ),
                ),
        )
}

fn pelvis() -> Link {
    Link::new("pelvis")
        .with_offset(Transform::from_translation(0.0, PELVIS_HEIGHT, 0.0))
        .with_child(leg("left", 0.09))
        .with_child(leg("right", -0.09))
}

/// pelvis → {left,right}_upper_leg → lower_leg → foot → toe
pub fn lower_body() -> Result<KinematicTree, MocapError> {
    KinematicTree::new(pelvis())
}

/// Lower body with a five-segment spine, neck, head and both arms hanging
/// at the sides.
pub fn body() -> Result<KinematicTree, MocapError> {
    let mut root = pelvis();
    root.add_child(
        Link::new("lower_lumbar")
            .with_offset(Transform::from_translation(0.0, 0.08, 0.0))
            .with_child(
                Link::new("upper_lumbar")
                    .with_offset(Transform::from_translation(0.0, 0.1, 0.0))
                    .with_child(
                        Link::new("lower_torso")
                            .with_offset(Transform::from_translation(0.0, 0.1, 0.0))
                            .with_child(
                                Link::new("upper_torso")
                                    .with_offset(Transform::from_translation(0.0, 0.14, 0.0))
                                    .with_child(
                                        Link::new("neck")
                                            .with_offset(Transform::from_translation(0.0, 0.18, 0.0))
                                            .with_child(
                                                Link::new("head").with_offset(
                                                    Transform::from_translation(0.0, 0.1, 0.0),
                                                ),
                                            ),
                                    )
                                    .with_child(arm("left", 1.0))
                                    .with_child(arm("right", -1.0)),
                            ),
                    ),
            ),
    );
    KinematicTree::new(root)
}

// ── Hands ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn name(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Sign of world X pointing from the hand towards its thumb with the
    /// palm facing down and the fingers pointing forward.
    fn thumbward(self) -> f64 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

/// Fingers after the thumb, from the thumb side outwards.
pub const FINGERS: [&str; 4] = ["index", "middle", "ring", "little"];

/// Phalanges of each finger, base to tip.
pub const PHALANGES: [&str; 3] = ["proximal", "intermediate", "distal"];

/// Links of the thumb, base to tip.
pub const THUMB: [&str; 3] = ["thumb_metacarpal", "thumb_proximal", "thumb_distal"];

const HAND_HEIGHT: f64 = 0.015;

/// Rest joint of the thumb base: swung out of the palm towards the thumb
/// side.
pub fn thumb_rest(side: Side) -> Transform {
    Transform::rot_y(side.thumbward() * 40.0)
}

/// Flexion of a thumb joint by `degrees`.
///
/// The thumb nail faces sideways, so its bending axis is the X axis rolled
/// about the thumb's own length: `F · Rx · F⁻¹` with `F` that roll.
pub fn thumb_flexion(side: Side, degrees: f64) -> Transform {
    let roll = Transform::rot_z(side.thumbward() * 60.0);
    roll * Transform::rot_x(degrees) * roll.inverse()
}

/// One finger along +Z; `lengths` are the proximal and intermediate
/// phalanx lengths.
fn finger(side: Side, name: &str, x: f64, lengths: [f64; 2]) -> Link {
    let [proximal, intermediate, distal] = PHALANGES.map(|p| format!("{}_{name}_{p}", side.name()));
    Link::new(proximal)
        .with_offset(Transform::from_translation(x, 0.0, 0.09))
        .with_child(
            Link::new(intermediate)
                .with_offset(Transform::from_translation(0.0, 0.0, lengths[0]))
                .with_child(
                    Link::new(distal).with_offset(Transform::from_translation(0.0, 0.0, lengths[1])),
                ),
        )
}

/// `{side}_hand` at the wrist with the palm facing down and the fingers
/// pointing forward (+Z).  The thumb rests swung out towards the midline.
pub fn hand(side: Side) -> Result<KinematicTree, MocapError> {
    let t = side.thumbward();
    let mut root = Link::new(format!("{}_hand", side.name()))
        .with_offset(Transform::from_translation(0.0, HAND_HEIGHT, 0.0));

    let [metacarpal, proximal, distal] = THUMB.map(|p| format!("{}_{p}", side.name()));
    root.add_child(
        Link::new(metacarpal)
            .with_offset(Transform::from_translation(t * 0.025, -HAND_HEIGHT, 0.02))
            .with_joint(thumb_rest(side)),
    )
    .add_child(Link::new(proximal).with_offset(Transform::from_translation(0.0, 0.0, 0.045)))
    .add_child(Link::new(distal).with_offset(Transform::from_translation(0.0, 0.0, 0.032)));

    let layout = [
        (0.03, [0.042, 0.025]),
        (0.01, [0.046, 0.028]),
        (-0.01, [0.043, 0.027]),
        (-0.03, [0.034, 0.02]),
    ];
    for (name, (x, lengths)) in FINGERS.iter().zip(layout) {
        root.add_child(finger(side, name, t * x, lengths));
    }
    KinematicTree::new(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_body_layout() {
        let tree = lower_body().unwrap();
        let names: Vec<&str> = tree.links().map(|l| l.name()).collect();
        assert_eq!(
            names,
            [
                "pelvis",
                "left_upper_leg",
                "left_lower_leg",
                "left_foot",
                "left_toe",
                "right_upper_leg",
                "right_lower_leg",
                "right_foot",
                "right_toe",
            ]
        );
    }

    #[test]
    fn rest_pose_stands_on_the_floor() {
        for model in [Model::LowerBody, Model::Body, Model::LeftHand, Model::RightHand] {
            let tree = model.tree().unwrap();
            let lowest = tree
                .world_poses()
                .iter()
                .map(|p| p.translation().y)
                .fold(f64::INFINITY, f64::min);
            assert!(lowest.abs() < 1e-9, "{model}: lowest link at {lowest}");
        }
    }

    #[test]
    fn body_contains_every_lower_body_link() {
        let body = body().unwrap();
        assert_eq!(body.len(), 9 + 6 + 8);
        for link in lower_body().unwrap().links() {
            assert!(body.contains(link.name()), "{}", link.name());
        }
        for name in Model::Body.unsensored_links() {
            assert!(body.contains(name));
        }
    }

    #[test]
    fn hands_hang_below_shoulders() {
        let tree = body().unwrap();
        for side in ["left", "right"] {
            let shoulder = tree.link(&format!("{side}_upper_arm")).unwrap().world_pose();
            let hand = tree.link(&format!("{side}_hand")).unwrap().world_pose();
            assert!(hand.translation().y < shoulder.translation().y - 0.4);
        }
    }

    #[test]
    fn hands_are_mirror_images() {
        let left = hand(Side::Left).unwrap();
        let right = hand(Side::Right).unwrap();
        assert_eq!(left.len(), 1 + 3 + 4 * 3);
        assert_eq!(left.root().name(), "left_hand");

        let chain: Vec<&str> = left
            .link("left_thumb_metacarpal")
            .unwrap()
            .children()
            .flat_map(|c| std::iter::once(c.name()).chain(c.children().map(|g| g.name())))
            .collect();
        assert_eq!(chain, ["left_thumb_proximal", "left_thumb_distal"]);

        let tip = |tree: &KinematicTree, name: &str| tree.link(name).unwrap().world_pose().translation();
        let (l, r) = (tip(&left, "left_thumb_distal"), tip(&right, "right_thumb_distal"));
        assert!(l.x < -0.03 && l.z > 0.05);
        assert!((l.x + r.x).abs() < 1e-9 && (l.z - r.z).abs() < 1e-9);
        assert!(tip(&left, "left_little_distal").x > 0.0);
    }

    #[test]
    fn thumb_rest_joint_is_authored() {
        let tree = hand(Side::Right).unwrap();
        let id = tree.id("right_thumb_metacarpal").unwrap();
        assert!(tree.rest_joint(id).approx_eq(&thumb_rest(Side::Right), 1e-12));
        assert!(tree.joint(id).approx_eq(&thumb_rest(Side::Right), 1e-12));
    }

    #[test]
    fn thumb_flexion_bends_about_a_rolled_axis() {
        let flex = thumb_flexion(Side::Left, 30.0);
        assert!((flex.angle_to(&Transform::identity()).to_degrees() - 30.0).abs() < 1e-9);
        // Unlike a finger, the bent thumb leaves the YZ plane.
        let z = flex.rotation_axis(imumocap_types::Axis::Z);
        assert!(z.x.abs() > 0.1);
    }

    #[test]
    fn model_names_parse() {
        assert_eq!("lower_body".parse::<Model>().unwrap(), Model::LowerBody);
        assert_eq!("body".parse::<Model>().unwrap(), Model::Body);
        assert_eq!("right-hand".parse::<Model>().unwrap(), Model::RightHand);
        assert!("hand".parse::<Model>().is_err());
        assert_eq!(Model::LeftHand.to_string(), "left_hand");
        assert_eq!(Model::Body.to_string(), "body");
    }
}
