//! Scripted animations and simulated sensors for the built-in models.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use imumocap_kinematics::{KinematicTree, PoseSnapshot, Readings, Transform};
use imumocap_runtime::SensorFrame;
use imumocap_solvers::solve_floor;
use imumocap_types::MocapError;
use tracing::debug;

use crate::models::{FINGERS, PHALANGES, Side, THUMB, thumb_flexion};

/// Joint angles for one animation step, `amount` in `[0, 1]`.
///
/// Links the tree does not have are skipped, so the same script drives both
/// models.
fn pose(tree: &mut KinematicTree, amount: f64) {
    let a = amount;
    let joints = [
        ("pelvis", Transform::rot_y(-25.0 * a)),
        ("left_upper_leg", Transform::rot_x(-70.0 * a)),
        ("left_lower_leg", Transform::rot_x(110.0 * a)),
        ("left_foot", Transform::rot_x(-30.0 * a)),
        ("left_toe", Transform::rot_x(20.0 * a)),
        ("right_upper_leg", Transform::rot_x(-70.0 * a)),
        ("right_lower_leg", Transform::rot_x(110.0 * a)),
        ("right_foot", Transform::rot_x(-30.0 * a)),
        ("right_toe", Transform::rot_x(20.0 * a)),
        ("lower_lumbar", Transform::rot_x(10.0 * a)),
        ("upper_lumbar", Transform::rot_x(10.0 * a)),
        ("lower_torso", Transform::rot_y(15.0 * a)),
        ("upper_torso", Transform::rot_y(15.0 * a)),
        ("neck", Transform::rot_x(-10.0 * a)),
        ("head", Transform::rot_x(-15.0 * a)),
        ("left_shoulder", Transform::rot_z(10.0 * a)),
        ("left_upper_arm", Transform::from_euler_degrees(-60.0 * a, 0.0, 20.0 * a)),
        ("left_forearm", Transform::from_euler_degrees(-90.0 * a, -20.0 * a, 0.0)),
        ("left_hand", Transform::rot_z(-30.0 * a)),
        ("right_shoulder", Transform::rot_z(-10.0 * a)),
        ("right_upper_arm", Transform::from_euler_degrees(-60.0 * a, 0.0, -20.0 * a)),
        ("right_forearm", Transform::from_euler_degrees(-90.0 * a, 20.0 * a, 0.0)),
        ("right_hand", Transform::rot_z(30.0 * a)),
    ];
    for (name, joint) in joints {
        if let Ok(id) = tree.id(name) {
            tree.set_joint_at(id, joint);
        }
    }

    // Fist: every finger joint curls towards the palm, the thumb folds
    // across it from its rest position.
    for side in [Side::Left, Side::Right] {
        let s = side.name();
        for finger in FINGERS {
            for phalanx in PHALANGES {
                if let Ok(id) = tree.id(&format!("{s}_{finger}_{phalanx}")) {
                    tree.set_joint_at(id, Transform::rot_x(90.0 * a));
                }
            }
        }
        for link in THUMB {
            if let Ok(id) = tree.id(&format!("{s}_{link}")) {
                let rest = *tree.rest_joint(id);
                tree.set_joint_at(id, rest * thumb_flexion(side, 45.0 * a));
            }
        }
    }
}

/// A squat-and-reach cycle (a fist for the hand models): `count` frames easing from rest to the full
/// pose and back, each grounded by the floor solver.
pub fn animation(tree: &KinematicTree, count: usize) -> Vec<PoseSnapshot> {
    let mut tree = tree.clone();
    (0..count)
        .map(|i| {
            let x = if count > 1 {
                std::f64::consts::PI * i as f64 / (count - 1) as f64
            } else {
                0.0
            };
            tree.reset_to_rest();
            pose(&mut tree, x.sin());
            solve_floor(&mut tree);
            tree.snapshot()
        })
        .collect()
}

/// Simulated sensor mounting error for a link.
///
/// The root mount keeps its forward axis in the vertical plane so the
/// simulated heading bias is recovered exactly.
fn mount(index: usize) -> Transform {
    if index == 0 {
        return Transform::rot_x(8.0);
    }
    let k = index as f64;
    Transform::from_euler_degrees(17.0 * k % 50.0 - 25.0, 37.0 * k % 360.0, 11.0 * k % 40.0 - 20.0)
}

/// Readings the simulated sensors report for the tree's current pose.
pub fn simulated_readings(tree: &KinematicTree, heading_bias: &Transform, ignored: &[String]) -> Readings {
    tree.links()
        .filter(|l| !ignored.iter().any(|n| n == l.name()))
        .map(|l| {
            let global = *heading_bias * l.world_pose().rotation_only() * mount(l.id().index());
            (l.name().to_string(), global)
        })
        .collect()
}

/// Settings of a simulated sensor rig.
#[derive(Debug, Clone)]
pub struct RigSettings {
    pub fps: u32,
    /// Frames per animation cycle.
    pub cycle_frames: usize,
    /// Yaw, in degrees, between the sensors' reference and world forward.
    pub heading_bias_deg: f64,
    /// Frames held at rest with the button pressed before animating.
    pub rest_frames: usize,
    pub ignored_links: Vec<String>,
}

/// Spawn a thread that polls the simulated rig and sends one frame per
/// period until `shutdown` is raised or the receiver goes away.
///
/// The subject starts in the reference pose and presses the button, so the
/// pipeline calibrates before the animation begins.
pub fn spawn_rig(
    tree: KinematicTree,
    settings: RigSettings,
    tx: Sender<SensorFrame>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, MocapError> {
    if settings.fps == 0 {
        return Err(MocapError::InvalidConfig("rig fps must be positive".into()));
    }
    let animation = animation(&tree, settings.cycle_frames.max(1));
    let bias = Transform::rot_y(settings.heading_bias_deg);
    let period = Duration::from_nanos(1_000_000_000 / u64::from(settings.fps));

    thread::Builder::new()
        .name("imu-rig".into())
        .spawn(move || {
            let mut tree = tree;
            let rest = tree.snapshot();
            let script = std::iter::repeat_n(&rest, settings.rest_frames).chain(animation.iter().cycle());
            for (i, snapshot) in script.enumerate() {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                if tree.apply_snapshot(snapshot).is_err() {
                    break;
                }
                let readings = simulated_readings(&tree, &bias, &settings.ignored_links);
                let pressed = settings.rest_frames > 0 && i == 0;
                if tx.send(SensorFrame::new(readings).with_button(pressed)).is_err() {
                    break;
                }
                thread::sleep(period);
            }
            debug!("simulated rig stopped");
        })
        .map_err(|e| MocapError::Source(format!("failed to start rig thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;
    use imumocap_runtime::{MemorySink, NeverTrigger, StreamConfig, StreamingPipeline, VecSource};

    #[test]
    fn animation_starts_and_ends_at_rest_and_stays_grounded() {
        let tree = models::body().unwrap();
        let frames = animation(&tree, 21);
        assert_eq!(frames.len(), 21);

        let rest = tree.snapshot();
        for (name, joint) in frames[0].iter() {
            assert!(joint.rotation_only().approx_eq(&rest.get(name).unwrap().rotation_only(), 1e-9));
        }

        let mut posed = tree.clone();
        for frame in &frames {
            posed.apply_snapshot(frame).unwrap();
            let lowest = posed
                .world_poses()
                .iter()
                .map(|p| p.translation().y)
                .fold(f64::INFINITY, f64::min);
            assert!(lowest.abs() < 1e-9);
        }

        let peak = frames[10].get("left_lower_leg").unwrap();
        assert!(peak.approx_eq(&Transform::rot_x(110.0), 1e-9));
    }

    #[test]
    fn hand_animation_closes_a_fist_on_the_floor() {
        let tree = models::hand(Side::Left).unwrap();
        let frames = animation(&tree, 21);

        let fist = &frames[10];
        for finger in FINGERS {
            let tip = fist.get(&format!("left_{finger}_distal")).unwrap();
            assert!(tip.rotation_only().approx_eq(&Transform::rot_x(90.0), 1e-9), "{finger}");
        }
        let thumb = fist.get("left_thumb_metacarpal").unwrap();
        let expected = models::thumb_rest(Side::Left) * thumb_flexion(Side::Left, 45.0);
        assert!(thumb.rotation_only().approx_eq(&expected, 1e-9));

        let mut posed = tree.clone();
        posed.apply_snapshot(fist).unwrap();
        let lowest = posed
            .world_poses()
            .iter()
            .map(|p| p.translation().y)
            .fold(f64::INFINITY, f64::min);
        assert!(lowest.abs() < 1e-9);
    }

    #[test]
    fn simulated_readings_skip_ignored_links() {
        let tree = models::lower_body().unwrap();
        let ignored = vec!["left_toe".to_string()];
        let readings = simulated_readings(&tree, &Transform::identity(), &ignored);
        assert_eq!(readings.len(), 8);
        assert!(!readings.contains_key("left_toe"));
    }

    #[test]
    fn pipeline_recovers_the_rig_animation() {
        let tree = models::lower_body().unwrap();
        let settings = RigSettings {
            fps: 1000,
            cycle_frames: 9,
            heading_bias_deg: -140.0,
            rest_frames: 2,
            ignored_links: vec!["left_toe".into(), "right_toe".into()],
        };
        let expected = animation(&tree, settings.cycle_frames);

        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let rig = spawn_rig(tree.clone(), settings.clone(), tx, Arc::clone(&shutdown)).unwrap();

        let config = StreamConfig {
            fps: 1000,
            calibration_countdown: 0,
            countdown_interval_ms: 0,
            ignored_links: settings.ignored_links.clone(),
            log_every_frames: 0,
            ..StreamConfig::default()
        };
        let mut pipeline = StreamingPipeline::new(tree, config).unwrap();
        let mut sink = MemorySink::new();
        let mut frames = Vec::new();
        // Collect every frame so none are dropped by draining.
        while frames.len() < 2 + expected.len() {
            frames.push(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        }
        shutdown.store(true, Ordering::Release);
        rig.join().unwrap();

        let mut replay = VecSource::new(frames);
        while pipeline.tick(&mut replay, &mut sink, &mut NeverTrigger).unwrap() {}

        assert_eq!(pipeline.stats().calibrations, 1);
        // Button frame plus the fresh rest frame collapse into one emitted frame.
        let out = sink.frames();
        assert_eq!(out.len(), 1 + expected.len());
        for (got, want) in out[1..].iter().zip(&expected) {
            for (name, joint) in want.iter() {
                if name.ends_with("_toe") {
                    continue;
                }
                let actual = got.joints.get(name).unwrap();
                assert!(
                    actual.rotation_only().approx_eq(&joint.rotation_only(), 1e-6),
                    "{name}"
                );
            }
        }
    }
}
