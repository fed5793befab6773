//! [`StreamingPipeline`] – the per-frame retargeting loop.
//!
//! Each tick:
//!
//! 1. **Acquire** – take one [`SensorFrame`] from the [`FrameSource`].
//! 2. **Recalibrate** – if the frame's button flag or the external
//!    [`RecalibrationTrigger`] fired, count down, take a fresh frame, re-anchor
//!    the heading on the root reading and store new calibration offsets.
//! 3. **Heading** – remove the stored yaw from every reading.
//! 4. **Drive** – convert readings to local joints; readings for unknown
//!    links are skipped.
//! 5. **Floor** – shift the body so its lowest link rests on `y = 0`.
//! 6. **Emit** – hand a [`PoseFrame`] to the [`PoseSink`].
//!
//! Per-tick geometry and lookup problems are logged and degraded; only source
//! and sink failures end a run.
//!
//! # Example
//!
//! ```rust
//! use imumocap_kinematics::{KinematicTree, Link, Transform};
//! use imumocap_runtime::{SensorFrame, StreamConfig, StreamingPipeline, VecSource};
//!
//! let tree = KinematicTree::new(Link::new("pelvis")).unwrap();
//! let config = StreamConfig { calibrate_on_first_frame: true, ..StreamConfig::default() };
//! let mut pipeline = StreamingPipeline::new(tree, config).unwrap();
//!
//! let mut source = VecSource::new([
//!     SensorFrame::from_pairs([("pelvis", Transform::rot_x(30.0))]),
//!     SensorFrame::from_pairs([("pelvis", Transform::rot_x(30.0) * Transform::rot_z(10.0))]),
//! ]);
//! let poses = pipeline.record(&mut source).unwrap();
//! assert_eq!(poses.len(), 2);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use imumocap_kinematics::{KinematicTree, PoseSnapshot, Readings};
use imumocap_solvers::{CalibrationReport, HeadingSolver, calibrate, solve_floor};
use imumocap_types::{Axis, FrameHeader, MocapError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rate::{FixedRate, TimingMode};
use crate::sink::{MemorySink, PoseFrame, PoseSink};
use crate::source::{FrameSource, NeverTrigger, RecalibrationTrigger, SensorFrame};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Highest frame rate accepted by [`StreamConfig::validate`].
pub const MAX_FPS: u32 = 1000;

/// Runtime settings of a [`StreamingPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Ticks per second.
    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default)]
    pub timing: TimingMode,

    /// Basis column of the root sensor used to measure heading.
    #[serde(default)]
    pub forward_axis: Axis,

    /// Countdown steps announced before a triggered calibration.
    #[serde(default = "default_calibration_countdown")]
    pub calibration_countdown: u32,

    #[serde(default = "default_countdown_interval_ms")]
    pub countdown_interval_ms: u64,

    /// Calibrate on the first non-empty frame; logged data must then start
    /// in the reference pose.
    #[serde(default)]
    pub calibrate_on_first_frame: bool,

    /// Links without a sensor.  Their readings are dropped and their joints
    /// keep whatever value they last had.
    #[serde(default)]
    pub ignored_links: Vec<String>,

    /// Emit a progress log line every this many frames (0 disables).
    #[serde(default = "default_log_every_frames")]
    pub log_every_frames: u64,
}

fn default_fps() -> u32 {
    30
}
fn default_calibration_countdown() -> u32 {
    3
}
fn default_countdown_interval_ms() -> u64 {
    500
}
fn default_log_every_frames() -> u64 {
    300
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            timing: TimingMode::default(),
            forward_axis: Axis::default(),
            calibration_countdown: default_calibration_countdown(),
            countdown_interval_ms: default_countdown_interval_ms(),
            calibrate_on_first_frame: false,
            ignored_links: Vec::new(),
            log_every_frames: default_log_every_frames(),
        }
    }
}

impl StreamConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), MocapError> {
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(MocapError::InvalidConfig(format!(
                "fps must be in 1..={MAX_FPS}, got {}",
                self.fps
            )));
        }
        if self.forward_axis == Axis::Y {
            return Err(MocapError::InvalidConfig(
                "forward_axis cannot be the vertical axis 'y'".into(),
            ));
        }
        if let Some(blank) = self.ignored_links.iter().find(|n| n.trim().is_empty()) {
            return Err(MocapError::InvalidConfig(format!(
                "ignored link name '{blank}' is blank"
            )));
        }
        Ok(())
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(self.countdown_interval_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters accumulated over the life of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_emitted: u64,
    /// Readings dropped because they named no link.
    pub skipped_readings: u64,
    pub calibrations: u64,
    /// Heading references too close to vertical.
    pub heading_failures: u64,
    /// Calibrations that failed and left the previous offsets in place.
    pub calibration_failures: u64,
    /// Ticks that started after their deadline.
    pub overruns: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// StreamingPipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the tree and the solvers and turns sensor frames into poses.
pub struct StreamingPipeline {
    tree: KinematicTree,
    heading: HeadingSolver,
    config: StreamConfig,
    session_id: Uuid,
    sequence: u64,
    calibrated: bool,
    stats: PipelineStats,
}

impl StreamingPipeline {
    /// Fails on an invalid config or an ignored link the tree does not have.
    pub fn new(tree: KinematicTree, config: StreamConfig) -> Result<Self, MocapError> {
        config.validate()?;
        for name in &config.ignored_links {
            tree.id(name)?;
        }
        let session_id = Uuid::new_v4();
        info!(
            session = %session_id,
            links = tree.len(),
            fps = config.fps,
            forward_axis = %config.forward_axis,
            "pipeline created"
        );
        Ok(Self {
            tree,
            heading: HeadingSolver::new(config.forward_axis),
            config,
            session_id,
            sequence: 0,
            calibrated: false,
            stats: PipelineStats::default(),
        })
    }

    pub fn tree(&self) -> &KinematicTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut KinematicTree {
        &mut self.tree
    }

    pub fn heading(&self) -> &HeadingSolver {
        &self.heading
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// `true` once any calibration succeeded.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Re-anchor the heading on the root reading and store calibration
    /// offsets from heading-corrected `readings`.
    ///
    /// Readings for unknown links are skipped and counted.  Without a usable
    /// root reading the previous heading is kept.  The new heading is only
    /// committed together with the new offsets: on error both stay as they
    /// were.
    pub fn calibrate(&mut self, readings: &Readings) -> Result<CalibrationReport, MocapError> {
        let readings = self.known_readings(self.without_ignored(readings));
        let root = self.tree.root().name().to_string();
        let mut heading = self.heading.clone();
        match readings.get(&root).map(|global| heading.set(global)) {
            Some(Ok(_)) => {}
            Some(Err(e)) if e.is_recoverable() => self.stats.heading_failures += 1,
            Some(Err(e)) => return Err(e),
            None => warn!(root = %root, "no root reading; heading unchanged"),
        }

        match calibrate(&mut self.tree, &heading.apply(&readings)) {
            Ok(report) => {
                self.heading = heading;
                self.calibrated = true;
                self.stats.calibrations += 1;
                if !report.uncalibrated.is_empty() {
                    debug!(links = ?report.uncalibrated, "links left uncalibrated");
                }
                Ok(report)
            }
            Err(e) => {
                self.stats.calibration_failures += 1;
                Err(e)
            }
        }
    }

    /// Steps 3–5 for one set of readings, then build the outgoing frame.
    pub fn process(&mut self, readings: &Readings) -> PoseFrame {
        let readings = self.heading.apply(&self.without_ignored(readings));
        let report = self.tree.apply_imu_globals(&readings);
        if !report.unknown.is_empty() {
            self.stats.skipped_readings += report.unknown.len() as u64;
            warn!(links = ?report.unknown, "readings for unknown links skipped");
        }
        let contact = solve_floor(&mut self.tree);
        debug!(
            driven = report.driven,
            floor_shift = contact.shift,
            "frame processed"
        );
        self.pose_frame()
    }

    /// Run one full tick against `source`.
    ///
    /// Returns `Ok(false)` once the source is exhausted.
    pub fn tick<S, K, T>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        trigger: &mut T,
    ) -> Result<bool, MocapError>
    where
        S: FrameSource + ?Sized,
        K: PoseSink + ?Sized,
        T: RecalibrationTrigger + ?Sized,
    {
        let Some(mut frame) = source.next_frame()? else {
            return Ok(false);
        };

        let requested = trigger.poll();
        if frame.button_pressed || requested {
            self.countdown();
            frame = match source.next_frame()? {
                Some(fresh) => fresh,
                None => return Ok(false),
            };
            self.calibrate_or_keep(&frame);
        } else if self.config.calibrate_on_first_frame
            && !self.calibrated
            && !frame.readings.is_empty()
        {
            self.calibrate_or_keep(&frame);
        }

        let pose = self.process(&frame.readings);
        sink.emit(&pose)?;
        self.stats.frames_emitted += 1;
        self.log_progress();
        Ok(true)
    }

    /// Tick at the configured rate until the source ends or `shutdown` is
    /// raised.
    pub fn run<S, K, T>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        trigger: &mut T,
        shutdown: &AtomicBool,
    ) -> Result<PipelineStats, MocapError>
    where
        S: FrameSource + ?Sized,
        K: PoseSink + ?Sized,
        T: RecalibrationTrigger + ?Sized,
    {
        let mut rate = FixedRate::new(self.config.fps, self.config.timing)?;
        info!(
            session = %self.session_id,
            fps = self.config.fps,
            timing = %self.config.timing,
            "streaming started"
        );

        let result = loop {
            if shutdown.load(Ordering::Acquire) {
                info!("shutdown requested");
                break Ok(());
            }
            rate.wait();
            let calibrations = self.stats.calibrations + self.stats.calibration_failures;
            match self.tick(source, sink, trigger) {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
            if self.stats.calibrations + self.stats.calibration_failures != calibrations {
                rate.reset();
            }
        };

        self.stats.overruns += rate.overruns();
        let flushed = sink.flush();
        info!(stats = ?self.stats, "streaming stopped");
        result.and(flushed).map(|()| self.stats)
    }

    /// Emit precomputed joint snapshots at the configured rate, cycling
    /// through them `passes` times (forever when `None`) or until `shutdown`
    /// is raised.
    ///
    /// Every snapshot must name exactly the tree's links.
    pub fn run_playback<K>(
        &mut self,
        frames: &[PoseSnapshot],
        sink: &mut K,
        passes: Option<usize>,
        shutdown: &AtomicBool,
    ) -> Result<PipelineStats, MocapError>
    where
        K: PoseSink + ?Sized,
    {
        if frames.is_empty() {
            return Err(MocapError::EmptyLog("no frames to play back".into()));
        }
        let mut rate = FixedRate::new(self.config.fps, self.config.timing)?;
        info!(
            session = %self.session_id,
            frames = frames.len(),
            passes = ?passes,
            "playback started"
        );

        let mut pass = 0usize;
        'playback: while passes.is_none_or(|n| pass < n) {
            for snapshot in frames {
                if shutdown.load(Ordering::Acquire) {
                    break 'playback;
                }
                rate.wait();
                self.tree.apply_snapshot(snapshot)?;
                let pose = self.pose_frame();
                sink.emit(&pose)?;
                self.stats.frames_emitted += 1;
                self.log_progress();
            }
            pass += 1;
        }

        self.stats.overruns += rate.overruns();
        sink.flush()?;
        info!(stats = ?self.stats, "playback stopped");
        Ok(self.stats)
    }

    /// Drive the pipeline over `source` as fast as possible and collect the
    /// joint snapshot of every emitted frame.
    pub fn record<S>(&mut self, source: &mut S) -> Result<Vec<PoseSnapshot>, MocapError>
    where
        S: FrameSource + ?Sized,
    {
        let mut sink = MemorySink::new();
        while self.tick(source, &mut sink, &mut NeverTrigger)? {}
        let frames: Vec<PoseSnapshot> = sink.into_frames().into_iter().map(|f| f.joints).collect();
        info!(frames = frames.len(), "recording finished");
        Ok(frames)
    }

    // ── internal helpers ─────────────────────────────────────────────────────

    fn without_ignored(&self, readings: &Readings) -> Readings {
        if self.config.ignored_links.is_empty() {
            return readings.clone();
        }
        readings
            .iter()
            .filter(|(name, _)| !self.config.ignored_links.contains(*name))
            .map(|(name, global)| (name.clone(), *global))
            .collect()
    }

    /// Drop readings that name no link, counting them as skipped.
    fn known_readings(&mut self, mut readings: Readings) -> Readings {
        let unknown: Vec<String> = readings
            .keys()
            .filter(|name| !self.tree.contains(name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            for name in &unknown {
                readings.remove(name);
            }
            self.stats.skipped_readings += unknown.len() as u64;
            warn!(links = ?unknown, "calibration readings for unknown links skipped");
        }
        readings
    }

    fn calibrate_or_keep(&mut self, frame: &SensorFrame) {
        if let Err(e) = self.calibrate(&frame.readings) {
            warn!(error = %e, "calibration failed; keeping previous offsets");
        }
    }

    fn countdown(&self) {
        info!("calibration requested; hold the reference pose");
        for remaining in (1..=self.config.calibration_countdown).rev() {
            info!(remaining, "calibrating");
            std::thread::sleep(self.config.countdown_interval());
        }
    }

    fn pose_frame(&mut self) -> PoseFrame {
        let frame = PoseFrame {
            header: FrameHeader::new(self.session_id, self.sequence),
            joints: self.tree.snapshot(),
            world: self.tree.world_snapshot(),
        };
        self.sequence += 1;
        frame
    }

    fn log_progress(&self) {
        let every = self.config.log_every_frames;
        if every > 0 && self.stats.frames_emitted % every == 0 {
            info!(
                frames = self.stats.frames_emitted,
                skipped = self.stats.skipped_readings,
                calibrations = self.stats.calibrations,
                "streaming progress"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
