//! Replay of logged sensor data.
//!
//! Each device log carries its own sample clock.  [`ReplaySource`] aligns
//! them on a common grid at the requested rate, covering the window where
//! every device has data: from the latest first timestamp (inclusive) to the
//! earliest last timestamp (exclusive).  Orientations between two samples
//! are spherically interpolated.

use imumocap_kinematics::{Readings, Transform};
use imumocap_types::MocapError;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::source::{FrameSource, SensorFrame};

/// Quaternion samples recorded by one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLog {
    /// Link the device is strapped to.
    pub name: String,
    /// Sample times in microseconds, strictly increasing.
    pub timestamps_us: Vec<u64>,
    /// Orientation per sample, `[w, x, y, z]`.
    pub quaternions: Vec<[f64; 4]>,
}

impl DeviceLog {
    pub fn new(
        name: impl Into<String>,
        timestamps_us: Vec<u64>,
        quaternions: Vec<[f64; 4]>,
    ) -> Self {
        Self {
            name: name.into(),
            timestamps_us,
            quaternions,
        }
    }

    fn first_us(&self) -> Option<u64> {
        self.timestamps_us.first().copied()
    }

    fn last_us(&self) -> Option<u64> {
        self.timestamps_us.last().copied()
    }
}

/// Validated log with orientations converted once.
#[derive(Debug, Clone)]
struct Track {
    name: String,
    times: Vec<f64>,
    orientations: Vec<UnitQuaternion<f64>>,
    cursor: usize,
}

impl Track {
    fn from_log(log: &DeviceLog) -> Result<Self, MocapError> {
        if log.timestamps_us.is_empty() {
            return Err(MocapError::EmptyLog(log.name.clone()));
        }
        if log.timestamps_us.len() != log.quaternions.len() {
            return Err(MocapError::Source(format!(
                "log '{}' has {} timestamps but {} quaternions",
                log.name,
                log.timestamps_us.len(),
                log.quaternions.len()
            )));
        }
        if log.timestamps_us.windows(2).any(|w| w[1] <= w[0]) {
            return Err(MocapError::Source(format!(
                "log '{}' timestamps are not strictly increasing",
                log.name
            )));
        }

        let orientations = log
            .quaternions
            .iter()
            .map(|&[w, x, y, z]| {
                // Validates the norm before normalising.
                Transform::from_quaternion(w, x, y, z)?;
                Ok(UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)))
            })
            .collect::<Result<Vec<_>, MocapError>>()?;

        Ok(Self {
            name: log.name.clone(),
            times: log.timestamps_us.iter().map(|&t| t as f64).collect(),
            orientations,
            cursor: 0,
        })
    }

    /// Orientation at `t`, which must lie inside the track and not go
    /// backwards between calls.
    fn sample(&mut self, t: f64) -> UnitQuaternion<f64> {
        let last = self.times.len() - 1;
        while self.cursor < last && self.times[self.cursor + 1] <= t {
            self.cursor += 1;
        }
        let i = self.cursor;
        if i == last {
            return self.orientations[i];
        }
        let (t0, t1) = (self.times[i], self.times[i + 1]);
        let alpha = ((t - t0) / (t1 - t0)).clamp(0.0, 1.0);
        let (a, b) = (&self.orientations[i], &self.orientations[i + 1]);
        a.try_slerp(b, alpha, 1e-12)
            .unwrap_or_else(|| a.nlerp(b, alpha))
    }
}

/// Frame source over resampled device logs.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    tracks: Vec<Track>,
    start_us: f64,
    end_us: f64,
    period_us: f64,
    frame_count: usize,
    next: usize,
}

impl ReplaySource {
    /// Align `logs` on a grid of `fps` samples per second.
    ///
    /// Fails with [`MocapError::EmptyLog`] when there are no logs, a log has
    /// no samples, or the logs do not overlap in time.
    pub fn new(logs: &[DeviceLog], fps: u32) -> Result<Self, MocapError> {
        if fps == 0 {
            return Err(MocapError::InvalidConfig("fps must be positive".into()));
        }
        if logs.is_empty() {
            return Err(MocapError::EmptyLog("no device logs".into()));
        }
        let tracks = logs
            .iter()
            .map(Track::from_log)
            .collect::<Result<Vec<_>, _>>()?;

        let start = logs.iter().filter_map(DeviceLog::first_us).max();
        let end = logs.iter().filter_map(DeviceLog::last_us).min();
        let (start_us, end_us) = match (start, end) {
            (Some(s), Some(e)) if s < e => (s as f64, e as f64),
            _ => {
                return Err(MocapError::EmptyLog(
                    "device logs do not overlap in time".into(),
                ));
            }
        };

        let period_us = 1e6 / f64::from(fps);
        let frame_count = ((end_us - start_us) / period_us).ceil() as usize;
        info!(
            devices = tracks.len(),
            frames = frame_count,
            start_us,
            end_us,
            "replay window resampled"
        );

        Ok(Self {
            tracks,
            start_us,
            end_us,
            period_us,
            frame_count,
            next: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// `[start, end)` of the common window, microseconds.
    pub fn window_us(&self) -> (f64, f64) {
        (self.start_us, self.end_us)
    }

    /// Grid time of frame `index`, microseconds.
    pub fn timestamp_us(&self, index: usize) -> f64 {
        self.start_us + index as f64 * self.period_us
    }

    /// Restart from the first frame.
    pub fn rewind(&mut self) {
        self.next = 0;
        for track in &mut self.tracks {
            track.cursor = 0;
        }
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<SensorFrame>, MocapError> {
        if self.next >= self.frame_count {
            return Ok(None);
        }
        let t = self.timestamp_us(self.next);
        self.next += 1;

        let readings: Readings = self
            .tracks
            .iter_mut()
            .map(|track| {
                let q = track.sample(t);
                let global = Transform::from_parts(q.to_rotation_matrix(), Vector3::zeros());
                (track.name.clone(), global)
            })
            .collect();
        Ok(Some(SensorFrame::new(readings)))
    }
}
