//! Frame acquisition and recalibration triggers.
//!
//! A [`FrameSource`] hands the pipeline one complete [`SensorFrame`] per tick.
//! Three sources are provided:
//!
//! - [`VecSource`] – precomputed frames, consumed in order.
//! - [`ChannelSource`] – frames pushed by a hardware-polling thread over a
//!   `crossbeam-channel`; each call drains to the newest frame.
//! - [`ReplaySource`][crate::replay::ReplaySource] – resampled device logs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use imumocap_kinematics::{Readings, Transform};
use imumocap_types::MocapError;
use tracing::debug;

/// One tick's worth of sensor data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorFrame {
    /// Global orientation per link name.
    pub readings: Readings,
    /// `true` when any sensor's button was pressed since the last frame.
    pub button_pressed: bool,
}

impl SensorFrame {
    pub fn new(readings: Readings) -> Self {
        Self {
            readings,
            button_pressed: false,
        }
    }

    pub fn with_button(mut self, pressed: bool) -> Self {
        self.button_pressed = pressed;
        self
    }

    /// Convenience constructor from `(name, orientation)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Transform)>) -> Self {
        Self::new(pairs.into_iter().map(|(n, t)| (n.to_string(), t)).collect())
    }
}

/// Produces sensor frames for the streaming pipeline.
pub trait FrameSource {
    /// Next frame, or `Ok(None)` once the source is exhausted.
    ///
    /// An `Err` ends the run.
    fn next_frame(&mut self) -> Result<Option<SensorFrame>, MocapError>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Result<Option<SensorFrame>, MocapError> {
        (**self).next_frame()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<SensorFrame>, MocapError> {
        (**self).next_frame()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VecSource
// ─────────────────────────────────────────────────────────────────────────────

/// Frames held in memory, yielded once each.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    frames: VecDeque<SensorFrame>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = SensorFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FromIterator<SensorFrame> for VecSource {
    fn from_iter<I: IntoIterator<Item = SensorFrame>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<SensorFrame>, MocapError> {
        Ok(self.frames.pop_front())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChannelSource
// ─────────────────────────────────────────────────────────────────────────────

/// Default time [`ChannelSource`] waits for a first frame before giving up
/// for this tick.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Receives frames from a polling thread.
///
/// Each call returns the newest frame available, discarding older ones; a
/// button press in any discarded frame is carried over so it is never lost.
/// When nothing new arrived within the timeout the previous frame is
/// repeated (sensors hold their last value), or an empty frame is returned
/// before the first one arrives.  The source ends once every sender is
/// dropped and the queue is empty.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<SensorFrame>,
    latest: Option<SensorFrame>,
    timeout: Duration,
}

impl ChannelSource {
    pub fn new(rx: Receiver<SensorFrame>) -> Self {
        Self {
            rx,
            latest: None,
            timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// Unbounded channel and the source reading from it.
    pub fn channel() -> (Sender<SensorFrame>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(rx))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn drain_into(&self, mut frame: SensorFrame) -> SensorFrame {
        let mut dropped = 0usize;
        for newer in self.rx.try_iter() {
            let pressed = frame.button_pressed || newer.button_pressed;
            frame = newer.with_button(pressed);
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "skipped stale sensor frames");
        }
        frame
    }
}

impl FrameSource for ChannelSource {
    fn next_frame(&mut self) -> Result<Option<SensorFrame>, MocapError> {
        let frame = match self.rx.recv_timeout(self.timeout) {
            Ok(first) => self.drain_into(first),
            Err(RecvTimeoutError::Timeout) => {
                let held = self
                    .latest
                    .clone()
                    .map(|f| f.with_button(false))
                    .unwrap_or_default();
                return Ok(Some(held));
            }
            Err(RecvTimeoutError::Disconnected) => return Ok(None),
        };
        self.latest = Some(frame.clone());
        Ok(Some(frame))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recalibration triggers
// ─────────────────────────────────────────────────────────────────────────────

/// External request to recalibrate, polled once per tick.
pub trait RecalibrationTrigger {
    /// `true` if a recalibration was requested since the last poll.
    fn poll(&mut self) -> bool;
}

impl<T: RecalibrationTrigger + ?Sized> RecalibrationTrigger for &mut T {
    fn poll(&mut self) -> bool {
        (**self).poll()
    }
}

/// A shared flag: setting it to `true` requests one recalibration and the
/// poll clears it again.
impl RecalibrationTrigger for Arc<AtomicBool> {
    fn poll(&mut self) -> bool {
        self.swap(false, Ordering::AcqRel)
    }
}

/// Trigger that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverTrigger;

impl RecalibrationTrigger for NeverTrigger {
    fn poll(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(yaw: f64) -> SensorFrame {
        SensorFrame::from_pairs([("pelvis", Transform::rot_y(yaw))])
    }

    #[test]
    fn vec_source_yields_in_order_then_ends() {
        let mut source: VecSource = [frame(0.0), frame(10.0)].into_iter().collect();
        assert_eq!(source.remaining(), 2);
        assert_eq!(source.next_frame().unwrap(), Some(frame(0.0)));
        assert_eq!(source.next_frame().unwrap(), Some(frame(10.0)));
        assert_eq!(source.next_frame().unwrap(), None);
    }

    #[test]
    fn channel_source_drains_to_newest_and_keeps_button() {
        let (tx, mut source) = ChannelSource::channel();
        tx.send(frame(0.0)).unwrap();
        tx.send(frame(10.0).with_button(true)).unwrap();
        tx.send(frame(20.0)).unwrap();

        let got = source.next_frame().unwrap().unwrap();
        assert_eq!(got.readings, frame(20.0).readings);
        assert!(got.button_pressed);
    }

    #[test]
    fn channel_source_repeats_last_frame_without_button() {
        let (tx, source) = ChannelSource::channel();
        let mut source = source.with_timeout(Duration::from_millis(5));

        // Nothing received yet: empty frame.
        assert_eq!(source.next_frame().unwrap(), Some(SensorFrame::default()));

        tx.send(frame(30.0).with_button(true)).unwrap();
        assert!(source.next_frame().unwrap().unwrap().button_pressed);

        let held = source.next_frame().unwrap().unwrap();
        assert_eq!(held.readings, frame(30.0).readings);
        assert!(!held.button_pressed);
        drop(tx);
    }

    #[test]
    fn channel_source_ends_when_senders_drop() {
        let (tx, mut source) = ChannelSource::channel();
        let producer = thread::spawn(move || {
            for i in 0..3 {
                tx.send(frame(i as f64)).unwrap();
            }
        });
        producer.join().unwrap();

        assert_eq!(source.next_frame().unwrap(), Some(frame(2.0)));
        assert_eq!(source.next_frame().unwrap(), None);
    }

    #[test]
    fn atomic_flag_trigger_fires_once() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut trigger = Arc::clone(&flag);
        assert!(!trigger.poll());
        flag.store(true, Ordering::Release);
        assert!(trigger.poll());
        assert!(!trigger.poll());
        assert!(!NeverTrigger.poll());
    }
}
