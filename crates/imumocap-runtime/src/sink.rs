//! Pose output.

use std::io::Write;

use imumocap_kinematics::PoseSnapshot;
use imumocap_types::{FrameHeader, MocapError};
use serde::{Deserialize, Serialize};

/// One emitted frame: every link's local joint and world pose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseFrame {
    pub header: FrameHeader,
    /// Local joint per link, pre-order.
    pub joints: PoseSnapshot,
    /// World pose per link, pre-order.
    pub world: PoseSnapshot,
}

/// Consumer of emitted pose frames (viewer connection, file, test buffer).
pub trait PoseSink {
    /// Deliver one frame.  An error ends the run.
    fn emit(&mut self, frame: &PoseFrame) -> Result<(), MocapError>;

    fn flush(&mut self) -> Result<(), MocapError> {
        Ok(())
    }
}

impl<K: PoseSink + ?Sized> PoseSink for &mut K {
    fn emit(&mut self, frame: &PoseFrame) -> Result<(), MocapError> {
        (**self).emit(frame)
    }

    fn flush(&mut self) -> Result<(), MocapError> {
        (**self).flush()
    }
}

/// Writes each frame as one line of JSON and flushes it immediately.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PoseSink for JsonLinesSink<W> {
    fn emit(&mut self, frame: &PoseFrame) -> Result<(), MocapError> {
        serde_json::to_writer(&mut self.writer, frame)
            .map_err(|e| MocapError::Sink(format!("failed to encode frame: {e}")))?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| MocapError::Sink(format!("failed to write frame: {e}")))
    }

    fn flush(&mut self) -> Result<(), MocapError> {
        self.writer
            .flush()
            .map_err(|e| MocapError::Sink(e.to_string()))
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Vec<PoseFrame>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[PoseFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<PoseFrame> {
        self.frames
    }
}

impl PoseSink for MemorySink {
    fn emit(&mut self, frame: &PoseFrame) -> Result<(), MocapError> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imumocap_kinematics::Transform;
    use uuid::Uuid;

    fn frame(sequence: u64) -> PoseFrame {
        let joints: PoseSnapshot = [
            ("pelvis".to_string(), Transform::from_translation(0.0, 0.9, 0.0)),
            ("left_thigh".to_string(), Transform::rot_x(-20.0)),
        ]
        .into_iter()
        .collect();
        PoseFrame {
            header: FrameHeader::new(Uuid::new_v4(), sequence),
            world: joints.clone(),
            joints,
        }
    }

    #[test]
    fn json_lines_writes_one_parsable_line_per_frame() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&frame(0)).unwrap();
        sink.emit(&frame(1)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: PoseFrame = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.header.sequence, 1);
        assert_eq!(parsed.joints.names().collect::<Vec<_>>(), ["pelvis", "left_thigh"]);
        assert!(parsed.joints.get("left_thigh").unwrap().approx_eq(&Transform::rot_x(-20.0), 1e-12));
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_a_sink_error() {
        let mut sink = JsonLinesSink::new(BrokenPipe);
        assert!(matches!(sink.emit(&frame(0)), Err(MocapError::Sink(_))));
    }

    #[test]
    fn memory_sink_keeps_frames() {
        let mut sink = MemorySink::new();
        sink.emit(&frame(4)).unwrap();
        assert_eq!(sink.frames().len(), 1);
        assert_eq!(sink.into_frames()[0].header.sequence, 4);
    }
}
