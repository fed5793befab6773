use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A basis axis of a rotation or of the world frame.
///
/// The world convention used across the workspace is right-handed with
/// [`Axis::Y`] pointing up and [`Axis::Z`] as the model's forward axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    #[default]
    Z,
}

impl Axis {
    /// Column index of this axis in a rotation matrix.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = MocapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(MocapError::InvalidConfig(format!("unknown axis '{other}'"))),
        }
    }
}

/// Identifies one emitted frame of a streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameHeader {
    pub session_id: Uuid,
    /// Zero-based, increments once per emitted frame.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl FrameHeader {
    pub fn new(session_id: Uuid, sequence: u64) -> Self {
        Self {
            session_id,
            sequence,
            timestamp: Utc::now(),
        }
    }
}

/// Error type spanning model construction, name lookup, degenerate geometry
/// and the sensor/viewer collaborators.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MocapError {
    #[error("Duplicate link name: {0}")]
    DuplicateLink(String),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error("Missing link in pose snapshot: {0}")]
    MissingLink(String),

    #[error("Invalid rotation: {0}")]
    InvalidRotation(String),

    #[error("Degenerate heading: horizontal projection norm {horizontal_norm:e} is too small")]
    DegenerateHeading { horizontal_norm: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Empty sensor log: {0}")]
    EmptyLog(String),

    #[error("Frame source error: {0}")]
    Source(String),

    #[error("Pose sink error: {0}")]
    Sink(String),
}

impl MocapError {
    /// `true` for errors that a live streaming session should survive by
    /// skipping or freezing the affected value.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MocapError::UnknownLink(_) | MocapError::DegenerateHeading { .. }
        )
    }
}
