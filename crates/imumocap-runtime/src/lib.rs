//! `imumocap-runtime` – the streaming loop and its collaborators.
//!
//! # Modules
//!
//! - [`pipeline`] – [`StreamingPipeline`][pipeline::StreamingPipeline]: owns
//!   the [`KinematicTree`][imumocap_kinematics::KinematicTree] and runs
//!   heading correction, joint driving and floor contact for every frame,
//!   with calibration on request.  Also records frames and plays them back.
//! - [`source`] – [`FrameSource`][source::FrameSource] with in-memory and
//!   channel-backed implementations, and the
//!   [`RecalibrationTrigger`][source::RecalibrationTrigger] polled each tick.
//! - [`replay`] – [`ReplaySource`][replay::ReplaySource]: device logs
//!   resampled on a common clock.
//! - [`sink`] – [`PoseSink`][sink::PoseSink] with JSON-lines and in-memory
//!   implementations.
//! - [`rate`] – [`FixedRate`][rate::FixedRate]: deadline-based loop pacing.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber.
//!
//! # Threading
//!
//! The pipeline runs on a single thread and owns the tree outright.  Hardware
//! polling happens elsewhere and hands complete frames over through
//! [`ChannelSource`][source::ChannelSource].

pub mod pipeline;
pub mod rate;
pub mod replay;
pub mod sink;
pub mod source;
pub mod telemetry;

pub use pipeline::{PipelineStats, StreamConfig, StreamingPipeline};
pub use rate::{FixedRate, TimingMode};
pub use replay::{DeviceLog, ReplaySource};
pub use sink::{JsonLinesSink, MemorySink, PoseFrame, PoseSink};
pub use source::{
    ChannelSource, FrameSource, NeverTrigger, RecalibrationTrigger, SensorFrame, VecSource,
};
pub use telemetry::init_tracing;
