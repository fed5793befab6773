//! `imumocap-solvers` – per-frame corrections applied around the tree.
//!
//! # Modules
//!
//! - [`heading`] – [`HeadingSolver`][heading::HeadingSolver]: measures the
//!   yaw of a reference sensor and removes it from every reading so the
//!   model faces world +Z.
//! - [`calibration`] – [`calibrate`][calibration::calibrate]: stores per-link
//!   sensor mounting offsets while the subject holds the reference pose.
//! - [`floor`] – [`solve_floor`][floor::solve_floor]: shifts the posed body
//!   vertically so its lowest link touches `y = 0`.
//!
//! A streaming frame runs them in this order: heading correction on the raw
//! readings, joint driving through the tree's calibration offsets, then the
//! floor contact.

pub mod calibration;
pub mod floor;
pub mod heading;

pub use calibration::{CalibrationReport, calibrate, calibration_offset};
pub use floor::{FloorContact, solve_floor};
pub use heading::{HeadingSolver, heading_yaw};
