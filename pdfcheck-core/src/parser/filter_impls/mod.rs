//! PDF stream filter implementations
//!
//! Image filters whose payloads are checked rather than decoded.

pub mod dct;

pub use dct::{check_jpeg, repair_jpeg, JpegCheck, JpegProblem, JpegProblemKind, JpegRepair};
