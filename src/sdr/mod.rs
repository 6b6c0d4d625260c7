//! Front-end side: raw capture and sample conditioning
//!
//! 1. Capture raw 8-bit IQ from rtl_sdr (or a recorded file)
//! 2. Convert byte pairs to complex samples via lookup table
//! 3. Remove DC bias with a streaming IIR blocker

pub mod capture;
mod convert;
mod dc_block;

pub use capture::{CaptureStats, SdrCapture, SdrConfig};
pub use convert::{normalize, IqDecoder, IqTable, TABLE_SIZE};
pub use dc_block::{DcBlocker, DEFAULT_ALPHA};
