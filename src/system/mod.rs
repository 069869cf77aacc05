//! Host inspection
//!
//! Detects hardware capabilities of the device the model runs on.

pub mod accelerator;

pub use accelerator::{detect_accelerator, probe, AcceleratorInfo};
