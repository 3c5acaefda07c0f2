//! Testing utilities for camsignal
//!
//! Provides synthetic video so the full offer/answer path can run without
//! capture hardware.

pub mod synthetic_data;

pub use synthetic_data::{synthetic_video_frame, SYNTHETIC_DEVICE_ID};
