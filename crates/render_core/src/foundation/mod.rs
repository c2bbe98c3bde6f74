//! Foundation utilities shared by the render core
//!
//! Logging setup and the math types used for camera and transform data.

pub mod logging;
pub mod math;
