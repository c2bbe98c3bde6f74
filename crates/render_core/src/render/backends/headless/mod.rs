//! Headless backend
//!
//! A deterministic, in-process implementation of [`GpuInstance`] and
//! [`GpuDevice`] with no GPU or window system behind it. It enforces the
//! usage rules a validation layer would flag (waiting on a semaphore nobody
//! signals, resetting a fence still in flight, mapping memory twice, ...) as
//! errors, and counts what it is asked to do so tests can assert on the
//! frame-loop synchronization contract.
//!
//! [`GpuInstance`]: super::GpuInstance
//! [`GpuDevice`]: super::GpuDevice

mod device;
mod instance;
mod surface;

pub use device::{HeadlessDevice, HeadlessStats, RecordedCommand, ScriptedOutcome};
pub use instance::{HeadlessAdapter, HeadlessInstance, SWAPCHAIN_EXTENSION};
pub use surface::HeadlessSurface;
