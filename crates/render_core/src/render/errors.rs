//! Render core errors

use std::path::PathBuf;

use thiserror::Error;

use super::backends::{BackendError, ImageLayout, MemoryPropertyFlags};
use super::window::WindowError;
use crate::config::ConfigError;

/// Result type for render core operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors raised by the render core
///
/// Everything here is fatal for the renderer except what the frame loop
/// already handles internally (out-of-date swapchains) and
/// [`DescriptorError::PoolExhausted`], which callers may recover from.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Graphics API call failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// No adapter satisfies the device requirements
    #[error("No suitable GPU adapter found")]
    NoSuitableAdapter,

    /// Instance or surface setup failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No memory type matches the filter and properties
    #[error("No suitable memory type (type bits {type_bits:#b}, properties {properties:?})")]
    NoSuitableMemoryType {
        /// Memory type bitmask from the resource requirements
        type_bits: u32,
        /// Requested property flags
        properties: MemoryPropertyFlags,
    },

    /// None of the candidate formats supports the requested features
    #[error("No supported format among candidates")]
    NoSupportedFormat,

    /// Layout transition the core does not know how to synchronize
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        /// Current layout
        old: ImageLayout,
        /// Requested layout
        new: ImageLayout,
    },

    /// Misuse of an object (double map, out-of-range write, ...)
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// What went wrong
        reason: String,
    },

    /// Frame loop method called in the wrong state
    #[error("Frame state error: {0}")]
    FrameState(&'static str),

    /// Recreated swapchain picked different image or depth formats
    #[error("Swap chain image or depth format has changed")]
    SwapChainFormatChanged,

    /// Shader bytecode file does not exist
    #[error("Shader not found: {}", path.display())]
    ShaderNotFound {
        /// Path that was tried
        path: PathBuf,
    },

    /// Pipeline creation without layout or render pass
    #[error("Missing pipeline configuration: {0}")]
    MissingPipelineConfig(&'static str),

    /// Descriptor management failed
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Window system failed
    #[error(transparent)]
    Window(#[from] WindowError),

    /// File IO failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Renderer configuration is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RenderError {
    /// Build an [`RenderError::InvalidOperation`]
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}

/// Descriptor layout, pool and writer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// A layout declares the same binding index twice
    #[error("Binding {0} already in use")]
    DuplicateBinding(u32),

    /// A write targets a binding the layout does not declare
    #[error("Layout does not contain binding {0}")]
    UnknownBinding(u32),

    /// A single-descriptor write targets an array binding
    #[error("Binding {binding} expects {count} descriptors, single writes need exactly one")]
    ArrayBindingUnsupported {
        /// Binding index
        binding: u32,
        /// Declared descriptor count
        count: u32,
    },

    /// The pool has no room left
    #[error("Descriptor pool exhausted")]
    PoolExhausted,

    /// Graphics API call failed
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
