//! # Render Core
//!
//! GPU resource management and frame synchronization for a real-time
//! renderer on an explicit graphics API.
//!
//! ## Features
//!
//! - **Device setup**: adapter scoring, queue selection, memory type lookup
//! - **RAII resources**: buffers, images, descriptors and pipelines free themselves
//! - **Frames in flight**: two frames overlap, fenced per frame and per image
//! - **Swapchain recreation**: on resize, minimize and out-of-date surfaces
//! - **Headless backend**: the whole stack runs without a GPU for testing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use render_core::prelude::*;
//! use render_core::render::backends::vulkan::VulkanInstance;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplicationConfig::default();
//!     let mut window = GlfwWindow::new(&config.window)?;
//!     let instance = Arc::new(VulkanInstance::new(&mut window, &config.renderer)?);
//!     let mut system = RenderSystem::new(instance, &mut window, &config.renderer)?;
//!     let camera = Camera::new();
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         system.draw_scene(&mut window, Some(&camera), &[])?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for render core users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        core::{ApplicationConfig, RendererConfig, ShaderConfig, WindowConfig},
        foundation::math::{Mat4, Transform, Vec3},
        render::{
            Buffer, Camera, Device, Drawable, FrameContext, GlfwWindow, PushConstantData,
            RenderError, RenderResult, RenderSystem, Renderer, SurfaceProvider, Vertex,
            MAX_FRAMES_IN_FLIGHT,
        },
    };
}
