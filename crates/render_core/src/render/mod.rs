//! # Rendering Core
//!
//! GPU resources and frame synchronization for a Vulkan-style renderer.
//!
//! ## Architecture
//!
//! - **Device**: adapter selection, logical device, queues, one-shot commands
//! - **Resources**: buffers, images, descriptors, pipelines, render passes
//! - **SwapChain**: presentable images plus the per-frame sync objects
//! - **Renderer**: acquire/record/submit/present with swapchain recreation
//! - **RenderSystem**: global UBOs and the scene pipeline on top of the renderer
//!
//! Everything talks to the graphics API through [`backends::GpuDevice`], so
//! the same code runs on Vulkan and on the headless simulation used in tests.
//! Resources release their handles on drop; at most
//! [`swapchain::MAX_FRAMES_IN_FLIGHT`] frames are ever in flight.

pub mod backends;
pub mod buffer;
pub mod camera;
pub mod commands;
pub mod descriptors;
pub mod device;
pub mod errors;
pub mod image;
pub mod pipeline;
pub mod render_pass;
pub mod render_system;
pub mod renderer;
pub mod swapchain;
pub mod sync;
pub mod vertex;
pub mod window;

pub use buffer::Buffer;
pub use camera::Camera;
pub use commands::{CommandPool, CommandRecorder};
pub use descriptors::{
    DescriptorPool, DescriptorPoolBuilder, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter,
};
pub use device::Device;
pub use errors::{DescriptorError, RenderError, RenderResult};
pub use pipeline::{GraphicsPipeline, PipelineConfigInfo, PipelineLayout, ShaderModule};
pub use render_system::{Drawable, FrameContext, GlobalUbo, PushConstantData, RenderSystem};
pub use renderer::Renderer;
pub use swapchain::{SwapChain, MAX_FRAMES_IN_FLIGHT};
pub use vertex::Vertex;
pub use window::{GlfwWindow, SurfaceProvider};
