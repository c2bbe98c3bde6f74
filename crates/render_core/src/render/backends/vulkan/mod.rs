//! Vulkan backend built on `ash`
//!
//! [`VulkanInstance`] owns the entry point, instance, optional debug
//! messenger and window surface. [`VulkanDevice`] owns the logical device and
//! swapchain loader and keeps the instance alive through a shared handle, so
//! the instance is destroyed only after the last device.

mod convert;
mod device;
mod instance;

use ash::vk;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;

use crate::render::window::WindowResult;

/// A window that can host a Vulkan surface
pub trait VulkanSurfaceSource {
    /// Instance extensions the window system needs
    fn required_instance_extensions(&self) -> WindowResult<Vec<String>>;

    /// Create a presentation surface for `instance`
    fn create_surface(&mut self, instance: &ash::Instance) -> WindowResult<vk::SurfaceKHR>;
}
