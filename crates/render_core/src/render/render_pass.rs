//! Render pass and framebuffer wrappers with RAII cleanup

use std::sync::Arc;

use super::backends::{
    Extent2D, Format, FramebufferDesc, FramebufferHandle, GpuDevice, ImageLayout,
    ImageViewHandle, RenderPassDesc, RenderPassHandle,
};
use super::errors::RenderResult;

/// Single-subpass render pass with one color and one depth attachment
pub struct RenderPass {
    gpu: Arc<dyn GpuDevice>,
    render_pass: RenderPassHandle,
}

impl RenderPass {
    /// Forward pass whose color attachment ends ready for presentation
    ///
    /// Both attachments are cleared on load; depth is not stored.
    pub fn new_forward_pass(
        gpu: Arc<dyn GpuDevice>,
        color_format: Format,
        depth_format: Format,
    ) -> RenderResult<Self> {
        let render_pass = gpu.create_render_pass(&RenderPassDesc {
            color_format,
            depth_format,
            color_final_layout: ImageLayout::PresentSrc,
        })?;
        Ok(Self { gpu, render_pass })
    }

    /// Render pass handle
    pub fn handle(&self) -> RenderPassHandle {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.gpu.destroy_render_pass(self.render_pass);
    }
}

/// Framebuffer wrapper
pub struct Framebuffer {
    gpu: Arc<dyn GpuDevice>,
    framebuffer: FramebufferHandle,
}

impl Framebuffer {
    /// Create a framebuffer over `attachments` in render pass order
    pub fn new(
        gpu: Arc<dyn GpuDevice>,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> RenderResult<Self> {
        let framebuffer = gpu.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments: attachments.to_vec(),
            extent,
        })?;
        Ok(Self { gpu, framebuffer })
    }

    /// Framebuffer handle
    pub fn handle(&self) -> FramebufferHandle {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.gpu.destroy_framebuffer(self.framebuffer);
    }
}
