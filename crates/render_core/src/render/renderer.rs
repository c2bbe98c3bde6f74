//! Frame loop: acquire, record, submit, present
//!
//! The [`Renderer`] owns the swapchain and one primary command buffer per
//! frame in flight, tracks whether a frame is in progress, and decides when
//! the swapchain has to be rebuilt. Frame and image indices are plain fields
//! of the renderer, so several renderers can coexist (tests create many).

use std::sync::Arc;

use super::backends::{
    AcquireOutcome, ClearValue, CommandBufferHandle, CommandBufferUsage, Extent2D,
    RenderPassHandle, Rect2D, SwapchainStatus, Viewport,
};
use super::commands::{CommandPool, CommandRecorder};
use super::device::Device;
use super::errors::{RenderError, RenderResult};
use super::swapchain::{SwapChain, MAX_FRAMES_IN_FLIGHT};
use super::window::SurfaceProvider;

/// Drives one frame at a time through the swapchain
pub struct Renderer {
    swap_chain: SwapChain,
    command_pool: CommandPool,
    command_buffers: Vec<CommandBufferHandle>,
    device: Arc<Device>,
    clear_color: [f32; 4],
    current_image_index: u32,
    current_frame_index: usize,
    is_frame_started: bool,
}

impl Renderer {
    /// Create the swapchain and per-frame command buffers
    ///
    /// Blocks on window events while the window has no area.
    pub fn new(
        device: Arc<Device>,
        window: &mut dyn SurfaceProvider,
        clear_color: [f32; 4],
    ) -> RenderResult<Self> {
        let extent = wait_for_nonzero_extent(window);
        let swap_chain = SwapChain::new(&device, extent)?;

        let command_pool =
            CommandPool::new(Arc::clone(device.gpu()), device.adapter().graphics_family)?;
        let command_buffers = command_pool.allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)?;

        Ok(Self {
            swap_chain,
            command_pool,
            command_buffers,
            device,
            clear_color,
            current_image_index: 0,
            current_frame_index: 0,
            is_frame_started: false,
        })
    }

    /// Acquire an image and start recording the frame's command buffer
    ///
    /// Returns `None` when the swapchain was out of date; it has been
    /// recreated and the caller must skip this frame.
    pub fn begin_frame(
        &mut self,
        window: &mut dyn SurfaceProvider,
    ) -> RenderResult<Option<CommandBufferHandle>> {
        if self.is_frame_started {
            return Err(RenderError::FrameState(
                "cannot begin a frame while one is in progress",
            ));
        }

        match self.swap_chain.acquire_next_image()? {
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                // the new chain picks up any pending resize
                window.reset_resized_flag();
                self.recreate_swap_chain(window)?;
                return Ok(None);
            }
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::trace!("Acquired image {image_index} from a suboptimal swapchain");
                }
                self.current_image_index = image_index;
            }
        }

        let command_buffer = self.command_buffers[self.current_frame_index];
        self.device
            .gpu()
            .begin_command_buffer(command_buffer, CommandBufferUsage::empty())?;
        self.is_frame_started = true;
        Ok(Some(command_buffer))
    }

    /// Finish recording, submit and present
    ///
    /// Recreates the swapchain if presentation reported it suboptimal or
    /// out of date, or if the window was resized.
    pub fn end_frame(&mut self, window: &mut dyn SurfaceProvider) -> RenderResult<()> {
        let command_buffer = self.current_command_buffer()?;
        self.is_frame_started = false;
        self.device.gpu().end_command_buffer(command_buffer)?;

        let status = self
            .swap_chain
            .submit_command_buffers(&[command_buffer], self.current_image_index)?;
        self.current_frame_index = (self.current_frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

        if status != SwapchainStatus::Optimal || window.was_resized() {
            log::debug!("Recreating swapchain after present ({status:?})");
            window.reset_resized_flag();
            self.recreate_swap_chain(window)?;
        }
        Ok(())
    }

    /// Begin the swapchain render pass with a full-extent viewport and scissor
    pub fn begin_swap_chain_render_pass(&self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        self.check_frame_command_buffer(command_buffer)?;
        let framebuffer = self
            .swap_chain
            .framebuffer(self.current_image_index as usize)
            .ok_or_else(|| RenderError::invalid_operation("acquired image has no framebuffer"))?;

        let extent = self.swap_chain.extent();
        let render_area = Rect2D {
            offset: (0, 0),
            extent,
        };
        let clear_values = [
            ClearValue::Color(self.clear_color),
            ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            },
        ];

        let recorder = CommandRecorder::new(self.device.gpu().as_ref(), command_buffer);
        recorder.begin_render_pass(
            self.swap_chain.render_pass(),
            framebuffer,
            render_area,
            &clear_values,
        );
        recorder.set_viewport(&full_viewport(extent));
        recorder.set_scissor(&render_area);
        Ok(())
    }

    /// End the swapchain render pass
    pub fn end_swap_chain_render_pass(&self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        self.check_frame_command_buffer(command_buffer)?;
        CommandRecorder::new(self.device.gpu().as_ref(), command_buffer).end_render_pass();
        Ok(())
    }

    /// Rebuild the swapchain for the current window size
    ///
    /// Waits until the window has a nonzero size and the device is idle.
    /// Fails if the new chain picked different image or depth formats,
    /// since pipelines built against the old render pass are not rebuilt.
    pub fn recreate_swap_chain(&mut self, window: &mut dyn SurfaceProvider) -> RenderResult<()> {
        let extent = wait_for_nonzero_extent(window);
        self.device.wait_idle()?;

        let swap_chain = SwapChain::with_previous(&self.device, extent, &self.swap_chain)?;
        if !swap_chain.compare_swap_formats(&self.swap_chain) {
            return Err(RenderError::SwapChainFormatChanged);
        }
        self.swap_chain = swap_chain;
        log::debug!("Swapchain recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn check_frame_command_buffer(&self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        if self.current_command_buffer()? != command_buffer {
            return Err(RenderError::invalid_operation(
                "render pass on a command buffer from a different frame",
            ));
        }
        Ok(())
    }

    /// Frame slot of the frame in progress
    pub fn frame_index(&self) -> RenderResult<usize> {
        if !self.is_frame_started {
            return Err(RenderError::FrameState("no frame in progress"));
        }
        Ok(self.current_frame_index)
    }

    /// Command buffer of the frame in progress
    pub fn current_command_buffer(&self) -> RenderResult<CommandBufferHandle> {
        if !self.is_frame_started {
            return Err(RenderError::FrameState("no frame in progress"));
        }
        Ok(self.command_buffers[self.current_frame_index])
    }

    /// Whether a frame is between `begin_frame` and `end_frame`
    pub fn is_frame_in_progress(&self) -> bool {
        self.is_frame_started
    }

    /// Aspect ratio of the swapchain images
    pub fn aspect_ratio(&self) -> f32 {
        self.swap_chain.extent_aspect_ratio()
    }

    /// Render pass that pipelines must be compatible with
    pub fn swap_chain_render_pass(&self) -> RenderPassHandle {
        self.swap_chain.render_pass()
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.swap_chain.image_count()
    }

    /// Current swapchain
    pub fn swap_chain(&self) -> &SwapChain {
        &self.swap_chain
    }

    /// Device the renderer draws with
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Per-frame command buffers, indexed by frame slot
    pub fn command_buffers(&self) -> &[CommandBufferHandle] {
        &self.command_buffers
    }

    /// Pool the per-frame command buffers come from
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // in-flight frames still reference the swapchain and command buffers
        if let Err(err) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle while dropping renderer: {err}");
        }
    }
}

fn wait_for_nonzero_extent(window: &mut dyn SurfaceProvider) -> Extent2D {
    let mut extent = window.extent();
    while extent.is_zero() {
        window.wait_events();
        extent = window.extent();
    }
    extent
}

#[allow(clippy::cast_precision_loss)]
fn full_viewport(extent: Extent2D) -> Viewport {
    Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessInstance, HeadlessSurface, RecordedCommand};

    fn setup() -> (Renderer, HeadlessSurface, Arc<HeadlessInstance>) {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
        let device = Arc::new(Device::new(instance.clone()).unwrap());
        let mut window = surface.clone();
        let renderer = Renderer::new(device, &mut window, [0.0, 0.0, 0.0, 1.0]).unwrap();
        (renderer, surface, instance)
    }

    #[test]
    fn test_frame_state_is_enforced() {
        let (mut renderer, mut window, _) = setup();
        assert!(matches!(
            renderer.end_frame(&mut window),
            Err(RenderError::FrameState(_))
        ));
        assert!(renderer.frame_index().is_err());

        renderer.begin_frame(&mut window).unwrap().unwrap();
        assert!(renderer.is_frame_in_progress());
        assert!(matches!(
            renderer.begin_frame(&mut window),
            Err(RenderError::FrameState(_))
        ));
        renderer.end_frame(&mut window).unwrap();
        assert!(!renderer.is_frame_in_progress());
    }

    #[test]
    fn test_render_pass_recording() {
        let (mut renderer, mut window, instance) = setup();
        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        renderer.begin_swap_chain_render_pass(command_buffer).unwrap();
        renderer.end_swap_chain_render_pass(command_buffer).unwrap();

        let commands = instance.last_device().unwrap().recorded_commands(command_buffer);
        assert!(matches!(
            &commands[0],
            RecordedCommand::BeginRenderPass { clear_values, .. } if clear_values.len() == 2
        ));
        assert!(matches!(commands[1], RecordedCommand::SetViewport(_)));
        assert!(matches!(commands[2], RecordedCommand::SetScissor(_)));
        assert!(matches!(commands[3], RecordedCommand::EndRenderPass));
        renderer.end_frame(&mut window).unwrap();
    }

    #[test]
    fn test_render_pass_rejects_foreign_command_buffer() {
        let (mut renderer, mut window, _) = setup();
        renderer.begin_frame(&mut window).unwrap().unwrap();
        let other = CommandBufferHandle::from_raw(12345);
        assert!(matches!(
            renderer.begin_swap_chain_render_pass(other),
            Err(RenderError::InvalidOperation { .. })
        ));
        renderer.end_frame(&mut window).unwrap();
    }

    #[test]
    fn test_aspect_ratio_follows_window() {
        let (renderer, _, _) = setup();
        assert!((renderer.aspect_ratio() - 800.0 / 600.0).abs() < f32::EPSILON);
    }
}
