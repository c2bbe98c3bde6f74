//! Presentable image chain and frame-in-flight synchronization
//!
//! A [`SwapChain`] owns the presentable images, one color view, depth
//! attachment and framebuffer per image, the single forward render pass,
//! and [`MAX_FRAMES_IN_FLIGHT`] sets of [`FrameSync`] objects. It is never
//! resized in place: the renderer builds a new chain (passing the old one
//! so the surface can hand over its images) and drops the old one.
//!
//! The host blocks in two places here. [`SwapChain::acquire_next_image`]
//! waits on the current slot's fence, which bounds queued GPU work to
//! [`MAX_FRAMES_IN_FLIGHT`] frames. [`SwapChain::submit_command_buffers`]
//! waits on whichever fence still owns the acquired image, so two frames
//! never render into the same image at once.

use std::sync::Arc;

use super::backends::{
    AcquireOutcome, ColorSpace, CommandBufferHandle, Extent2D, FenceHandle, Format, GpuDevice,
    ImageAspect, ImageHandle, PipelineStages, PresentMode, QueueHandle, RenderPassHandle,
    FramebufferHandle, SubmitInfo, SurfaceCapabilities, SurfaceFormat, SwapchainDesc,
    SwapchainHandle, SwapchainStatus, UNDEFINED_EXTENT,
};
use super::device::Device;
use super::errors::{RenderError, RenderResult};
use super::image::{DepthAttachment, ImageView};
use super::render_pass::{Framebuffer, RenderPass};
use super::sync::FrameSync;

/// Frames the host may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Preferred presentation format
pub const PREFERRED_SURFACE_FORMAT: SurfaceFormat =
    SurfaceFormat::new(Format::B8G8R8A8Srgb, ColorSpace::SrgbNonlinear);

/// Prefer 8-bit sRGB with an sRGB-nonlinear color space, else the first offered format
pub fn choose_swap_surface_format(formats: &[SurfaceFormat]) -> Option<SurfaceFormat> {
    formats
        .iter()
        .copied()
        .find(|format| *format == PREFERRED_SURFACE_FORMAT)
        .or_else(|| formats.first().copied())
}

/// Prefer mailbox; FIFO is always available so it is never looked for
pub fn choose_swap_present_mode(modes: &[PresentMode]) -> PresentMode {
    if modes.contains(&PresentMode::Mailbox) {
        PresentMode::Mailbox
    } else {
        PresentMode::Fifo
    }
}

/// Surface extent when defined, otherwise the window size clamped to the surface limits
pub fn choose_swap_extent(capabilities: &SurfaceCapabilities, window_extent: Extent2D) -> Extent2D {
    if capabilities.current_extent.width != UNDEFINED_EXTENT {
        return capabilities.current_extent;
    }
    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    Extent2D::new(
        window_extent.width.clamp(min.width, max.width),
        window_extent.height.clamp(min.height, max.height),
    )
}

/// One more than the minimum, capped by the maximum (zero means unbounded)
pub fn choose_image_count(capabilities: &SurfaceCapabilities) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

struct SurfaceSwapchain {
    gpu: Arc<dyn GpuDevice>,
    handle: SwapchainHandle,
}

impl Drop for SurfaceSwapchain {
    fn drop(&mut self) {
        self.gpu.destroy_swapchain(self.handle);
    }
}

/// Presentable images plus everything needed to render into them
pub struct SwapChain {
    // Field order is drop order: dependents first, the surface swapchain last.
    framebuffers: Vec<Framebuffer>,
    depth_attachments: Vec<DepthAttachment>,
    image_views: Vec<ImageView>,
    render_pass: RenderPass,
    frame_sync: Vec<FrameSync>,
    swapchain: SurfaceSwapchain,

    gpu: Arc<dyn GpuDevice>,
    graphics_queue: QueueHandle,
    present_queue: QueueHandle,
    images: Vec<ImageHandle>,
    images_in_flight: Vec<Option<FenceHandle>>,
    image_format: Format,
    depth_format: Format,
    extent: Extent2D,
    present_mode: PresentMode,
    current_frame: usize,
}

impl SwapChain {
    /// Create the first chain for a window of `window_extent`
    pub fn new(device: &Device, window_extent: Extent2D) -> RenderResult<Self> {
        Self::create(device, window_extent, None)
    }

    /// Create a replacement chain, handing `previous` to the surface
    pub fn with_previous(
        device: &Device,
        window_extent: Extent2D,
        previous: &SwapChain,
    ) -> RenderResult<Self> {
        Self::create(device, window_extent, Some(previous.swapchain.handle))
    }

    fn create(
        device: &Device,
        window_extent: Extent2D,
        old_swapchain: Option<SwapchainHandle>,
    ) -> RenderResult<Self> {
        let gpu = Arc::clone(device.gpu());
        let support = device.surface_support()?;

        let surface_format =
            choose_swap_surface_format(&support.formats).ok_or(RenderError::NoSupportedFormat)?;
        let present_mode = choose_swap_present_mode(&support.present_modes);
        let extent = choose_swap_extent(&support.capabilities, window_extent);
        let image_count = choose_image_count(&support.capabilities);

        // 1. the chain itself
        let handle = gpu.create_swapchain(&SwapchainDesc {
            min_image_count: image_count,
            surface_format,
            extent,
            present_mode,
            queue_family_indices: device.queue_family_indices().unique_families(),
            old_swapchain,
        })?;
        let swapchain = SurfaceSwapchain {
            gpu: Arc::clone(&gpu),
            handle,
        };
        let images = gpu.swapchain_images(handle)?;

        // 2. color views
        let image_views = images
            .iter()
            .map(|&image| {
                ImageView::new(Arc::clone(&gpu), image, surface_format.format, ImageAspect::COLOR)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        // 3. render pass
        let depth_format = device.find_depth_format()?;
        let render_pass =
            RenderPass::new_forward_pass(Arc::clone(&gpu), surface_format.format, depth_format)?;

        // 4. depth resources and framebuffers
        let depth_attachments = images
            .iter()
            .map(|_| DepthAttachment::new(device, extent, depth_format))
            .collect::<RenderResult<Vec<_>>>()?;
        let framebuffers = image_views
            .iter()
            .zip(&depth_attachments)
            .map(|(view, depth)| {
                Framebuffer::new(
                    Arc::clone(&gpu),
                    render_pass.handle(),
                    &[view.handle(), depth.view()],
                    extent,
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        // 5. per-frame synchronization
        let frame_sync = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::new(&gpu))
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?} {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            surface_format.color_space,
            present_mode
        );

        Ok(Self {
            framebuffers,
            depth_attachments,
            image_views,
            render_pass,
            frame_sync,
            swapchain,
            gpu,
            graphics_queue: device.graphics_queue(),
            present_queue: device.present_queue(),
            images_in_flight: vec![None; images.len()],
            images,
            image_format: surface_format.format,
            depth_format,
            extent,
            present_mode,
            current_frame: 0,
        })
    }

    /// Wait for the current slot's previous frame, then acquire an image
    ///
    /// The wait is unbounded. The outcome must be checked: an out-of-date
    /// chain has to be recreated before anything is rendered.
    pub fn acquire_next_image(&self) -> RenderResult<AcquireOutcome> {
        let sync = &self.frame_sync[self.current_frame];
        sync.in_flight.wait(u64::MAX)?;
        let outcome = self.gpu.acquire_next_image(
            self.swapchain.handle,
            u64::MAX,
            sync.image_available.handle(),
        )?;
        log::trace!("Acquire in frame slot {}: {:?}", self.current_frame, outcome);
        Ok(outcome)
    }

    /// Submit the frame's command buffers and present `image_index`
    ///
    /// Advances to the next frame slot once the present was queued.
    pub fn submit_command_buffers(
        &mut self,
        command_buffers: &[CommandBufferHandle],
        image_index: u32,
    ) -> RenderResult<SwapchainStatus> {
        let index = image_index as usize;
        let owner = *self.images_in_flight.get(index).ok_or_else(|| {
            RenderError::invalid_operation(format!(
                "image index {image_index} out of range for {} images",
                self.images.len()
            ))
        })?;
        if let Some(fence) = owner {
            self.gpu.wait_for_fences(&[fence], u64::MAX)?;
        }

        let sync = &self.frame_sync[self.current_frame];
        self.images_in_flight[index] = Some(sync.in_flight.handle());
        sync.in_flight.reset()?;

        let wait_semaphores = [sync.image_available.handle()];
        let signal_semaphores = [sync.render_finished.handle()];
        self.gpu.queue_submit(
            self.graphics_queue,
            &SubmitInfo {
                wait_semaphores: &wait_semaphores,
                wait_stages: &[PipelineStages::COLOR_ATTACHMENT_OUTPUT],
                command_buffers,
                signal_semaphores: &signal_semaphores,
            },
            Some(sync.in_flight.handle()),
        )?;

        let status = self.gpu.queue_present(
            self.present_queue,
            self.swapchain.handle,
            image_index,
            &signal_semaphores,
        )?;

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(status)
    }

    /// Same image and depth formats as `other`
    pub fn compare_swap_formats(&self, other: &SwapChain) -> bool {
        self.image_format == other.image_format && self.depth_format == other.depth_format
    }

    /// Forward render pass all framebuffers belong to
    pub fn render_pass(&self) -> RenderPassHandle {
        self.render_pass.handle()
    }

    /// Framebuffer of swapchain image `index`
    pub fn framebuffer(&self, index: usize) -> Option<FramebufferHandle> {
        self.framebuffers.get(index).map(Framebuffer::handle)
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image size in pixels
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Image width in pixels
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    /// Image height in pixels
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// Width over height
    #[allow(clippy::cast_precision_loss)]
    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    /// Color format of the presentable images
    pub fn image_format(&self) -> Format {
        self.image_format
    }

    /// Format of the depth attachments
    pub fn depth_format(&self) -> Format {
        self.depth_format
    }

    /// Present mode in use
    pub fn present_mode(&self) -> PresentMode {
        self.present_mode
    }

    /// Frame slot the next acquire uses
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Per-frame synchronization objects
    pub fn frame_sync(&self) -> &[FrameSync] {
        &self.frame_sync
    }

    /// Depth image of swapchain image `index`
    pub fn depth_image(&self, index: usize) -> Option<ImageHandle> {
        self.depth_attachments.get(index).map(DepthAttachment::image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32, current: Extent2D) -> SurfaceCapabilities {
        SurfaceCapabilities {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: Extent2D::new(100, 100),
            max_image_extent: Extent2D::new(1000, 800),
        }
    }

    const UNDEFINED: Extent2D = Extent2D {
        width: UNDEFINED_EXTENT,
        height: UNDEFINED_EXTENT,
    };

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            SurfaceFormat::new(Format::R8G8B8A8Unorm, ColorSpace::SrgbNonlinear),
            SurfaceFormat::new(Format::B8G8R8A8Srgb, ColorSpace::ExtendedSrgbLinear),
        ];
        assert_eq!(choose_swap_surface_format(&formats), Some(formats[0]));
        assert_eq!(choose_swap_surface_format(&[]), None);
    }

    #[test]
    fn test_surface_format_preference_regardless_of_position() {
        let formats = [
            SurfaceFormat::new(Format::R8G8B8A8Unorm, ColorSpace::SrgbNonlinear),
            SurfaceFormat::new(Format::B8G8R8A8Unorm, ColorSpace::SrgbNonlinear),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert_eq!(
            choose_swap_surface_format(&formats),
            Some(PREFERRED_SURFACE_FORMAT)
        );
    }

    #[test]
    fn test_present_mode_selection() {
        assert_eq!(
            choose_swap_present_mode(&[PresentMode::Fifo, PresentMode::Mailbox]),
            PresentMode::Mailbox
        );
        assert_eq!(
            choose_swap_present_mode(&[PresentMode::Immediate]),
            PresentMode::Fifo
        );
        assert_eq!(choose_swap_present_mode(&[]), PresentMode::Fifo);
    }

    #[test]
    fn test_extent_uses_current_when_defined() {
        let caps = capabilities(2, 3, Extent2D::new(640, 480));
        assert_eq!(
            choose_swap_extent(&caps, Extent2D::new(1920, 1080)),
            Extent2D::new(640, 480)
        );
    }

    #[test]
    fn test_extent_clamps_window_size_when_undefined() {
        let caps = capabilities(2, 3, UNDEFINED);
        assert_eq!(
            choose_swap_extent(&caps, Extent2D::new(1920, 50)),
            Extent2D::new(1000, 100)
        );
        assert_eq!(
            choose_swap_extent(&caps, Extent2D::new(500, 400)),
            Extent2D::new(500, 400)
        );
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&capabilities(2, 3, UNDEFINED)), 3);
        assert_eq!(choose_image_count(&capabilities(2, 2, UNDEFINED)), 2);
        assert_eq!(choose_image_count(&capabilities(3, 0, UNDEFINED)), 4);
    }
}
