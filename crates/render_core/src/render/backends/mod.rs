//! Graphics API backends
//!
//! The render core is written against two object-safe traits describing an
//! explicit graphics API: [`GpuInstance`] (adapter discovery, surface queries,
//! device creation) and [`GpuDevice`] (everything done with a live logical
//! device). Every call is a thin, synchronous wrapper over the API; ordering
//! and lifetime rules are enforced one level up, in the RAII wrappers of
//! [`crate::render`].
//!
//! Two backends ship with the crate:
//!
//! - [`vulkan`]: the production backend on top of `ash`
//! - [`headless`]: an in-process simulation used by the test-suite, with
//!   byte-backed memory, lazily completing fences and scripted swapchain
//!   outcomes
//!
//! `destroy_*` / `free_*` calls never fail; they run from `Drop`.

pub mod headless;
pub mod types;
pub mod vulkan;

use std::ptr::NonNull;
use std::sync::Arc;

use thiserror::Error;

pub use types::*;

/// Result type for backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// API-level failures reported by a backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The swapchain no longer matches its surface
    #[error("Swapchain out of date")]
    OutOfDate,

    /// The logical device was lost
    #[error("Device lost")]
    DeviceLost,

    /// Host allocation failed
    #[error("Out of host memory")]
    OutOfHostMemory,

    /// Device allocation failed
    #[error("Out of device memory")]
    OutOfDeviceMemory,

    /// Descriptor pool has no room for the requested set
    #[error("Descriptor pool out of memory")]
    OutOfPoolMemory,

    /// A wait did not complete in the given time
    #[error("Wait timed out")]
    Timeout,

    /// The presentation surface is gone
    #[error("Surface lost")]
    SurfaceLost,

    /// A handle does not name a live object of the expected kind
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Any other API error
    #[error("Graphics API error: {0}")]
    Other(String),
}

impl BackendError {
    /// Errors after which the swapchain should simply be rebuilt
    pub const fn is_out_of_date(&self) -> bool {
        matches!(self, Self::OutOfDate)
    }
}

/// Adapter discovery, surface queries and logical device creation
///
/// An instance owns the presentation surface it was created for; all surface
/// queries refer to that surface.
pub trait GpuInstance: Send + Sync {
    /// Enumerate physical adapters in API order
    fn enumerate_adapters(&self) -> BackendResult<Vec<AdapterHandle>>;

    /// Name, limits and features of an adapter
    fn adapter_properties(&self, adapter: AdapterHandle) -> BackendResult<AdapterProperties>;

    /// Queue families in index order
    fn queue_families(&self, adapter: AdapterHandle) -> BackendResult<Vec<QueueFamilyProperties>>;

    /// Whether a queue family can present to the surface
    fn surface_support(&self, adapter: AdapterHandle, queue_family: u32) -> BackendResult<bool>;

    /// Names of the device extensions the adapter supports
    fn device_extensions(&self, adapter: AdapterHandle) -> BackendResult<Vec<String>>;

    /// Current surface capabilities
    fn surface_capabilities(&self, adapter: AdapterHandle) -> BackendResult<SurfaceCapabilities>;

    /// Surface formats the adapter can present
    fn surface_formats(&self, adapter: AdapterHandle) -> BackendResult<Vec<SurfaceFormat>>;

    /// Present modes the adapter supports for the surface
    fn present_modes(&self, adapter: AdapterHandle) -> BackendResult<Vec<PresentMode>>;

    /// Memory type table
    fn memory_properties(&self, adapter: AdapterHandle) -> BackendResult<MemoryProperties>;

    /// Features of a format for the given tiling
    fn format_features(
        &self,
        adapter: AdapterHandle,
        format: Format,
        tiling: ImageTiling,
    ) -> BackendResult<FormatFeatures>;

    /// Create a logical device on the adapter
    fn create_device(
        &self,
        adapter: AdapterHandle,
        desc: &DeviceDesc,
    ) -> BackendResult<Arc<dyn GpuDevice>>;
}

/// Operations on a live logical device
pub trait GpuDevice: Send + Sync {
    // ---- queues -------------------------------------------------------

    /// First queue of a family created with the device
    fn queue(&self, family: u32) -> BackendResult<QueueHandle>;

    /// Submit command buffers, optionally signalling a fence on completion
    fn queue_submit(
        &self,
        queue: QueueHandle,
        submit: &SubmitInfo<'_>,
        fence: Option<FenceHandle>,
    ) -> BackendResult<()>;

    /// Block until a queue has no pending work
    fn queue_wait_idle(&self, queue: QueueHandle) -> BackendResult<()>;

    /// Block until the whole device has no pending work
    fn device_wait_idle(&self) -> BackendResult<()>;

    // ---- memory and buffers -------------------------------------------

    /// Create a buffer without memory
    fn create_buffer(&self, size: u64, usage: BufferUsage) -> BackendResult<BufferHandle>;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Allocation requirements of a buffer
    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> BackendResult<MemoryRequirements>;

    /// Allocate device memory from a memory type
    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> BackendResult<MemoryHandle>;

    /// Free device memory
    fn free_memory(&self, memory: MemoryHandle);

    /// Attach memory to a buffer
    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()>;

    /// Map a host-visible range; `size` may be [`WHOLE_SIZE`]
    ///
    /// The pointer stays valid until [`GpuDevice::unmap_memory`] or until the
    /// memory is freed. Dereferencing it is the caller's responsibility.
    fn map_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<NonNull<u8>>;

    /// Unmap previously mapped memory
    fn unmap_memory(&self, memory: MemoryHandle);

    /// Make host writes in a mapped range visible to the device
    fn flush_mapped_range(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<()>;

    /// Make device writes in a mapped range visible to the host
    fn invalidate_mapped_range(&self, memory: MemoryHandle, offset: u64, size: u64)
        -> BackendResult<()>;

    // ---- images -------------------------------------------------------

    /// Create an image without memory
    fn create_image(&self, desc: &ImageDesc) -> BackendResult<ImageHandle>;

    /// Destroy an image
    fn destroy_image(&self, image: ImageHandle);

    /// Allocation requirements of an image
    fn image_memory_requirements(&self, image: ImageHandle) -> BackendResult<MemoryRequirements>;

    /// Attach memory to an image
    fn bind_image_memory(&self, image: ImageHandle, memory: MemoryHandle, offset: u64)
        -> BackendResult<()>;

    /// Create a 2D view of an image
    fn create_image_view(
        &self,
        image: ImageHandle,
        format: Format,
        aspect: ImageAspect,
    ) -> BackendResult<ImageViewHandle>;

    /// Destroy an image view
    fn destroy_image_view(&self, view: ImageViewHandle);

    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // ---- render targets -----------------------------------------------

    /// Create a single-subpass color + depth render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle>;

    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    /// Create a framebuffer
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> BackendResult<FramebufferHandle>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    // ---- swapchain ----------------------------------------------------

    /// Create a swapchain for the instance surface
    fn create_swapchain(&self, desc: &SwapchainDesc) -> BackendResult<SwapchainHandle>;

    /// Destroy a swapchain; its images go with it
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Presentable images owned by a swapchain
    fn swapchain_images(&self, swapchain: SwapchainHandle) -> BackendResult<Vec<ImageHandle>>;

    /// Acquire the next presentable image, signalling `signal` when it is ready
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        timeout: u64,
        signal: SemaphoreHandle,
    ) -> BackendResult<AcquireOutcome>;

    /// Queue an image for presentation after `wait` semaphores signal
    fn queue_present(
        &self,
        queue: QueueHandle,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> BackendResult<SwapchainStatus>;

    // ---- synchronization ----------------------------------------------

    /// Create a semaphore
    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Create a fence, optionally already signalled
    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle>;

    /// Destroy a fence
    fn destroy_fence(&self, fence: FenceHandle);

    /// Wait until all fences are signalled
    fn wait_for_fences(&self, fences: &[FenceHandle], timeout: u64) -> BackendResult<()>;

    /// Return fences to the unsignalled state
    fn reset_fences(&self, fences: &[FenceHandle]) -> BackendResult<()>;

    /// Whether a fence is signalled, without blocking
    fn fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool>;

    // ---- command buffers ----------------------------------------------

    /// Create a command pool whose buffers can be reset individually
    fn create_command_pool(&self, queue_family: u32, transient: bool)
        -> BackendResult<CommandPoolHandle>;

    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&self, pool: CommandPoolHandle);

    /// Allocate primary command buffers
    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>>;

    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);

    /// Begin recording (implicitly resets the buffer)
    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()>;

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()>;

    // ---- command recording --------------------------------------------

    /// Copy regions between buffers
    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    );

    /// Copy buffer contents into an image in `TransferDstOptimal` layout
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    );

    /// Record an image layout transition
    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier);

    /// Begin a render pass instance with inline contents
    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin<'_>);

    /// End the current render pass instance
    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle);

    /// Set the dynamic viewport
    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport);

    /// Set the dynamic scissor
    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &Rect2D);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle);

    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    );

    /// Update push constants
    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );

    /// Bind vertex buffers starting at `first_binding`
    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    );

    /// Bind an index buffer
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    );

    /// Non-indexed draw
    fn cmd_draw(
        &self,
        command_buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    /// Indexed draw
    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    // ---- descriptors --------------------------------------------------

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Create a descriptor pool
    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> BackendResult<DescriptorPoolHandle>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocate one set; exhaustion is [`BackendError::OutOfPoolMemory`]
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;

    /// Return sets to a pool created with `FREE_DESCRIPTOR_SET`
    fn free_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        sets: &[DescriptorSetHandle],
    ) -> BackendResult<()>;

    /// Return every set of a pool at once
    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> BackendResult<()>;

    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // ---- pipelines ----------------------------------------------------

    /// Create a shader module from SPIR-V bytes
    fn create_shader_module(&self, code: &[u8]) -> BackendResult<ShaderModuleHandle>;

    /// Destroy a shader module
    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constant_ranges: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> BackendResult<PipelineHandle>;

    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: PipelineHandle);
}
