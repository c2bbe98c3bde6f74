//! Adapter selection and logical device ownership
//!
//! [`Device`] picks the first adapter that can render and present to the
//! window surface, creates the logical device with one queue per unique
//! family, and keeps a transient command pool for one-shot transfers
//! (staging copies, layout transitions). Every other GPU object in the crate
//! holds the device's [`GpuDevice`] through an `Arc`, so the logical device
//! outlives everything created from it.

use std::sync::Arc;

use super::backends::{
    AccessFlags, AdapterHandle, AdapterProperties, BufferCopy, BufferHandle, BufferImageCopy,
    BufferUsage, CommandBufferHandle, CommandBufferUsage, CommandPoolHandle, DeviceDesc,
    Extent2D, Format, FormatFeatures, GpuDevice, GpuInstance, ImageAspect, ImageBarrier,
    ImageDesc, ImageHandle, ImageLayout, ImageTiling, MemoryHandle, MemoryProperties,
    MemoryPropertyFlags, MemoryRequirements, PipelineStages, PresentMode, QueueFlags,
    QueueHandle, SubmitInfo, SurfaceCapabilities, SurfaceFormat,
};
use super::errors::{RenderError, RenderResult};

/// Device extensions every adapter must support
pub const REQUIRED_DEVICE_EXTENSIONS: &[&str] = &["VK_KHR_swapchain"];

/// Depth formats tried in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [Format; 3] = [
    Format::D32Sfloat,
    Format::D32SfloatS8Uint,
    Format::D24UnormS8Uint,
];

/// Graphics and present queue family indices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics_family: Option<u32>,
    /// First family able to present to the surface
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families were found
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    pub(crate) fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self
            .graphics_family
            .into_iter()
            .chain(self.present_family)
            .collect();
        families.dedup();
        families
    }
}

/// What a surface supports on one adapter
#[derive(Debug, Clone, PartialEq)]
pub struct SwapChainSupportDetails {
    /// Image count and extent limits
    pub capabilities: SurfaceCapabilities,
    /// Presentable formats
    pub formats: Vec<SurfaceFormat>,
    /// Present modes
    pub present_modes: Vec<PresentMode>,
}

impl SwapChainSupportDetails {
    /// Query the surface support of an adapter
    pub fn query(instance: &dyn GpuInstance, adapter: AdapterHandle) -> RenderResult<Self> {
        Ok(Self {
            capabilities: instance.surface_capabilities(adapter)?,
            formats: instance.surface_formats(adapter)?,
            present_modes: instance.present_modes(adapter)?,
        })
    }

    /// At least one format and one present mode
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The adapter chosen at startup and everything learned about it
#[derive(Debug, Clone)]
pub struct PhysicalAdapterChoice {
    /// Adapter handle
    pub adapter: AdapterHandle,
    /// Name, limits and features
    pub properties: AdapterProperties,
    /// Graphics family index
    pub graphics_family: u32,
    /// Present family index, possibly equal to the graphics family
    pub present_family: u32,
    /// Surface support at selection time
    pub swap_chain_support: SwapChainSupportDetails,
    /// Memory type table
    pub memory: MemoryProperties,
    /// Supported device extensions
    pub extensions: Vec<String>,
}

impl PhysicalAdapterChoice {
    /// Pick the first adapter that satisfies every requirement
    pub fn select(instance: &dyn GpuInstance) -> RenderResult<Self> {
        let adapters = instance.enumerate_adapters()?;
        log::debug!("Found {} adapter(s)", adapters.len());

        for adapter in adapters {
            if let Some(choice) = Self::evaluate(instance, adapter)? {
                log::info!(
                    "Selected GPU: {} ({:?})",
                    choice.properties.name,
                    choice.properties.adapter_type
                );
                return Ok(choice);
            }
        }

        Err(RenderError::NoSuitableAdapter)
    }

    fn evaluate(instance: &dyn GpuInstance, adapter: AdapterHandle) -> RenderResult<Option<Self>> {
        let properties = instance.adapter_properties(adapter)?;

        let indices = find_queue_families(instance, adapter)?;
        let (Some(graphics_family), Some(present_family)) =
            (indices.graphics_family, indices.present_family)
        else {
            log::debug!("Rejected '{}': missing graphics or present queue", properties.name);
            return Ok(None);
        };

        let extensions = instance.device_extensions(adapter)?;
        if let Some(missing) = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .find(|required| !extensions.iter().any(|ext| ext == *required))
        {
            log::debug!("Rejected '{}': missing extension {missing}", properties.name);
            return Ok(None);
        }

        let swap_chain_support = SwapChainSupportDetails::query(instance, adapter)?;
        if !swap_chain_support.is_adequate() {
            log::debug!("Rejected '{}': no surface formats or present modes", properties.name);
            return Ok(None);
        }

        if !properties.sampler_anisotropy {
            log::debug!("Rejected '{}': no anisotropic sampling", properties.name);
            return Ok(None);
        }

        Ok(Some(Self {
            adapter,
            memory: instance.memory_properties(adapter)?,
            properties,
            graphics_family,
            present_family,
            swap_chain_support,
            extensions,
        }))
    }
}

/// First graphics-capable and first present-capable family
///
/// Stops as soon as both are known.
pub fn find_queue_families(
    instance: &dyn GpuInstance,
    adapter: AdapterHandle,
) -> RenderResult<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in (0u32..).zip(instance.queue_families(adapter)?) {
        if indices.graphics_family.is_none()
            && family.queue_count > 0
            && family.flags.contains(QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(index);
        }
        if indices.present_family.is_none()
            && family.queue_count > 0
            && instance.surface_support(adapter, index)?
        {
            indices.present_family = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// First memory type allowed by `type_bits` whose flags contain `properties`
pub fn find_memory_type(
    memory: &MemoryProperties,
    type_bits: u32,
    properties: MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0u32..)
        .zip(&memory.memory_types)
        .find(|(index, ty)| {
            *index < 32 && type_bits & (1 << index) != 0 && ty.property_flags.contains(properties)
        })
        .map(|(index, _)| index)
        .ok_or(RenderError::NoSuitableMemoryType {
            type_bits,
            properties,
        })
}

/// Logical device, its queues and a pool for one-shot command buffers
pub struct Device {
    gpu: Arc<dyn GpuDevice>,
    instance: Arc<dyn GpuInstance>,
    choice: PhysicalAdapterChoice,
    graphics_queue: QueueHandle,
    present_queue: QueueHandle,
    command_pool: CommandPoolHandle,
}

impl Device {
    /// Select an adapter and create the logical device on it
    pub fn new(instance: Arc<dyn GpuInstance>) -> RenderResult<Self> {
        let choice = PhysicalAdapterChoice::select(instance.as_ref())?;

        let indices = QueueFamilyIndices {
            graphics_family: Some(choice.graphics_family),
            present_family: Some(choice.present_family),
        };
        let desc = DeviceDesc {
            queue_families: indices.unique_families(),
            extensions: REQUIRED_DEVICE_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
            sampler_anisotropy: true,
        };
        let gpu = instance.create_device(choice.adapter, &desc)?;

        let graphics_queue = gpu.queue(choice.graphics_family)?;
        let present_queue = gpu.queue(choice.present_family)?;
        let command_pool = gpu.create_command_pool(choice.graphics_family, true)?;

        log::debug!(
            "Logical device ready (graphics family {}, present family {})",
            choice.graphics_family,
            choice.present_family
        );

        Ok(Self {
            gpu,
            instance,
            choice,
            graphics_queue,
            present_queue,
            command_pool,
        })
    }

    /// The live device
    pub fn gpu(&self) -> &Arc<dyn GpuDevice> {
        &self.gpu
    }

    /// The instance the device was created from
    pub fn instance(&self) -> &Arc<dyn GpuInstance> {
        &self.instance
    }

    /// Everything learned about the selected adapter
    pub fn adapter(&self) -> &PhysicalAdapterChoice {
        &self.choice
    }

    /// Adapter name, limits and features
    pub fn properties(&self) -> &AdapterProperties {
        &self.choice.properties
    }

    /// Queue used for rendering and transfers
    pub fn graphics_queue(&self) -> QueueHandle {
        self.graphics_queue
    }

    /// Queue used for presentation, may alias the graphics queue
    pub fn present_queue(&self) -> QueueHandle {
        self.present_queue
    }

    /// Graphics and present family indices
    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(self.choice.graphics_family),
            present_family: Some(self.choice.present_family),
        }
    }

    /// Transient pool for one-shot command buffers
    pub fn command_pool(&self) -> CommandPoolHandle {
        self.command_pool
    }

    /// Re-query surface support (extent limits change on resize)
    pub fn surface_support(&self) -> RenderResult<SwapChainSupportDetails> {
        SwapChainSupportDetails::query(self.instance.as_ref(), self.choice.adapter)
    }

    /// Block until the device has no pending work
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.gpu.device_wait_idle()?;
        Ok(())
    }

    /// Memory type index for a requirement filter
    pub fn find_memory_type(&self, type_bits: u32, properties: MemoryPropertyFlags) -> RenderResult<u32> {
        find_memory_type(&self.choice.memory, type_bits, properties)
    }

    /// First candidate whose `tiling` features contain `features`
    pub fn find_supported_format(
        &self,
        candidates: &[Format],
        tiling: ImageTiling,
        features: FormatFeatures,
    ) -> RenderResult<Format> {
        for &format in candidates {
            let supported = self
                .instance
                .format_features(self.choice.adapter, format, tiling)?;
            if supported.contains(features) {
                return Ok(format);
            }
        }
        Err(RenderError::NoSupportedFormat)
    }

    /// Best supported depth attachment format
    pub fn find_depth_format(&self) -> RenderResult<Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            ImageTiling::Optimal,
            FormatFeatures::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// Create a buffer and bind freshly allocated memory to it
    pub fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        properties: MemoryPropertyFlags,
    ) -> RenderResult<(BufferHandle, MemoryHandle)> {
        let buffer = self.gpu.create_buffer(size, usage)?;
        let bound = self
            .gpu
            .buffer_memory_requirements(buffer)
            .map_err(RenderError::from)
            .and_then(|reqs| self.allocate(&reqs, properties))
            .and_then(|memory| match self.gpu.bind_buffer_memory(buffer, memory, 0) {
                Ok(()) => Ok(memory),
                Err(e) => {
                    self.gpu.free_memory(memory);
                    Err(e.into())
                }
            });

        match bound {
            Ok(memory) => Ok((buffer, memory)),
            Err(e) => {
                self.gpu.destroy_buffer(buffer);
                Err(e)
            }
        }
    }

    /// Create an image and bind freshly allocated memory to it
    pub fn create_image_with_info(
        &self,
        desc: &ImageDesc,
        properties: MemoryPropertyFlags,
    ) -> RenderResult<(ImageHandle, MemoryHandle)> {
        let image = self.gpu.create_image(desc)?;
        let bound = self
            .gpu
            .image_memory_requirements(image)
            .map_err(RenderError::from)
            .and_then(|reqs| self.allocate(&reqs, properties))
            .and_then(|memory| match self.gpu.bind_image_memory(image, memory, 0) {
                Ok(()) => Ok(memory),
                Err(e) => {
                    self.gpu.free_memory(memory);
                    Err(e.into())
                }
            });

        match bound {
            Ok(memory) => Ok((image, memory)),
            Err(e) => {
                self.gpu.destroy_image(image);
                Err(e)
            }
        }
    }

    fn allocate(
        &self,
        reqs: &MemoryRequirements,
        properties: MemoryPropertyFlags,
    ) -> RenderResult<MemoryHandle> {
        let type_index = self.find_memory_type(reqs.memory_type_bits, properties)?;
        Ok(self.gpu.allocate_memory(reqs.size, type_index)?)
    }

    /// Allocate and begin a one-time-submit command buffer
    pub fn begin_single_time_commands(&self) -> RenderResult<CommandBufferHandle> {
        let command_buffer = self
            .gpu
            .allocate_command_buffers(self.command_pool, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| RenderError::invalid_operation("no command buffer allocated"))?;

        if let Err(e) = self
            .gpu
            .begin_command_buffer(command_buffer, CommandBufferUsage::ONE_TIME_SUBMIT)
        {
            self.gpu.free_command_buffers(self.command_pool, &[command_buffer]);
            return Err(e.into());
        }
        Ok(command_buffer)
    }

    /// End, submit and wait for a one-time command buffer, then free it
    ///
    /// Blocks until the graphics queue is idle.
    pub fn end_single_time_commands(&self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        let result = self.submit_and_wait(command_buffer);
        self.gpu.free_command_buffers(self.command_pool, &[command_buffer]);
        result
    }

    fn submit_and_wait(&self, command_buffer: CommandBufferHandle) -> RenderResult<()> {
        self.gpu.end_command_buffer(command_buffer)?;
        let submit = SubmitInfo {
            wait_semaphores: &[],
            wait_stages: &[],
            command_buffers: &[command_buffer],
            signal_semaphores: &[],
        };
        self.gpu.queue_submit(self.graphics_queue, &submit, None)?;
        self.gpu.queue_wait_idle(self.graphics_queue)?;
        Ok(())
    }

    /// Record `record` into a one-shot command buffer and run it to completion
    fn single_time<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&dyn GpuDevice, CommandBufferHandle),
    {
        let command_buffer = self.begin_single_time_commands()?;
        record(self.gpu.as_ref(), command_buffer);
        self.end_single_time_commands(command_buffer)
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    pub fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> RenderResult<()> {
        self.single_time(|gpu, cb| {
            gpu.cmd_copy_buffer(
                cb,
                src,
                dst,
                &[BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size,
                }],
            );
        })
    }

    /// Copy tightly packed texels into an image in `TransferDstOptimal` layout
    pub fn copy_buffer_to_image(
        &self,
        buffer: BufferHandle,
        image: ImageHandle,
        width: u32,
        height: u32,
        layer_count: u32,
    ) -> RenderResult<()> {
        self.single_time(|gpu, cb| {
            gpu.cmd_copy_buffer_to_image(
                cb,
                buffer,
                image,
                &BufferImageCopy {
                    buffer_offset: 0,
                    image_extent: Extent2D::new(width, height),
                    layer_count,
                },
            );
        })
    }

    /// Move an image between layouts with a pipeline barrier
    ///
    /// Supported: `Undefined -> TransferDstOptimal`,
    /// `TransferDstOptimal -> ShaderReadOnlyOptimal` and
    /// `Undefined -> DepthStencilAttachmentOptimal`.
    pub fn transition_image_layout(
        &self,
        image: ImageHandle,
        format: Format,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> RenderResult<()> {
        let barrier = layout_transition_barrier(image, format, old_layout, new_layout)?;
        self.single_time(|gpu, cb| gpu.cmd_image_barrier(cb, &barrier))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.gpu.destroy_command_pool(self.command_pool);
        log::debug!("Device command pool destroyed");
    }
}

/// Barrier for one of the supported layout transitions
pub fn layout_transition_barrier(
    image: ImageHandle,
    format: Format,
    old_layout: ImageLayout,
    new_layout: ImageLayout,
) -> RenderResult<ImageBarrier> {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (ImageLayout::Undefined, ImageLayout::TransferDstOptimal) => (
            AccessFlags::empty(),
            AccessFlags::TRANSFER_WRITE,
            PipelineStages::TOP_OF_PIPE,
            PipelineStages::TRANSFER,
        ),
        (ImageLayout::TransferDstOptimal, ImageLayout::ShaderReadOnlyOptimal) => (
            AccessFlags::TRANSFER_WRITE,
            AccessFlags::SHADER_READ,
            PipelineStages::TRANSFER,
            PipelineStages::FRAGMENT_SHADER,
        ),
        (ImageLayout::Undefined, ImageLayout::DepthStencilAttachmentOptimal) => (
            AccessFlags::empty(),
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            PipelineStages::TOP_OF_PIPE,
            PipelineStages::EARLY_FRAGMENT_TESTS,
        ),
        (old, new) => return Err(RenderError::UnsupportedLayoutTransition { old, new }),
    };

    let aspect = if new_layout == ImageLayout::DepthStencilAttachmentOptimal {
        if format.has_stencil_component() {
            ImageAspect::DEPTH | ImageAspect::STENCIL
        } else {
            ImageAspect::DEPTH
        }
    } else {
        ImageAspect::COLOR
    };

    Ok(ImageBarrier {
        image,
        aspect,
        old_layout,
        new_layout,
        src_access,
        dst_access,
        src_stage,
        dst_stage,
        layer_count: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessAdapter, HeadlessInstance, HeadlessSurface};
    use crate::render::backends::{MemoryType, QueueFamilyProperties};

    fn headless_device() -> (Device, Arc<HeadlessInstance>) {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
        let device = Device::new(instance.clone()).expect("device creation");
        (device, instance)
    }

    #[test]
    fn test_find_memory_type_respects_filter_and_flags() {
        let memory = MemoryProperties {
            memory_types: vec![
                MemoryType {
                    property_flags: MemoryPropertyFlags::DEVICE_LOCAL,
                    heap_index: 0,
                },
                MemoryType {
                    property_flags: MemoryPropertyFlags::HOST_VISIBLE
                        | MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
            ],
            heap_sizes: vec![1 << 30, 1 << 28],
        };

        assert_eq!(
            find_memory_type(&memory, 0b11, MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        assert_eq!(
            find_memory_type(&memory, 0b11, MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert!(matches!(
            find_memory_type(&memory, 0b01, MemoryPropertyFlags::HOST_VISIBLE),
            Err(RenderError::NoSuitableMemoryType { type_bits: 0b01, .. })
        ));
    }

    #[test]
    fn test_first_suitable_adapter_wins() {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::new(
            vec![
                HeadlessAdapter::new("no swapchain").with_extensions(&[]),
                HeadlessAdapter::new("no anisotropy").without_sampler_anisotropy(),
                HeadlessAdapter::new("good"),
                HeadlessAdapter::new("also good"),
            ],
            &surface,
        ));

        let device = Device::new(instance).unwrap();
        assert_eq!(device.properties().name, "good");
    }

    #[test]
    fn test_separate_present_family_is_found() {
        let surface = HeadlessSurface::new(800, 600);
        let adapter = HeadlessAdapter::new("split queues").with_queue_families(
            vec![
                QueueFamilyProperties {
                    flags: QueueFlags::GRAPHICS,
                    queue_count: 1,
                },
                QueueFamilyProperties {
                    flags: QueueFlags::TRANSFER,
                    queue_count: 1,
                },
            ],
            vec![1],
        );
        let instance = Arc::new(HeadlessInstance::new(vec![adapter], &surface));

        let device = Device::new(instance).unwrap();
        let indices = device.queue_family_indices();
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
        assert_ne!(device.graphics_queue(), device.present_queue());
    }

    #[test]
    fn test_no_suitable_adapter_is_fatal() {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::new(
            vec![HeadlessAdapter::new("no formats").with_surface_formats(vec![])],
            &surface,
        ));
        assert!(matches!(Device::new(instance), Err(RenderError::NoSuitableAdapter)));
    }

    #[test]
    fn test_depth_format_falls_back() {
        let surface = HeadlessSurface::new(800, 600);
        let adapter =
            HeadlessAdapter::new("d24 only").with_depth_formats(vec![Format::D24UnormS8Uint]);
        let instance = Arc::new(HeadlessInstance::new(vec![adapter], &surface));
        let device = Device::new(instance).unwrap();
        assert_eq!(device.find_depth_format().unwrap(), Format::D24UnormS8Uint);
    }

    #[test]
    fn test_copy_buffer_blocks_on_queue_idle() {
        let (device, instance) = headless_device();
        let host = MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT;
        let (src, src_mem) = device
            .create_buffer(16, BufferUsage::TRANSFER_SRC, host)
            .unwrap();
        let (dst, dst_mem) = device
            .create_buffer(16, BufferUsage::TRANSFER_DST, host)
            .unwrap();

        device.copy_buffer(src, dst, 16).unwrap();

        let stats = instance.last_device().unwrap().stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.queue_wait_idles, 1);

        for (buffer, memory) in [(src, src_mem), (dst, dst_mem)] {
            device.gpu().destroy_buffer(buffer);
            device.gpu().free_memory(memory);
        }
    }

    #[test]
    fn test_unsupported_layout_transition_is_rejected() {
        let (device, instance) = headless_device();
        let result = device.transition_image_layout(
            ImageHandle::from_raw(1),
            Format::R8G8B8A8Srgb,
            ImageLayout::ShaderReadOnlyOptimal,
            ImageLayout::TransferDstOptimal,
        );
        assert!(matches!(
            result,
            Err(RenderError::UnsupportedLayoutTransition { .. })
        ));
        assert_eq!(instance.last_device().unwrap().stats().submissions, 0);
    }

    #[test]
    fn test_depth_transition_includes_stencil_aspect() {
        let barrier = layout_transition_barrier(
            ImageHandle::from_raw(1),
            Format::D24UnormS8Uint,
            ImageLayout::Undefined,
            ImageLayout::DepthStencilAttachmentOptimal,
        )
        .unwrap();
        assert_eq!(barrier.aspect, ImageAspect::DEPTH | ImageAspect::STENCIL);
        assert_eq!(barrier.dst_stage, PipelineStages::EARLY_FRAGMENT_TESTS);
    }
}
