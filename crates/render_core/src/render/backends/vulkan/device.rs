//! Logical device implementing [`GpuDevice`] with `ash`

use std::ffi::CStr;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::extensions::khr::Swapchain;
use ash::vk::{self, Handle};

use super::instance::InstanceShared;
use crate::render::backends::{
    AcquireOutcome, BackendError, BackendResult, BufferCopy, BufferHandle, BufferImageCopy,
    BufferUsage, CommandBufferHandle, CommandBufferUsage, CommandPoolHandle, DescriptorPoolDesc,
    DescriptorPoolFlags, DescriptorPoolHandle, DescriptorResource, DescriptorSetHandle,
    DescriptorSetLayoutHandle, DescriptorWrite, FenceHandle, Format, FramebufferDesc,
    FramebufferHandle, GpuDevice, GraphicsPipelineDesc, ImageAspect, ImageBarrier, ImageDesc,
    ImageHandle, ImageViewHandle, IndexType, LayoutBinding, MemoryHandle,
    MemoryRequirements, PipelineHandle, PipelineLayoutHandle, PushConstantRange, QueueHandle,
    Rect2D, RenderPassBegin, RenderPassDesc, RenderPassHandle, SamplerDesc, SamplerHandle,
    SemaphoreHandle, ShaderModuleHandle, ShaderStages, SubmitInfo, SwapchainDesc, SwapchainHandle,
    SwapchainStatus, Viewport,
};

const SHADER_ENTRY_POINT: &CStr = c"main";

/// Maps a backend-neutral handle onto its `vk` counterpart
trait ToVk: Copy {
    type Raw: Handle;

    fn to_vk(self) -> Self::Raw;
}

macro_rules! impl_to_vk {
    ($($ours:ty => $raw:ty),* $(,)?) => {
        $(
            impl ToVk for $ours {
                type Raw = $raw;

                fn to_vk(self) -> $raw {
                    <$raw>::from_raw(self.as_raw())
                }
            }
        )*
    };
}

impl_to_vk! {
    QueueHandle => vk::Queue,
    CommandPoolHandle => vk::CommandPool,
    CommandBufferHandle => vk::CommandBuffer,
    BufferHandle => vk::Buffer,
    MemoryHandle => vk::DeviceMemory,
    ImageHandle => vk::Image,
    ImageViewHandle => vk::ImageView,
    SamplerHandle => vk::Sampler,
    RenderPassHandle => vk::RenderPass,
    FramebufferHandle => vk::Framebuffer,
    ShaderModuleHandle => vk::ShaderModule,
    PipelineLayoutHandle => vk::PipelineLayout,
    PipelineHandle => vk::Pipeline,
    DescriptorSetLayoutHandle => vk::DescriptorSetLayout,
    DescriptorPoolHandle => vk::DescriptorPool,
    DescriptorSetHandle => vk::DescriptorSet,
    SemaphoreHandle => vk::Semaphore,
    FenceHandle => vk::Fence,
    SwapchainHandle => vk::SwapchainKHR,
}

fn to_vk_all<H: ToVk>(handles: &[H]) -> Vec<H::Raw> {
    handles.iter().map(|handle| handle.to_vk()).collect()
}

fn rect_to_vk(rect: &Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.offset.0,
            y: rect.offset.1,
        },
        extent: rect.extent.into(),
    }
}

/// Logical device and the queues created with it
pub struct VulkanDevice {
    device: ash::Device,
    swapchain_loader: Swapchain,
    physical_device: vk::PhysicalDevice,
    queues: Vec<(u32, vk::Queue)>,
    shared: Arc<InstanceShared>,
}

impl VulkanDevice {
    pub(super) fn new(
        shared: Arc<InstanceShared>,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        swapchain_loader: Swapchain,
        queues: Vec<(u32, vk::Queue)>,
    ) -> Self {
        Self {
            device,
            swapchain_loader,
            physical_device,
            queues,
            shared,
        }
    }

    /// Underlying `ash` device
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            // Nothing may still be executing when the device goes away.
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {e:?}");
            }
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}

impl GpuDevice for VulkanDevice {
    fn queue(&self, family: u32) -> BackendResult<QueueHandle> {
        self.queues
            .iter()
            .find(|(index, _)| *index == family)
            .map(|(_, queue)| QueueHandle::from_raw(queue.as_raw()))
            .ok_or_else(|| BackendError::InvalidHandle(format!("no queue for family {family}")))
    }

    fn queue_submit(
        &self,
        queue: QueueHandle,
        submit: &SubmitInfo<'_>,
        fence: Option<FenceHandle>,
    ) -> BackendResult<()> {
        let wait_semaphores = to_vk_all(submit.wait_semaphores);
        let wait_stages: Vec<vk::PipelineStageFlags> =
            submit.wait_stages.iter().map(|&stage| stage.into()).collect();
        let command_buffers = to_vk_all(submit.command_buffers);
        let signal_semaphores = to_vk_all(submit.signal_semaphores);

        let info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.queue_submit(
                queue.to_vk(),
                &[info],
                fence.map_or_else(vk::Fence::null, ToVk::to_vk),
            )
        }?;
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueHandle) -> BackendResult<()> {
        Ok(unsafe { self.device.queue_wait_idle(queue.to_vk()) }?)
    }

    fn device_wait_idle(&self) -> BackendResult<()> {
        Ok(unsafe { self.device.device_wait_idle() }?)
    }

    // ---- buffers and memory -------------------------------------------

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> BackendResult<BufferHandle> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage.into())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }?;
        Ok(BufferHandle::from_raw(buffer.as_raw()))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        unsafe { self.device.destroy_buffer(buffer.to_vk(), None) };
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> BackendResult<MemoryRequirements> {
        let reqs = unsafe { self.device.get_buffer_memory_requirements(buffer.to_vk()) };
        Ok(MemoryRequirements {
            size: reqs.size,
            alignment: reqs.alignment,
            memory_type_bits: reqs.memory_type_bits,
        })
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> BackendResult<MemoryHandle> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&info, None) }?;
        Ok(MemoryHandle::from_raw(memory.as_raw()))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        unsafe { self.device.free_memory(memory.to_vk(), None) };
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        Ok(unsafe {
            self.device
                .bind_buffer_memory(buffer.to_vk(), memory.to_vk(), offset)
        }?)
    }

    fn map_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .map_memory(memory.to_vk(), offset, size, vk::MemoryMapFlags::empty())
        }?;
        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| BackendError::Other("vkMapMemory returned a null pointer".to_string()))
    }

    fn unmap_memory(&self, memory: MemoryHandle) {
        unsafe { self.device.unmap_memory(memory.to_vk()) };
    }

    fn flush_mapped_range(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<()> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory.to_vk())
            .offset(offset)
            .size(size)
            .build();
        Ok(unsafe { self.device.flush_mapped_memory_ranges(&[range]) }?)
    }

    fn invalidate_mapped_range(
        &self,
        memory: MemoryHandle,
        offset: u64,
        size: u64,
    ) -> BackendResult<()> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory.to_vk())
            .offset(offset)
            .size(size)
            .build();
        Ok(unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }?)
    }

    // ---- images -------------------------------------------------------

    fn create_image(&self, desc: &ImageDesc) -> BackendResult<ImageHandle> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .format(desc.format.into())
            .tiling(desc.tiling.into())
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage.into())
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = unsafe { self.device.create_image(&info, None) }?;
        Ok(ImageHandle::from_raw(image.as_raw()))
    }

    fn destroy_image(&self, image: ImageHandle) {
        unsafe { self.device.destroy_image(image.to_vk(), None) };
    }

    fn image_memory_requirements(&self, image: ImageHandle) -> BackendResult<MemoryRequirements> {
        let reqs = unsafe { self.device.get_image_memory_requirements(image.to_vk()) };
        Ok(MemoryRequirements {
            size: reqs.size,
            alignment: reqs.alignment,
            memory_type_bits: reqs.memory_type_bits,
        })
    }

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        Ok(unsafe {
            self.device
                .bind_image_memory(image.to_vk(), memory.to_vk(), offset)
        }?)
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        format: Format,
        aspect: ImageAspect,
    ) -> BackendResult<ImageViewHandle> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image.to_vk())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format.into())
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect.into(),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&info, None) }?;
        Ok(ImageViewHandle::from_raw(view.as_raw()))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        unsafe { self.device.destroy_image_view(view.to_vk(), None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        let address_mode = desc.address_mode.into();
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter.into())
            .min_filter(desc.min_filter.into())
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        let sampler = unsafe { self.device.create_sampler(&info, None) }?;
        Ok(SamplerHandle::from_raw(sampler.as_raw()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe { self.device.destroy_sampler(sampler.to_vk(), None) };
    }

    // ---- render targets -----------------------------------------------

    fn create_render_pass(&self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(desc.color_format.into())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(desc.color_final_layout.into())
            .build();

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(desc.depth_format.into())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let attachments = [color_attachment, depth_attachment];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .build()];

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { self.device.create_render_pass(&info, None) }?;
        Ok(RenderPassHandle::from_raw(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe { self.device.destroy_render_pass(render_pass.to_vk(), None) };
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> BackendResult<FramebufferHandle> {
        let attachments = to_vk_all(&desc.attachments);
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(desc.render_pass.to_vk())
            .attachments(&attachments)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);
        let framebuffer = unsafe { self.device.create_framebuffer(&info, None) }?;
        Ok(FramebufferHandle::from_raw(framebuffer.as_raw()))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe { self.device.destroy_framebuffer(framebuffer.to_vk(), None) };
    }

    // ---- swapchain ----------------------------------------------------

    fn create_swapchain(&self, desc: &SwapchainDesc) -> BackendResult<SwapchainHandle> {
        let caps = unsafe {
            self.shared
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.shared.surface)
        }?;

        let mut families = desc.queue_family_indices.clone();
        families.sort_unstable();
        families.dedup();
        let (sharing_mode, shared_families): (_, &[u32]) = if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, &families)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.shared.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format.into())
            .image_color_space(desc.surface_format.color_space.into())
            .image_extent(desc.extent.into())
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode.into())
            .clipped(true)
            .old_swapchain(desc.old_swapchain.map_or_else(vk::SwapchainKHR::null, ToVk::to_vk));

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&info, None) }?;
        Ok(SwapchainHandle::from_raw(swapchain.as_raw()))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        unsafe {
            self.swapchain_loader
                .destroy_swapchain(swapchain.to_vk(), None)
        };
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> BackendResult<Vec<ImageHandle>> {
        let images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain.to_vk()) }?;
        Ok(images
            .into_iter()
            .map(|image| ImageHandle::from_raw(image.as_raw()))
            .collect())
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        timeout: u64,
        signal: SemaphoreHandle,
    ) -> BackendResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                swapchain.to_vk(),
                timeout,
                signal.to_vk(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    fn queue_present(
        &self,
        queue: QueueHandle,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> BackendResult<SwapchainStatus> {
        let wait_semaphores = to_vk_all(wait);
        let swapchains = [swapchain.to_vk()];
        let image_indices = [image_index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue.to_vk(), &info) } {
            Ok(false) => Ok(SwapchainStatus::Optimal),
            Ok(true) => Ok(SwapchainStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    // ---- synchronization ----------------------------------------------

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.device.create_semaphore(&info, None) }?;
        Ok(SemaphoreHandle::from_raw(semaphore.as_raw()))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe { self.device.destroy_semaphore(semaphore.to_vk(), None) };
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }?;
        Ok(FenceHandle::from_raw(fence.as_raw()))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(fence.to_vk(), None) };
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], timeout: u64) -> BackendResult<()> {
        let fences = to_vk_all(fences);
        Ok(unsafe { self.device.wait_for_fences(&fences, true, timeout) }?)
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> BackendResult<()> {
        let fences = to_vk_all(fences);
        Ok(unsafe { self.device.reset_fences(&fences) }?)
    }

    fn fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence.to_vk()) }?)
    }

    // ---- command buffers ----------------------------------------------

    fn create_command_pool(
        &self,
        queue_family: u32,
        transient: bool,
    ) -> BackendResult<CommandPoolHandle> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);
        let pool = unsafe { self.device.create_command_pool(&info, None) }?;
        Ok(CommandPoolHandle::from_raw(pool.as_raw()))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        unsafe { self.device.destroy_command_pool(pool.to_vk(), None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool.to_vk())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }?;
        Ok(buffers
            .into_iter()
            .map(|cb| CommandBufferHandle::from_raw(cb.as_raw()))
            .collect())
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let buffers = to_vk_all(buffers);
        unsafe { self.device.free_command_buffers(pool.to_vk(), &buffers) };
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()> {
        let flags = if usage.contains(CommandBufferUsage::ONE_TIME_SUBMIT) {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::builder().flags(flags);
        Ok(unsafe { self.device.begin_command_buffer(command_buffer.to_vk(), &info) }?)
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        Ok(unsafe { self.device.end_command_buffer(command_buffer.to_vk()) }?)
    }

    // ---- command recording --------------------------------------------

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        let regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();
        unsafe {
            self.device
                .cmd_copy_buffer(command_buffer.to_vk(), src.to_vk(), dst.to_vk(), &regions)
        };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    ) {
        let copy = vk::BufferImageCopy {
            buffer_offset: region.buffer_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: region.layer_count,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: region.image_extent.width,
                height: region.image_extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                command_buffer.to_vk(),
                src.to_vk(),
                dst.to_vk(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            )
        };
    }

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(barrier.old_layout.into())
            .new_layout(barrier.new_layout.into())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image.to_vk())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect.into(),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: barrier.layer_count,
            })
            .src_access_mask(barrier.src_access.into())
            .dst_access_mask(barrier.dst_access.into())
            .build();

        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer.to_vk(),
                barrier.src_stage.into(),
                barrier.dst_stage.into(),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            )
        };
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin<'_>) {
        let clear_values: Vec<vk::ClearValue> =
            begin.clear_values.iter().map(|&value| value.into()).collect();
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass.to_vk())
            .framebuffer(begin.framebuffer.to_vk())
            .render_area(rect_to_vk(&begin.render_area))
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(
                command_buffer.to_vk(),
                &info,
                vk::SubpassContents::INLINE,
            )
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        unsafe { self.device.cmd_end_render_pass(command_buffer.to_vk()) };
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe {
            self.device
                .cmd_set_viewport(command_buffer.to_vk(), 0, &[viewport])
        };
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &Rect2D) {
        unsafe {
            self.device
                .cmd_set_scissor(command_buffer.to_vk(), 0, &[rect_to_vk(scissor)])
        };
    }

    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer.to_vk(),
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.to_vk(),
            )
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        dynamic_offsets: &[u32],
    ) {
        let sets = to_vk_all(sets);
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer.to_vk(),
                vk::PipelineBindPoint::GRAPHICS,
                layout.to_vk(),
                first_set,
                &sets,
                dynamic_offsets,
            )
        };
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                command_buffer.to_vk(),
                layout.to_vk(),
                stages.into(),
                offset,
                data,
            )
        };
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    ) {
        let buffers = to_vk_all(buffers);
        unsafe {
            self.device.cmd_bind_vertex_buffers(
                command_buffer.to_vk(),
                first_binding,
                &buffers,
                offsets,
            )
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        unsafe {
            self.device.cmd_bind_index_buffer(
                command_buffer.to_vk(),
                buffer.to_vk(),
                offset,
                index_type.into(),
            )
        };
    }

    fn cmd_draw(
        &self,
        command_buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                command_buffer.to_vk(),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                command_buffer.to_vk(),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    // ---- descriptors --------------------------------------------------

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.kind.into())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages.into())
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }?;
        Ok(DescriptorSetLayoutHandle::from_raw(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(layout.to_vk(), None)
        };
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> BackendResult<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = desc
            .pool_sizes
            .iter()
            .map(|size| vk::DescriptorPoolSize {
                ty: size.kind.into(),
                descriptor_count: size.count,
            })
            .collect();
        let flags = if desc.flags.contains(DescriptorPoolFlags::FREE_DESCRIPTOR_SET) {
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
        } else {
            vk::DescriptorPoolCreateFlags::empty()
        };
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(desc.max_sets)
            .pool_sizes(&pool_sizes)
            .flags(flags);
        let pool = unsafe { self.device.create_descriptor_pool(&info, None) }?;
        Ok(DescriptorPoolHandle::from_raw(pool.as_raw()))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        unsafe { self.device.destroy_descriptor_pool(pool.to_vk(), None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let layouts = [layout.to_vk()];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool.to_vk())
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }?;
        sets.first()
            .map(|set| DescriptorSetHandle::from_raw(set.as_raw()))
            .ok_or_else(|| BackendError::Other("no descriptor set returned".to_string()))
    }

    fn free_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        sets: &[DescriptorSetHandle],
    ) -> BackendResult<()> {
        let sets = to_vk_all(sets);
        Ok(unsafe { self.device.free_descriptor_sets(pool.to_vk(), &sets) }?)
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> BackendResult<()> {
        Ok(unsafe {
            self.device
                .reset_descriptor_pool(pool.to_vk(), vk::DescriptorPoolResetFlags::empty())
        }?)
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        // Info structs must outlive the write array that points into them.
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Buffer(info) => [vk::DescriptorBufferInfo {
                    buffer: info.buffer.to_vk(),
                    offset: info.offset,
                    range: info.range,
                }],
                DescriptorResource::Image(_) => [vk::DescriptorBufferInfo::default()],
            })
            .collect();
        let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
            .iter()
            .map(|write| match write.resource {
                DescriptorResource::Image(info) => [vk::DescriptorImageInfo {
                    sampler: info.sampler.map_or_else(vk::Sampler::null, ToVk::to_vk),
                    image_view: info.image_view.to_vk(),
                    image_layout: info.layout.into(),
                }],
                DescriptorResource::Buffer(_) => [vk::DescriptorImageInfo::default()],
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .enumerate()
            .map(|(i, write)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.set.to_vk())
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(write.kind.into());
                match write.resource {
                    DescriptorResource::Buffer(_) => builder.buffer_info(&buffer_infos[i]).build(),
                    DescriptorResource::Image(_) => builder.image_info(&image_infos[i]).build(),
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    // ---- pipelines ----------------------------------------------------

    fn create_shader_module(&self, code: &[u8]) -> BackendResult<ShaderModuleHandle> {
        let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
            .map_err(|e| BackendError::Other(format!("invalid SPIR-V: {e}")))?;
        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { self.device.create_shader_module(&info, None) }?;
        Ok(ShaderModuleHandle::from_raw(module.as_raw()))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        unsafe { self.device.destroy_shader_module(module.to_vk(), None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constant_ranges: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        let set_layouts = to_vk_all(set_layouts);
        let ranges: Vec<vk::PushConstantRange> = push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: range.stages.into(),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&info, None) }?;
        Ok(PipelineLayoutHandle::from_raw(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe { self.device.destroy_pipeline_layout(layout.to_vk(), None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> BackendResult<PipelineHandle> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_shader.to_vk())
                .name(SHADER_ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_shader.to_vk())
                .name(SHADER_ENTRY_POINT)
                .build(),
        ];

        let bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: binding.input_rate.into(),
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: attribute.format.into(),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.input_assembly.topology.into())
            .primitive_restart_enable(desc.input_assembly.primitive_restart);

        // Viewport and scissor are dynamic; only the counts matter here.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let raster = &desc.rasterization;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(raster.depth_clamp)
            .rasterizer_discard_enable(raster.rasterizer_discard)
            .polygon_mode(raster.polygon_mode.into())
            .line_width(raster.line_width)
            .cull_mode(raster.cull_mode.into())
            .front_face(raster.front_face.into())
            .depth_bias_enable(raster.depth_bias);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::from_raw(desc.multisample.samples))
            .sample_shading_enable(desc.multisample.sample_shading)
            .min_sample_shading(desc.multisample.min_sample_shading)
            .alpha_to_coverage_enable(desc.multisample.alpha_to_coverage)
            .alpha_to_one_enable(false);

        let blend = &desc.color_blend;
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(blend.blend_enable)
            .src_color_blend_factor(blend.src_color.into())
            .dst_color_blend_factor(blend.dst_color.into())
            .color_blend_op(blend.color_op.into())
            .src_alpha_blend_factor(blend.src_alpha.into())
            .dst_alpha_blend_factor(blend.dst_alpha.into())
            .alpha_blend_op(blend.alpha_op.into())
            .color_write_mask(blend.write_mask.into())
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&blend_attachments)
            .blend_constants([0.0; 4]);

        let depth = &desc.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(depth.depth_test)
            .depth_write_enable(depth.depth_write)
            .depth_compare_op(depth.compare_op.into())
            .depth_bounds_test_enable(depth.depth_bounds_test)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(depth.stencil_test);

        let dynamic_states: Vec<vk::DynamicState> =
            desc.dynamic_states.iter().map(|&state| state.into()).collect();
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.to_vk())
            .render_pass(desc.render_pass.to_vk())
            .subpass(desc.subpass)
            .base_pipeline_handle(vk::Pipeline::null())
            .base_pipeline_index(-1)
            .build();

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| BackendError::from(e))?;

        pipelines
            .first()
            .map(|pipeline| PipelineHandle::from_raw(pipeline.as_raw()))
            .ok_or_else(|| BackendError::Other("no pipeline returned".to_string()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe { self.device.destroy_pipeline(pipeline.to_vk(), None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_mapping_preserves_raw_value() {
        let buffer = BufferHandle::from_raw(0xdead_beef);
        assert_eq!(buffer.to_vk().as_raw(), 0xdead_beef);

        let semaphores = [SemaphoreHandle::from_raw(1), SemaphoreHandle::from_raw(2)];
        let raw = to_vk_all(&semaphores);
        assert_eq!(raw[1], vk::Semaphore::from_raw(2));
    }

    #[test]
    fn test_rect_conversion() {
        let rect = Rect2D {
            offset: (4, -2),
            extent: crate::render::backends::Extent2D::new(16, 8),
        };
        let vk_rect = rect_to_vk(&rect);
        assert_eq!(vk_rect.offset.x, 4);
        assert_eq!(vk_rect.offset.y, -2);
        assert_eq!(vk_rect.extent.width, 16);
    }
}
