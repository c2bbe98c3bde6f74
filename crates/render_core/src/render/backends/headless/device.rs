//! Simulated logical device
//!
//! Objects live in a single slot map keyed by their handle value. Memory is
//! real host memory, so mapped writes and buffer copies can be checked byte
//! for byte. Submitted work "completes" lazily: a fence moves from pending to
//! signalled when something waits on it, which keeps every run deterministic
//! while still letting tests observe how many frames were in flight.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use slotmap::{DefaultKey, Key, KeyData, SlotMap};

use super::instance::HeadlessAdapter;
use super::surface::HeadlessSurface;
use crate::render::backends::{
    AcquireOutcome, BackendError, BackendResult, BufferCopy, BufferHandle, BufferImageCopy,
    BufferUsage, ClearValue, CommandBufferHandle, CommandBufferUsage, CommandPoolHandle,
    DescriptorKind, DescriptorPoolDesc, DescriptorPoolFlags, DescriptorPoolHandle,
    DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, Extent2D,
    FenceHandle, FramebufferDesc, FramebufferHandle, GpuDevice, GraphicsPipelineDesc, ImageAspect,
    ImageBarrier, ImageDesc, ImageHandle, ImageLayout, ImageViewHandle, IndexType, LayoutBinding,
    MemoryHandle, MemoryPropertyFlags, MemoryRequirements, PipelineHandle, PipelineLayoutHandle,
    PushConstantRange, QueueHandle, Rect2D, RenderPassBegin, RenderPassDesc, RenderPassHandle,
    SamplerDesc, SamplerHandle, SemaphoreHandle, ShaderModuleHandle, ShaderStages, SubmitInfo,
    SurfaceFormat, SwapchainDesc, SwapchainHandle, SwapchainStatus, Viewport, Format, ImageTiling,
    ImageUsage, WHOLE_SIZE,
};
use crate::render::window::SurfaceProvider;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Outcome forced onto the next acquire or present call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Succeed but report the chain as suboptimal
    Suboptimal,
    /// Fail with out-of-date
    OutOfDate,
}

/// Counters describing what the device was asked to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Queue submissions
    pub submissions: u64,
    /// Present calls
    pub presents: u64,
    /// Acquire calls
    pub acquires: u64,
    /// Highest number of fences pending at once
    pub max_pending_fences: usize,
    /// `wait_for_fences` calls
    pub fence_waits: u64,
    /// `device_wait_idle` calls
    pub device_wait_idles: u64,
    /// `queue_wait_idle` calls
    pub queue_wait_idles: u64,
    /// Mapped range flushes
    pub flushes: u64,
    /// Mapped range invalidations
    pub invalidations: u64,
    /// Individual descriptor writes applied
    pub descriptor_writes: u64,
    /// Descriptor sets allocated
    pub descriptor_sets_allocated: u64,
    /// Draw commands executed by submissions
    pub draw_calls: u64,
    /// Swapchains created
    pub swapchains_created: u64,
    /// Destroy calls on unknown or mismatched handles
    pub invalid_destroys: u64,
    /// Commands recorded outside a recording command buffer or on bad handles
    pub invalid_commands: u64,
}

/// Command captured by a recording command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Buffer to buffer copy
    CopyBuffer {
        /// Source buffer
        src: BufferHandle,
        /// Destination buffer
        dst: BufferHandle,
        /// Regions
        regions: Vec<BufferCopy>,
    },
    /// Buffer to image copy
    CopyBufferToImage {
        /// Source buffer
        src: BufferHandle,
        /// Destination image
        dst: ImageHandle,
        /// Region
        region: BufferImageCopy,
    },
    /// Image layout transition
    ImageBarrier(ImageBarrier),
    /// Render pass begin
    BeginRenderPass {
        /// Render pass
        render_pass: RenderPassHandle,
        /// Framebuffer
        framebuffer: FramebufferHandle,
        /// Render area
        render_area: Rect2D,
        /// Clear values
        clear_values: Vec<ClearValue>,
    },
    /// Render pass end
    EndRenderPass,
    /// Dynamic viewport
    SetViewport(Viewport),
    /// Dynamic scissor
    SetScissor(Rect2D),
    /// Pipeline bind
    BindPipeline(PipelineHandle),
    /// Descriptor set bind
    BindDescriptorSets {
        /// Pipeline layout
        layout: PipelineLayoutHandle,
        /// First set index
        first_set: u32,
        /// Bound sets
        sets: Vec<DescriptorSetHandle>,
    },
    /// Push constant update
    PushConstants {
        /// Pipeline layout
        layout: PipelineLayoutHandle,
        /// Stages
        stages: ShaderStages,
        /// Byte offset
        offset: u32,
        /// Payload
        data: Vec<u8>,
    },
    /// Vertex buffer bind
    BindVertexBuffers {
        /// First binding
        first_binding: u32,
        /// Buffers
        buffers: Vec<BufferHandle>,
    },
    /// Index buffer bind
    BindIndexBuffer {
        /// Buffer
        buffer: BufferHandle,
        /// Index type
        index_type: IndexType,
    },
    /// Non-indexed draw
    Draw {
        /// Vertices
        vertex_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices
        index_count: u32,
        /// Instances
        instance_count: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<ImageHandle>,
    extent: Extent2D,
    next_image: u32,
    retired: bool,
}

#[derive(Debug)]
enum Object {
    Buffer {
        size: u64,
        binding: Option<(MemoryHandle, u64)>,
    },
    Memory {
        bytes: Box<[u8]>,
        flags: MemoryPropertyFlags,
        mapped: bool,
    },
    Image {
        desc: ImageDesc,
        swapchain: Option<SwapchainHandle>,
        layout: ImageLayout,
    },
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    Swapchain(SwapchainState),
    Semaphore {
        signaled: bool,
    },
    Fence(FenceState),
    CommandPool,
    CommandBuffer {
        pool: CommandPoolHandle,
        state: CommandState,
        commands: Vec<RecordedCommand>,
    },
    DescriptorSetLayout {
        bindings: Vec<LayoutBinding>,
    },
    DescriptorPool {
        desc: DescriptorPoolDesc,
        sets: Vec<DescriptorSetHandle>,
        used: HashMap<DescriptorKind, u32>,
    },
    DescriptorSet {
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        writes: HashMap<u32, DescriptorResource>,
    },
    ShaderModule,
    PipelineLayout,
    Pipeline,
}

struct DeviceState {
    objects: SlotMap<DefaultKey, Object>,
    stats: HeadlessStats,
    acquire_script: VecDeque<ScriptedOutcome>,
    present_script: VecDeque<ScriptedOutcome>,
    image_script: VecDeque<u32>,
}

fn key(raw: u64) -> DefaultKey {
    KeyData::from_ffi(raw).into()
}

fn invalid(kind: &str, raw: u64) -> BackendError {
    BackendError::InvalidHandle(format!("{kind} {raw:#x}"))
}

fn to_usize(value: u64) -> BackendResult<usize> {
    usize::try_from(value).map_err(|_| BackendError::OutOfHostMemory)
}

fn layout_requirements(bindings: &[LayoutBinding]) -> HashMap<DescriptorKind, u32> {
    let mut needed = HashMap::new();
    for binding in bindings {
        *needed.entry(binding.kind).or_insert(0) += binding.count;
    }
    needed
}

impl DeviceState {
    fn insert(&mut self, object: Object) -> u64 {
        self.objects.insert(object).data().as_ffi()
    }

    fn contains(&self, raw: u64, matches: fn(&Object) -> bool) -> bool {
        self.objects.get(key(raw)).is_some_and(matches)
    }

    fn pending_fences(&self) -> usize {
        self.objects
            .values()
            .filter(|object| matches!(object, Object::Fence(FenceState::Pending)))
            .count()
    }

    fn complete_all_work(&mut self) {
        for object in self.objects.values_mut() {
            if let Object::Fence(state @ FenceState::Pending) = object {
                *state = FenceState::Signaled;
            }
        }
    }

    fn buffer_binding(&self, buffer: BufferHandle) -> BackendResult<(MemoryHandle, u64, u64)> {
        match self.objects.get(key(buffer.as_raw())) {
            Some(Object::Buffer {
                size,
                binding: Some((memory, offset)),
            }) => Ok((*memory, *offset, *size)),
            Some(Object::Buffer { binding: None, .. }) => Err(BackendError::Other(format!(
                "buffer {:#x} has no memory bound",
                buffer.as_raw()
            ))),
            _ => Err(invalid("buffer", buffer.as_raw())),
        }
    }

    fn memory_bytes(&self, memory: MemoryHandle) -> BackendResult<&[u8]> {
        match self.objects.get(key(memory.as_raw())) {
            Some(Object::Memory { bytes, .. }) => Ok(bytes),
            _ => Err(invalid("memory", memory.as_raw())),
        }
    }

    fn copy_between_buffers(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        region: &BufferCopy,
    ) -> BackendResult<()> {
        let (src_memory, src_base, src_size) = self.buffer_binding(src)?;
        let (dst_memory, dst_base, dst_size) = self.buffer_binding(dst)?;
        if region.src_offset + region.size > src_size || region.dst_offset + region.size > dst_size {
            return Err(BackendError::Other("copy region out of bounds".to_string()));
        }

        let start = to_usize(src_base + region.src_offset)?;
        let len = to_usize(region.size)?;
        let data = self.memory_bytes(src_memory)?[start..start + len].to_vec();

        let start = to_usize(dst_base + region.dst_offset)?;
        match self.objects.get_mut(key(dst_memory.as_raw())) {
            Some(Object::Memory { bytes, .. }) => {
                bytes[start..start + len].copy_from_slice(&data);
                Ok(())
            }
            _ => Err(invalid("memory", dst_memory.as_raw())),
        }
    }

    fn execute(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let commands = match self.objects.get(key(command_buffer.as_raw())) {
            Some(Object::CommandBuffer {
                state: CommandState::Executable,
                commands,
                ..
            }) => commands.clone(),
            Some(Object::CommandBuffer { .. }) => {
                return Err(BackendError::Other(
                    "submitted command buffer is not executable".to_string(),
                ))
            }
            _ => return Err(invalid("command buffer", command_buffer.as_raw())),
        };

        for command in &commands {
            match command {
                RecordedCommand::CopyBuffer { src, dst, regions } => {
                    for region in regions {
                        self.copy_between_buffers(*src, *dst, region)?;
                    }
                }
                RecordedCommand::ImageBarrier(barrier) => {
                    if let Some(Object::Image { layout, .. }) =
                        self.objects.get_mut(key(barrier.image.as_raw()))
                    {
                        *layout = barrier.new_layout;
                    }
                }
                RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. } => {
                    self.stats.draw_calls += 1;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn consume_semaphores(&mut self, semaphores: &[SemaphoreHandle]) -> BackendResult<()> {
        for semaphore in semaphores {
            match self.objects.get_mut(key(semaphore.as_raw())) {
                Some(Object::Semaphore { signaled }) if *signaled => *signaled = false,
                Some(Object::Semaphore { .. }) => {
                    return Err(BackendError::Other(format!(
                        "wait on semaphore {:#x} that will never be signalled",
                        semaphore.as_raw()
                    )))
                }
                _ => return Err(invalid("semaphore", semaphore.as_raw())),
            }
        }
        Ok(())
    }

    fn signal_semaphores(&mut self, semaphores: &[SemaphoreHandle]) -> BackendResult<()> {
        for semaphore in semaphores {
            match self.objects.get_mut(key(semaphore.as_raw())) {
                Some(Object::Semaphore { signaled }) => *signaled = true,
                _ => return Err(invalid("semaphore", semaphore.as_raw())),
            }
        }
        Ok(())
    }

    fn release_sets(&mut self, sets: &[DescriptorSetHandle]) {
        for set in sets {
            self.objects.remove(key(set.as_raw()));
        }
    }
}

/// Simulated logical device
pub struct HeadlessDevice {
    adapter: HeadlessAdapter,
    queue_families: Vec<u32>,
    surface: HeadlessSurface,
    state: Mutex<DeviceState>,
}

impl HeadlessDevice {
    pub(super) fn new(
        adapter: HeadlessAdapter,
        queue_families: Vec<u32>,
        surface: HeadlessSurface,
    ) -> Self {
        Self {
            adapter,
            queue_families,
            surface,
            state: Mutex::new(DeviceState {
                objects: SlotMap::new(),
                stats: HeadlessStats::default(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_script: VecDeque::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, command_buffer: CommandBufferHandle, command: RecordedCommand) {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.objects.get_mut(key(command_buffer.as_raw())) {
            Some(Object::CommandBuffer {
                state: CommandState::Recording,
                commands,
                ..
            }) => commands.push(command),
            _ => {
                log::error!(
                    "Command recorded into {:#x}, which is not recording",
                    command_buffer.as_raw()
                );
                state.stats.invalid_commands += 1;
            }
        }
    }

    fn destroy(&self, kind: &str, raw: u64, matches: fn(&Object) -> bool) -> Option<Object> {
        let mut state = self.state();
        if state.contains(raw, matches) {
            state.objects.remove(key(raw))
        } else {
            log::error!("Destroy of unknown {kind} {raw:#x}");
            state.stats.invalid_destroys += 1;
            None
        }
    }

    fn memory_type_mask(&self, required: MemoryPropertyFlags) -> u32 {
        self.adapter
            .memory
            .memory_types
            .iter()
            .enumerate()
            .filter(|(_, memory_type)| memory_type.property_flags.contains(required))
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }

    /// Snapshot of the device counters
    pub fn stats(&self) -> HeadlessStats {
        self.state().stats.clone()
    }

    /// Number of live objects of any kind
    pub fn live_objects(&self) -> usize {
        self.state().objects.len()
    }

    /// Number of live fences
    pub fn live_fences(&self) -> usize {
        self.state()
            .objects
            .values()
            .filter(|object| matches!(object, Object::Fence(_)))
            .count()
    }

    /// Number of live semaphores
    pub fn live_semaphores(&self) -> usize {
        self.state()
            .objects
            .values()
            .filter(|object| matches!(object, Object::Semaphore { .. }))
            .count()
    }

    /// Number of fences currently pending
    pub fn pending_fences(&self) -> usize {
        self.state().pending_fences()
    }

    /// Force the outcome of the next acquire call
    pub fn script_acquire(&self, outcome: ScriptedOutcome) {
        self.state().acquire_script.push_back(outcome);
    }

    /// Hand out `image_index` on the next acquire instead of the round-robin
    /// order
    pub fn script_image_index(&self, image_index: u32) {
        self.state().image_script.push_back(image_index);
    }

    /// Force the outcome of the next present call
    pub fn script_present(&self, outcome: ScriptedOutcome) {
        self.state().present_script.push_back(outcome);
    }

    /// Bytes of the memory bound to a buffer, `None` for unknown or unbound buffers
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        let state = self.state();
        let (memory, offset, size) = state.buffer_binding(buffer).ok()?;
        let bytes = state.memory_bytes(memory).ok()?;
        let start = usize::try_from(offset).ok()?;
        let end = start + usize::try_from(size).ok()?;
        bytes.get(start..end).map(<[u8]>::to_vec)
    }

    /// Commands recorded into a command buffer
    pub fn recorded_commands(&self, command_buffer: CommandBufferHandle) -> Vec<RecordedCommand> {
        match self.state().objects.get(key(command_buffer.as_raw())) {
            Some(Object::CommandBuffer { commands, .. }) => commands.clone(),
            _ => Vec::new(),
        }
    }

    /// Resource last written to a descriptor binding
    pub fn descriptor_binding(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
    ) -> Option<DescriptorResource> {
        match self.state().objects.get(key(set.as_raw())) {
            Some(Object::DescriptorSet { writes, .. }) => writes.get(&binding).copied(),
            _ => None,
        }
    }

    /// Number of sets currently allocated from a pool
    pub fn allocated_sets(&self, pool: DescriptorPoolHandle) -> usize {
        match self.state().objects.get(key(pool.as_raw())) {
            Some(Object::DescriptorPool { sets, .. }) => sets.len(),
            _ => 0,
        }
    }

    /// Current layout of an image as of the last executed barrier
    pub fn image_layout(&self, image: ImageHandle) -> Option<ImageLayout> {
        match self.state().objects.get(key(image.as_raw())) {
            Some(Object::Image { layout, .. }) => Some(*layout),
            _ => None,
        }
    }

    /// Whether a fence is pending (submitted, not yet waited on)
    pub fn fence_pending(&self, fence: FenceHandle) -> bool {
        matches!(
            self.state().objects.get(key(fence.as_raw())),
            Some(Object::Fence(FenceState::Pending))
        )
    }
}

impl GpuDevice for HeadlessDevice {
    fn queue(&self, family: u32) -> BackendResult<QueueHandle> {
        if self.queue_families.contains(&family) {
            Ok(QueueHandle::from_raw(u64::from(family) + 1))
        } else {
            Err(BackendError::Other(format!("no queue created in family {family}")))
        }
    }

    fn queue_submit(
        &self,
        _queue: QueueHandle,
        submit: &SubmitInfo<'_>,
        fence: Option<FenceHandle>,
    ) -> BackendResult<()> {
        let mut state = self.state();
        if let Some(fence) = fence {
            match state.objects.get(key(fence.as_raw())) {
                Some(Object::Fence(FenceState::Unsignaled)) => {}
                Some(Object::Fence(_)) => {
                    return Err(BackendError::Other(
                        "submit with a fence that is not unsignalled".to_string(),
                    ))
                }
                _ => return Err(invalid("fence", fence.as_raw())),
            }
        }

        state.consume_semaphores(submit.wait_semaphores)?;
        for &command_buffer in submit.command_buffers {
            state.execute(command_buffer)?;
        }
        state.signal_semaphores(submit.signal_semaphores)?;

        if let Some(fence) = fence {
            if let Some(Object::Fence(fence_state)) = state.objects.get_mut(key(fence.as_raw())) {
                *fence_state = FenceState::Pending;
            }
        }

        state.stats.submissions += 1;
        let pending = state.pending_fences();
        state.stats.max_pending_fences = state.stats.max_pending_fences.max(pending);
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: QueueHandle) -> BackendResult<()> {
        let mut state = self.state();
        state.stats.queue_wait_idles += 1;
        state.complete_all_work();
        Ok(())
    }

    fn device_wait_idle(&self) -> BackendResult<()> {
        let mut state = self.state();
        state.stats.device_wait_idles += 1;
        state.complete_all_work();
        Ok(())
    }

    fn create_buffer(&self, size: u64, _usage: BufferUsage) -> BackendResult<BufferHandle> {
        if size == 0 {
            return Err(BackendError::Other("buffer size must be nonzero".to_string()));
        }
        let raw = self.state().insert(Object::Buffer { size, binding: None });
        Ok(BufferHandle::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.destroy("buffer", buffer.as_raw(), |o| matches!(o, Object::Buffer { .. }));
    }

    fn buffer_memory_requirements(&self, buffer: BufferHandle) -> BackendResult<MemoryRequirements> {
        match self.state().objects.get(key(buffer.as_raw())) {
            Some(Object::Buffer { size, .. }) => Ok(MemoryRequirements {
                size: *size,
                alignment: 16,
                memory_type_bits: self.memory_type_mask(MemoryPropertyFlags::empty()),
            }),
            _ => Err(invalid("buffer", buffer.as_raw())),
        }
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> BackendResult<MemoryHandle> {
        let memory_type = self
            .adapter
            .memory
            .memory_types
            .get(memory_type_index as usize)
            .ok_or_else(|| BackendError::Other(format!("memory type {memory_type_index} does not exist")))?;
        let bytes = vec![0_u8; to_usize(size)?].into_boxed_slice();
        let raw = self.state().insert(Object::Memory {
            bytes,
            flags: memory_type.property_flags,
            mapped: false,
        });
        Ok(MemoryHandle::from_raw(raw))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        self.destroy("memory", memory.as_raw(), |o| matches!(o, Object::Memory { .. }));
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let mut state = self.state();
        let memory_len = state.memory_bytes(memory)?.len() as u64;
        match state.objects.get_mut(key(buffer.as_raw())) {
            Some(Object::Buffer { size, binding }) => {
                if binding.is_some() {
                    return Err(BackendError::Other("buffer memory already bound".to_string()));
                }
                if offset + *size > memory_len {
                    return Err(BackendError::Other("allocation too small for buffer".to_string()));
                }
                *binding = Some((memory, offset));
                Ok(())
            }
            _ => Err(invalid("buffer", buffer.as_raw())),
        }
    }

    fn map_memory(&self, memory: MemoryHandle, offset: u64, size: u64) -> BackendResult<NonNull<u8>> {
        let mut state = self.state();
        match state.objects.get_mut(key(memory.as_raw())) {
            Some(Object::Memory { bytes, flags, mapped }) => {
                if !flags.contains(MemoryPropertyFlags::HOST_VISIBLE) {
                    return Err(BackendError::Other("memory is not host visible".to_string()));
                }
                if *mapped {
                    return Err(BackendError::Other("memory is already mapped".to_string()));
                }
                let len = bytes.len() as u64;
                let end = if size == WHOLE_SIZE { len } else { offset + size };
                if offset >= len || end > len {
                    return Err(BackendError::Other("map range out of bounds".to_string()));
                }
                let start = to_usize(offset)?;
                let pointer = NonNull::new(bytes[start..].as_mut_ptr())
                    .ok_or(BackendError::OutOfHostMemory)?;
                *mapped = true;
                Ok(pointer)
            }
            _ => Err(invalid("memory", memory.as_raw())),
        }
    }

    fn unmap_memory(&self, memory: MemoryHandle) {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.objects.get_mut(key(memory.as_raw())) {
            Some(Object::Memory { mapped, .. }) => *mapped = false,
            _ => state.stats.invalid_commands += 1,
        }
    }

    fn flush_mapped_range(&self, memory: MemoryHandle, _offset: u64, _size: u64) -> BackendResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.objects.get(key(memory.as_raw())) {
            Some(Object::Memory { mapped: true, .. }) => {
                state.stats.flushes += 1;
                Ok(())
            }
            Some(Object::Memory { .. }) => Err(BackendError::Other("flush of unmapped memory".to_string())),
            _ => Err(invalid("memory", memory.as_raw())),
        }
    }

    fn invalidate_mapped_range(
        &self,
        memory: MemoryHandle,
        _offset: u64,
        _size: u64,
    ) -> BackendResult<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        match state.objects.get(key(memory.as_raw())) {
            Some(Object::Memory { mapped: true, .. }) => {
                state.stats.invalidations += 1;
                Ok(())
            }
            Some(Object::Memory { .. }) => {
                Err(BackendError::Other("invalidate of unmapped memory".to_string()))
            }
            _ => Err(invalid("memory", memory.as_raw())),
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> BackendResult<ImageHandle> {
        if desc.extent.is_zero() {
            return Err(BackendError::Other("image extent must be nonzero".to_string()));
        }
        let raw = self.state().insert(Object::Image {
            desc: *desc,
            swapchain: None,
            layout: ImageLayout::Undefined,
        });
        Ok(ImageHandle::from_raw(raw))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.destroy("image", image.as_raw(), |o| {
            matches!(o, Object::Image { swapchain: None, .. })
        });
    }

    fn image_memory_requirements(&self, image: ImageHandle) -> BackendResult<MemoryRequirements> {
        match self.state().objects.get(key(image.as_raw())) {
            Some(Object::Image { desc, .. }) => Ok(MemoryRequirements {
                size: u64::from(desc.extent.width)
                    * u64::from(desc.extent.height)
                    * u64::from(desc.array_layers)
                    * 4,
                alignment: 256,
                memory_type_bits: self.memory_type_mask(MemoryPropertyFlags::DEVICE_LOCAL),
            }),
            _ => Err(invalid("image", image.as_raw())),
        }
    }

    fn bind_image_memory(&self, image: ImageHandle, memory: MemoryHandle, _offset: u64) -> BackendResult<()> {
        let state = self.state();
        state.memory_bytes(memory)?;
        if state.contains(image.as_raw(), |o| matches!(o, Object::Image { .. })) {
            Ok(())
        } else {
            Err(invalid("image", image.as_raw()))
        }
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        _format: Format,
        _aspect: ImageAspect,
    ) -> BackendResult<ImageViewHandle> {
        let mut state = self.state();
        if !state.contains(image.as_raw(), |o| matches!(o, Object::Image { .. })) {
            return Err(invalid("image", image.as_raw()));
        }
        Ok(ImageViewHandle::from_raw(state.insert(Object::ImageView)))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.destroy("image view", view.as_raw(), |o| matches!(o, Object::ImageView));
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> BackendResult<SamplerHandle> {
        if let Some(anisotropy) = desc.max_anisotropy {
            if !self.adapter.sampler_anisotropy || anisotropy > self.adapter.limits.max_sampler_anisotropy {
                return Err(BackendError::Other(format!("anisotropy {anisotropy} unsupported")));
            }
        }
        Ok(SamplerHandle::from_raw(self.state().insert(Object::Sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.destroy("sampler", sampler.as_raw(), |o| matches!(o, Object::Sampler));
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle> {
        if !desc.depth_format.is_depth() || desc.color_format.is_depth() {
            return Err(BackendError::Other("render pass attachment formats mismatched".to_string()));
        }
        Ok(RenderPassHandle::from_raw(self.state().insert(Object::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.destroy("render pass", render_pass.as_raw(), |o| matches!(o, Object::RenderPass));
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> BackendResult<FramebufferHandle> {
        let mut state = self.state();
        if !state.contains(desc.render_pass.as_raw(), |o| matches!(o, Object::RenderPass)) {
            return Err(invalid("render pass", desc.render_pass.as_raw()));
        }
        if let Some(view) = desc
            .attachments
            .iter()
            .find(|view| !state.contains(view.as_raw(), |o| matches!(o, Object::ImageView)))
        {
            return Err(invalid("image view", view.as_raw()));
        }
        Ok(FramebufferHandle::from_raw(state.insert(Object::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.destroy("framebuffer", framebuffer.as_raw(), |o| matches!(o, Object::Framebuffer));
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> BackendResult<SwapchainHandle> {
        let caps = &self.adapter.capabilities;
        if desc.extent.is_zero() {
            return Err(BackendError::Other("swapchain extent must be nonzero".to_string()));
        }
        if desc.min_image_count < caps.min_image_count
            || (caps.max_image_count > 0 && desc.min_image_count > caps.max_image_count)
        {
            return Err(BackendError::Other(format!(
                "image count {} outside surface limits",
                desc.min_image_count
            )));
        }
        let surface_formats = self
            .surface
            .formats()
            .unwrap_or_else(|| self.adapter.surface_formats.clone());
        if !surface_formats.contains(&desc.surface_format) {
            return Err(BackendError::Other(format!(
                "surface format {:?} unsupported",
                desc.surface_format
            )));
        }
        if !self.adapter.present_modes.contains(&desc.present_mode) {
            return Err(BackendError::Other(format!(
                "present mode {:?} unsupported",
                desc.present_mode
            )));
        }

        let mut state = self.state();
        if let Some(old) = desc.old_swapchain {
            match state.objects.get_mut(key(old.as_raw())) {
                Some(Object::Swapchain(old_state)) => old_state.retired = true,
                _ => return Err(invalid("swapchain", old.as_raw())),
            }
        }

        let raw = state.insert(Object::Swapchain(SwapchainState {
            images: Vec::new(),
            extent: desc.extent,
            next_image: 0,
            retired: false,
        }));
        let handle = SwapchainHandle::from_raw(raw);
        let images: Vec<ImageHandle> = (0..desc.min_image_count)
            .map(|_| {
                ImageHandle::from_raw(state.insert(Object::Image {
                    desc: swapchain_image_desc(desc.surface_format, desc.extent),
                    swapchain: Some(handle),
                    layout: ImageLayout::Undefined,
                }))
            })
            .collect();
        if let Some(Object::Swapchain(swapchain)) = state.objects.get_mut(key(raw)) {
            swapchain.images = images;
        }
        state.stats.swapchains_created += 1;
        Ok(handle)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        if let Some(Object::Swapchain(removed)) =
            self.destroy("swapchain", swapchain.as_raw(), |o| matches!(o, Object::Swapchain(_)))
        {
            let mut state = self.state();
            for image in removed.images {
                state.objects.remove(key(image.as_raw()));
            }
        }
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> BackendResult<Vec<ImageHandle>> {
        match self.state().objects.get(key(swapchain.as_raw())) {
            Some(Object::Swapchain(swapchain)) => Ok(swapchain.images.clone()),
            _ => Err(invalid("swapchain", swapchain.as_raw())),
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        _timeout: u64,
        signal: SemaphoreHandle,
    ) -> BackendResult<AcquireOutcome> {
        let surface_extent = self.surface.extent();
        let mut guard = self.state();
        let state = &mut *guard;
        state.stats.acquires += 1;

        let scripted = state.acquire_script.pop_front();
        let (image_index, extent_matches) = match state.objects.get_mut(key(swapchain.as_raw())) {
            Some(Object::Swapchain(chain)) => {
                if chain.retired || scripted == Some(ScriptedOutcome::OutOfDate) {
                    return Ok(AcquireOutcome::OutOfDate);
                }
                let count = u32::try_from(chain.images.len()).unwrap_or(u32::MAX).max(1);
                let index = match state.image_script.pop_front() {
                    Some(index) if index >= count => {
                        return Err(BackendError::Other(format!(
                            "scripted image index {index} out of range for {count} images"
                        )))
                    }
                    Some(index) => index,
                    None => chain.next_image,
                };
                chain.next_image = (index + 1) % count;
                (index, chain.extent == surface_extent)
            }
            _ => return Err(invalid("swapchain", swapchain.as_raw())),
        };
        if !extent_matches {
            return Ok(AcquireOutcome::OutOfDate);
        }

        match state.objects.get_mut(key(signal.as_raw())) {
            Some(Object::Semaphore { signaled }) if !*signaled => *signaled = true,
            Some(Object::Semaphore { .. }) => {
                return Err(BackendError::Other(
                    "acquire with a semaphore that is already signalled".to_string(),
                ))
            }
            _ => return Err(invalid("semaphore", signal.as_raw())),
        }

        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: scripted == Some(ScriptedOutcome::Suboptimal),
        })
    }

    fn queue_present(
        &self,
        _queue: QueueHandle,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> BackendResult<SwapchainStatus> {
        let surface_extent = self.surface.extent();
        let mut state = self.state();
        state.consume_semaphores(wait)?;
        state.stats.presents += 1;

        let (retired, extent) = match state.objects.get(key(swapchain.as_raw())) {
            Some(Object::Swapchain(chain)) => {
                if image_index as usize >= chain.images.len() {
                    return Err(BackendError::Other(format!("image index {image_index} out of range")));
                }
                (chain.retired, chain.extent)
            }
            _ => return Err(invalid("swapchain", swapchain.as_raw())),
        };

        let status = match state.present_script.pop_front() {
            Some(ScriptedOutcome::OutOfDate) => SwapchainStatus::OutOfDate,
            Some(ScriptedOutcome::Suboptimal) => SwapchainStatus::Suboptimal,
            None if retired || extent != surface_extent => SwapchainStatus::OutOfDate,
            None => SwapchainStatus::Optimal,
        };
        Ok(status)
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        Ok(SemaphoreHandle::from_raw(
            self.state().insert(Object::Semaphore { signaled: false }),
        ))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.destroy("semaphore", semaphore.as_raw(), |o| matches!(o, Object::Semaphore { .. }));
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        Ok(FenceHandle::from_raw(self.state().insert(Object::Fence(state))))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.destroy("fence", fence.as_raw(), |o| matches!(o, Object::Fence(_)));
    }

    fn wait_for_fences(&self, fences: &[FenceHandle], _timeout: u64) -> BackendResult<()> {
        let mut state = self.state();
        state.stats.fence_waits += 1;
        for fence in fences {
            match state.objects.get_mut(key(fence.as_raw())) {
                Some(Object::Fence(fence_state)) => match fence_state {
                    FenceState::Pending => *fence_state = FenceState::Signaled,
                    FenceState::Signaled => {}
                    // nothing was submitted with it, a real device would block forever
                    FenceState::Unsignaled => return Err(BackendError::Timeout),
                },
                _ => return Err(invalid("fence", fence.as_raw())),
            }
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> BackendResult<()> {
        let mut state = self.state();
        for fence in fences {
            match state.objects.get_mut(key(fence.as_raw())) {
                Some(Object::Fence(FenceState::Pending)) => {
                    return Err(BackendError::Other("reset of a fence still in use".to_string()))
                }
                Some(Object::Fence(fence_state)) => *fence_state = FenceState::Unsignaled,
                _ => return Err(invalid("fence", fence.as_raw())),
            }
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool> {
        match self.state().objects.get(key(fence.as_raw())) {
            Some(Object::Fence(state)) => Ok(*state == FenceState::Signaled),
            _ => Err(invalid("fence", fence.as_raw())),
        }
    }

    fn create_command_pool(&self, queue_family: u32, _transient: bool) -> BackendResult<CommandPoolHandle> {
        if !self.queue_families.contains(&queue_family) {
            return Err(BackendError::Other(format!("no queue created in family {queue_family}")));
        }
        Ok(CommandPoolHandle::from_raw(self.state().insert(Object::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        if self
            .destroy("command pool", pool.as_raw(), |o| matches!(o, Object::CommandPool))
            .is_some()
        {
            self.state().objects.retain(|_, object| {
                !matches!(object, Object::CommandBuffer { pool: owner, .. } if *owner == pool)
            });
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: CommandPoolHandle,
        count: u32,
    ) -> BackendResult<Vec<CommandBufferHandle>> {
        let mut state = self.state();
        if !state.contains(pool.as_raw(), |o| matches!(o, Object::CommandPool)) {
            return Err(invalid("command pool", pool.as_raw()));
        }
        Ok((0..count)
            .map(|_| {
                CommandBufferHandle::from_raw(state.insert(Object::CommandBuffer {
                    pool,
                    state: CommandState::Initial,
                    commands: Vec::new(),
                }))
            })
            .collect())
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut state = self.state();
        for buffer in buffers {
            let owned = matches!(
                state.objects.get(key(buffer.as_raw())),
                Some(Object::CommandBuffer { pool: owner, .. }) if *owner == pool
            );
            if owned {
                state.objects.remove(key(buffer.as_raw()));
            } else {
                state.stats.invalid_destroys += 1;
            }
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        _usage: CommandBufferUsage,
    ) -> BackendResult<()> {
        match self.state().objects.get_mut(key(command_buffer.as_raw())) {
            Some(Object::CommandBuffer {
                state: CommandState::Recording,
                ..
            }) => Err(BackendError::Other("command buffer already recording".to_string())),
            Some(Object::CommandBuffer { state, commands, .. }) => {
                *state = CommandState::Recording;
                commands.clear();
                Ok(())
            }
            _ => Err(invalid("command buffer", command_buffer.as_raw())),
        }
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        match self.state().objects.get_mut(key(command_buffer.as_raw())) {
            Some(Object::CommandBuffer { state, .. }) if *state == CommandState::Recording => {
                *state = CommandState::Executable;
                Ok(())
            }
            Some(Object::CommandBuffer { .. }) => {
                Err(BackendError::Other("command buffer is not recording".to_string()))
            }
            _ => Err(invalid("command buffer", command_buffer.as_raw())),
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        region: &BufferImageCopy,
    ) {
        self.record(
            command_buffer,
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                region: *region,
            },
        );
    }

    fn cmd_image_barrier(&self, command_buffer: CommandBufferHandle, barrier: &ImageBarrier) {
        self.record(command_buffer, RecordedCommand::ImageBarrier(*barrier));
    }

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, begin: &RenderPassBegin<'_>) {
        self.record(
            command_buffer,
            RecordedCommand::BeginRenderPass {
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
                render_area: begin.render_area,
                clear_values: begin.clear_values.to_vec(),
            },
        );
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) {
        self.record(command_buffer, RecordedCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport) {
        self.record(command_buffer, RecordedCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &Rect2D) {
        self.record(command_buffer, RecordedCommand::SetScissor(*scissor));
    }

    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle) {
        self.record(command_buffer, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
        _dynamic_offsets: &[u32],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
            },
        );
    }

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::PushConstants {
                layout,
                stages,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        _offsets: &[u64],
    ) {
        self.record(
            command_buffer,
            RecordedCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        _offset: u64,
        index_type: IndexType,
    ) {
        self.record(command_buffer, RecordedCommand::BindIndexBuffer { buffer, index_type });
    }

    fn cmd_draw(
        &self,
        command_buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(
            command_buffer,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(
            command_buffer,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        for (index, binding) in bindings.iter().enumerate() {
            if bindings[..index].iter().any(|other| other.binding == binding.binding) {
                return Err(BackendError::Other(format!(
                    "binding {} declared twice",
                    binding.binding
                )));
            }
        }
        let raw = self.state().insert(Object::DescriptorSetLayout {
            bindings: bindings.to_vec(),
        });
        Ok(DescriptorSetLayoutHandle::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.destroy("descriptor set layout", layout.as_raw(), |o| {
            matches!(o, Object::DescriptorSetLayout { .. })
        });
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> BackendResult<DescriptorPoolHandle> {
        if desc.max_sets == 0 {
            return Err(BackendError::Other("descriptor pool max_sets must be nonzero".to_string()));
        }
        let raw = self.state().insert(Object::DescriptorPool {
            desc: desc.clone(),
            sets: Vec::new(),
            used: HashMap::new(),
        });
        Ok(DescriptorPoolHandle::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        if let Some(Object::DescriptorPool { sets, .. }) = self.destroy(
            "descriptor pool",
            pool.as_raw(),
            |o| matches!(o, Object::DescriptorPool { .. }),
        ) {
            self.state().release_sets(&sets);
        }
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let mut state = self.state();
        let needed = match state.objects.get(key(layout.as_raw())) {
            Some(Object::DescriptorSetLayout { bindings }) => layout_requirements(bindings),
            _ => return Err(invalid("descriptor set layout", layout.as_raw())),
        };

        match state.objects.get(key(pool.as_raw())) {
            Some(Object::DescriptorPool { desc, sets, used }) => {
                if sets.len() >= desc.max_sets as usize {
                    return Err(BackendError::OutOfPoolMemory);
                }
                for (kind, count) in &needed {
                    let capacity: u32 = desc
                        .pool_sizes
                        .iter()
                        .filter(|size| size.kind == *kind)
                        .map(|size| size.count)
                        .sum();
                    if used.get(kind).copied().unwrap_or(0) + count > capacity {
                        return Err(BackendError::OutOfPoolMemory);
                    }
                }
            }
            _ => return Err(invalid("descriptor pool", pool.as_raw())),
        }

        let set = DescriptorSetHandle::from_raw(state.insert(Object::DescriptorSet {
            pool,
            layout,
            writes: HashMap::new(),
        }));
        if let Some(Object::DescriptorPool { sets, used, .. }) = state.objects.get_mut(key(pool.as_raw())) {
            sets.push(set);
            for (kind, count) in needed {
                *used.entry(kind).or_insert(0) += count;
            }
        }
        state.stats.descriptor_sets_allocated += 1;
        Ok(set)
    }

    fn free_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        sets: &[DescriptorSetHandle],
    ) -> BackendResult<()> {
        let mut state = self.state();
        match state.objects.get(key(pool.as_raw())) {
            Some(Object::DescriptorPool { desc, .. })
                if desc.flags.contains(DescriptorPoolFlags::FREE_DESCRIPTOR_SET) => {}
            Some(Object::DescriptorPool { .. }) => {
                return Err(BackendError::Other(
                    "pool was not created with FREE_DESCRIPTOR_SET".to_string(),
                ))
            }
            _ => return Err(invalid("descriptor pool", pool.as_raw())),
        }

        let mut released: HashMap<DescriptorKind, u32> = HashMap::new();
        for set in sets {
            let layout = match state.objects.get(key(set.as_raw())) {
                Some(Object::DescriptorSet { pool: owner, layout, .. }) if *owner == pool => *layout,
                _ => return Err(invalid("descriptor set", set.as_raw())),
            };
            if let Some(Object::DescriptorSetLayout { bindings }) = state.objects.get(key(layout.as_raw())) {
                for (kind, count) in layout_requirements(bindings) {
                    *released.entry(kind).or_insert(0) += count;
                }
            }
        }

        state.release_sets(sets);
        if let Some(Object::DescriptorPool { sets: live, used, .. }) =
            state.objects.get_mut(key(pool.as_raw()))
        {
            live.retain(|set| !sets.contains(set));
            for (kind, count) in released {
                if let Some(in_use) = used.get_mut(&kind) {
                    *in_use = in_use.saturating_sub(count);
                }
            }
        }
        Ok(())
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> BackendResult<()> {
        let mut state = self.state();
        let sets = match state.objects.get_mut(key(pool.as_raw())) {
            Some(Object::DescriptorPool { sets, used, .. }) => {
                used.clear();
                std::mem::take(sets)
            }
            _ => return Err(invalid("descriptor pool", pool.as_raw())),
        };
        state.release_sets(&sets);
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut guard = self.state();
        let state = &mut *guard;
        for write in writes {
            match state.objects.get_mut(key(write.set.as_raw())) {
                Some(Object::DescriptorSet { writes: bound, .. }) => {
                    bound.insert(write.binding, write.resource);
                    state.stats.descriptor_writes += 1;
                }
                _ => {
                    log::error!("Descriptor write to unknown set {:#x}", write.set.as_raw());
                    state.stats.invalid_commands += 1;
                }
            }
        }
    }

    fn create_shader_module(&self, code: &[u8]) -> BackendResult<ShaderModuleHandle> {
        let magic = code
            .get(..4)
            .and_then(|word| <[u8; 4]>::try_from(word).ok())
            .map(u32::from_le_bytes);
        if code.len() % 4 != 0 || magic != Some(SPIRV_MAGIC) {
            return Err(BackendError::Other("invalid SPIR-V bytecode".to_string()));
        }
        Ok(ShaderModuleHandle::from_raw(self.state().insert(Object::ShaderModule)))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.destroy("shader module", module.as_raw(), |o| matches!(o, Object::ShaderModule));
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constant_ranges: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        let mut state = self.state();
        if let Some(layout) = set_layouts.iter().find(|layout| {
            !state.contains(layout.as_raw(), |o| matches!(o, Object::DescriptorSetLayout { .. }))
        }) {
            return Err(invalid("descriptor set layout", layout.as_raw()));
        }
        let limit = self.adapter.limits.max_push_constants_size;
        if push_constant_ranges.iter().any(|range| range.offset + range.size > limit) {
            return Err(BackendError::Other(format!("push constants exceed {limit} bytes")));
        }
        Ok(PipelineLayoutHandle::from_raw(state.insert(Object::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.destroy("pipeline layout", layout.as_raw(), |o| matches!(o, Object::PipelineLayout));
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> BackendResult<PipelineHandle> {
        let mut state = self.state();
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !state.contains(module.as_raw(), |o| matches!(o, Object::ShaderModule)) {
                return Err(invalid("shader module", module.as_raw()));
            }
        }
        if !state.contains(desc.layout.as_raw(), |o| matches!(o, Object::PipelineLayout)) {
            return Err(invalid("pipeline layout", desc.layout.as_raw()));
        }
        if !state.contains(desc.render_pass.as_raw(), |o| matches!(o, Object::RenderPass)) {
            return Err(invalid("render pass", desc.render_pass.as_raw()));
        }
        Ok(PipelineHandle::from_raw(state.insert(Object::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.destroy("pipeline", pipeline.as_raw(), |o| matches!(o, Object::Pipeline));
    }
}

fn swapchain_image_desc(format: SurfaceFormat, extent: Extent2D) -> ImageDesc {
    ImageDesc {
        extent,
        format: format.format,
        tiling: ImageTiling::Optimal,
        usage: ImageUsage::COLOR_ATTACHMENT,
        mip_levels: 1,
        array_layers: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::HeadlessInstance;
    use crate::render::backends::{DeviceDesc, GpuInstance};
    use std::sync::Arc;

    fn device() -> Arc<dyn GpuDevice> {
        let surface = HeadlessSurface::new(800, 600);
        let instance = HeadlessInstance::with_default_adapter(&surface);
        let adapter = instance.enumerate_adapters().unwrap()[0];
        instance
            .create_device(
                adapter,
                &DeviceDesc {
                    queue_families: vec![0],
                    extensions: Vec::new(),
                    sampler_anisotropy: true,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_fence_completes_when_waited() {
        let device = device();
        let queue = device.queue(0).unwrap();
        let fence = device.create_fence(false).unwrap();

        assert_eq!(device.wait_for_fences(&[fence], u64::MAX), Err(BackendError::Timeout));

        let submit = SubmitInfo {
            wait_semaphores: &[],
            wait_stages: &[],
            command_buffers: &[],
            signal_semaphores: &[],
        };
        device.queue_submit(queue, &submit, Some(fence)).unwrap();
        assert!(!device.fence_signaled(fence).unwrap());
        assert!(device.reset_fences(&[fence]).is_err());

        device.wait_for_fences(&[fence], u64::MAX).unwrap();
        assert!(device.fence_signaled(fence).unwrap());
        device.destroy_fence(fence);
    }

    #[test]
    fn test_mapping_twice_fails() {
        let device = device();
        let memory = device.allocate_memory(64, 1).unwrap();
        device.map_memory(memory, 0, WHOLE_SIZE).unwrap();
        assert!(device.map_memory(memory, 0, WHOLE_SIZE).is_err());
        device.unmap_memory(memory);
        device.free_memory(memory);
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let device = device();
        let memory = device.allocate_memory(64, 0).unwrap();
        assert!(device.map_memory(memory, 0, WHOLE_SIZE).is_err());
        device.free_memory(memory);
    }

    #[test]
    fn test_shader_module_requires_spirv_magic() {
        let device = device();
        assert!(device.create_shader_module(&[1, 2, 3, 4]).is_err());
        assert!(device.create_shader_module(&[0x03, 0x02, 0x23]).is_err());
        let module = device
            .create_shader_module(&SPIRV_MAGIC.to_le_bytes())
            .unwrap();
        device.destroy_shader_module(module);
    }

    #[test]
    fn test_command_pool_destroy_takes_its_buffers() {
        let device = device();
        let pool = device.create_command_pool(0, true).unwrap();
        let buffers = device.allocate_command_buffers(pool, 3).unwrap();
        assert_eq!(buffers.len(), 3);
        device.destroy_command_pool(pool);
        assert!(device.begin_command_buffer(buffers[0], CommandBufferUsage::empty()).is_err());
    }
}
