//! Command pools and command recording

use std::sync::Arc;

use bytemuck::Pod;

use super::backends::{
    BufferHandle, ClearValue, CommandBufferHandle, CommandPoolHandle, DescriptorSetHandle,
    FramebufferHandle, GpuDevice, IndexType, PipelineHandle, PipelineLayoutHandle, Rect2D,
    RenderPassBegin, RenderPassHandle, ShaderStages, Viewport,
};
use super::errors::RenderResult;

/// Command pool whose buffers can be reset individually
pub struct CommandPool {
    gpu: Arc<dyn GpuDevice>,
    pool: CommandPoolHandle,
}

impl CommandPool {
    /// Create a pool for `queue_family`
    pub fn new(gpu: Arc<dyn GpuDevice>, queue_family: u32) -> RenderResult<Self> {
        let pool = gpu.create_command_pool(queue_family, false)?;
        Ok(Self { gpu, pool })
    }

    /// Allocate primary command buffers
    ///
    /// They are freed together with the pool.
    pub fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<CommandBufferHandle>> {
        Ok(self.gpu.allocate_command_buffers(self.pool, count)?)
    }

    /// Pool handle
    pub fn handle(&self) -> CommandPoolHandle {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.gpu.destroy_command_pool(self.pool);
    }
}

/// Records into a command buffer that is already in the recording state
///
/// Borrowed for the duration of a frame; recording calls cannot fail, API
/// misuse surfaces as a validation error or at submission.
#[derive(Clone, Copy)]
pub struct CommandRecorder<'a> {
    gpu: &'a dyn GpuDevice,
    command_buffer: CommandBufferHandle,
}

impl<'a> CommandRecorder<'a> {
    /// Wrap a recording command buffer
    pub fn new(gpu: &'a dyn GpuDevice, command_buffer: CommandBufferHandle) -> Self {
        Self { gpu, command_buffer }
    }

    /// Underlying command buffer
    pub fn handle(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// Begin an inline render pass
    pub fn begin_render_pass(
        &self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: Rect2D,
        clear_values: &[ClearValue],
    ) {
        self.gpu.cmd_begin_render_pass(
            self.command_buffer,
            &RenderPassBegin {
                render_pass,
                framebuffer,
                render_area,
                clear_values,
            },
        );
    }

    /// End the current render pass
    pub fn end_render_pass(&self) {
        self.gpu.cmd_end_render_pass(self.command_buffer);
    }

    /// Set the dynamic viewport
    pub fn set_viewport(&self, viewport: &Viewport) {
        self.gpu.cmd_set_viewport(self.command_buffer, viewport);
    }

    /// Set the dynamic scissor
    pub fn set_scissor(&self, scissor: &Rect2D) {
        self.gpu.cmd_set_scissor(self.command_buffer, scissor);
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&self, pipeline: PipelineHandle) {
        self.gpu.cmd_bind_pipeline(self.command_buffer, pipeline);
    }

    /// Bind descriptor sets starting at `first_set`
    pub fn bind_descriptor_sets(
        &self,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.gpu
            .cmd_bind_descriptor_sets(self.command_buffer, layout, first_set, sets, &[]);
    }

    /// Push a plain-old-data value
    pub fn push_constants<T: Pod>(
        &self,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        value: &T,
    ) {
        self.gpu.cmd_push_constants(
            self.command_buffer,
            layout,
            stages,
            offset,
            bytemuck::bytes_of(value),
        );
    }

    /// Bind vertex buffers at offset zero
    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[BufferHandle]) {
        let offsets = vec![0; buffers.len()];
        self.gpu
            .cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, &offsets);
    }

    /// Bind an index buffer at offset zero
    pub fn bind_index_buffer(&self, buffer: BufferHandle, index_type: IndexType) {
        self.gpu
            .cmd_bind_index_buffer(self.command_buffer, buffer, 0, index_type);
    }

    /// Non-indexed draw of a single instance
    pub fn draw(&self, vertex_count: u32) {
        self.gpu.cmd_draw(self.command_buffer, vertex_count, 1, 0, 0);
    }

    /// Indexed draw of a single instance
    pub fn draw_indexed(&self, index_count: u32) {
        self.gpu
            .cmd_draw_indexed(self.command_buffer, index_count, 1, 0, 0, 0);
    }

    /// Indexed draw of several instances
    pub fn draw_indexed_instanced(&self, index_count: u32, instance_count: u32) {
        self.gpu
            .cmd_draw_indexed(self.command_buffer, index_count, instance_count, 0, 0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessInstance, HeadlessSurface, RecordedCommand};
    use crate::render::backends::{CommandBufferUsage, DeviceDesc, GpuInstance};

    #[test]
    fn test_recorder_forwards_commands() {
        let surface = HeadlessSurface::new(320, 240);
        let instance = HeadlessInstance::with_default_adapter(&surface);
        let adapter = instance.enumerate_adapters().unwrap()[0];
        let gpu = instance
            .create_device(
                adapter,
                &DeviceDesc {
                    queue_families: vec![0],
                    extensions: vec!["VK_KHR_swapchain".to_string()],
                    sampler_anisotropy: true,
                },
            )
            .unwrap();
        let headless = instance.last_device().unwrap();

        let pool = CommandPool::new(Arc::clone(&gpu), 0).unwrap();
        let command_buffer = pool.allocate_command_buffers(1).unwrap()[0];
        gpu.begin_command_buffer(command_buffer, CommandBufferUsage::empty())
            .unwrap();

        let recorder = CommandRecorder::new(gpu.as_ref(), command_buffer);
        let layout = PipelineLayoutHandle::from_raw(7);
        recorder.push_constants(layout, ShaderStages::VERTEX, 0, &[1.0_f32, 2.0]);
        recorder.draw(3);

        let commands = headless.recorded_commands(command_buffer);
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            RecordedCommand::PushConstants { data, .. } if data.len() == 8
        ));
        assert!(matches!(
            commands[1],
            RecordedCommand::Draw {
                vertex_count: 3,
                instance_count: 1
            }
        ));
    }
}
