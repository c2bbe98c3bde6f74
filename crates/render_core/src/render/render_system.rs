//! # Render System
//!
//! Composition root of the render core. A [`RenderSystem`] owns the device,
//! the frame loop, one global uniform buffer and descriptor set per frame in
//! flight, and the scene pipeline. Applications hand it a camera and a list
//! of [`Drawable`]s once per frame.
//!
//! ## Frame outline
//!
//! 1. acquire an image (waits on the frame slot's fence)
//! 2. write and flush the slot's global UBO
//! 3. begin the render pass, bind pipeline and global set
//! 4. let every drawable push its constants and draw
//! 5. end the render pass, submit and present
//!
//! The UBO write happens strictly after the fence wait, so the GPU never
//! reads a buffer the host is writing.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::backends::{
    CommandBufferHandle, DescriptorKind, DescriptorSetHandle, GpuInstance, PipelineLayoutHandle,
    PushConstantRange, ShaderStages, WHOLE_SIZE,
};
use super::backends::{BufferUsage, MemoryPropertyFlags};
use super::buffer::Buffer;
use super::camera::Camera;
use super::commands::CommandRecorder;
use super::descriptors::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use super::device::Device;
use super::errors::RenderResult;
use super::pipeline::{GraphicsPipeline, PipelineConfigInfo, PipelineLayout};
use super::renderer::Renderer;
use super::swapchain::MAX_FRAMES_IN_FLIGHT;
use super::window::SurfaceProvider;
use crate::core::RendererConfig;
use crate::foundation::math::{mat3_to_padded_cols, mat4_to_cols, Mat4, Transform, Vec3};

/// Per-frame data shared by every draw, bound at set 0 binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlobalUbo {
    /// Projection times view, column major
    pub projection_view: [[f32; 4]; 4],
    /// Ambient light color, `w` is intensity
    pub ambient_light_color: [f32; 4],
    /// Direction the light travels, `w` unused
    pub light_direction: [f32; 4],
}

impl GlobalUbo {
    /// UBO for a camera with the default light
    pub fn new(projection_view: &Mat4) -> Self {
        let light = Vec3::new(1.0, -3.0, -1.0).normalize();
        Self {
            projection_view: mat4_to_cols(projection_view),
            ambient_light_color: [1.0, 1.0, 1.0, 0.02],
            light_direction: [light.x, light.y, light.z, 0.0],
        }
    }
}

/// Per-object push constants
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstantData {
    /// Model matrix, column major
    pub model_matrix: [[f32; 4]; 4],
    /// Normal matrix padded to 4x4 for std430 layout
    pub normal_matrix: [[f32; 4]; 4],
}

impl PushConstantData {
    /// Push constants for an object at `transform`
    pub fn from_transform(transform: &Transform) -> Self {
        Self {
            model_matrix: mat4_to_cols(&transform.to_matrix()),
            normal_matrix: mat3_to_padded_cols(&transform.normal_matrix()),
        }
    }

    /// Stages that read the push constants
    pub const STAGES: ShaderStages = ShaderStages::ALL_GRAPHICS;
}

/// What a drawable gets to record its draw
pub struct FrameContext<'a> {
    /// Frame slot in `0..MAX_FRAMES_IN_FLIGHT`
    pub frame_index: usize,
    /// Command buffer being recorded
    pub command_buffer: CommandBufferHandle,
    /// Recorder for `command_buffer`
    pub recorder: CommandRecorder<'a>,
    /// Camera the frame is rendered from
    pub camera: &'a Camera,
    /// Global set bound for this frame
    pub global_descriptor_set: DescriptorSetHandle,
}

/// Something that records draw commands inside the scene render pass
///
/// The pipeline and global descriptor set are already bound.
pub trait Drawable {
    /// Push per-object constants and issue draws
    fn render(&self, frame: &FrameContext<'_>, pipeline_layout: PipelineLayoutHandle) -> RenderResult<()>;
}

/// Device, frame loop and scene pipeline in one place
pub struct RenderSystem {
    pipeline: GraphicsPipeline,
    pipeline_layout: PipelineLayout,
    global_pool: DescriptorPool,
    global_set_layout: DescriptorSetLayout,
    global_descriptor_sets: Vec<DescriptorSetHandle>,
    global_ubo_buffers: Vec<Buffer>,
    renderer: Renderer,
    device: Arc<Device>,
    warned_missing_camera: bool,
}

impl RenderSystem {
    /// Create the device and everything the scene pipeline needs
    pub fn new(
        instance: Arc<dyn GpuInstance>,
        window: &mut dyn SurfaceProvider,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        config.validate()?;

        let device = Arc::new(Device::new(instance)?);
        let renderer = Renderer::new(Arc::clone(&device), window, config.clear_color)?;

        let ubo_alignment = device.properties().limits.min_uniform_buffer_offset_alignment;
        let global_ubo_buffers = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|_| {
                let mut buffer = Buffer::new(
                    &device,
                    std::mem::size_of::<GlobalUbo>() as u64,
                    1,
                    BufferUsage::UNIFORM_BUFFER,
                    MemoryPropertyFlags::HOST_VISIBLE,
                    ubo_alignment,
                )?;
                buffer.map_all()?;
                Ok(buffer)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let global_pool = DescriptorPool::builder()
            .set_max_sets(MAX_FRAMES_IN_FLIGHT as u32)
            .add_pool_size(DescriptorKind::UniformBuffer, MAX_FRAMES_IN_FLIGHT as u32)
            .build(Arc::clone(device.gpu()))?;
        let global_set_layout = DescriptorSetLayout::builder()
            .add_binding(0, DescriptorKind::UniformBuffer, ShaderStages::ALL_GRAPHICS, 1)?
            .build(Arc::clone(device.gpu()))?;

        let global_descriptor_sets = global_ubo_buffers
            .iter()
            .map(|buffer| {
                DescriptorWriter::new(&global_set_layout, &global_pool)
                    .write_buffer(0, buffer.descriptor_info(WHOLE_SIZE, 0))?
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pipeline_layout = PipelineLayout::new(
            Arc::clone(device.gpu()),
            &[global_set_layout.handle()],
            &[PushConstantRange {
                stages: PushConstantData::STAGES,
                offset: 0,
                size: std::mem::size_of::<PushConstantData>() as u32,
            }],
        )?;

        let mut pipeline_config = PipelineConfigInfo::default_config();
        pipeline_config.pipeline_layout = Some(pipeline_layout.handle());
        pipeline_config.render_pass = Some(renderer.swap_chain_render_pass());
        let pipeline = GraphicsPipeline::new(
            &device,
            &config.shaders.vertex_shader_path,
            &config.shaders.fragment_shader_path,
            &pipeline_config,
        )?;

        log::info!(
            "Render system ready: {} swapchain images, {MAX_FRAMES_IN_FLIGHT} frames in flight",
            renderer.image_count()
        );

        Ok(Self {
            pipeline,
            pipeline_layout,
            global_pool,
            global_set_layout,
            global_descriptor_sets,
            global_ubo_buffers,
            renderer,
            device,
            warned_missing_camera: false,
        })
    }

    /// Render one frame of `drawables` as seen from `camera`
    ///
    /// Without a camera nothing is acquired or submitted; the first such
    /// call logs a warning. A frame skipped for swapchain recreation also
    /// returns `Ok`. If a drawable fails, the commands recorded so far are
    /// still submitted and presented before the error is returned, so the
    /// next call starts a fresh frame.
    pub fn draw_scene(
        &mut self,
        window: &mut dyn SurfaceProvider,
        camera: Option<&Camera>,
        drawables: &[&dyn Drawable],
    ) -> RenderResult<()> {
        let Some(camera) = camera else {
            if !self.warned_missing_camera {
                log::warn!("No active camera, skipping scene rendering");
                self.warned_missing_camera = true;
            }
            return Ok(());
        };

        let Some(command_buffer) = self.renderer.begin_frame(window)? else {
            return Ok(());
        };

        if let Err(err) = self.record_scene(command_buffer, camera, drawables) {
            // the acquired image still has to be submitted and presented
            if let Err(end_err) = self.renderer.end_frame(window) {
                log::error!("Failed to end frame after recording error: {end_err}");
            }
            return Err(err);
        }
        self.renderer.end_frame(window)
    }

    fn record_scene(
        &mut self,
        command_buffer: CommandBufferHandle,
        camera: &Camera,
        drawables: &[&dyn Drawable],
    ) -> RenderResult<()> {
        let frame_index = self.renderer.frame_index()?;

        let ubo_buffer = &mut self.global_ubo_buffers[frame_index];
        ubo_buffer.write_value(&GlobalUbo::new(&camera.projection_view()))?;
        ubo_buffer.flush(WHOLE_SIZE, 0)?;

        self.renderer.begin_swap_chain_render_pass(command_buffer)?;
        self.pipeline.bind(command_buffer);

        let global_descriptor_set = self.global_descriptor_sets[frame_index];
        let recorder = CommandRecorder::new(self.device.gpu().as_ref(), command_buffer);
        recorder.bind_descriptor_sets(self.pipeline_layout.handle(), 0, &[global_descriptor_set]);

        let frame = FrameContext {
            frame_index,
            command_buffer,
            recorder,
            camera,
            global_descriptor_set,
        };
        let drawn = drawables
            .iter()
            .try_for_each(|drawable| drawable.render(&frame, self.pipeline_layout.handle()));

        self.renderer.end_swap_chain_render_pass(command_buffer)?;
        drawn
    }

    /// Aspect ratio of the current swapchain
    pub fn aspect_ratio(&self) -> f32 {
        self.renderer.aspect_ratio()
    }

    /// Layout drawables push their constants through
    pub fn pipeline_layout(&self) -> PipelineLayoutHandle {
        self.pipeline_layout.handle()
    }

    /// Layout of the per-frame global set
    pub fn global_set_layout(&self) -> &DescriptorSetLayout {
        &self.global_set_layout
    }

    /// Global descriptor set of a frame slot
    pub fn global_descriptor_set(&self, frame_index: usize) -> Option<DescriptorSetHandle> {
        self.global_descriptor_sets.get(frame_index).copied()
    }

    /// Global uniform buffer of a frame slot
    pub fn global_ubo_buffer(&self, frame_index: usize) -> Option<&Buffer> {
        self.global_ubo_buffers.get(frame_index)
    }

    /// Pool the global sets come from
    pub fn global_pool(&self) -> &DescriptorPool {
        &self.global_pool
    }

    /// Frame loop
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Frame loop, mutably
    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Logical device
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for RenderSystem {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Failed to wait for device idle while dropping render system: {err}");
        }
        log::debug!("Render system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ShaderConfig;
    use crate::render::backends::headless::{HeadlessInstance, HeadlessSurface, RecordedCommand};
    use std::cell::Cell;

    const SPIRV_HEADER: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

    struct CountingDrawable {
        calls: Cell<usize>,
    }

    impl Drawable for CountingDrawable {
        fn render(&self, frame: &FrameContext<'_>, pipeline_layout: PipelineLayoutHandle) -> RenderResult<()> {
            self.calls.set(self.calls.get() + 1);
            let push = PushConstantData::from_transform(&Transform::default());
            frame
                .recorder
                .push_constants(pipeline_layout, PushConstantData::STAGES, 0, &push);
            frame.recorder.draw(3);
            Ok(())
        }
    }

    fn config(name: &str) -> RendererConfig {
        let dir = std::env::temp_dir().join(format!("render_core_system_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let vert = dir.join("scene.vert.spv");
        let frag = dir.join("scene.frag.spv");
        std::fs::write(&vert, SPIRV_HEADER).unwrap();
        std::fs::write(&frag, SPIRV_HEADER).unwrap();
        RendererConfig::new("render system test").with_shaders(ShaderConfig::new(
            vert.to_string_lossy(),
            frag.to_string_lossy(),
        ))
    }

    fn setup(name: &str) -> (RenderSystem, HeadlessSurface, Arc<HeadlessInstance>) {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
        let mut window = surface.clone();
        let system = RenderSystem::new(instance.clone(), &mut window, &config(name)).unwrap();
        (system, surface, instance)
    }

    #[test]
    fn test_push_constants_fit_default_limit() {
        assert_eq!(std::mem::size_of::<PushConstantData>(), 128);
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 96);
    }

    #[test]
    fn test_missing_camera_skips_frame() {
        let (mut system, mut window, instance) = setup("no_camera");
        let drawable = CountingDrawable { calls: Cell::new(0) };

        system.draw_scene(&mut window, None, &[&drawable]).unwrap();
        system.draw_scene(&mut window, None, &[&drawable]).unwrap();

        let stats = instance.last_device().unwrap().stats();
        assert_eq!(stats.acquires, 0);
        assert_eq!(stats.submissions, 0);
        assert_eq!(drawable.calls.get(), 0);
    }

    #[test]
    fn test_frame_records_scene() {
        let (mut system, mut window, instance) = setup("scene");
        let headless = instance.last_device().unwrap();
        let drawable = CountingDrawable { calls: Cell::new(0) };
        let camera = Camera::perspective(
            Vec3::new(0.0, 0.0, -3.0),
            Vec3::zeros(),
            std::f32::consts::FRAC_PI_4,
            system.aspect_ratio(),
            0.1,
            100.0,
        );

        system.draw_scene(&mut window, Some(&camera), &[&drawable, &drawable]).unwrap();
        assert_eq!(drawable.calls.get(), 2);

        let stats = headless.stats();
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.presents, 1);
        assert_eq!(stats.draw_calls, 2);

        let ubo = system.global_ubo_buffer(0).unwrap();
        let contents = headless.buffer_contents(ubo.handle()).unwrap();
        let expected = GlobalUbo::new(&camera.projection_view());
        assert_eq!(
            &contents[..std::mem::size_of::<GlobalUbo>()],
            bytemuck::bytes_of(&expected)
        );
    }

    #[test]
    fn test_frames_alternate_global_sets() {
        let (mut system, mut window, instance) = setup("alternate");
        let headless = instance.last_device().unwrap();
        let camera = Camera::new();

        let mut bound_sets = Vec::new();
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let drawable = SetRecorder::default();
            system.draw_scene(&mut window, Some(&camera), &[&drawable]).unwrap();
            bound_sets.push(drawable.seen.get().unwrap());
        }
        assert_eq!(bound_sets[0], system.global_descriptor_set(0).unwrap());
        assert_eq!(bound_sets[1], system.global_descriptor_set(1).unwrap());
        assert_ne!(bound_sets[0], bound_sets[1]);
        assert_eq!(headless.stats().submissions, MAX_FRAMES_IN_FLIGHT as u64);
    }

    #[derive(Default)]
    struct SetRecorder {
        seen: Cell<Option<DescriptorSetHandle>>,
    }

    impl Drawable for SetRecorder {
        fn render(&self, frame: &FrameContext<'_>, _: PipelineLayoutHandle) -> RenderResult<()> {
            self.seen.set(Some(frame.global_descriptor_set));
            Ok(())
        }
    }

    #[test]
    fn test_scene_commands_in_order() {
        let (mut system, mut window, instance) = setup("order");
        let headless = instance.last_device().unwrap();
        let camera = Camera::new();
        let drawable = CountingDrawable { calls: Cell::new(0) };

        system.draw_scene(&mut window, Some(&camera), &[&drawable]).unwrap();

        let set = system.global_descriptor_set(0).unwrap();
        let commands = headless.recorded_commands(system.renderer().command_buffers()[0]);
        assert!(matches!(commands[0], RecordedCommand::BeginRenderPass { .. }));
        assert!(matches!(commands[3], RecordedCommand::BindPipeline(_)));
        assert!(matches!(
            &commands[4],
            RecordedCommand::BindDescriptorSets { first_set: 0, sets, .. } if sets == &vec![set]
        ));
        assert!(matches!(commands[5], RecordedCommand::PushConstants { .. }));
        assert!(matches!(commands[6], RecordedCommand::Draw { vertex_count: 3, .. }));
        assert!(matches!(commands.last(), Some(RecordedCommand::EndRenderPass)));
    }

    struct FailingOnce {
        failed: Cell<bool>,
    }

    impl Drawable for FailingOnce {
        fn render(&self, frame: &FrameContext<'_>, _: PipelineLayoutHandle) -> RenderResult<()> {
            if !self.failed.replace(true) {
                return Err(crate::render::RenderError::invalid_operation("mesh not uploaded"));
            }
            frame.recorder.draw(3);
            Ok(())
        }
    }

    #[test]
    fn test_failed_drawable_does_not_wedge_frame_loop() {
        let (mut system, mut window, instance) = setup("failing");
        let headless = instance.last_device().unwrap();
        let camera = Camera::new();
        let flaky = FailingOnce { failed: Cell::new(false) };
        let steady = CountingDrawable { calls: Cell::new(0) };

        let first = system.draw_scene(&mut window, Some(&camera), &[&flaky, &steady]);
        assert!(matches!(first, Err(crate::render::RenderError::InvalidOperation { .. })));
        assert!(!system.renderer().is_frame_in_progress());
        assert_eq!(steady.calls.get(), 0);

        let commands = headless.recorded_commands(system.renderer().command_buffers()[0]);
        assert!(matches!(commands.last(), Some(RecordedCommand::EndRenderPass)));
        assert_eq!(headless.stats().submissions, 1);
        assert_eq!(headless.stats().presents, 1);

        system.draw_scene(&mut window, Some(&camera), &[&flaky, &steady]).unwrap();
        assert_eq!(steady.calls.get(), 1);
        assert_eq!(headless.stats().submissions, 2);
        assert_eq!(headless.stats().presents, 2);
        assert_eq!(headless.stats().draw_calls, 2);
    }
}
