//! Graphics pipeline creation
//!
//! SPIR-V shader loading and fixed-function configuration, with RAII cleanup
//! for modules, layouts and pipelines.

use std::path::Path;
use std::sync::Arc;

use super::backends::{
    BlendFactor, BlendOp, ColorBlendAttachment, ColorComponents, CommandBufferHandle, CompareOp,
    CullMode, DepthStencilState, DescriptorSetLayoutHandle, DynamicState, FrontFace, GpuDevice,
    GraphicsPipelineDesc, InputAssemblyState, MultisampleState, PipelineHandle,
    PipelineLayoutHandle, PolygonMode, PrimitiveTopology, PushConstantRange, RasterizationState,
    RenderPassHandle, ShaderModuleHandle, VertexAttribute, VertexBinding,
};
use super::device::Device;
use super::errors::{RenderError, RenderResult};
use super::vertex::Vertex;

/// Fixed-function state and bindings for [`GraphicsPipeline::new`]
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfigInfo {
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<VertexBinding>,
    /// Vertex attributes
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Primitive assembly
    pub input_assembly: InputAssemblyState,
    /// Rasterizer
    pub rasterization: RasterizationState,
    /// Multisampling
    pub multisample: MultisampleState,
    /// Blending of the single color attachment
    pub color_blend: ColorBlendAttachment,
    /// Depth and stencil tests
    pub depth_stencil: DepthStencilState,
    /// States set while recording
    pub dynamic_states: Vec<DynamicState>,
    /// Required before creation
    pub pipeline_layout: Option<PipelineLayoutHandle>,
    /// Required before creation
    pub render_pass: Option<RenderPassHandle>,
    /// Subpass index
    pub subpass: u32,
}

impl PipelineConfigInfo {
    /// Opaque triangle lists with depth testing and dynamic viewport/scissor
    pub fn default_config() -> Self {
        Self {
            vertex_bindings: Vertex::binding_descriptions(),
            vertex_attributes: Vertex::attribute_descriptions(),
            input_assembly: InputAssemblyState {
                topology: PrimitiveTopology::TriangleList,
                primitive_restart: false,
            },
            rasterization: RasterizationState {
                depth_clamp: false,
                rasterizer_discard: false,
                polygon_mode: PolygonMode::Fill,
                line_width: 1.0,
                cull_mode: CullMode::None,
                front_face: FrontFace::Clockwise,
                depth_bias: false,
            },
            multisample: MultisampleState {
                samples: 1,
                sample_shading: false,
                min_sample_shading: 1.0,
                alpha_to_coverage: false,
            },
            color_blend: ColorBlendAttachment {
                blend_enable: false,
                src_color: BlendFactor::One,
                dst_color: BlendFactor::Zero,
                color_op: BlendOp::Add,
                src_alpha: BlendFactor::One,
                dst_alpha: BlendFactor::Zero,
                alpha_op: BlendOp::Add,
                write_mask: ColorComponents::RGBA,
            },
            depth_stencil: DepthStencilState {
                depth_test: true,
                depth_write: true,
                compare_op: CompareOp::Less,
                depth_bounds_test: false,
                stencil_test: false,
            },
            dynamic_states: vec![DynamicState::Viewport, DynamicState::Scissor],
            pipeline_layout: None,
            render_pass: None,
            subpass: 0,
        }
    }

    /// Switch to straight alpha blending
    pub fn enable_alpha_blending(&mut self) {
        self.color_blend = ColorBlendAttachment {
            blend_enable: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorComponents::RGBA,
        };
    }
}

impl Default for PipelineConfigInfo {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    gpu: Arc<dyn GpuDevice>,
    module: ShaderModuleHandle,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytecode
    pub fn from_bytes(gpu: Arc<dyn GpuDevice>, bytes: &[u8]) -> RenderResult<Self> {
        let module = gpu.create_shader_module(bytes)?;
        Ok(Self { gpu, module })
    }

    /// Read a SPIR-V file whole and create a module from it
    pub fn from_file(gpu: Arc<dyn GpuDevice>, path: &Path) -> RenderResult<Self> {
        if !path.exists() {
            return Err(RenderError::ShaderNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        log::debug!("Loaded shader {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(gpu, &bytes)
    }

    /// Module handle
    pub fn handle(&self) -> ShaderModuleHandle {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.gpu.destroy_shader_module(self.module);
    }
}

/// Pipeline layout wrapper with RAII cleanup
pub struct PipelineLayout {
    gpu: Arc<dyn GpuDevice>,
    layout: PipelineLayoutHandle,
}

impl PipelineLayout {
    /// Create a layout from descriptor set layouts and push-constant ranges
    pub fn new(
        gpu: Arc<dyn GpuDevice>,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constant_ranges: &[PushConstantRange],
    ) -> RenderResult<Self> {
        let layout = gpu.create_pipeline_layout(set_layouts, push_constant_ranges)?;
        Ok(Self { gpu, layout })
    }

    /// Layout handle
    pub fn handle(&self) -> PipelineLayoutHandle {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.gpu.destroy_pipeline_layout(self.layout);
    }
}

/// Immutable graphics pipeline
pub struct GraphicsPipeline {
    gpu: Arc<dyn GpuDevice>,
    pipeline: PipelineHandle,
}

impl GraphicsPipeline {
    /// Build a pipeline from a vertex and a fragment shader file
    ///
    /// The layout and render pass in `config` must be set. Shader modules
    /// only live until the pipeline is created.
    pub fn new(
        device: &Device,
        vert_path: impl AsRef<Path>,
        frag_path: impl AsRef<Path>,
        config: &PipelineConfigInfo,
    ) -> RenderResult<Self> {
        let layout = config
            .pipeline_layout
            .ok_or(RenderError::MissingPipelineConfig("pipeline layout"))?;
        let render_pass = config
            .render_pass
            .ok_or(RenderError::MissingPipelineConfig("render pass"))?;

        let gpu = Arc::clone(device.gpu());
        let vertex_shader = ShaderModule::from_file(Arc::clone(&gpu), vert_path.as_ref())?;
        let fragment_shader = ShaderModule::from_file(Arc::clone(&gpu), frag_path.as_ref())?;

        let desc = GraphicsPipelineDesc {
            vertex_shader: vertex_shader.handle(),
            fragment_shader: fragment_shader.handle(),
            vertex_bindings: &config.vertex_bindings,
            vertex_attributes: &config.vertex_attributes,
            input_assembly: config.input_assembly,
            rasterization: config.rasterization,
            multisample: config.multisample,
            color_blend: config.color_blend,
            depth_stencil: config.depth_stencil,
            dynamic_states: &config.dynamic_states,
            layout,
            render_pass,
            subpass: config.subpass,
        };
        let pipeline = gpu.create_graphics_pipeline(&desc)?;
        log::debug!(
            "Created graphics pipeline from {} and {}",
            vert_path.as_ref().display(),
            frag_path.as_ref().display()
        );

        Ok(Self { gpu, pipeline })
    }

    /// Bind for subsequent draws in `command_buffer`
    pub fn bind(&self, command_buffer: CommandBufferHandle) {
        self.gpu.cmd_bind_pipeline(command_buffer, self.pipeline);
    }

    /// Pipeline handle
    pub fn handle(&self) -> PipelineHandle {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.gpu.destroy_pipeline(self.pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessInstance, HeadlessSurface};
    use crate::render::backends::{Format, ImageLayout, RenderPassDesc, ShaderStages};
    use std::path::PathBuf;

    const SPIRV_HEADER: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

    fn shader_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("render_core_pipeline_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("test.vert.spv"), SPIRV_HEADER).unwrap();
        std::fs::write(dir.join("test.frag.spv"), SPIRV_HEADER).unwrap();
        dir
    }

    fn device() -> (Device, Arc<HeadlessInstance>) {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
        (Device::new(instance.clone()).unwrap(), instance)
    }

    #[test]
    fn test_default_config_uses_dynamic_viewport() {
        let config = PipelineConfigInfo::default_config();
        assert_eq!(
            config.dynamic_states,
            vec![DynamicState::Viewport, DynamicState::Scissor]
        );
        assert!(config.depth_stencil.depth_test);
        assert!(!config.color_blend.blend_enable);
        assert!(config.pipeline_layout.is_none());
    }

    #[test]
    fn test_alpha_blending() {
        let mut config = PipelineConfigInfo::default_config();
        config.enable_alpha_blending();
        assert!(config.color_blend.blend_enable);
        assert_eq!(config.color_blend.src_color, BlendFactor::SrcAlpha);
        assert_eq!(config.color_blend.dst_color, BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn test_missing_layout_is_rejected() {
        let (device, _) = device();
        let dir = shader_dir("missing_layout");
        let result = GraphicsPipeline::new(
            &device,
            dir.join("test.vert.spv"),
            dir.join("test.frag.spv"),
            &PipelineConfigInfo::default_config(),
        );
        assert!(matches!(
            result,
            Err(RenderError::MissingPipelineConfig("pipeline layout"))
        ));
    }

    #[test]
    fn test_pipeline_creation_releases_shader_modules() {
        let (device, instance) = device();
        let headless = instance.last_device().unwrap();
        let dir = shader_dir("create");
        let gpu = Arc::clone(device.gpu());

        let render_pass = gpu
            .create_render_pass(&RenderPassDesc {
                color_format: Format::B8G8R8A8Srgb,
                depth_format: Format::D32Sfloat,
                color_final_layout: ImageLayout::PresentSrc,
            })
            .unwrap();
        let layout = PipelineLayout::new(
            Arc::clone(&gpu),
            &[],
            &[PushConstantRange {
                stages: ShaderStages::VERTEX,
                offset: 0,
                size: 64,
            }],
        )
        .unwrap();

        let before = headless.live_objects();
        let mut config = PipelineConfigInfo::default_config();
        config.pipeline_layout = Some(layout.handle());
        config.render_pass = Some(render_pass);

        let pipeline = GraphicsPipeline::new(
            &device,
            dir.join("test.vert.spv"),
            dir.join("test.frag.spv"),
            &config,
        )
        .unwrap();
        assert_eq!(headless.live_objects(), before + 1);

        drop(pipeline);
        drop(layout);
        gpu.destroy_render_pass(render_pass);
        assert_eq!(headless.stats().invalid_destroys, 0);
    }

    #[test]
    fn test_missing_shader_file() {
        let (device, instance) = device();
        let gpu = Arc::clone(device.gpu());
        let render_pass = gpu
            .create_render_pass(&RenderPassDesc {
                color_format: Format::B8G8R8A8Srgb,
                depth_format: Format::D32Sfloat,
                color_final_layout: ImageLayout::PresentSrc,
            })
            .unwrap();
        let layout = PipelineLayout::new(Arc::clone(&gpu), &[], &[]).unwrap();
        let mut config = PipelineConfigInfo::default_config();
        config.pipeline_layout = Some(layout.handle());
        config.render_pass = Some(render_pass);

        let result = GraphicsPipeline::new(&device, "/nonexistent/a.vert.spv", "/nonexistent/a.frag.spv", &config);
        assert!(matches!(result, Err(RenderError::ShaderNotFound { .. })));
        gpu.destroy_render_pass(render_pass);
        assert_eq!(instance.last_device().unwrap().stats().invalid_destroys, 0);
    }
}
