//! Conversions between backend-neutral types and `ash::vk`

use ash::vk;

use crate::render::backends::{
    AccessFlags, AdapterType, AddressMode, BackendError, BlendFactor, BlendOp, BufferUsage,
    ClearValue, ColorComponents, ColorSpace, CompareOp, CullMode, DescriptorKind, DynamicState,
    Extent2D, Filter, Format, FormatFeatures, FrontFace, ImageAspect, ImageLayout, ImageTiling,
    ImageUsage, IndexType, MemoryPropertyFlags, PipelineStages, PolygonMode, PresentMode,
    PrimitiveTopology, QueueFlags, ShaderStages, VertexInputRate,
};

impl From<vk::Result> for BackendError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                Self::OutOfPoolMemory
            }
            vk::Result::TIMEOUT => Self::Timeout,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            other => Self::Other(format!("{other:?}")),
        }
    }
}

macro_rules! map_flags {
    ($value:expr, $target:ty, { $($from:path => $to:path),* $(,)? }) => {{
        let mut mapped = <$target>::empty();
        $(
            if $value.contains($from) {
                mapped |= $to;
            }
        )*
        mapped
    }};
}

impl From<Format> for vk::Format {
    fn from(format: Format) -> Self {
        match format {
            Format::Undefined => Self::UNDEFINED,
            Format::R8G8B8A8Unorm => Self::R8G8B8A8_UNORM,
            Format::R8G8B8A8Srgb => Self::R8G8B8A8_SRGB,
            Format::B8G8R8A8Unorm => Self::B8G8R8A8_UNORM,
            Format::B8G8R8A8Srgb => Self::B8G8R8A8_SRGB,
            Format::R16G16B16A16Sfloat => Self::R16G16B16A16_SFLOAT,
            Format::R32Sfloat => Self::R32_SFLOAT,
            Format::R32G32Sfloat => Self::R32G32_SFLOAT,
            Format::R32G32B32Sfloat => Self::R32G32B32_SFLOAT,
            Format::R32G32B32A32Sfloat => Self::R32G32B32A32_SFLOAT,
            Format::D32Sfloat => Self::D32_SFLOAT,
            Format::D32SfloatS8Uint => Self::D32_SFLOAT_S8_UINT,
            Format::D24UnormS8Uint => Self::D24_UNORM_S8_UINT,
        }
    }
}

/// Formats the core does not model are skipped
pub(super) fn format_from_vk(format: vk::Format) -> Option<Format> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::R8G8B8A8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::B8G8R8A8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::B8G8R8A8Srgb,
        vk::Format::R16G16B16A16_SFLOAT => Format::R16G16B16A16Sfloat,
        vk::Format::R32_SFLOAT => Format::R32Sfloat,
        vk::Format::R32G32_SFLOAT => Format::R32G32Sfloat,
        vk::Format::R32G32B32_SFLOAT => Format::R32G32B32Sfloat,
        vk::Format::R32G32B32A32_SFLOAT => Format::R32G32B32A32Sfloat,
        vk::Format::D32_SFLOAT => Format::D32Sfloat,
        vk::Format::D32_SFLOAT_S8_UINT => Format::D32SfloatS8Uint,
        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,
        _ => return None,
    })
}

impl From<ColorSpace> for vk::ColorSpaceKHR {
    fn from(color_space: ColorSpace) -> Self {
        match color_space {
            ColorSpace::SrgbNonlinear => Self::SRGB_NONLINEAR,
            ColorSpace::ExtendedSrgbLinear => Self::EXTENDED_SRGB_LINEAR_EXT,
            ColorSpace::DisplayP3Nonlinear => Self::DISPLAY_P3_NONLINEAR_EXT,
        }
    }
}

pub(super) fn color_space_from_vk(color_space: vk::ColorSpaceKHR) -> Option<ColorSpace> {
    match color_space {
        vk::ColorSpaceKHR::SRGB_NONLINEAR => Some(ColorSpace::SrgbNonlinear),
        vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT => Some(ColorSpace::ExtendedSrgbLinear),
        vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT => Some(ColorSpace::DisplayP3Nonlinear),
        _ => None,
    }
}

impl From<PresentMode> for vk::PresentModeKHR {
    fn from(mode: PresentMode) -> Self {
        match mode {
            PresentMode::Immediate => Self::IMMEDIATE,
            PresentMode::Mailbox => Self::MAILBOX,
            PresentMode::Fifo => Self::FIFO,
            PresentMode::FifoRelaxed => Self::FIFO_RELAXED,
        }
    }
}

pub(super) fn present_mode_from_vk(mode: vk::PresentModeKHR) -> Option<PresentMode> {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => Some(PresentMode::Immediate),
        vk::PresentModeKHR::MAILBOX => Some(PresentMode::Mailbox),
        vk::PresentModeKHR::FIFO => Some(PresentMode::Fifo),
        vk::PresentModeKHR::FIFO_RELAXED => Some(PresentMode::FifoRelaxed),
        _ => None,
    }
}

impl From<Extent2D> for vk::Extent2D {
    fn from(extent: Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
        }
    }
}

impl From<vk::Extent2D> for Extent2D {
    fn from(extent: vk::Extent2D) -> Self {
        Self::new(extent.width, extent.height)
    }
}

pub(super) fn adapter_type_from_vk(device_type: vk::PhysicalDeviceType) -> AdapterType {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterType::Virtual,
        vk::PhysicalDeviceType::CPU => AdapterType::Cpu,
        _ => AdapterType::Other,
    }
}

pub(super) fn queue_flags_from_vk(flags: vk::QueueFlags) -> QueueFlags {
    map_flags!(flags, QueueFlags, {
        vk::QueueFlags::GRAPHICS => QueueFlags::GRAPHICS,
        vk::QueueFlags::COMPUTE => QueueFlags::COMPUTE,
        vk::QueueFlags::TRANSFER => QueueFlags::TRANSFER,
    })
}

pub(super) fn memory_properties_from_vk(flags: vk::MemoryPropertyFlags) -> MemoryPropertyFlags {
    map_flags!(flags, MemoryPropertyFlags, {
        vk::MemoryPropertyFlags::DEVICE_LOCAL => MemoryPropertyFlags::DEVICE_LOCAL,
        vk::MemoryPropertyFlags::HOST_VISIBLE => MemoryPropertyFlags::HOST_VISIBLE,
        vk::MemoryPropertyFlags::HOST_COHERENT => MemoryPropertyFlags::HOST_COHERENT,
        vk::MemoryPropertyFlags::HOST_CACHED => MemoryPropertyFlags::HOST_CACHED,
        vk::MemoryPropertyFlags::LAZILY_ALLOCATED => MemoryPropertyFlags::LAZILY_ALLOCATED,
    })
}

pub(super) fn format_features_from_vk(flags: vk::FormatFeatureFlags) -> FormatFeatures {
    map_flags!(flags, FormatFeatures, {
        vk::FormatFeatureFlags::SAMPLED_IMAGE => FormatFeatures::SAMPLED_IMAGE,
        vk::FormatFeatureFlags::COLOR_ATTACHMENT => FormatFeatures::COLOR_ATTACHMENT,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT => FormatFeatures::DEPTH_STENCIL_ATTACHMENT,
        vk::FormatFeatureFlags::TRANSFER_DST => FormatFeatures::TRANSFER_DST,
    })
}

impl From<BufferUsage> for vk::BufferUsageFlags {
    fn from(usage: BufferUsage) -> Self {
        map_flags!(usage, Self, {
            BufferUsage::TRANSFER_SRC => Self::TRANSFER_SRC,
            BufferUsage::TRANSFER_DST => Self::TRANSFER_DST,
            BufferUsage::UNIFORM_BUFFER => Self::UNIFORM_BUFFER,
            BufferUsage::STORAGE_BUFFER => Self::STORAGE_BUFFER,
            BufferUsage::INDEX_BUFFER => Self::INDEX_BUFFER,
            BufferUsage::VERTEX_BUFFER => Self::VERTEX_BUFFER,
        })
    }
}

impl From<ImageUsage> for vk::ImageUsageFlags {
    fn from(usage: ImageUsage) -> Self {
        map_flags!(usage, Self, {
            ImageUsage::TRANSFER_SRC => Self::TRANSFER_SRC,
            ImageUsage::TRANSFER_DST => Self::TRANSFER_DST,
            ImageUsage::SAMPLED => Self::SAMPLED,
            ImageUsage::STORAGE => Self::STORAGE,
            ImageUsage::COLOR_ATTACHMENT => Self::COLOR_ATTACHMENT,
            ImageUsage::DEPTH_STENCIL_ATTACHMENT => Self::DEPTH_STENCIL_ATTACHMENT,
        })
    }
}

impl From<ImageAspect> for vk::ImageAspectFlags {
    fn from(aspect: ImageAspect) -> Self {
        map_flags!(aspect, Self, {
            ImageAspect::COLOR => Self::COLOR,
            ImageAspect::DEPTH => Self::DEPTH,
            ImageAspect::STENCIL => Self::STENCIL,
        })
    }
}

impl From<ShaderStages> for vk::ShaderStageFlags {
    fn from(stages: ShaderStages) -> Self {
        map_flags!(stages, Self, {
            ShaderStages::VERTEX => Self::VERTEX,
            ShaderStages::FRAGMENT => Self::FRAGMENT,
            ShaderStages::COMPUTE => Self::COMPUTE,
        })
    }
}

impl From<PipelineStages> for vk::PipelineStageFlags {
    fn from(stages: PipelineStages) -> Self {
        map_flags!(stages, Self, {
            PipelineStages::TOP_OF_PIPE => Self::TOP_OF_PIPE,
            PipelineStages::TRANSFER => Self::TRANSFER,
            PipelineStages::EARLY_FRAGMENT_TESTS => Self::EARLY_FRAGMENT_TESTS,
            PipelineStages::FRAGMENT_SHADER => Self::FRAGMENT_SHADER,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT => Self::COLOR_ATTACHMENT_OUTPUT,
            PipelineStages::BOTTOM_OF_PIPE => Self::BOTTOM_OF_PIPE,
        })
    }
}

impl From<AccessFlags> for vk::AccessFlags {
    fn from(access: AccessFlags) -> Self {
        map_flags!(access, Self, {
            AccessFlags::TRANSFER_WRITE => Self::TRANSFER_WRITE,
            AccessFlags::SHADER_READ => Self::SHADER_READ,
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ => Self::DEPTH_STENCIL_ATTACHMENT_READ,
            AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE => Self::DEPTH_STENCIL_ATTACHMENT_WRITE,
            AccessFlags::COLOR_ATTACHMENT_WRITE => Self::COLOR_ATTACHMENT_WRITE,
            AccessFlags::HOST_WRITE => Self::HOST_WRITE,
        })
    }
}

impl From<ColorComponents> for vk::ColorComponentFlags {
    fn from(components: ColorComponents) -> Self {
        map_flags!(components, Self, {
            ColorComponents::R => Self::R,
            ColorComponents::G => Self::G,
            ColorComponents::B => Self::B,
            ColorComponents::A => Self::A,
        })
    }
}

impl From<ImageLayout> for vk::ImageLayout {
    fn from(layout: ImageLayout) -> Self {
        match layout {
            ImageLayout::Undefined => Self::UNDEFINED,
            ImageLayout::TransferDstOptimal => Self::TRANSFER_DST_OPTIMAL,
            ImageLayout::ShaderReadOnlyOptimal => Self::SHADER_READ_ONLY_OPTIMAL,
            ImageLayout::ColorAttachmentOptimal => Self::COLOR_ATTACHMENT_OPTIMAL,
            ImageLayout::DepthStencilAttachmentOptimal => Self::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ImageLayout::PresentSrc => Self::PRESENT_SRC_KHR,
        }
    }
}

impl From<ImageTiling> for vk::ImageTiling {
    fn from(tiling: ImageTiling) -> Self {
        match tiling {
            ImageTiling::Optimal => Self::OPTIMAL,
            ImageTiling::Linear => Self::LINEAR,
        }
    }
}

impl From<DescriptorKind> for vk::DescriptorType {
    fn from(kind: DescriptorKind) -> Self {
        match kind {
            DescriptorKind::UniformBuffer => Self::UNIFORM_BUFFER,
            DescriptorKind::UniformBufferDynamic => Self::UNIFORM_BUFFER_DYNAMIC,
            DescriptorKind::StorageBuffer => Self::STORAGE_BUFFER,
            DescriptorKind::CombinedImageSampler => Self::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::SampledImage => Self::SAMPLED_IMAGE,
            DescriptorKind::Sampler => Self::SAMPLER,
        }
    }
}

impl From<Filter> for vk::Filter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Nearest => Self::NEAREST,
            Filter::Linear => Self::LINEAR,
        }
    }
}

impl From<AddressMode> for vk::SamplerAddressMode {
    fn from(mode: AddressMode) -> Self {
        match mode {
            AddressMode::Repeat => Self::REPEAT,
            AddressMode::MirroredRepeat => Self::MIRRORED_REPEAT,
            AddressMode::ClampToEdge => Self::CLAMP_TO_EDGE,
        }
    }
}

impl From<PrimitiveTopology> for vk::PrimitiveTopology {
    fn from(topology: PrimitiveTopology) -> Self {
        match topology {
            PrimitiveTopology::PointList => Self::POINT_LIST,
            PrimitiveTopology::LineList => Self::LINE_LIST,
            PrimitiveTopology::LineStrip => Self::LINE_STRIP,
            PrimitiveTopology::TriangleList => Self::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => Self::TRIANGLE_STRIP,
        }
    }
}

impl From<PolygonMode> for vk::PolygonMode {
    fn from(mode: PolygonMode) -> Self {
        match mode {
            PolygonMode::Fill => Self::FILL,
            PolygonMode::Line => Self::LINE,
            PolygonMode::Point => Self::POINT,
        }
    }
}

impl From<CullMode> for vk::CullModeFlags {
    fn from(mode: CullMode) -> Self {
        match mode {
            CullMode::None => Self::NONE,
            CullMode::Front => Self::FRONT,
            CullMode::Back => Self::BACK,
        }
    }
}

impl From<FrontFace> for vk::FrontFace {
    fn from(face: FrontFace) -> Self {
        match face {
            FrontFace::Clockwise => Self::CLOCKWISE,
            FrontFace::CounterClockwise => Self::COUNTER_CLOCKWISE,
        }
    }
}

impl From<CompareOp> for vk::CompareOp {
    fn from(op: CompareOp) -> Self {
        match op {
            CompareOp::Never => Self::NEVER,
            CompareOp::Less => Self::LESS,
            CompareOp::Equal => Self::EQUAL,
            CompareOp::LessOrEqual => Self::LESS_OR_EQUAL,
            CompareOp::Greater => Self::GREATER,
            CompareOp::Always => Self::ALWAYS,
        }
    }
}

impl From<BlendFactor> for vk::BlendFactor {
    fn from(factor: BlendFactor) -> Self {
        match factor {
            BlendFactor::Zero => Self::ZERO,
            BlendFactor::One => Self::ONE,
            BlendFactor::SrcAlpha => Self::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => Self::ONE_MINUS_SRC_ALPHA,
        }
    }
}

impl From<BlendOp> for vk::BlendOp {
    fn from(op: BlendOp) -> Self {
        match op {
            BlendOp::Add => Self::ADD,
            BlendOp::Subtract => Self::SUBTRACT,
        }
    }
}

impl From<DynamicState> for vk::DynamicState {
    fn from(state: DynamicState) -> Self {
        match state {
            DynamicState::Viewport => Self::VIEWPORT,
            DynamicState::Scissor => Self::SCISSOR,
        }
    }
}

impl From<IndexType> for vk::IndexType {
    fn from(index_type: IndexType) -> Self {
        match index_type {
            IndexType::U16 => Self::UINT16,
            IndexType::U32 => Self::UINT32,
        }
    }
}

impl From<VertexInputRate> for vk::VertexInputRate {
    fn from(rate: VertexInputRate) -> Self {
        match rate {
            VertexInputRate::Vertex => Self::VERTEX,
            VertexInputRate::Instance => Self::INSTANCE,
        }
    }
}

impl From<ClearValue> for vk::ClearValue {
    fn from(value: ClearValue) -> Self {
        match value {
            ClearValue::Color(float32) => Self {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => Self {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_maps_to_recoverable_error() {
        assert_eq!(BackendError::from(vk::Result::ERROR_OUT_OF_DATE_KHR), BackendError::OutOfDate);
        assert!(BackendError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert_eq!(
            BackendError::from(vk::Result::ERROR_FRAGMENTED_POOL),
            BackendError::OutOfPoolMemory
        );
    }

    #[test]
    fn test_format_roundtrip() {
        for format in [Format::B8G8R8A8Srgb, Format::D32Sfloat, Format::D24UnormS8Uint] {
            assert_eq!(format_from_vk(format.into()), Some(format));
        }
        assert_eq!(format_from_vk(vk::Format::BC1_RGB_UNORM_BLOCK), None);
    }

    #[test]
    fn test_flag_mapping() {
        let usage: vk::BufferUsageFlags = (BufferUsage::VERTEX_BUFFER | BufferUsage::TRANSFER_DST).into();
        assert_eq!(usage, vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST);

        let stages: vk::ShaderStageFlags = ShaderStages::ALL_GRAPHICS.into();
        assert_eq!(stages, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);

        let memory = memory_properties_from_vk(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(memory, MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT);
    }
}
