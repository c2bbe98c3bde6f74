//! Backend-neutral GPU types
//!
//! Handles, descriptors and flag sets shared by every backend. The core talks
//! to the graphics API exclusively through these types so that the same frame
//! loop runs on Vulkan and on the headless test backend.
//!
//! Every GPU object kind gets its own handle newtype. Mixing them up (passing
//! an image where a buffer is expected) is a compile error rather than a
//! validation-layer message.

use bitflags::bitflags;

/// Sentinel size meaning "from offset to the end of the resource"
pub const WHOLE_SIZE: u64 = u64::MAX;

/// Sentinel surface extent dimension meaning "the surface size is decided by the swapchain"
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                /// Wrap a raw backend handle value
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// Raw backend handle value
                pub const fn as_raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handle! {
    /// Physical adapter (GPU) enumerated by an instance
    AdapterHandle;
    /// Device queue
    QueueHandle;
    /// Command pool
    CommandPoolHandle;
    /// Primary command buffer
    CommandBufferHandle;
    /// Buffer object (no memory attached)
    BufferHandle;
    /// Device memory allocation
    MemoryHandle;
    /// Image object
    ImageHandle;
    /// Image view
    ImageViewHandle;
    /// Texture sampler
    SamplerHandle;
    /// Render pass
    RenderPassHandle;
    /// Framebuffer
    FramebufferHandle;
    /// Compiled shader module
    ShaderModuleHandle;
    /// Pipeline layout
    PipelineLayoutHandle;
    /// Graphics pipeline
    PipelineHandle;
    /// Descriptor set layout
    DescriptorSetLayoutHandle;
    /// Descriptor pool
    DescriptorPoolHandle;
    /// Descriptor set
    DescriptorSetHandle;
    /// GPU-side ordering primitive
    SemaphoreHandle;
    /// CPU-waitable completion primitive
    FenceHandle;
    /// Presentable image chain
    SwapchainHandle;
}

/// Two-dimensional pixel extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// Create a new extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero (minimized window)
    pub const fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel formats used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Unknown / not yet chosen
    Undefined,
    /// 8-bit RGBA, linear
    R8G8B8A8Unorm,
    /// 8-bit RGBA, sRGB encoded
    R8G8B8A8Srgb,
    /// 8-bit BGRA, linear
    B8G8R8A8Unorm,
    /// 8-bit BGRA, sRGB encoded
    B8G8R8A8Srgb,
    /// 16-bit float RGBA
    R16G16B16A16Sfloat,
    /// Single 32-bit float
    R32Sfloat,
    /// Two 32-bit floats
    R32G32Sfloat,
    /// Three 32-bit floats
    R32G32B32Sfloat,
    /// Four 32-bit floats
    R32G32B32A32Sfloat,
    /// 32-bit float depth
    D32Sfloat,
    /// 32-bit float depth + 8-bit stencil
    D32SfloatS8Uint,
    /// 24-bit normalized depth + 8-bit stencil
    D24UnormS8Uint,
}

impl Format {
    /// Depth formats carrying a stencil aspect
    pub const fn has_stencil_component(self) -> bool {
        matches!(self, Self::D32SfloatS8Uint | Self::D24UnormS8Uint)
    }

    /// True for depth (and depth/stencil) formats
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D32Sfloat | Self::D32SfloatS8Uint | Self::D24UnormS8Uint)
    }
}

/// Presentation color spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Standard sRGB non-linear
    SrgbNonlinear,
    /// Extended sRGB, linear transfer
    ExtendedSrgbLinear,
    /// Display P3 non-linear
    DisplayP3Nonlinear,
}

/// Format + color space pair offered by a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceFormat {
    /// Pixel format
    pub format: Format,
    /// Color space
    pub color_space: ColorSpace,
}

impl SurfaceFormat {
    /// Create a surface format
    pub const fn new(format: Format, color_space: ColorSpace) -> Self {
        Self { format, color_space }
    }
}

/// Presentation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentMode {
    /// No vsync, may tear
    Immediate,
    /// Low latency triple buffering, never blocks
    Mailbox,
    /// Vertical sync; always available
    Fifo,
    /// Vertical sync that tears when late
    FifoRelaxed,
}

/// Surface limits reported for an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    /// Minimum number of images the chain must have
    pub min_image_count: u32,
    /// Maximum number of images; zero means unbounded
    pub max_image_count: u32,
    /// Current surface extent or [`UNDEFINED_EXTENT`] in both dimensions
    pub current_extent: Extent2D,
    /// Smallest allowed extent
    pub min_image_extent: Extent2D,
    /// Largest allowed extent
    pub max_image_extent: Extent2D,
}

bitflags! {
    /// Queue family capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u32 {
        /// Graphics commands
        const GRAPHICS = 1 << 0;
        /// Compute dispatch
        const COMPUTE = 1 << 1;
        /// Transfer commands
        const TRANSFER = 1 << 2;
    }
}

/// One queue family on an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyProperties {
    /// Supported operations
    pub flags: QueueFlags,
    /// Number of queues in the family
    pub queue_count: u32,
}

/// Physical adapter category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterType {
    /// Discrete GPU
    Discrete,
    /// Integrated GPU
    Integrated,
    /// Virtual GPU
    Virtual,
    /// Software rasterizer
    Cpu,
    /// Anything else
    Other,
}

/// Device limits the core depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterLimits {
    /// Required offset alignment for uniform buffer bindings
    pub min_uniform_buffer_offset_alignment: u64,
    /// Granularity for flush/invalidate of non-coherent memory
    pub non_coherent_atom_size: u64,
    /// Maximum anisotropy value for samplers
    pub max_sampler_anisotropy: f32,
    /// Maximum push constant block size in bytes
    pub max_push_constants_size: u32,
}

/// Static adapter description
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterProperties {
    /// Human-readable device name
    pub name: String,
    /// Adapter category
    pub adapter_type: AdapterType,
    /// Device limits
    pub limits: AdapterLimits,
    /// Whether anisotropic sampling is supported
    pub sampler_anisotropy: bool,
}

bitflags! {
    /// Memory type properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryPropertyFlags: u32 {
        /// Fastest memory for device access
        const DEVICE_LOCAL = 1 << 0;
        /// Mappable by the host
        const HOST_VISIBLE = 1 << 1;
        /// Host writes visible without explicit flush
        const HOST_COHERENT = 1 << 2;
        /// Cached on the host
        const HOST_CACHED = 1 << 3;
        /// Lazily allocated by the implementation
        const LAZILY_ALLOCATED = 1 << 4;
    }
}

/// One entry of the adapter memory type table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Property flags of this type
    pub property_flags: MemoryPropertyFlags,
    /// Heap the type allocates from
    pub heap_index: u32,
}

/// Memory type table of an adapter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryProperties {
    /// Memory types, indexed by memory type index
    pub memory_types: Vec<MemoryType>,
    /// Heap sizes in bytes
    pub heap_sizes: Vec<u64>,
}

/// Allocation requirements of a buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Required allocation size
    pub size: u64,
    /// Required alignment
    pub alignment: u64,
    /// Bitmask of compatible memory type indices
    pub memory_type_bits: u32,
}

bitflags! {
    /// Buffer usages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Source of transfer commands
        const TRANSFER_SRC = 1 << 0;
        /// Destination of transfer commands
        const TRANSFER_DST = 1 << 1;
        /// Uniform buffer
        const UNIFORM_BUFFER = 1 << 2;
        /// Storage buffer
        const STORAGE_BUFFER = 1 << 3;
        /// Index buffer
        const INDEX_BUFFER = 1 << 4;
        /// Vertex buffer
        const VERTEX_BUFFER = 1 << 5;
    }
}

bitflags! {
    /// Image usages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Source of transfer commands
        const TRANSFER_SRC = 1 << 0;
        /// Destination of transfer commands
        const TRANSFER_DST = 1 << 1;
        /// Sampled in shaders
        const SAMPLED = 1 << 2;
        /// Storage image
        const STORAGE = 1 << 3;
        /// Color render target
        const COLOR_ATTACHMENT = 1 << 4;
        /// Depth/stencil render target
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    /// Format capabilities for a given tiling
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatFeatures: u32 {
        /// Can be sampled
        const SAMPLED_IMAGE = 1 << 0;
        /// Can be a color attachment
        const COLOR_ATTACHMENT = 1 << 1;
        /// Can be a depth/stencil attachment
        const DEPTH_STENCIL_ATTACHMENT = 1 << 2;
        /// Can be a transfer destination
        const TRANSFER_DST = 1 << 3;
    }
}

bitflags! {
    /// Image aspects addressed by a view or barrier
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageAspect: u32 {
        /// Color aspect
        const COLOR = 1 << 0;
        /// Depth aspect
        const DEPTH = 1 << 1;
        /// Stencil aspect
        const STENCIL = 1 << 2;
    }
}

/// Image memory arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTiling {
    /// Implementation-defined, fastest for the device
    Optimal,
    /// Row-major, host addressable
    Linear,
}

/// Image layouts tracked by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    /// Contents undefined
    Undefined,
    /// Optimal for transfer writes
    TransferDstOptimal,
    /// Optimal for shader sampling
    ShaderReadOnlyOptimal,
    /// Optimal for color attachment writes
    ColorAttachmentOptimal,
    /// Optimal for depth/stencil attachment access
    DepthStencilAttachmentOptimal,
    /// Ready for presentation
    PresentSrc,
}

/// Image creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Size of the image
    pub extent: Extent2D,
    /// Pixel format
    pub format: Format,
    /// Tiling
    pub tiling: ImageTiling,
    /// Usage flags
    pub usage: ImageUsage,
    /// Mip level count
    pub mip_levels: u32,
    /// Array layer count
    pub array_layers: u32,
}

/// Texture filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Nearest texel
    Nearest,
    /// Bilinear
    Linear,
}

/// Texture coordinate wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Wrap around
    Repeat,
    /// Mirror on wrap
    MirroredRepeat,
    /// Clamp to edge texels
    ClampToEdge,
}

/// Sampler creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Magnification filter
    pub mag_filter: Filter,
    /// Minification filter
    pub min_filter: Filter,
    /// Addressing mode for all coordinates
    pub address_mode: AddressMode,
    /// Anisotropy level, `None` disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
}

bitflags! {
    /// Shader stages
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
        /// Compute stage
        const COMPUTE = 1 << 2;
        /// Vertex and fragment
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Kind of resource a descriptor binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Uniform buffer
    UniformBuffer,
    /// Uniform buffer with dynamic offset
    UniformBufferDynamic,
    /// Storage buffer
    StorageBuffer,
    /// Combined image + sampler
    CombinedImageSampler,
    /// Sampled image without sampler
    SampledImage,
    /// Standalone sampler
    Sampler,
}

impl DescriptorKind {
    /// True for kinds written with buffer info
    pub const fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::UniformBuffer | Self::UniformBufferDynamic | Self::StorageBuffer
        )
    }
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    /// Binding index
    pub binding: u32,
    /// Resource kind
    pub kind: DescriptorKind,
    /// Stages that may access the binding
    pub stages: ShaderStages,
    /// Array element count
    pub count: u32,
}

bitflags! {
    /// Descriptor pool creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescriptorPoolFlags: u32 {
        /// Individual sets may be freed back to the pool
        const FREE_DESCRIPTOR_SET = 1 << 0;
    }
}

/// Number of descriptors of one kind a pool can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    /// Descriptor kind
    pub kind: DescriptorKind,
    /// Descriptor count
    pub count: u32,
}

/// Descriptor pool creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPoolDesc {
    /// Maximum number of sets
    pub max_sets: u32,
    /// Per-kind capacities
    pub pool_sizes: Vec<DescriptorPoolSize>,
    /// Creation flags
    pub flags: DescriptorPoolFlags,
}

/// Buffer region bound to a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBufferInfo {
    /// Buffer
    pub buffer: BufferHandle,
    /// Byte offset
    pub offset: u64,
    /// Byte range or [`WHOLE_SIZE`]
    pub range: u64,
}

/// Image view + sampler bound to a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorImageInfo {
    /// Sampler, if the kind needs one
    pub sampler: Option<SamplerHandle>,
    /// Image view
    pub image_view: ImageViewHandle,
    /// Layout the image is in when accessed
    pub layout: ImageLayout,
}

/// Resource written into a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// Buffer region
    Buffer(DescriptorBufferInfo),
    /// Image view (+ sampler)
    Image(DescriptorImageInfo),
}

/// One descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Destination set
    pub set: DescriptorSetHandle,
    /// Destination binding
    pub binding: u32,
    /// Declared kind of the binding
    pub kind: DescriptorKind,
    /// Resource to bind
    pub resource: DescriptorResource,
}

/// Single-subpass forward render pass: one color target and one depth target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Color attachment format
    pub color_format: Format,
    /// Depth attachment format
    pub depth_format: Format,
    /// Layout of the color attachment after the pass
    pub color_final_layout: ImageLayout,
}

/// Framebuffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    /// Compatible render pass
    pub render_pass: RenderPassHandle,
    /// Attachments in render pass order
    pub attachments: Vec<ImageViewHandle>,
    /// Size
    pub extent: Extent2D,
}

/// Swapchain creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Requested image count
    pub min_image_count: u32,
    /// Image format + color space
    pub surface_format: SurfaceFormat,
    /// Image extent
    pub extent: Extent2D,
    /// Presentation mode
    pub present_mode: PresentMode,
    /// Queue families that access the images
    pub queue_family_indices: Vec<u32>,
    /// Chain being replaced, if any
    pub old_swapchain: Option<SwapchainHandle>,
}

/// Result of acquiring a presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to be rendered into
    Acquired {
        /// Index into the swapchain image list
        image_index: u32,
        /// The chain still works but no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The chain no longer matches the surface and must be recreated
    OutOfDate,
}

/// Result of presenting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    /// Presented, chain matches the surface
    Optimal,
    /// Presented, chain should be recreated when convenient
    Suboptimal,
    /// Not presented, chain must be recreated
    OutOfDate,
}

bitflags! {
    /// Pipeline stages used by submits and barriers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        /// Start of the pipeline
        const TOP_OF_PIPE = 1 << 0;
        /// Transfer operations
        const TRANSFER = 1 << 1;
        /// Early depth/stencil tests
        const EARLY_FRAGMENT_TESTS = 1 << 2;
        /// Fragment shading
        const FRAGMENT_SHADER = 1 << 3;
        /// Color attachment output
        const COLOR_ATTACHMENT_OUTPUT = 1 << 4;
        /// End of the pipeline
        const BOTTOM_OF_PIPE = 1 << 5;
    }
}

bitflags! {
    /// Memory access types used by barriers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// Transfer writes
        const TRANSFER_WRITE = 1 << 0;
        /// Shader reads
        const SHADER_READ = 1 << 1;
        /// Depth/stencil attachment reads
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 2;
        /// Depth/stencil attachment writes
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 3;
        /// Color attachment writes
        const COLOR_ATTACHMENT_WRITE = 1 << 4;
        /// Host writes
        const HOST_WRITE = 1 << 5;
    }
}

/// Image layout transition recorded into a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image to transition
    pub image: ImageHandle,
    /// Aspects affected
    pub aspect: ImageAspect,
    /// Layout before the barrier
    pub old_layout: ImageLayout,
    /// Layout after the barrier
    pub new_layout: ImageLayout,
    /// Accesses that must complete first
    pub src_access: AccessFlags,
    /// Accesses that wait on the barrier
    pub dst_access: AccessFlags,
    /// Stages that must complete first
    pub src_stage: PipelineStages,
    /// Stages that wait on the barrier
    pub dst_stage: PipelineStages,
    /// Number of array layers affected
    pub layer_count: u32,
}

/// Buffer-to-buffer copy region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    /// Offset in the source buffer
    pub src_offset: u64,
    /// Offset in the destination buffer
    pub dst_offset: u64,
    /// Bytes to copy
    pub size: u64,
}

/// Buffer-to-image copy region (tightly packed, mip 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferImageCopy {
    /// Offset in the source buffer
    pub buffer_offset: u64,
    /// Image region size
    pub image_extent: Extent2D,
    /// Number of array layers
    pub layer_count: u32,
}

bitflags! {
    /// Command buffer begin flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CommandBufferUsage: u32 {
        /// Submitted once, then reset or freed
        const ONE_TIME_SUBMIT = 1 << 0;
    }
}

/// Queue submission batch
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo<'a> {
    /// Semaphores to wait on before executing
    pub wait_semaphores: &'a [SemaphoreHandle],
    /// Stage at which each wait semaphore is waited on
    pub wait_stages: &'a [PipelineStages],
    /// Command buffers to execute
    pub command_buffers: &'a [CommandBufferHandle],
    /// Semaphores signalled on completion
    pub signal_semaphores: &'a [SemaphoreHandle],
}

/// Attachment clear value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth + stencil
    DepthStencil {
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u32,
    },
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    /// Top-left corner
    pub offset: (i32, i32),
    /// Size
    pub extent: Extent2D,
}

/// Viewport transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
    /// Near depth
    pub min_depth: f32,
    /// Far depth
    pub max_depth: f32,
}

/// Parameters for beginning a render pass instance
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin<'a> {
    /// Render pass
    pub render_pass: RenderPassHandle,
    /// Target framebuffer
    pub framebuffer: FramebufferHandle,
    /// Area affected
    pub render_area: Rect2D,
    /// One clear value per attachment
    pub clear_values: &'a [ClearValue],
}

/// Index element type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// 16-bit indices
    U16,
    /// 32-bit indices
    U32,
}

/// Push constant block visible to some stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Stages that read the block
    pub stages: ShaderStages,
    /// Byte offset
    pub offset: u32,
    /// Byte size
    pub size: u32,
}

/// Per-vertex or per-instance stepping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    /// Advance per vertex
    Vertex,
    /// Advance per instance
    Instance,
}

/// Vertex buffer binding description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    /// Binding slot
    pub binding: u32,
    /// Byte stride
    pub stride: u32,
    /// Input rate
    pub input_rate: VertexInputRate,
}

/// Vertex attribute description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader location
    pub location: u32,
    /// Source binding
    pub binding: u32,
    /// Attribute format
    pub format: Format,
    /// Byte offset within the vertex
    pub offset: u32,
}

/// Primitive assembly mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Points
    PointList,
    /// Independent lines
    LineList,
    /// Connected lines
    LineStrip,
    /// Independent triangles
    TriangleList,
    /// Connected triangles
    TriangleStrip,
}

/// Polygon rasterization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    /// Filled
    Fill,
    /// Wireframe
    Line,
    /// Vertices only
    Point,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Winding order of front faces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    /// Clockwise
    Clockwise,
    /// Counter-clockwise
    CounterClockwise,
}

/// Depth comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Never passes
    Never,
    /// Passes when less
    Less,
    /// Passes when equal
    Equal,
    /// Passes when less or equal
    LessOrEqual,
    /// Passes when greater
    Greater,
    /// Always passes
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    /// 0
    Zero,
    /// 1
    One,
    /// Source alpha
    SrcAlpha,
    /// 1 - source alpha
    OneMinusSrcAlpha,
}

/// Blend equation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    /// src + dst
    Add,
    /// src - dst
    Subtract,
}

bitflags! {
    /// Color channels written by a pipeline
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorComponents: u32 {
        /// Red
        const R = 1 << 0;
        /// Green
        const G = 1 << 1;
        /// Blue
        const B = 1 << 2;
        /// Alpha
        const A = 1 << 3;
        /// All channels
        const RGBA = Self::R.bits() | Self::G.bits() | Self::B.bits() | Self::A.bits();
    }
}

/// Pipeline state that may be set while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicState {
    /// Viewport
    Viewport,
    /// Scissor rectangle
    Scissor,
}

/// Input assembly state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAssemblyState {
    /// Topology
    pub topology: PrimitiveTopology,
    /// Primitive restart
    pub primitive_restart: bool,
}

/// Rasterization state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    /// Clamp fragment depth instead of clipping
    pub depth_clamp: bool,
    /// Discard all primitives before rasterization
    pub rasterizer_discard: bool,
    /// Fill mode
    pub polygon_mode: PolygonMode,
    /// Line width
    pub line_width: f32,
    /// Culling
    pub cull_mode: CullMode,
    /// Front face winding
    pub front_face: FrontFace,
    /// Depth bias
    pub depth_bias: bool,
}

/// Multisample state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultisampleState {
    /// Samples per pixel
    pub samples: u32,
    /// Per-sample shading
    pub sample_shading: bool,
    /// Minimum fraction of samples shaded
    pub min_sample_shading: f32,
    /// Alpha to coverage
    pub alpha_to_coverage: bool,
}

/// Color blend state for the single color attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    /// Enable blending
    pub blend_enable: bool,
    /// Source color factor
    pub src_color: BlendFactor,
    /// Destination color factor
    pub dst_color: BlendFactor,
    /// Color equation
    pub color_op: BlendOp,
    /// Source alpha factor
    pub src_alpha: BlendFactor,
    /// Destination alpha factor
    pub dst_alpha: BlendFactor,
    /// Alpha equation
    pub alpha_op: BlendOp,
    /// Channels written
    pub write_mask: ColorComponents,
}

/// Depth/stencil state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    /// Depth testing
    pub depth_test: bool,
    /// Depth writes
    pub depth_write: bool,
    /// Depth comparison
    pub compare_op: CompareOp,
    /// Depth bounds test
    pub depth_bounds_test: bool,
    /// Stencil test
    pub stencil_test: bool,
}

/// Everything needed to create a graphics pipeline
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    /// Vertex stage module (entry point `main`)
    pub vertex_shader: ShaderModuleHandle,
    /// Fragment stage module (entry point `main`)
    pub fragment_shader: ShaderModuleHandle,
    /// Vertex buffer bindings
    pub vertex_bindings: &'a [VertexBinding],
    /// Vertex attributes
    pub vertex_attributes: &'a [VertexAttribute],
    /// Input assembly
    pub input_assembly: InputAssemblyState,
    /// Rasterization
    pub rasterization: RasterizationState,
    /// Multisampling
    pub multisample: MultisampleState,
    /// Color blending
    pub color_blend: ColorBlendAttachment,
    /// Depth/stencil
    pub depth_stencil: DepthStencilState,
    /// Dynamic states
    pub dynamic_states: &'a [DynamicState],
    /// Pipeline layout
    pub layout: PipelineLayoutHandle,
    /// Render pass
    pub render_pass: RenderPassHandle,
    /// Subpass index
    pub subpass: u32,
}

/// Logical device creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDesc {
    /// Unique queue families to create one queue in
    pub queue_families: Vec<u32>,
    /// Device extensions to enable
    pub extensions: Vec<String>,
    /// Enable anisotropic sampling
    pub sampler_anisotropy: bool,
}
