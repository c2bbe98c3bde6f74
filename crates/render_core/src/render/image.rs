//! Images, views and samplers

use std::sync::Arc;

use super::backends::{
    Extent2D, Format, GpuDevice, ImageAspect, ImageDesc, ImageHandle, ImageTiling, ImageUsage,
    ImageViewHandle, MemoryHandle, MemoryPropertyFlags, SamplerDesc, SamplerHandle,
};
use super::device::Device;
use super::errors::RenderResult;

/// Image with its own memory allocation
pub struct Image {
    gpu: Arc<dyn GpuDevice>,
    image: ImageHandle,
    memory: MemoryHandle,
    format: Format,
    extent: Extent2D,
}

impl Image {
    /// Create an image and bind memory with the given properties
    pub fn new(
        device: &Device,
        desc: &ImageDesc,
        memory_properties: MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let (image, memory) = device.create_image_with_info(desc, memory_properties)?;
        Ok(Self {
            gpu: Arc::clone(device.gpu()),
            image,
            memory,
            format: desc.format,
            extent: desc.extent,
        })
    }

    /// Device-local depth attachment of the given size
    pub fn depth_attachment(device: &Device, extent: Extent2D, format: Format) -> RenderResult<Self> {
        let desc = ImageDesc {
            extent,
            format,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            mip_levels: 1,
            array_layers: 1,
        };
        Self::new(device, &desc, MemoryPropertyFlags::DEVICE_LOCAL)
    }

    /// Image handle
    pub fn handle(&self) -> ImageHandle {
        self.image
    }

    /// Pixel format
    pub fn format(&self) -> Format {
        self.format
    }

    /// Size in pixels
    pub fn extent(&self) -> Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.gpu.destroy_image(self.image);
        self.gpu.free_memory(self.memory);
    }
}

/// 2D view of an image
///
/// Does not own the image; swapchain images belong to the swapchain.
pub struct ImageView {
    gpu: Arc<dyn GpuDevice>,
    view: ImageViewHandle,
}

impl ImageView {
    /// Create a view covering the first mip level and layer
    pub fn new(
        gpu: Arc<dyn GpuDevice>,
        image: ImageHandle,
        format: Format,
        aspect: ImageAspect,
    ) -> RenderResult<Self> {
        let view = gpu.create_image_view(image, format, aspect)?;
        Ok(Self { gpu, view })
    }

    /// View handle
    pub fn handle(&self) -> ImageViewHandle {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.gpu.destroy_image_view(self.view);
    }
}

/// Texture sampler
pub struct Sampler {
    gpu: Arc<dyn GpuDevice>,
    sampler: SamplerHandle,
}

impl Sampler {
    /// Create a sampler; anisotropy is clamped to the adapter limit
    pub fn new(device: &Device, desc: &SamplerDesc) -> RenderResult<Self> {
        let limit = device.properties().limits.max_sampler_anisotropy;
        let desc = SamplerDesc {
            max_anisotropy: desc.max_anisotropy.map(|level| level.min(limit)),
            ..*desc
        };
        let sampler = device.gpu().create_sampler(&desc)?;
        Ok(Self {
            gpu: Arc::clone(device.gpu()),
            sampler,
        })
    }

    /// Sampler handle
    pub fn handle(&self) -> SamplerHandle {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.gpu.destroy_sampler(self.sampler);
    }
}

/// Depth image and its view, one per swapchain image
pub struct DepthAttachment {
    // Field order: the view must go before the image it looks at.
    view: ImageView,
    image: Image,
}

impl DepthAttachment {
    /// Create a depth image of `format` and a depth-aspect view of it
    pub fn new(device: &Device, extent: Extent2D, format: Format) -> RenderResult<Self> {
        let image = Image::depth_attachment(device, extent, format)?;
        let view = ImageView::new(Arc::clone(device.gpu()), image.handle(), format, ImageAspect::DEPTH)?;
        Ok(Self { view, image })
    }

    /// View used as the framebuffer depth attachment
    pub fn view(&self) -> ImageViewHandle {
        self.view.handle()
    }

    /// Depth image handle
    pub fn image(&self) -> ImageHandle {
        self.image.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessInstance, HeadlessSurface};
    use crate::render::backends::{AddressMode, Filter, ImageLayout};

    fn device() -> (Device, Arc<HeadlessInstance>) {
        let surface = HeadlessSurface::new(800, 600);
        let instance = Arc::new(HeadlessInstance::with_default_adapter(&surface));
        (Device::new(instance.clone()).unwrap(), instance)
    }

    #[test]
    fn test_texture_upload_path() {
        let (device, instance) = device();
        let desc = ImageDesc {
            extent: Extent2D::new(4, 4),
            format: Format::R8G8B8A8Srgb,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::TRANSFER_DST | ImageUsage::SAMPLED,
            mip_levels: 1,
            array_layers: 1,
        };
        let image = Image::new(&device, &desc, MemoryPropertyFlags::DEVICE_LOCAL).unwrap();

        device
            .transition_image_layout(
                image.handle(),
                image.format(),
                ImageLayout::Undefined,
                ImageLayout::TransferDstOptimal,
            )
            .unwrap();
        device
            .transition_image_layout(
                image.handle(),
                image.format(),
                ImageLayout::TransferDstOptimal,
                ImageLayout::ShaderReadOnlyOptimal,
            )
            .unwrap();

        let headless = instance.last_device().unwrap();
        assert_eq!(
            headless.image_layout(image.handle()),
            Some(ImageLayout::ShaderReadOnlyOptimal)
        );
    }

    #[test]
    fn test_depth_attachment_lifecycle() {
        let (device, instance) = device();
        let headless = instance.last_device().unwrap();
        let before = headless.live_objects();
        {
            let depth = DepthAttachment::new(&device, Extent2D::new(64, 64), Format::D32Sfloat).unwrap();
            assert_ne!(depth.image(), ImageHandle::from_raw(0));
            assert_eq!(headless.live_objects(), before + 3);
        }
        assert_eq!(headless.live_objects(), before);
        assert_eq!(headless.stats().invalid_destroys, 0);
    }

    #[test]
    fn test_sampler_creation() {
        let (device, _) = device();
        let sampler = Sampler::new(
            &device,
            &SamplerDesc {
                mag_filter: Filter::Linear,
                min_filter: Filter::Linear,
                address_mode: AddressMode::Repeat,
                max_anisotropy: Some(64.0),
            },
        );
        assert!(sampler.is_ok());
    }
}
