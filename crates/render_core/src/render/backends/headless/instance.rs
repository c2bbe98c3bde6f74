//! Simulated instance and adapters

use std::sync::{Arc, Mutex, PoisonError};

use super::device::HeadlessDevice;
use super::surface::HeadlessSurface;
use crate::render::backends::{
    AdapterHandle, AdapterLimits, AdapterProperties, AdapterType, BackendError, BackendResult,
    ColorSpace, DeviceDesc, Extent2D, Format, FormatFeatures, GpuDevice, GpuInstance, ImageTiling,
    MemoryProperties, MemoryPropertyFlags, MemoryType, PresentMode, QueueFamilyProperties,
    QueueFlags, SurfaceCapabilities, SurfaceFormat, UNDEFINED_EXTENT,
};
use crate::render::window::SurfaceProvider;

/// Swapchain extension name every adapter must expose
pub const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";

/// Description of a simulated physical adapter
///
/// [`HeadlessAdapter::new`] describes a capable discrete GPU; the `with_*`
/// methods strip or reshape features for selection and swapchain tests.
///
/// `capabilities.current_extent` is replaced by the live surface size unless
/// it is set to the [`UNDEFINED_EXTENT`] sentinel.
#[derive(Debug, Clone)]
pub struct HeadlessAdapter {
    /// Adapter name
    pub name: String,
    /// Adapter category
    pub adapter_type: AdapterType,
    /// Queue families in index order
    pub queue_families: Vec<QueueFamilyProperties>,
    /// Families able to present to the surface
    pub present_families: Vec<u32>,
    /// Supported device extensions
    pub extensions: Vec<String>,
    /// Presentable surface formats
    pub surface_formats: Vec<SurfaceFormat>,
    /// Supported present modes
    pub present_modes: Vec<PresentMode>,
    /// Surface capabilities template
    pub capabilities: SurfaceCapabilities,
    /// Memory type table
    pub memory: MemoryProperties,
    /// Device limits
    pub limits: AdapterLimits,
    /// Anisotropic sampling support
    pub sampler_anisotropy: bool,
    /// Formats usable as optimal-tiling depth attachments
    pub depth_formats: Vec<Format>,
}

impl HeadlessAdapter {
    /// A capable discrete GPU with one universal queue family
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter_type: AdapterType::Discrete,
            queue_families: vec![QueueFamilyProperties {
                flags: QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
                queue_count: 1,
            }],
            present_families: vec![0],
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            surface_formats: vec![
                SurfaceFormat::new(Format::B8G8R8A8Unorm, ColorSpace::SrgbNonlinear),
                SurfaceFormat::new(Format::B8G8R8A8Srgb, ColorSpace::SrgbNonlinear),
            ],
            present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
            capabilities: SurfaceCapabilities {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: Extent2D::new(800, 600),
                min_image_extent: Extent2D::new(1, 1),
                max_image_extent: Extent2D::new(4096, 4096),
            },
            memory: memory_table(&[
                MemoryPropertyFlags::DEVICE_LOCAL,
                MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_CACHED,
            ]),
            limits: AdapterLimits {
                min_uniform_buffer_offset_alignment: 64,
                non_coherent_atom_size: 64,
                max_sampler_anisotropy: 16.0,
                max_push_constants_size: 128,
            },
            sampler_anisotropy: true,
            depth_formats: vec![Format::D32Sfloat, Format::D32SfloatS8Uint, Format::D24UnormS8Uint],
        }
    }

    /// Replace the queue families and the subset able to present
    #[must_use]
    pub fn with_queue_families(
        mut self,
        families: Vec<QueueFamilyProperties>,
        present_families: Vec<u32>,
    ) -> Self {
        self.queue_families = families;
        self.present_families = present_families;
        self
    }

    /// Replace the supported device extensions
    #[must_use]
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(ToString::to_string).collect();
        self
    }

    /// Replace the presentable formats
    #[must_use]
    pub fn with_surface_formats(mut self, formats: Vec<SurfaceFormat>) -> Self {
        self.surface_formats = formats;
        self
    }

    /// Replace the present modes
    #[must_use]
    pub fn with_present_modes(mut self, modes: Vec<PresentMode>) -> Self {
        self.present_modes = modes;
        self
    }

    /// Replace the surface capabilities
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: SurfaceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace the memory type table (all types on heap 0)
    #[must_use]
    pub fn with_memory_types(mut self, types: &[MemoryPropertyFlags]) -> Self {
        self.memory = memory_table(types);
        self
    }

    /// Replace the device limits
    #[must_use]
    pub const fn with_limits(mut self, limits: AdapterLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Drop anisotropic sampling support
    #[must_use]
    pub const fn without_sampler_anisotropy(mut self) -> Self {
        self.sampler_anisotropy = false;
        self
    }

    /// Replace the supported depth formats
    #[must_use]
    pub fn with_depth_formats(mut self, formats: Vec<Format>) -> Self {
        self.depth_formats = formats;
        self
    }
}

fn memory_table(types: &[MemoryPropertyFlags]) -> MemoryProperties {
    MemoryProperties {
        memory_types: types
            .iter()
            .map(|&property_flags| MemoryType {
                property_flags,
                heap_index: u32::from(!property_flags.contains(MemoryPropertyFlags::DEVICE_LOCAL)),
            })
            .collect(),
        heap_sizes: vec![256 << 20, 256 << 20],
    }
}

/// In-process instance exposing simulated adapters for one [`HeadlessSurface`]
pub struct HeadlessInstance {
    adapters: Vec<HeadlessAdapter>,
    surface: HeadlessSurface,
    devices: Mutex<Vec<Arc<HeadlessDevice>>>,
}

impl HeadlessInstance {
    /// Create an instance with the given adapters, in enumeration order
    pub fn new(adapters: Vec<HeadlessAdapter>, surface: &HeadlessSurface) -> Self {
        Self {
            adapters,
            surface: surface.clone(),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Create an instance with a single default adapter
    pub fn with_default_adapter(surface: &HeadlessSurface) -> Self {
        Self::new(vec![HeadlessAdapter::new("Headless GPU")], surface)
    }

    /// Most recently created device, for inspecting counters and memory
    pub fn last_device(&self) -> Option<Arc<HeadlessDevice>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    fn adapter(&self, adapter: AdapterHandle) -> BackendResult<&HeadlessAdapter> {
        usize::try_from(adapter.as_raw())
            .ok()
            .and_then(|raw| raw.checked_sub(1))
            .and_then(|index| self.adapters.get(index))
            .ok_or_else(|| BackendError::InvalidHandle(format!("adapter {:#x}", adapter.as_raw())))
    }
}

impl GpuInstance for HeadlessInstance {
    fn enumerate_adapters(&self) -> BackendResult<Vec<AdapterHandle>> {
        Ok((1..=self.adapters.len() as u64)
            .map(AdapterHandle::from_raw)
            .collect())
    }

    fn adapter_properties(&self, adapter: AdapterHandle) -> BackendResult<AdapterProperties> {
        let adapter = self.adapter(adapter)?;
        Ok(AdapterProperties {
            name: adapter.name.clone(),
            adapter_type: adapter.adapter_type,
            limits: adapter.limits,
            sampler_anisotropy: adapter.sampler_anisotropy,
        })
    }

    fn queue_families(&self, adapter: AdapterHandle) -> BackendResult<Vec<QueueFamilyProperties>> {
        Ok(self.adapter(adapter)?.queue_families.clone())
    }

    fn surface_support(&self, adapter: AdapterHandle, queue_family: u32) -> BackendResult<bool> {
        Ok(self.adapter(adapter)?.present_families.contains(&queue_family))
    }

    fn device_extensions(&self, adapter: AdapterHandle) -> BackendResult<Vec<String>> {
        Ok(self.adapter(adapter)?.extensions.clone())
    }

    fn surface_capabilities(&self, adapter: AdapterHandle) -> BackendResult<SurfaceCapabilities> {
        let mut capabilities = self.adapter(adapter)?.capabilities;
        if capabilities.current_extent.width != UNDEFINED_EXTENT {
            capabilities.current_extent = self.surface.extent();
        }
        Ok(capabilities)
    }

    fn surface_formats(&self, adapter: AdapterHandle) -> BackendResult<Vec<SurfaceFormat>> {
        let adapter = self.adapter(adapter)?;
        Ok(self
            .surface
            .formats()
            .unwrap_or_else(|| adapter.surface_formats.clone()))
    }

    fn present_modes(&self, adapter: AdapterHandle) -> BackendResult<Vec<PresentMode>> {
        Ok(self.adapter(adapter)?.present_modes.clone())
    }

    fn memory_properties(&self, adapter: AdapterHandle) -> BackendResult<MemoryProperties> {
        Ok(self.adapter(adapter)?.memory.clone())
    }

    fn format_features(
        &self,
        adapter: AdapterHandle,
        format: Format,
        tiling: ImageTiling,
    ) -> BackendResult<FormatFeatures> {
        let adapter = self.adapter(adapter)?;
        let features = if format.is_depth() {
            if tiling == ImageTiling::Optimal && adapter.depth_formats.contains(&format) {
                FormatFeatures::DEPTH_STENCIL_ATTACHMENT
            } else {
                FormatFeatures::empty()
            }
        } else if format == Format::Undefined {
            FormatFeatures::empty()
        } else {
            FormatFeatures::SAMPLED_IMAGE
                | FormatFeatures::COLOR_ATTACHMENT
                | FormatFeatures::TRANSFER_DST
        };
        Ok(features)
    }

    fn create_device(
        &self,
        adapter_handle: AdapterHandle,
        desc: &DeviceDesc,
    ) -> BackendResult<Arc<dyn GpuDevice>> {
        let adapter = self.adapter(adapter_handle)?;

        if let Some(family) = desc
            .queue_families
            .iter()
            .find(|&&family| family as usize >= adapter.queue_families.len())
        {
            return Err(BackendError::Other(format!("queue family {family} does not exist")));
        }
        if let Some(missing) = desc
            .extensions
            .iter()
            .find(|name| !adapter.extensions.contains(name))
        {
            return Err(BackendError::Other(format!("extension {missing} not present")));
        }
        if desc.sampler_anisotropy && !adapter.sampler_anisotropy {
            return Err(BackendError::Other("feature samplerAnisotropy not present".to_string()));
        }

        let device = Arc::new(HeadlessDevice::new(
            adapter.clone(),
            desc.queue_families.clone(),
            self.surface.clone(),
        ));
        log::debug!("Created headless device on '{}'", adapter.name);
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&device));
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_extent_follows_surface() {
        let surface = HeadlessSurface::new(320, 240);
        let instance = HeadlessInstance::with_default_adapter(&surface);
        let adapter = instance.enumerate_adapters().unwrap()[0];

        let caps = instance.surface_capabilities(adapter).unwrap();
        assert_eq!(caps.current_extent, Extent2D::new(320, 240));

        surface.resize(640, 480);
        let caps = instance.surface_capabilities(adapter).unwrap();
        assert_eq!(caps.current_extent, Extent2D::new(640, 480));
    }

    #[test]
    fn test_undefined_extent_is_preserved() {
        let surface = HeadlessSurface::new(320, 240);
        let mut adapter = HeadlessAdapter::new("gpu");
        adapter.capabilities.current_extent = Extent2D::new(UNDEFINED_EXTENT, UNDEFINED_EXTENT);
        let instance = HeadlessInstance::new(vec![adapter], &surface);
        let handle = instance.enumerate_adapters().unwrap()[0];

        let caps = instance.surface_capabilities(handle).unwrap();
        assert_eq!(caps.current_extent.width, UNDEFINED_EXTENT);
    }

    #[test]
    fn test_create_device_checks_features() {
        let surface = HeadlessSurface::new(320, 240);
        let instance = HeadlessInstance::new(
            vec![HeadlessAdapter::new("gpu").without_sampler_anisotropy()],
            &surface,
        );
        let adapter = instance.enumerate_adapters().unwrap()[0];
        let desc = DeviceDesc {
            queue_families: vec![0],
            extensions: vec![SWAPCHAIN_EXTENSION.to_string()],
            sampler_anisotropy: true,
        };
        assert!(instance.create_device(adapter, &desc).is_err());
        assert!(instance.last_device().is_none());
    }

    #[test]
    fn test_invalid_adapter_handle() {
        let surface = HeadlessSurface::new(1, 1);
        let instance = HeadlessInstance::new(Vec::new(), &surface);
        assert!(instance.enumerate_adapters().unwrap().is_empty());
        assert!(matches!(
            instance.adapter_properties(AdapterHandle::from_raw(1)),
            Err(BackendError::InvalidHandle(_))
        ));
    }
}
