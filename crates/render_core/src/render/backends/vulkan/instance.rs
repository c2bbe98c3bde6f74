//! Vulkan instance, debug messenger and surface

use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain};
use ash::vk::{self, Handle};
use ash::{Entry, Instance};

use super::convert::{
    adapter_type_from_vk, color_space_from_vk, format_features_from_vk, format_from_vk,
    memory_properties_from_vk, present_mode_from_vk, queue_flags_from_vk,
};
use super::device::VulkanDevice;
use super::VulkanSurfaceSource;
use crate::core::RendererConfig;
use crate::render::backends::{
    AdapterHandle, AdapterLimits, AdapterProperties, BackendError, BackendResult, DeviceDesc,
    Format, FormatFeatures, GpuDevice, GpuInstance, ImageTiling, MemoryProperties, MemoryType,
    PresentMode, QueueFamilyProperties, SurfaceCapabilities, SurfaceFormat,
};
use crate::render::errors::{RenderError, RenderResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"render_core";

/// Instance state shared with every device created from it
pub(super) struct InstanceShared {
    _entry: Entry,
    pub(super) instance: Instance,
    pub(super) surface_loader: Surface,
    pub(super) surface: vk::SurfaceKHR,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan instance destroyed");
    }
}

/// Vulkan instance bound to one window surface
pub struct VulkanInstance {
    shared: Arc<InstanceShared>,
}

impl VulkanInstance {
    /// Load Vulkan, create the instance and a surface for `window`
    ///
    /// Validation layers and the debug messenger are enabled when
    /// [`RendererConfig::validation_enabled`] says so; asking for validation
    /// on a system without the Khronos layer is an error.
    pub fn new(window: &mut dyn VulkanSurfaceSource, config: &RendererConfig) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str()).map_err(|_| {
            RenderError::InitializationFailed("application name contains a NUL byte".to_string())
        })?;
        let (major, minor, patch) = config.application_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let enable_validation = config.validation_enabled();

        let extension_names = window
            .required_instance_extensions()?
            .into_iter()
            .map(CString::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                RenderError::InitializationFailed("extension name contains a NUL byte".to_string())
            })?;
        let mut extensions: Vec<*const c_char> =
            extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let mut layers: Vec<*const c_char> = Vec::new();
        if enable_validation {
            if !validation_layer_available(&entry)? {
                return Err(RenderError::InitializationFailed(
                    "validation layers requested, but not available".to_string(),
                ));
            }
            layers.push(VALIDATION_LAYER.as_ptr());
            extensions.push(DebugUtils::name().as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(BackendError::from)?;

        let debug = if enable_validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        // The surface is filled in below so a failure still tears the instance down.
        let mut shared = InstanceShared {
            _entry: entry,
            instance,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            debug,
        };
        shared.surface = window.create_surface(&shared.instance)?;

        log::info!(
            "Vulkan instance created (validation {})",
            if enable_validation { "on" } else { "off" }
        );

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Underlying `ash` instance
    pub fn raw(&self) -> &Instance {
        &self.shared.instance
    }

    fn physical_device(adapter: AdapterHandle) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(adapter.as_raw())
    }
}

fn validation_layer_available(entry: &Entry) -> BackendResult<bool> {
    #[allow(unused_unsafe)]
    let layers = unsafe { entry.enumerate_instance_layer_properties() }?;
    Ok(layers.iter().any(|layer| {
        // SAFETY: the driver returns NUL-terminated names
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER
    }))
}

fn setup_debug_messenger(debug_utils: &DebugUtils) -> BackendResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    Ok(unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?)
}

/// Routes validation messages into the `log` facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

impl GpuInstance for VulkanInstance {
    fn enumerate_adapters(&self) -> BackendResult<Vec<AdapterHandle>> {
        let devices = unsafe { self.shared.instance.enumerate_physical_devices() }?;
        Ok(devices
            .into_iter()
            .map(|device| AdapterHandle::from_raw(device.as_raw()))
            .collect())
    }

    fn adapter_properties(&self, adapter: AdapterHandle) -> BackendResult<AdapterProperties> {
        let device = Self::physical_device(adapter);
        let (properties, features) = unsafe {
            (
                self.shared.instance.get_physical_device_properties(device),
                self.shared.instance.get_physical_device_features(device),
            )
        };
        // SAFETY: device_name is a NUL-terminated fixed array
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let limits = properties.limits;

        Ok(AdapterProperties {
            name,
            adapter_type: adapter_type_from_vk(properties.device_type),
            limits: AdapterLimits {
                min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
                non_coherent_atom_size: limits.non_coherent_atom_size,
                max_sampler_anisotropy: limits.max_sampler_anisotropy,
                max_push_constants_size: limits.max_push_constants_size,
            },
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }

    fn queue_families(&self, adapter: AdapterHandle) -> BackendResult<Vec<QueueFamilyProperties>> {
        let families = unsafe {
            self.shared
                .instance
                .get_physical_device_queue_family_properties(Self::physical_device(adapter))
        };
        Ok(families
            .iter()
            .map(|family| QueueFamilyProperties {
                flags: queue_flags_from_vk(family.queue_flags),
                queue_count: family.queue_count,
            })
            .collect())
    }

    fn surface_support(&self, adapter: AdapterHandle, queue_family: u32) -> BackendResult<bool> {
        Ok(unsafe {
            self.shared.surface_loader.get_physical_device_surface_support(
                Self::physical_device(adapter),
                queue_family,
                self.shared.surface,
            )
        }?)
    }

    fn device_extensions(&self, adapter: AdapterHandle) -> BackendResult<Vec<String>> {
        let extensions = unsafe {
            self.shared
                .instance
                .enumerate_device_extension_properties(Self::physical_device(adapter))
        }?;
        Ok(extensions
            .iter()
            .map(|ext| {
                // SAFETY: extension_name is a NUL-terminated fixed array
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect())
    }

    fn surface_capabilities(&self, adapter: AdapterHandle) -> BackendResult<SurfaceCapabilities> {
        let caps = unsafe {
            self.shared
                .surface_loader
                .get_physical_device_surface_capabilities(
                    Self::physical_device(adapter),
                    self.shared.surface,
                )
        }?;
        Ok(SurfaceCapabilities {
            min_image_count: caps.min_image_count,
            max_image_count: caps.max_image_count,
            current_extent: caps.current_extent.into(),
            min_image_extent: caps.min_image_extent.into(),
            max_image_extent: caps.max_image_extent.into(),
        })
    }

    fn surface_formats(&self, adapter: AdapterHandle) -> BackendResult<Vec<SurfaceFormat>> {
        let formats = unsafe {
            self.shared
                .surface_loader
                .get_physical_device_surface_formats(
                    Self::physical_device(adapter),
                    self.shared.surface,
                )
        }?;
        Ok(formats
            .iter()
            .filter_map(|format| {
                Some(SurfaceFormat::new(
                    format_from_vk(format.format)?,
                    color_space_from_vk(format.color_space)?,
                ))
            })
            .collect())
    }

    fn present_modes(&self, adapter: AdapterHandle) -> BackendResult<Vec<PresentMode>> {
        let modes = unsafe {
            self.shared
                .surface_loader
                .get_physical_device_surface_present_modes(
                    Self::physical_device(adapter),
                    self.shared.surface,
                )
        }?;
        Ok(modes.into_iter().filter_map(present_mode_from_vk).collect())
    }

    fn memory_properties(&self, adapter: AdapterHandle) -> BackendResult<MemoryProperties> {
        let props = unsafe {
            self.shared
                .instance
                .get_physical_device_memory_properties(Self::physical_device(adapter))
        };
        let type_count = props.memory_type_count as usize;
        let heap_count = props.memory_heap_count as usize;

        Ok(MemoryProperties {
            memory_types: props.memory_types[..type_count]
                .iter()
                .map(|ty| MemoryType {
                    property_flags: memory_properties_from_vk(ty.property_flags),
                    heap_index: ty.heap_index,
                })
                .collect(),
            heap_sizes: props.memory_heaps[..heap_count]
                .iter()
                .map(|heap| heap.size)
                .collect(),
        })
    }

    fn format_features(
        &self,
        adapter: AdapterHandle,
        format: Format,
        tiling: ImageTiling,
    ) -> BackendResult<FormatFeatures> {
        let props = unsafe {
            self.shared
                .instance
                .get_physical_device_format_properties(Self::physical_device(adapter), format.into())
        };
        let features = match tiling {
            ImageTiling::Linear => props.linear_tiling_features,
            ImageTiling::Optimal => props.optimal_tiling_features,
        };
        Ok(format_features_from_vk(features))
    }

    fn create_device(
        &self,
        adapter: AdapterHandle,
        desc: &DeviceDesc,
    ) -> BackendResult<Arc<dyn GpuDevice>> {
        let physical_device = Self::physical_device(adapter);
        let priorities = [1.0_f32];

        let mut families = desc.queue_families.clone();
        families.sort_unstable();
        families.dedup();

        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names = desc
            .extensions
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| BackendError::Other("extension name contains a NUL byte".to_string()))?;
        let extensions: Vec<*const c_char> =
            extension_names.iter().map(|ext| ext.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(desc.sampler_anisotropy)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            self.shared
                .instance
                .create_device(physical_device, &create_info, None)
        }?;

        let queues = families
            .iter()
            .map(|&family| (family, unsafe { device.get_device_queue(family, 0) }))
            .collect();
        let swapchain_loader = Swapchain::new(&self.shared.instance, &device);

        log::debug!("Logical device created with queue families {families:?}");

        Ok(Arc::new(VulkanDevice::new(
            Arc::clone(&self.shared),
            physical_device,
            device,
            swapchain_loader,
            queues,
        )))
    }
}
