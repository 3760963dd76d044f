use std::ffi::{c_void, CStr, CString};
use std::sync::Arc;

use ash::{
    extensions::{ext, khr},
    vk,
};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::device::Device;
use crate::swapchain::Surface;

/// Startup configuration of the GPU context, filled from the application
/// configuration object.
#[derive(Clone, Debug)]
pub struct InstanceDesc {
    pub application_name: String,
    /// Enables the validation layer and debug messenger when available.
    pub debug_runtime: bool,
}

impl Default for InstanceDesc {
    fn default() -> Self {
        Self {
            application_name: String::new(),
            debug_runtime: cfg!(debug_assertions),
        }
    }
}

pub(crate) struct DebugUtils {
    pub extension: ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub(crate) struct InstanceShared {
    pub raw: ash::Instance,
    pub entry: ash::Entry,
    pub debug_utils: Option<DebugUtils>,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug_utils) = self.debug_utils.take() {
                debug_utils
                    .extension
                    .destroy_debug_utils_messenger(debug_utils.messenger, None);
            }
            self.raw.destroy_instance(None);
        }
        log::info!("Vulkan instance was destroyed");
    }
}

struct AdapterRecord {
    info: fe::AdapterInfo,
    raw: vk::PhysicalDevice,
}

/// Owns the Vulkan instance and the adapter list; the factory all devices
/// are created through.
pub struct Instance {
    shared: Arc<InstanceShared>,
    adapters: Vec<AdapterRecord>,
}

unsafe extern "system" fn debug_utils_messenger_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        CStr::from_bytes_with_nul_unchecked(b"\0")
    } else {
        CStr::from_ptr((*callback_data).p_message)
    };
    let message = message.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("{message}");
    } else {
        log::info!("{message}");
    }
    vk::FALSE
}

fn map_adapter_kind(device_type: vk::PhysicalDeviceType) -> fe::AdapterKind {
    match device_type {
        vk::PhysicalDeviceType::INTEGRATED_GPU => fe::AdapterKind::Integrated,
        vk::PhysicalDeviceType::DISCRETE_GPU => fe::AdapterKind::Discrete,
        vk::PhysicalDeviceType::VIRTUAL_GPU => fe::AdapterKind::Virtual,
        vk::PhysicalDeviceType::CPU => fe::AdapterKind::Cpu,
        _ => fe::AdapterKind::None,
    }
}

impl Instance {
    pub fn new(desc: &InstanceDesc) -> Result<Self, fe::ErrorKind> {
        profiling::scope!("Instance::new");

        let entry = unsafe { ash::Entry::load() }.map_err(|error| {
            log::error!("failed to load the Vulkan loader: {error}");
            fe::ErrorKind::NotSupported
        })?;

        let available_layers = entry
            .enumerate_instance_layer_properties()
            .map_err(|_| fe::ErrorKind::UnknownError)?;
        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(|_| fe::ErrorKind::UnknownError)?;

        let has_extension = |name: &CStr| {
            available_extensions
                .iter()
                .any(|properties| unsafe { CStr::from_ptr(properties.extension_name.as_ptr()) } == name)
        };

        // Every platform surface extension that is present gets enabled so
        // one instance can serve any window the application opens.
        let mut extensions: Vec<&'static CStr> = Vec::new();
        for &name in &[
            khr::Surface::name(),
            khr::XlibSurface::name(),
            khr::XcbSurface::name(),
            khr::WaylandSurface::name(),
            khr::Win32Surface::name(),
            ext::MetalSurface::name(),
        ] {
            if has_extension(name) {
                extensions.push(name);
            }
        }

        let wants_debug = desc.debug_runtime && has_extension(ext::DebugUtils::name());
        if wants_debug {
            extensions.push(ext::DebugUtils::name());
        }

        let validation_layer =
            CStr::from_bytes_with_nul(b"VK_LAYER_KHRONOS_validation\0").unwrap();
        let mut layers: Vec<&CStr> = Vec::new();
        if desc.debug_runtime {
            let found = available_layers.iter().any(|properties| {
                (unsafe { CStr::from_ptr(properties.layer_name.as_ptr()) }) == validation_layer
            });
            if found {
                layers.push(validation_layer);
            } else {
                log::warn!("validation layer requested but not available");
            }
        }

        let application_name =
            CString::new(desc.application_name.as_str()).unwrap_or_default();
        let engine_name = CStr::from_bytes_with_nul(b"Ferrum3D\0").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&application_name)
            .engine_name(engine_name)
            .api_version(vk::API_VERSION_1_3);

        let extension_pointers: Vec<*const i8> =
            extensions.iter().map(|name| name.as_ptr()).collect();
        let layer_pointers: Vec<*const i8> = layers.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_pointers)
            .enabled_layer_names(&layer_pointers);

        let raw = unsafe { entry.create_instance(&create_info, None) }.map_err(|error| {
            log::error!("vkCreateInstance failed: {error}");
            fe::ErrorKind::from(crate::DeviceError::from(error))
        })?;

        let debug_utils = if wants_debug {
            let extension = ext::DebugUtils::new(&entry, &raw);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_utils_messenger_callback));
            let messenger = unsafe {
                extension
                    .create_debug_utils_messenger(&messenger_info, None)
                    .map_err(|error| fe::ErrorKind::from(crate::DeviceError::from(error)))?
            };
            Some(DebugUtils {
                extension,
                messenger,
            })
        } else {
            None
        };

        log::info!("Vulkan instance created successfully");

        let shared = Arc::new(InstanceShared {
            raw,
            entry,
            debug_utils,
        });

        let physical_devices = unsafe { shared.raw.enumerate_physical_devices() }
            .map_err(|error| fe::ErrorKind::from(crate::DeviceError::from(error)))?;

        let mut adapters = Vec::with_capacity(physical_devices.len());
        for raw in physical_devices {
            let properties = unsafe { shared.raw.get_physical_device_properties(raw) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            log::info!("Found Vulkan-compatible GPU: {name}");
            adapters.push(AdapterRecord {
                info: fe::AdapterInfo {
                    kind: map_adapter_kind(properties.device_type),
                    name,
                },
                raw,
            });
        }

        Ok(Self { shared, adapters })
    }

    /// Every adapter known at startup, in enumeration order.
    pub fn enumerate_adapters(&self) -> Vec<fe::AdapterInfo> {
        self.adapters.iter().map(|record| record.info.clone()).collect()
    }

    /// Creates the device on the adapter with the given name.
    pub fn create_device(&self, adapter_name: &str) -> Result<Device, fe::ErrorKind> {
        profiling::scope!("Instance::create_device");

        for record in &self.adapters {
            if record.info.name == adapter_name {
                return Device::new(Arc::clone(&self.shared), record.raw);
            }
        }
        Err(fe::ErrorKind::UnknownError)
    }

    /// Creates the device on the best adapter: discrete first, then
    /// integrated, then whatever enumerates first.
    pub fn create_default_device(&self) -> Result<Device, fe::ErrorKind> {
        let pick = |kind: fe::AdapterKind| {
            self.adapters
                .iter()
                .find(|record| record.info.kind == kind)
        };
        let record = pick(fe::AdapterKind::Discrete)
            .or_else(|| pick(fe::AdapterKind::Integrated))
            .or_else(|| self.adapters.first())
            .ok_or(fe::ErrorKind::NotSupported)?;
        Device::new(Arc::clone(&self.shared), record.raw)
    }

    /// Wraps a window into a presentable surface.
    ///
    /// # Safety
    ///
    /// The window and display handles must outlive the surface.
    pub unsafe fn create_surface(
        &self,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Surface, fe::ErrorKind> {
        let raw = ash_window::create_surface(
            &self.shared.entry,
            &self.shared.raw,
            display_handle,
            window_handle,
            None,
        )
        .map_err(|error| {
            log::error!("surface creation failed: {error}");
            fe::ErrorKind::from(crate::DeviceError::from(error))
        })?;

        let functor = khr::Surface::new(&self.shared.entry, &self.shared.raw);
        Ok(Surface::from_raw(raw, functor, Arc::clone(&self.shared)))
    }
}
