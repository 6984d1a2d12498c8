use std::ffi::{c_char, c_void, CStr, CString};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::TimelineSemaphore;
use ash::{vk, Entry};
use tracing::{debug, error, info, warn};

use crate::utils::DeviceRegistry;

pub mod command_pool;
pub mod commands;
pub mod crash_check;
pub mod descriptor_sets;
pub mod device;
pub mod device_selector;
pub mod error;
pub mod memory;
pub mod pipelines;
pub mod structs;
pub mod sync;

pub use command_pool::*;
pub use commands::*;
pub use crash_check::*;
pub use device::*;
pub use device_selector::*;
pub use error::*;
pub use memory::*;
pub use pipelines::*;
pub use structs::*;
pub use sync::*;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();
    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[{:?}] {}", message_type, message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[{:?}] {}", message_type, message);
    } else {
        debug!("[{:?}] {}", message_type, message);
    }
    vk::FALSE
}

/// What to open when creating a logical device.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub extensions: Vec<&'static CStr>,
    /// SPIR-V for the default compute pipeline. `None` creates no pipeline.
    pub shader: Option<PathBuf>,
    /// One queue per entry. `None` opens a single queue of the configured
    /// default type.
    pub queues: Option<Vec<QueueType>>,
}

impl DeviceInfo {
    pub fn with_shader(shader: impl Into<PathBuf>) -> Self {
        Self {
            shader: Some(shader.into()),
            ..Default::default()
        }
    }
}

/// One API instance, one physical device, any number of logical devices.
pub struct VulkanContext {
    #[allow(dead_code)]
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<DebugUtils>,
    messenger: vk::DebugUtilsMessengerEXT,
    physical_device: OnceLock<vk::PhysicalDevice>,
    devices: DeviceRegistry<VulkanDevice>,
    info: ContextInfo,
}

impl VulkanContext {
    /// Creates the instance. No logical device exists afterwards.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let entry = unsafe { Entry::load() }?;

        let mut extensions = info.instance_extensions.clone();
        if info.debug_utils && !extensions.iter().any(|e| e.as_c_str() == DebugUtils::name()) {
            extensions.push(DebugUtils::name().to_owned());
        }
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> =
            info.instance_layers.iter().map(|l| l.as_ptr()).collect();

        let app_name = CString::new(APPLICATION_NAME).unwrap_or_default();
        let engine_name = CString::new(ENGINE_NAME).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(1)
            .engine_name(&engine_name)
            .engine_version(1)
            .api_version(info.api_version);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs);

        let instance = match unsafe { entry.create_instance(&create_info, None) } {
            Ok(instance) => instance,
            Err(vk::Result::ERROR_INCOMPATIBLE_DRIVER) => {
                error!("Unable to find a compatible Vulkan Driver.");
                return Err(GPUError::IncompatibleDriver);
            }
            Err(e) => {
                error!("Could not create a Vulkan instance (for unknown reasons) [{}].", e);
                return Err(e.into());
            }
        };

        let mut messenger = vk::DebugUtilsMessengerEXT::null();
        let debug_utils = if info.debug_utils {
            let utils = DebugUtils::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            match unsafe { utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(m) => messenger = m,
                Err(e) => warn!("Unable to install the debug messenger: {}", e),
            }
            Some(utils)
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            messenger,
            physical_device: OnceLock::new(),
            devices: DeviceRegistry::new(),
            info: info.clone(),
        })
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The physical device every logical device is created on, once chosen.
    pub fn physical_device(&self) -> Option<vk::PhysicalDevice> {
        self.physical_device.get().copied()
    }

    /// Creates a logical device and appends it to the context.
    pub fn init_device(&self, request: &DeviceInfo) -> Result<vk::Device> {
        let default_queues = [self.info.queue];
        let queue_types: &[QueueType] = request.queues.as_deref().unwrap_or(&default_queues);

        let (picked, _) = pick_physical_device(&self.instance)?;
        let pdevice = *self.physical_device.get_or_init(|| picked);

        let families =
            unsafe { self.instance.get_physical_device_queue_family_properties(pdevice) };
        let family_indices = queue_types
            .iter()
            .map(|q| select_queue_family(&families, *q))
            .collect::<Result<Vec<u32>>>()?;
        let (grouped, slots) = group_queue_requests(&family_indices);

        let priorities = vec![1.0f32; queue_types.len()];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = grouped
            .iter()
            .map(|(family, count)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities[..*count as usize])
                    .build()
            })
            .collect();

        if request.extensions.is_empty() {
            info!("Device Extension: None");
        }
        for ext in &request.extensions {
            info!("Device Extension: {:?}", ext);
        }
        let extension_ptrs: Vec<*const c_char> =
            request.extensions.iter().map(|e| e.as_ptr()).collect();

        let wants_timeline = request
            .extensions
            .iter()
            .any(|e| *e == TimelineSemaphore::name());
        let mut timeline_features = vk::PhysicalDeviceTimelineSemaphoreFeatures {
            timeline_semaphore: vk::TRUE,
            ..Default::default()
        };
        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs);
        if wants_timeline {
            create_info = create_info.push_next(&mut timeline_features);
        }

        let raw = unsafe { self.instance.create_device(pdevice, &create_info, None)? };
        let timeline = wants_timeline.then(|| TimelineSemaphore::new(&self.instance, &raw));
        let memory_properties =
            unsafe { self.instance.get_physical_device_memory_properties(pdevice) };

        let mut queues = Vec::with_capacity(slots.len());
        let mut pools = Vec::with_capacity(slots.len());
        for (family, index) in slots {
            queues.push(unsafe { raw.get_device_queue(family, index) });
            pools.push(CommandPool::new(raw.clone(), family)?);
        }

        let mut device = VulkanDevice::new(
            raw,
            pdevice,
            queues,
            pools,
            memory_properties,
            self.debug_utils.clone(),
            timeline,
            self.info.secondary,
        );

        device.set_name(device.handle(), "Default Device");
        device.set_name(self.instance.handle(), "Default Instance");
        device.set_name(pdevice, "Default PhysicalDevice");
        if let (Ok(queue), Ok(pool)) = (device.queue(), device.command_pool()) {
            device.set_name(queue, "Default Queue");
            device.set_name(pool.raw(), "Default CommandPool");
        }

        if let Some(path) = &request.shader {
            match ComputePipeline::new(&device, path) {
                Ok(pipeline) => device.set_pipeline(pipeline),
                Err(err) => {
                    device.destroy();
                    return Err(err);
                }
            }
        }

        let handle = device.handle();
        self.devices.push(device);
        Ok(handle)
    }

    /// The context's only logical device. Panics unless exactly one exists.
    pub fn get_single_device(&self) -> Arc<VulkanDevice> {
        self.devices.single()
    }

    pub fn get_device(&self, handle: vk::Device) -> Option<Arc<VulkanDevice>> {
        self.devices.find(handle)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Removes the device from the context and destroys it.
    pub fn delete_device(&self, handle: vk::Device) {
        if let Some(device) = self.devices.remove(handle) {
            device.destroy();
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        for device in self.devices.drain() {
            device.destroy();
        }
        unsafe {
            if let Some(utils) = &self.debug_utils {
                if self.messenger != vk::DebugUtilsMessengerEXT::null() {
                    utils.destroy_debug_utils_messenger(self.messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance plus one device built from `request`.
pub fn init_vulkan(info: &ContextInfo, request: &DeviceInfo) -> Result<VulkanContext> {
    let ctx = VulkanContext::new(info)?;
    ctx.init_device(request)?;
    Ok(ctx)
}
