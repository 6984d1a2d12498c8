use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::TimelineSemaphore;
use ash::vk;
use tracing::warn;

use super::{BufferPair, CommandPool, ComputePipeline, GPUError, Result};
use crate::utils::Registered;

/// Synchronization objects created on behalf of callers. They live until the
/// device is destroyed.
#[derive(Debug, Clone, Copy)]
pub(super) enum OwnedObject {
    Event(vk::Event),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
}

/// A logical device with its queues, one command pool per queue, and the
/// optional default compute pipeline and I/O buffers.
///
/// Everything except the lazily created buffers and descriptor set is fixed
/// at creation. Concurrent use from several threads is not supported.
pub struct VulkanDevice {
    pub(super) device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queues: Vec<vk::Queue>,
    command_pools: Vec<CommandPool>,
    pub(super) memory_properties: vk::PhysicalDeviceMemoryProperties,
    debug_utils: Option<DebugUtils>,
    timeline: Option<TimelineSemaphore>,
    secondary: bool,
    pipeline: Option<ComputePipeline>,
    pub(super) io: OnceLock<BufferPair>,
    pub(super) io_released: AtomicBool,
    pub(super) descriptor_set: OnceLock<vk::DescriptorSet>,
    owned: Mutex<Vec<OwnedObject>>,
    destroyed: AtomicBool,
}

impl Registered for VulkanDevice {
    type Key = vk::Device;

    fn key(&self) -> vk::Device {
        self.handle()
    }
}

impl VulkanDevice {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        queues: Vec<vk::Queue>,
        command_pools: Vec<CommandPool>,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
        debug_utils: Option<DebugUtils>,
        timeline: Option<TimelineSemaphore>,
        secondary: bool,
    ) -> Self {
        Self {
            device,
            physical_device,
            queues,
            command_pools,
            memory_properties,
            debug_utils,
            timeline,
            secondary,
            pipeline: None,
            io: OnceLock::new(),
            io_released: AtomicBool::new(false),
            descriptor_set: OnceLock::new(),
            owned: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub(super) fn set_pipeline(&mut self, pipeline: ComputePipeline) {
        self.pipeline = Some(pipeline);
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Whether recording goes through a secondary command buffer.
    pub fn uses_secondary(&self) -> bool {
        self.secondary
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn queues(&self) -> &[vk::Queue] {
        &self.queues
    }

    /// The default queue (the first one opened).
    pub fn queue(&self) -> Result<vk::Queue> {
        self.queue_at(0)
    }

    pub fn queue_at(&self, index: usize) -> Result<vk::Queue> {
        self.queues
            .get(index)
            .copied()
            .ok_or(GPUError::QueueIndexOutOfRange {
                index,
                count: self.queues.len(),
            })
    }

    pub fn command_pools(&self) -> &[CommandPool] {
        &self.command_pools
    }

    /// The default command pool, serving the default queue.
    pub fn command_pool(&self) -> Result<&CommandPool> {
        self.command_pool_at(0)
    }

    pub fn command_pool_at(&self, index: usize) -> Result<&CommandPool> {
        self.command_pools
            .get(index)
            .ok_or(GPUError::PoolIndexOutOfRange {
                index,
                count: self.command_pools.len(),
            })
    }

    pub fn pipeline(&self) -> Result<&ComputePipeline> {
        self.pipeline.as_ref().ok_or(GPUError::MissingComputePipeline)
    }

    pub fn timeline(&self) -> Result<&TimelineSemaphore> {
        self.timeline
            .as_ref()
            .ok_or(GPUError::ExtensionNotEnabled("VK_KHR_timeline_semaphore"))
    }

    /// Attaches a debug name to `obj`. Does nothing unless debug utils are on.
    pub fn set_name<T: vk::Handle>(&self, obj: T, name: &str) {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        let Ok(cname) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(T::TYPE)
            .object_handle(obj.as_raw())
            .object_name(&cname);
        if let Err(e) = unsafe { utils.set_debug_utils_object_name(self.handle(), &info) } {
            warn!("Unable to name {:?} \"{}\": {}", T::TYPE, name, e);
        }
    }

    pub(super) fn track(&self, obj: OwnedObject) {
        match self.owned.lock() {
            Ok(mut g) => g.push(obj),
            Err(poisoned) => poisoned.into_inner().push(obj),
        }
    }

    /// Destroys every child object and then the device. Runs at most once.
    pub(super) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let owned = match self.owned.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        unsafe {
            for obj in owned {
                match obj {
                    OwnedObject::Event(e) => self.device.destroy_event(e, None),
                    OwnedObject::Semaphore(s) => self.device.destroy_semaphore(s, None),
                    OwnedObject::Fence(f) => self.device.destroy_fence(f, None),
                }
            }

            self.free_input_output_buffers();

            if let Some(pipeline) = &self.pipeline {
                pipeline.destroy(&self.device);
            }
            for pool in &self.command_pools {
                pool.destroy();
            }
            self.device.destroy_device(None);
        }
    }
}
