use ash::{vk, Device};

use crate::Result;

/// Thin wrapper around a Vulkan command pool bound to one queue family.
///
/// Command buffers allocated here are never returned individually; they go
/// away with the pool when the owning device is destroyed.
pub struct CommandPool {
    device: Device,
    raw: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool for the given queue family.
    pub(super) fn new(device: Device, family: u32) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .build();
        let raw = unsafe { device.create_command_pool(&ci, None)? };
        Ok(Self {
            device,
            raw,
        })
    }

    pub fn alloc(&self, level: vk::CommandBufferLevel) -> Result<vk::CommandBuffer> {
        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.raw)
                    .level(level)
                    .command_buffer_count(1)
                    .build(),
            )?
        };
        Ok(cmd[0])
    }

    /// Resets every command buffer allocated from this pool, including ones
    /// that may still be executing.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())?
        };
        Ok(())
    }

    pub fn raw(&self) -> vk::CommandPool {
        self.raw
    }

    /// # Safety
    /// No command buffer from this pool may be pending execution.
    pub(super) unsafe fn destroy(&self) {
        self.device.destroy_command_pool(self.raw, None);
    }
}
