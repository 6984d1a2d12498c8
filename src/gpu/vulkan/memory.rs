use std::sync::atomic::Ordering;

use ash::vk;
use tracing::info;

use super::{
    find_memory_type, BufferInitialization, GPUError, Result, VulkanDevice, BUFFER_SIZE,
    MEMORY_SIZE, NUM_BUFFERS, NUM_BUFFER_ENTRIES,
};

/// Input and output storage buffers aliasing one host-visible allocation:
/// input at offset 0, output at offset [`BUFFER_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPair {
    pub input: vk::Buffer,
    pub output: vk::Buffer,
    pub memory: vk::DeviceMemory,
}

impl BufferPair {
    pub const INPUT_OFFSET: vk::DeviceSize = 0;
    pub const OUTPUT_OFFSET: vk::DeviceSize = BUFFER_SIZE;
}

/// Fills the input words according to `init` and zeroes the output words.
/// `Transfer` leaves the input as allocated; only the copy destination is
/// zeroed.
pub fn initialize_buffer_contents(init: BufferInitialization, input: &mut [u32], output: &mut [u32]) {
    match init {
        BufferInitialization::None => return,
        BufferInitialization::Transfer => {}
        BufferInitialization::Default => {
            let floats: &mut [f32] = bytemuck::cast_slice_mut(input);
            for (i, v) in floats.iter_mut().enumerate() {
                *v = (2 + 2 * i) as f32;
            }
        }
        BufferInitialization::MinusOne => {
            let floats: &mut [f32] = bytemuck::cast_slice_mut(input);
            floats.fill(-1.0);
        }
        BufferInitialization::SixtyFourK => input.fill(65535),
    }
    output.fill(0);
}

impl VulkanDevice {
    fn create_storage_buffer(&self, usage: vk::BufferUsageFlags, name: &str) -> Result<vk::Buffer> {
        let ci = vk::BufferCreateInfo::builder()
            .size(BUFFER_SIZE)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&ci, None)? };
        self.set_name(buffer, name);
        Ok(buffer)
    }

    /// Creates the input/output pair, binds both into one allocation and fills
    /// it per `init`. Only one pair may exist per device.
    pub fn allocate_input_output_buffers(&self, init: BufferInitialization) -> Result<BufferPair> {
        if self.io.get().is_some() {
            return Err(GPUError::AlreadyInitialized("input/output buffers"));
        }

        let input = self.create_storage_buffer(init.input_usage(), "Input Buffer")?;
        let output = self.create_storage_buffer(init.output_usage(), "Output Buffer")?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(input) };
        let memory_type = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(MEMORY_SIZE)
            .memory_type_index(memory_type);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None)? };
        self.set_name(memory, "DeviceMemory for I/O");

        unsafe {
            self.device
                .bind_buffer_memory(input, memory, BufferPair::INPUT_OFFSET)?;
            self.device
                .bind_buffer_memory(output, memory, BufferPair::OUTPUT_OFFSET)?;
        }

        if init != BufferInitialization::None {
            unsafe {
                let ptr = self
                    .device
                    .map_memory(memory, 0, MEMORY_SIZE, vk::MemoryMapFlags::empty())?;
                let words =
                    std::slice::from_raw_parts_mut(ptr as *mut u32, NUM_BUFFERS * NUM_BUFFER_ENTRIES);
                let (input_words, output_words) = words.split_at_mut(NUM_BUFFER_ENTRIES);
                initialize_buffer_contents(init, input_words, output_words);
                self.device.unmap_memory(memory);
            }
        }

        let pair = BufferPair {
            input,
            output,
            memory,
        };
        self.io
            .set(pair)
            .map_err(|_| GPUError::AlreadyInitialized("input/output buffers"))?;
        Ok(pair)
    }

    pub fn buffers(&self) -> Result<BufferPair> {
        self.io.get().copied().ok_or(GPUError::BuffersNotAllocated)
    }

    /// Destroys both buffers and frees their memory while command buffers may
    /// still reference them. The handles stay readable through [`Self::buffers`].
    pub fn release_input_output_memory(&self) -> Result<()> {
        if self.io.get().is_none() {
            return Err(GPUError::BuffersNotAllocated);
        }
        info!("Destroying the I/O buffers and freeing their memory...");
        unsafe { self.free_input_output_buffers() };
        Ok(())
    }

    pub(super) unsafe fn free_input_output_buffers(&self) {
        let Some(pair) = self.io.get() else {
            return;
        };
        if self.io_released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.device.destroy_buffer(pair.input, None);
        self.device.destroy_buffer(pair.output, None);
        self.device.free_memory(pair.memory, None);
    }
}
