//! AMD buffer markers written before and after two dispatches.

use std::mem;

use ash::vk;
use tracing::info;

use super::host_event::{submit, wait_idle};
use super::{prepare, ScenarioEnv, ScenarioResult, Setup};
use crate::gpu::{
    allocate_command_buffer, find_memory_type, record_command_buffer, Result, VulkanContext,
    VulkanDevice, BUFFER_SIZE, MEMORY_SIZE, NUM_BUFFER_ENTRIES,
};

const TOP_MARKER: u32 = 0xDEAD_BEEF;
const BOTTOM_MARKER: u32 = 0x0BAD_F00D;
const LOGGED_MARKERS: usize = 4;

/// Host-visible buffer the markers land in, mapped for its whole life.
struct MarkerBuffer<'a> {
    device: &'a VulkanDevice,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    words: *const u32,
}

impl<'a> MarkerBuffer<'a> {
    fn new(device: &'a VulkanDevice) -> Result<Self> {
        let raw = device.raw();
        let ci = vk::BufferCreateInfo::builder()
            .size(BUFFER_SIZE)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { raw.create_buffer(&ci, None)? };
        device.set_name(buffer, "Marker Buffer");

        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let memory_type = find_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(MEMORY_SIZE)
            .memory_type_index(memory_type);
        let memory = unsafe { raw.allocate_memory(&allocate_info, None)? };

        let words = unsafe {
            raw.bind_buffer_memory(buffer, memory, 0)?;
            let ptr = raw.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())? as *mut u32;
            let words = std::slice::from_raw_parts_mut(ptr, NUM_BUFFER_ENTRIES);
            for (i, word) in words.iter_mut().enumerate() {
                *word = i as u32;
            }
            ptr as *const u32
        };

        Ok(Self {
            device,
            buffer,
            memory,
            words,
        })
    }

    /// Reads the mapping; the device may have written it since.
    fn words(&self) -> &[u32] {
        unsafe { std::slice::from_raw_parts(self.words, NUM_BUFFER_ENTRIES) }
    }

    fn log(&self, title: &str) {
        info!("{}", title);
        for (i, word) in self.words().iter().take(LOGGED_MARKERS).enumerate() {
            info!("{:4}: {:08x}", i, word);
        }
    }
}

impl Drop for MarkerBuffer<'_> {
    fn drop(&mut self) {
        let raw = self.device.raw();
        unsafe {
            raw.unmap_memory(self.memory);
            raw.destroy_buffer(self.buffer, None);
            raw.free_memory(self.memory, None);
        }
    }
}

fn write_markers(ctx: &VulkanContext, device: &VulkanDevice, markers: &MarkerBuffer) -> Result<()> {
    let amd = vk::AmdBufferMarkerFn::load(|name| unsafe {
        mem::transmute(ctx.instance().get_device_proc_addr(device.handle(), name.as_ptr()))
    });

    let cmd_buf = allocate_command_buffer(device, vk::CommandBufferLevel::PRIMARY, None)?;
    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    record_command_buffer(device, cmd_buf, &begin_info, |rec| {
        rec.bind_compute_pipeline()?;
        rec.bind_default_descriptor_set()?;
        unsafe {
            (amd.cmd_write_buffer_marker_amd)(
                rec.raw(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
                markers.buffer,
                0,
                TOP_MARKER,
            );
        }
        rec.dispatch(1, 1, 1);
        rec.dispatch(1, 1, 1);
        unsafe {
            (amd.cmd_write_buffer_marker_amd)(
                rec.raw(),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                markers.buffer,
                4,
                BOTTOM_MARKER,
            );
        }
        Ok(())
    })?;

    info!("Submitting 0");
    submit(device, cmd_buf, vk::Fence::null())?;
    info!("Submitted 0");
    info!("Waiting for idle...");
    wait_idle(device)
}

/// Runs without the crash check: the markers are read back after an idle
/// wait and should show 0xdeadbeef and 0x0badf00d in the first two words.
pub(super) fn run(env: &ScenarioEnv, setup: &Setup) -> ScenarioResult {
    let ctx = prepare(env, setup)?;
    let device = ctx.get_single_device();

    info!("Creating Buffer Marker Buffer");
    let markers = MarkerBuffer::new(&device)?;
    markers.log("INIT MARKERS");

    write_markers(&ctx, &device, &markers)?;
    markers.log("MARKERS");
    Ok(None)
}
