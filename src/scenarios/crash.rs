//! Faults inside the device's memory system.

use ash::vk;
use tracing::info;

use super::host_event::{submit, wait_idle};
use crate::gpu::{create_and_record_command_buffers, RecordInfo, Result, VulkanContext};

/// The out-of-bounds kernel reads its local array at index -1.
pub(super) fn invalid_local_array_index(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let cmds = create_and_record_command_buffers(&device, &RecordInfo::named("CRASH Dispatch"), |rec| {
        rec.record_dispatch(1)
    })?;

    info!("Submit 1...");
    submit(&device, cmds.primary, vk::Fence::null())
}

/// Dispatches a kernel whose storage buffers were destroyed and whose memory
/// was freed after recording.
pub(super) fn shader_freed_memory(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let cmds = create_and_record_command_buffers(&device, &RecordInfo::named("Dispatch"), |rec| {
        rec.record_dispatch(1)
    })?;

    device.release_input_output_memory()?;

    info!("Submit 1...");
    submit(&device, cmds.primary, vk::Fence::null())?;
    info!("Wait for idle...");
    wait_idle(&device)?;
    info!("Done.");
    Ok(())
}

/// A transfer from input to output after both buffers are gone.
pub(super) fn copy_freed_memory(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let pair = device.buffers()?;
    let cmds = create_and_record_command_buffers(&device, &RecordInfo::named("Copy"), |rec| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 4,
        };
        rec.copy_buffer(pair.input, pair.output, &[region]);
        Ok(())
    })?;

    device.release_input_output_memory()?;

    info!("Submit 1...");
    submit(&device, cmds.primary, vk::Fence::null())
}
