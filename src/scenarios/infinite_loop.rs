//! Compute kernels that run far past any sane deadline.

use ash::vk;
use tracing::info;

use super::host_event::submit_to;
use crate::gpu::{create_and_record_command_buffers, RecordInfo, Result, VulkanContext};

/// One dispatch of the loop kernel on the default queue.
pub(super) fn hang(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let cmds = create_and_record_command_buffers(&device, &RecordInfo::named("HANG Dispatch"), |rec| {
        rec.record_dispatch(1)
    })?;

    info!("Submit 1...");
    submit_to(&device, device.queue()?, cmds.primary, vk::Fence::null())
}

/// The loop kernel on a graphics queue and two compute queues at once. The
/// compute buffers share the second queue's pool.
pub(super) fn hang_multi_queue(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();

    let record = |info: RecordInfo| {
        create_and_record_command_buffers(&device, &info, |rec| rec.record_dispatch(1))
    };
    let graphics = record(RecordInfo::named("HANG Dispatch Graphics").with_pool(0))?;
    let compute_1 = record(RecordInfo::named("HANG Dispatch Compute 1").with_pool(1))?;
    let compute_2 = record(RecordInfo::named("HANG Dispatch Compute 2").with_pool(1))?;

    info!("Submit Graphics...");
    submit_to(&device, device.queue_at(0)?, graphics.primary, vk::Fence::null())?;
    info!("Submit Compute 1/2...");
    submit_to(&device, device.queue_at(1)?, compute_1.primary, vk::Fence::null())?;
    info!("Submit Compute 2/2...");
    submit_to(&device, device.queue_at(2)?, compute_2.primary, vk::Fence::null())
}
