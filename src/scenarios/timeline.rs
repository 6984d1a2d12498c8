//! Submissions that wait on semaphores nothing will ever signal.

use std::thread;
use std::time::Duration;

use ash::vk;
use tracing::info;

use crate::gpu::{
    allocate_command_buffer, create_binary_semaphores, create_submit_info,
    create_timeline_semaphore_submit_info, create_timeline_semaphores, record_command_buffer,
    signal_timeline_semaphore, wait_timeline_semaphores, Result, VulkanContext, VulkanDevice,
};
use crate::vk_validate;

/// Allocates "CommandBuffer 1" and "CommandBuffer 2" from the default pool and
/// records two dispatches into the first. The buffer is recorded for reuse
/// so it can back several submissions.
pub(super) fn record_double_dispatch(device: &VulkanDevice) -> Result<vk::CommandBuffer> {
    let primary = vk::CommandBufferLevel::PRIMARY;
    let cmd_buf = allocate_command_buffer(device, primary, None)?;
    device.set_name(cmd_buf, "CommandBuffer 1");
    let spare = allocate_command_buffer(device, primary, None)?;
    device.set_name(spare, "CommandBuffer 2");

    let begin_info = vk::CommandBufferBeginInfo::builder();
    record_command_buffer(device, cmd_buf, &begin_info, |rec| rec.record_dispatch(2))?;
    Ok(cmd_buf)
}

/// Signals a timeline to 0x20 from the device, then waits for 0x30.
pub(super) fn hang_gpu(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let queue = device.queue()?;
    let cmd_buf = record_double_dispatch(&device)?;

    let semaphores = create_timeline_semaphores(&device, 1, 0x10)?;
    device.set_name(semaphores[0], "Never-signaled TimelineSemaphore");
    let masks = [vk::PipelineStageFlags::ALL_GRAPHICS];

    let signal_value = [0x20u64];
    let mut signal_timeline = create_timeline_semaphore_submit_info(None, Some(&signal_value[..]));
    let signal_submit = create_submit_info(
        &cmd_buf,
        None,
        None,
        Some(&semaphores[..]),
        Some(&mut signal_timeline),
    )
    .build();

    let wait_value = [0x30u64];
    let mut wait_timeline = create_timeline_semaphore_submit_info(Some(&wait_value[..]), None);
    let wait_submit = create_submit_info(
        &cmd_buf,
        Some(&semaphores[..]),
        Some(&masks[..]),
        None,
        Some(&mut wait_timeline),
    )
    .build();

    info!("Submitting signalSubmitInfo");
    vk_validate!(unsafe { device.raw().queue_submit(queue, &[signal_submit], vk::Fence::null()) });
    thread::sleep(Duration::from_millis(1000));
    info!("Submitting waitSubmitInfo");
    vk_validate!(unsafe { device.raw().queue_submit(queue, &[wait_submit], vk::Fence::null()) });
    Ok(())
}

/// The device waits on timeline 1, which the host signals; the host then
/// waits forever on timeline 2, which nobody signals.
pub(super) fn hang_host(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let queue = device.queue()?;
    let cmd_buf = record_double_dispatch(&device)?;

    let first = create_timeline_semaphores(&device, 1, 0x10)?;
    device.set_name(first[0], "TimelineSemaphore 1");
    let second = create_timeline_semaphores(&device, 1, 0x10)?;
    device.set_name(second[0], "TimelineSemaphore 2");

    let value = [0x20u64];
    let masks = [vk::PipelineStageFlags::ALL_GRAPHICS];
    let mut timeline = create_timeline_semaphore_submit_info(Some(&value[..]), None);
    let submit = create_submit_info(&cmd_buf, Some(&first[..]), Some(&masks[..]), None, Some(&mut timeline)).build();

    info!("Submitting submit info to the queue");
    vk_validate!(unsafe { device.raw().queue_submit(queue, &[submit], vk::Fence::null()) });
    info!("Submitted VkSubmitInfo to the queue.");

    info!("Host signalling timeline semaphore 1...");
    signal_timeline_semaphore(&device, first[0], value[0])?;
    info!("Timeline semaphore 1 signalled by the host");

    info!("Host waiting on timeline semaphore 2...");
    vk_validate!(wait_timeline_semaphores(&device, &second, &value, u64::MAX));
    info!("Timeline semaphore 2 signalled.");
    Ok(())
}

/// Resubmits a buffer that waits on an unsignaled binary semaphore and on a
/// timeline that sits at 10 but is waited on for 20.
pub(super) fn hang_binary_and_timeline(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();
    let queue = device.queue()?;
    let cmd_buf = record_double_dispatch(&device)?;

    let binary = create_binary_semaphores(&device, 1)?;
    device.set_name(binary[0], "Binary Semaphore");
    let timeline = create_timeline_semaphores(&device, 1, 10)?;
    device.set_name(timeline[0], "Timeline Semaphore");

    let semaphores = [binary[0], timeline[0]];
    let masks = [vk::PipelineStageFlags::ALL_GRAPHICS; 2];
    let wait_values = [0u64, 20];
    let mut timeline_info = create_timeline_semaphore_submit_info(Some(&wait_values[..]), None);
    let submit = create_submit_info(
        &cmd_buf,
        Some(&semaphores[..]),
        Some(&masks[..]),
        None,
        Some(&mut timeline_info),
    )
    .build();

    for i in 0..5 {
        info!("Submitting {}", i);
        vk_validate!(unsafe { device.raw().queue_submit(queue, &[submit], vk::Fence::null()) });
        thread::sleep(Duration::from_micros(500));
    }
    Ok(())
}
