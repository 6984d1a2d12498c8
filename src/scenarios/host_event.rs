//! Device-side waits on an event the host never sets.

use std::thread;
use std::time::Duration;

use ash::vk;
use tracing::{info, warn};

use super::{prepare, prepare_resources, RunError, ScenarioEnv, ScenarioResult, Setup};
use crate::gpu::{
    allocate_command_buffer, create_and_record_command_buffers, create_fence, create_submit_info,
    init_vulkan, record_command_buffer, run_with_crash_check, wait_for_fence, GPUError, RecordInfo,
    Result, VulkanContext, VulkanDevice, FENCE_TIMEOUT,
};
use crate::vk_validate;

/// Submits one command buffer with no semaphores. Failure ends the run.
pub(super) fn submit_to(
    device: &VulkanDevice,
    queue: vk::Queue,
    cmd_buf: vk::CommandBuffer,
    fence: vk::Fence,
) -> Result<()> {
    let submit = create_submit_info(&cmd_buf, None, None, None, None).build();
    vk_validate!(unsafe { device.raw().queue_submit(queue, &[submit], fence) });
    Ok(())
}

pub(super) fn submit(device: &VulkanDevice, cmd_buf: vk::CommandBuffer, fence: vk::Fence) -> Result<()> {
    submit_to(device, device.queue()?, cmd_buf, fence)
}

pub(super) fn wait_idle(device: &VulkanDevice) -> Result<()> {
    let queue = device.queue()?;
    vk_validate!(unsafe { device.raw().queue_wait_idle(queue) });
    Ok(())
}

/// Dispatch, wait on the event, dispatch again; then a plain dispatch that
/// only runs if the device got past the wait.
pub(super) fn hang(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();

    let hang = create_and_record_command_buffers(&device, &RecordInfo::named("HANG Dispatch and Wait"), |rec| {
        rec.record_dispatch(1)?;
        rec.wait_on_event_that_never_signals()?;
        rec.dispatch(1, 1, 1);
        Ok(())
    })?;
    let validation = create_and_record_command_buffers(
        &device,
        &RecordInfo::named("Dispatch for validation"),
        |rec| rec.record_dispatch(1),
    )?;

    info!("Submit 1...");
    submit(&device, hang.primary, vk::Fence::null())?;
    info!("Wait for idle...");
    wait_idle(&device)?;
    info!("Submit 2...");
    submit(&device, validation.primary, vk::Fence::null())?;
    info!("Waiting for idle...");
    wait_idle(&device)?;
    Ok(())
}

/// Same hang, but the command pool is reset while the work is still pending.
pub(super) fn hang_after_pool_reset(ctx: &VulkanContext) -> Result<()> {
    let device = ctx.get_single_device();

    let hang = create_and_record_command_buffers(&device, &RecordInfo::named("Dispatch and Wait"), |rec| {
        rec.record_dispatch(1)?;
        rec.wait_on_event_that_never_signals()?;
        rec.dispatch(1, 1, 1);
        Ok(())
    })?;
    let validation = create_and_record_command_buffers(
        &device,
        &RecordInfo::named("Dispatch for validation"),
        |rec| rec.record_dispatch(1),
    )?;
    let fence = create_fence(&device, "Fence")?;

    info!("Submit 1...");
    submit(&device, hang.primary, fence)?;

    info!("Sleep...");
    thread::sleep(Duration::from_micros(1000));

    info!("Reset...");
    if let Err(e) = device.command_pool()?.reset() {
        warn!("Command pool reset failed: {}", e);
    }

    info!("Wait for fence...");
    vk_validate!(wait_for_fence(&device, fence, FENCE_TIMEOUT));

    info!("Submit 2...");
    submit(&device, validation.primary, vk::Fence::null())?;
    info!("Waiting for idle...");
    wait_idle(&device)?;
    Ok(())
}

/// Records a passing dispatch and, with `hang`, a dispatch/wait/dispatch
/// buffer that is submitted ahead of it.
fn exercise_device(device: &VulkanDevice, hang: bool) -> Result<()> {
    let primary = vk::CommandBufferLevel::PRIMARY;
    let cmd_buf = allocate_command_buffer(device, primary, None)?;
    device.set_name(cmd_buf, "CommandBuffer 1");
    let cmd_buf2 = allocate_command_buffer(device, primary, None)?;
    device.set_name(cmd_buf2, "CommandBuffer 2");

    let begin_info = vk::CommandBufferBeginInfo::builder();
    record_command_buffer(device, cmd_buf2, &begin_info, |rec| rec.record_dispatch(1))?;
    record_command_buffer(device, cmd_buf, &begin_info, |rec| {
        rec.record_dispatch(1)?;
        if hang {
            rec.wait_on_event_that_never_signals()?;
            rec.dispatch(1, 1, 1);
        }
        Ok(())
    })?;

    if hang {
        info!("Submit 1...");
        submit(device, cmd_buf, vk::Fence::null())?;
        info!("Wait for idle...");
        wait_idle(device)?;
        info!("Submit 2...");
        submit(device, cmd_buf2, vk::Fence::null())?;
    }
    Ok(())
}

/// Three devices on one context: the first stays alive, the second is
/// destroyed after a clean run, the third hangs.
pub(super) fn multi_device(env: &ScenarioEnv, setup: &Setup) -> ScenarioResult {
    let request = env.device_info(setup);
    let ctx = init_vulkan(&env.info, &request).map_err(RunError::Init)?;

    let run_on = |handle: vk::Device, hang: bool| -> Result<()> {
        let device = ctx.get_device(handle).ok_or(GPUError::DeviceNotFound(handle))?;
        prepare_resources(&device, setup)?;
        exercise_device(&device, hang)?;
        info!("Waiting for idle...");
        wait_idle(&device)?;
        Ok(())
    };

    let first = ctx.get_single_device().handle();
    run_on(first, false)?;
    // The first device stays alive for the rest of the run.

    let second = ctx.init_device(&request).map_err(RunError::Init)?;
    run_on(second, false)?;
    ctx.delete_device(second);

    let third = ctx.init_device(&request).map_err(RunError::Init)?;
    run_on(third, true)?;
    Ok(None)
}

/// Three contexts in sequence, each under its own crash check. The second
/// is torn down before the third runs the hang.
pub(super) fn multi_context(env: &ScenarioEnv, setup: &Setup) -> ScenarioResult {
    let first = prepare(env, setup)?;
    run_with_crash_check(&first, |ctx| exercise_device(&ctx.get_single_device(), false))?;

    let second = prepare(env, setup)?;
    run_with_crash_check(&second, |ctx| exercise_device(&ctx.get_single_device(), false))?;
    drop(second);

    let third = prepare(env, setup)?;
    let outcome = run_with_crash_check(&third, |ctx| exercise_device(&ctx.get_single_device(), true))?;
    drop(first);
    Ok(Some(outcome))
}
