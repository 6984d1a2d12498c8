//! Canary submission that tells whether a workload crashed or hung the device.

use std::time::Duration;

use ash::vk;
#[cfg(feature = "hcf-serde")]
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    allocate_command_buffer, begin_and_end_command_buffer, create_fence, wait_for_fence,
    FenceStatus, Result, VulkanContext, FENCE_TIMEOUT,
};

pub const CANARY_FENCE_TIMEOUT: Duration = FENCE_TIMEOUT;

/// The point after the workload where a fault surfaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "hcf-serde", derive(Serialize, Deserialize))]
pub enum CrashCheckStage {
    /// Idling the queue right after the workload.
    Drain,
    CanarySubmit,
    CanaryWait,
    /// The idle wait after the canary signaled.
    FinalDrain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrashCheckOutcome {
    NoFaultDetected,
    /// The canary fence did not signal in time.
    Timeout,
    Fault {
        stage: CrashCheckStage,
        result: vk::Result,
    },
}

impl CrashCheckOutcome {
    /// The API status the harness reports for this outcome.
    pub fn result(&self) -> vk::Result {
        match self {
            Self::NoFaultDetected => vk::Result::SUCCESS,
            Self::Timeout => vk::Result::TIMEOUT,
            Self::Fault { result, .. } => *result,
        }
    }

    pub fn is_detected(&self) -> bool {
        !matches!(self, Self::NoFaultDetected)
    }
}

/// Folds the canary phase into an outcome. Each stage only runs when the
/// previous one succeeded, so the first failure wins.
fn evaluate_canary(
    drain: impl FnOnce() -> std::result::Result<(), vk::Result>,
    submit: impl FnOnce() -> std::result::Result<(), vk::Result>,
    wait: impl FnOnce() -> Result<FenceStatus>,
    final_drain: impl FnOnce() -> std::result::Result<(), vk::Result>,
) -> CrashCheckOutcome {
    let fault = |stage, result| CrashCheckOutcome::Fault { stage, result };

    if let Err(e) = drain() {
        return fault(CrashCheckStage::Drain, e);
    }
    if let Err(e) = submit() {
        return fault(CrashCheckStage::CanarySubmit, e);
    }
    match wait() {
        Ok(FenceStatus::Signaled) => {}
        Ok(FenceStatus::Timeout) => return CrashCheckOutcome::Timeout,
        Err(e) => {
            return fault(
                CrashCheckStage::CanaryWait,
                e.vk_result().unwrap_or(vk::Result::ERROR_UNKNOWN),
            )
        }
    }
    match final_drain() {
        Ok(()) => CrashCheckOutcome::NoFaultDetected,
        Err(e) => fault(CrashCheckStage::FinalDrain, e),
    }
}

/// Runs `workload` against `ctx`, then submits an empty canary command buffer
/// on the default queue and waits for it.
///
/// Setup and workload failures are returned as errors. Anything the device
/// reports once the workload has been submitted is folded into the outcome.
pub fn run_with_crash_check<F>(ctx: &VulkanContext, workload: F) -> Result<CrashCheckOutcome>
where
    F: FnOnce(&VulkanContext) -> Result<()>,
{
    let device = ctx.get_single_device();
    let queue = device.queue()?;

    let canary = allocate_command_buffer(&device, vk::CommandBufferLevel::PRIMARY, None)?;
    device.set_name(canary, "Hang/crash detection CommandBuffer");
    begin_and_end_command_buffer(&device, canary)?;
    let fence = create_fence(&device, "Hang/crash detection Fence")?;

    workload(ctx)?;

    let raw = device.raw();
    let canaries = [canary];
    let outcome = evaluate_canary(
        || {
            info!("Waiting for idle...");
            unsafe { raw.queue_wait_idle(queue) }
        },
        || {
            info!("Submit empty command buffer...");
            let submit = vk::SubmitInfo::builder().command_buffers(&canaries).build();
            unsafe { raw.queue_submit(queue, &[submit], fence) }
        },
        || wait_for_fence(&device, fence, CANARY_FENCE_TIMEOUT),
        || {
            info!("[NOT REACHABLE(if crash/hang)] Waiting for idle...");
            unsafe { raw.queue_wait_idle(queue) }
        },
    );
    Ok(outcome)
}
