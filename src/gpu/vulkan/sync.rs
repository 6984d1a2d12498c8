use std::time::Duration;

use ash::prelude::VkResult;
use ash::vk;
#[cfg(feature = "hcf-serde")]
use serde::{Deserialize, Serialize};
use tracing::info;

use super::device::OwnedObject;
use super::{Result, VulkanDevice};

/// Upper bound for every fence wait issued by the harness.
pub const FENCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "hcf-serde", derive(Serialize, Deserialize))]
pub enum SemaphoreType {
    #[default]
    Binary,
    Timeline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    /// The wait hit its deadline; a valid outcome, not an error.
    Timeout,
}

/// Creates `count` semaphores of one type. Timeline semaphores all start at
/// `initial_value`; binary ones ignore it and start unsignaled.
pub fn create_semaphores(
    device: &VulkanDevice,
    count: usize,
    ty: SemaphoreType,
    initial_value: u64,
) -> Result<Vec<vk::Semaphore>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let semaphore = match ty {
            SemaphoreType::Binary => unsafe {
                device
                    .raw()
                    .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)?
            },
            SemaphoreType::Timeline => {
                let mut type_info = vk::SemaphoreTypeCreateInfo {
                    semaphore_type: vk::SemaphoreType::TIMELINE,
                    initial_value,
                    ..Default::default()
                };
                let ci = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
                unsafe { device.raw().create_semaphore(&ci, None)? }
            }
        };
        device.track(OwnedObject::Semaphore(semaphore));
        out.push(semaphore);
    }
    Ok(out)
}

pub fn create_binary_semaphores(device: &VulkanDevice, count: usize) -> Result<Vec<vk::Semaphore>> {
    create_semaphores(device, count, SemaphoreType::Binary, 0)
}

pub fn create_timeline_semaphores(
    device: &VulkanDevice,
    count: usize,
    initial_value: u64,
) -> Result<Vec<vk::Semaphore>> {
    create_semaphores(device, count, SemaphoreType::Timeline, initial_value)
}

/// A host-settable event. Nothing in the harness ever sets it.
pub fn create_event(device: &VulkanDevice, name: &str) -> Result<vk::Event> {
    let event = unsafe {
        device
            .raw()
            .create_event(&vk::EventCreateInfo::builder(), None)?
    };
    device.track(OwnedObject::Event(event));
    device.set_name(event, name);
    Ok(event)
}

/// An unsignaled fence.
pub fn create_fence(device: &VulkanDevice, name: &str) -> Result<vk::Fence> {
    let fence = unsafe {
        device
            .raw()
            .create_fence(&vk::FenceCreateInfo::builder(), None)?
    };
    device.track(OwnedObject::Fence(fence));
    device.set_name(fence, name);
    Ok(fence)
}

fn fence_status(result: VkResult<()>) -> Result<FenceStatus> {
    match result {
        Ok(()) => Ok(FenceStatus::Signaled),
        Err(vk::Result::TIMEOUT) => {
            info!("TIMEOUT");
            Ok(FenceStatus::Timeout)
        }
        Err(e) => Err(e.into()),
    }
}

/// Waits once, with no retry. A timeout is logged and returned as a status.
pub fn wait_for_fence(device: &VulkanDevice, fence: vk::Fence, timeout: Duration) -> Result<FenceStatus> {
    let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    fence_status(unsafe { device.raw().wait_for_fences(&[fence], true, timeout_ns) })
}

pub fn reset_fence(device: &VulkanDevice, fence: vk::Fence) -> Result<()> {
    unsafe { device.raw().reset_fences(&[fence])? };
    Ok(())
}

/// Describes one submission of `command_buffer`.
///
/// Wait semaphores pair up with stage masks by position, so both lists must
/// have the same length; a mismatch panics. Timeline values ride along in
/// `timeline`.
pub fn create_submit_info<'a>(
    command_buffer: &'a vk::CommandBuffer,
    wait_semaphores: Option<&'a [vk::Semaphore]>,
    wait_dst_stage_masks: Option<&'a [vk::PipelineStageFlags]>,
    signal_semaphores: Option<&'a [vk::Semaphore]>,
    timeline: Option<&'a mut vk::TimelineSemaphoreSubmitInfoBuilder<'_>>,
) -> vk::SubmitInfoBuilder<'a> {
    assert_eq!(
        wait_semaphores.map_or(0, <[_]>::len),
        wait_dst_stage_masks.map_or(0, <[_]>::len),
        "wait semaphores and wait stage masks differ in length"
    );

    let mut info = vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(command_buffer));
    if let (Some(waits), Some(masks)) = (wait_semaphores, wait_dst_stage_masks) {
        info = info.wait_semaphores(waits).wait_dst_stage_mask(masks);
    }
    if let Some(signals) = signal_semaphores {
        info = info.signal_semaphores(signals);
    }
    if let Some(next) = timeline {
        info = info.push_next(next);
    }
    info
}

/// Timeline values for a submission or bind. An absent list means a count of
/// zero. The builder borrows both slices.
pub fn create_timeline_semaphore_submit_info<'a>(
    wait_values: Option<&'a [u64]>,
    signal_values: Option<&'a [u64]>,
) -> vk::TimelineSemaphoreSubmitInfoBuilder<'a> {
    let mut info = vk::TimelineSemaphoreSubmitInfo::builder();
    if let Some(values) = wait_values {
        info = info.wait_semaphore_values(values);
    }
    if let Some(values) = signal_values {
        info = info.signal_semaphore_values(values);
    }
    info
}

/// A sparse bind that binds no memory and only waits on and signals
/// semaphores.
pub fn create_bind_sparse_info<'a>(
    wait_semaphores: Option<&'a [vk::Semaphore]>,
    signal_semaphores: Option<&'a [vk::Semaphore]>,
    timeline: Option<&'a mut vk::TimelineSemaphoreSubmitInfoBuilder<'_>>,
) -> vk::BindSparseInfoBuilder<'a> {
    let mut info = vk::BindSparseInfo::builder();
    if let Some(waits) = wait_semaphores {
        info = info.wait_semaphores(waits);
    }
    if let Some(signals) = signal_semaphores {
        info = info.signal_semaphores(signals);
    }
    if let Some(next) = timeline {
        info = info.push_next(next);
    }
    info
}

pub fn signal_timeline_semaphore(device: &VulkanDevice, semaphore: vk::Semaphore, value: u64) -> Result<()> {
    let info = vk::SemaphoreSignalInfo::builder()
        .semaphore(semaphore)
        .value(value);
    unsafe { device.timeline()?.signal_semaphore(&info)? };
    Ok(())
}

/// Host wait until every semaphore reaches its value. `timeout` is in
/// nanoseconds; `u64::MAX` never times out.
pub fn wait_timeline_semaphores(
    device: &VulkanDevice,
    semaphores: &[vk::Semaphore],
    values: &[u64],
    timeout: u64,
) -> Result<()> {
    let info = vk::SemaphoreWaitInfo::builder()
        .semaphores(semaphores)
        .values(values);
    unsafe { device.timeline()?.wait_semaphores(&info, timeout)? };
    Ok(())
}

pub fn timeline_semaphore_value(device: &VulkanDevice, semaphore: vk::Semaphore) -> Result<u64> {
    Ok(unsafe { device.timeline()?.get_semaphore_counter_value(semaphore)? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn semaphores(n: u64) -> Vec<vk::Semaphore> {
        (1..=n).map(vk::Semaphore::from_raw).collect()
    }

    #[test]
    fn submit_info_zips_waits_and_masks() {
        let cb = vk::CommandBuffer::from_raw(0x10);
        let waits = semaphores(2);
        let masks = [vk::PipelineStageFlags::ALL_GRAPHICS; 2];
        let signals = semaphores(3);
        let info = create_submit_info(&cb, Some(&waits[..]), Some(&masks[..]), Some(&signals[..]), None);

        assert_eq!(info.command_buffer_count, 1);
        assert_eq!(info.wait_semaphore_count, 2);
        assert_eq!(info.signal_semaphore_count, 3);
        assert!(info.p_next.is_null());
    }

    #[test]
    fn submit_info_without_sync() {
        let cb = vk::CommandBuffer::from_raw(0x10);
        let info = create_submit_info(&cb, None, None, None, None);
        assert_eq!(info.wait_semaphore_count, 0);
        assert_eq!(info.signal_semaphore_count, 0);
    }

    #[test]
    #[should_panic(expected = "differ in length")]
    fn submit_info_rejects_mismatched_masks() {
        let cb = vk::CommandBuffer::from_raw(0x10);
        let waits = semaphores(2);
        let masks = [vk::PipelineStageFlags::ALL_GRAPHICS];
        let _ = create_submit_info(&cb, Some(&waits[..]), Some(&masks[..]), None, None);
    }

    #[test]
    #[should_panic(expected = "differ in length")]
    fn submit_info_rejects_waits_without_masks() {
        let cb = vk::CommandBuffer::from_raw(0x10);
        let waits = semaphores(1);
        let _ = create_submit_info(&cb, Some(&waits[..]), None, None, None);
    }

    #[test]
    fn timeline_info_counts() {
        let waits = [1u64, 13];
        let signals = [1u64, 1, 14, 15, 16];
        let info = create_timeline_semaphore_submit_info(Some(&waits[..]), Some(&signals[..]));
        assert_eq!(info.wait_semaphore_value_count, 2);
        assert_eq!(info.signal_semaphore_value_count, 5);

        let empty = create_timeline_semaphore_submit_info(None, None);
        assert_eq!(empty.wait_semaphore_value_count, 0);
        assert_eq!(empty.signal_semaphore_value_count, 0);
    }

    #[test]
    fn timeline_builder_points_at_caller_values() {
        let waits = [7u64];
        let signals = [8u64, 9];
        let info = create_timeline_semaphore_submit_info(Some(&waits[..]), Some(&signals[..]));
        assert_eq!(info.p_wait_semaphore_values, waits.as_ptr());
        assert_eq!(info.p_signal_semaphore_values, signals.as_ptr());
    }

    #[test]
    fn payload_is_chained() {
        let cb = vk::CommandBuffer::from_raw(0x10);
        let signals = semaphores(1);
        let values = [0x20u64];
        let mut timeline = create_timeline_semaphore_submit_info(None, Some(&values[..]));
        let info = create_submit_info(&cb, None, None, Some(&signals[..]), Some(&mut timeline));
        assert!(!info.p_next.is_null());

        let waits = semaphores(2);
        let mut timeline = create_timeline_semaphore_submit_info(Some(&values[..]), None);
        let bind = create_bind_sparse_info(Some(&waits[..]), Some(&signals[..]), Some(&mut timeline));
        assert_eq!(bind.wait_semaphore_count, 2);
        assert_eq!(bind.signal_semaphore_count, 1);
        assert_eq!(bind.buffer_bind_count, 0);
        assert!(!bind.p_next.is_null());
    }

    #[test]
    fn timeout_is_a_status() {
        assert_eq!(fence_status(Ok(())).unwrap(), FenceStatus::Signaled);
        assert_eq!(
            fence_status(Err(vk::Result::TIMEOUT)).unwrap(),
            FenceStatus::Timeout
        );
        let err = fence_status(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }
}
