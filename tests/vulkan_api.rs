mod common;

use std::time::Duration;

use ash::extensions::khr::TimelineSemaphore;
use ash::vk;
use common::{compiled_shader, default_context, headless};
use hcf::*;
use serial_test::serial;

fn read_words(device: &VulkanDevice, pair: &BufferPair) -> Vec<u32> {
    unsafe {
        let ptr = device
            .raw()
            .map_memory(pair.memory, 0, MEMORY_SIZE, vk::MemoryMapFlags::empty())
            .unwrap();
        let words = std::slice::from_raw_parts(ptr as *const u32, NUM_BUFFERS * NUM_BUFFER_ENTRIES).to_vec();
        device.raw().unmap_memory(pair.memory);
        words
    }
}

fn copy_input_to_output(info: &ContextInfo) {
    let Some(ctx) = headless(info, &DeviceInfo::default()) else {
        return;
    };
    let device = ctx.get_single_device();
    let pair = device
        .allocate_input_output_buffers(BufferInitialization::Transfer)
        .unwrap();

    let recorded = create_and_record_command_buffers(&device, &RecordInfo::named("Copy"), |rec| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: BUFFER_SIZE,
        };
        rec.copy_buffer(pair.input, pair.output, &[region]);
        Ok(())
    })
    .unwrap();
    assert_eq!(recorded.secondary.is_some(), info.secondary);

    let queue = device.queue().unwrap();
    let submit = create_submit_info(&recorded.primary, None, None, None, None).build();
    unsafe {
        device.raw().queue_submit(queue, &[submit], vk::Fence::null()).unwrap();
        device.raw().queue_wait_idle(queue).unwrap();
    }

    let words = read_words(&device, &pair);
    let (input, output) = words.split_at(NUM_BUFFER_ENTRIES);
    // Transfer leaves the source as allocated, so only equality is known.
    assert_eq!(input, output);
}

#[test]
#[serial]
fn test_context() {
    let Ok(ctx) = VulkanContext::new(&ContextInfo::default()) else {
        return;
    };
    assert_eq!(ctx.device_count(), 0);
    assert!(ctx.physical_device().is_none());
}

#[test]
#[serial]
fn test_single_device() {
    let Some(ctx) = default_context() else {
        return;
    };
    assert_eq!(ctx.device_count(), 1);
    assert!(ctx.physical_device().is_some());

    let device = ctx.get_single_device();
    assert_eq!(device.queues().len(), 1);
    assert_eq!(device.command_pools().len(), 1);
    assert!(device.queue().is_ok());
    assert!(matches!(
        device.queue_at(1),
        Err(GPUError::QueueIndexOutOfRange { index: 1, count: 1 })
    ));
    assert!(matches!(device.pipeline(), Err(GPUError::MissingComputePipeline)));
    assert!(matches!(
        device.timeline(),
        Err(GPUError::ExtensionNotEnabled(_))
    ));
}

#[test]
#[serial]
fn test_buffers_allocate_once() {
    let Some(ctx) = default_context() else {
        return;
    };
    let device = ctx.get_single_device();
    assert!(matches!(device.buffers(), Err(GPUError::BuffersNotAllocated)));

    let pair = device
        .allocate_input_output_buffers(BufferInitialization::Default)
        .unwrap();
    assert_eq!(device.buffers().unwrap().input, pair.input);
    assert!(matches!(
        device.allocate_input_output_buffers(BufferInitialization::Default),
        Err(GPUError::AlreadyInitialized(_))
    ));

    let words = read_words(&device, &pair);
    assert_eq!(f32::from_bits(words[0]), 2.0);
    assert!(words[NUM_BUFFER_ENTRIES..].iter().all(|w| *w == 0));

    device.release_input_output_memory().unwrap();
    // Handles stay visible so freed-memory workloads can still record them.
    assert_eq!(device.buffers().unwrap().output, pair.output);
}

#[test]
#[serial]
fn test_descriptor_sets_need_pipeline() {
    let Some(ctx) = default_context() else {
        return;
    };
    let device = ctx.get_single_device();
    device
        .allocate_input_output_buffers(BufferInitialization::Default)
        .unwrap();
    assert!(matches!(
        device.create_descriptor_sets(),
        Err(GPUError::MissingComputePipeline)
    ));
    assert!(device.descriptor_set().is_none());
}

#[test]
#[serial]
fn test_pipeline_and_descriptor_sets() {
    let Some(shader) = compiled_shader("read_write.comp.spv") else {
        return;
    };
    let Some(ctx) = headless(&ContextInfo::default(), &DeviceInfo::with_shader(shader)) else {
        return;
    };
    let device = ctx.get_single_device();
    assert!(device.pipeline().is_ok());
    assert!(matches!(
        device.create_descriptor_sets(),
        Err(GPUError::BuffersNotAllocated)
    ));

    device
        .allocate_input_output_buffers(BufferInitialization::Default)
        .unwrap();
    let set = device.create_descriptor_sets().unwrap();
    assert_eq!(device.descriptor_set(), Some(set));
    assert!(matches!(
        device.create_descriptor_sets(),
        Err(GPUError::AlreadyInitialized(_))
    ));

    let outcome = run_with_crash_check(&ctx, |ctx| {
        let device = ctx.get_single_device();
        let recorded = create_and_record_command_buffers(
            &device,
            &RecordInfo::named("Dispatch"),
            |rec| rec.record_dispatch(1),
        )?;
        let submit = create_submit_info(&recorded.primary, None, None, None, None).build();
        unsafe {
            device
                .raw()
                .queue_submit(device.queue()?, &[submit], vk::Fence::null())?
        };
        Ok(())
    })
    .unwrap();
    assert_eq!(outcome, CrashCheckOutcome::NoFaultDetected);
}

#[test]
#[serial]
fn test_corrupt_shader_fails_device_init() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.comp.spv");
    std::fs::write(&path, [0x03u8, 0x02, 0x23]).unwrap();

    let Ok(ctx) = VulkanContext::new(&ContextInfo::default()) else {
        return;
    };
    match ctx.init_device(&DeviceInfo::with_shader(&path)) {
        Err(GPUError::InvalidShaderCode(_)) => {}
        Err(GPUError::NoPhysicalDevice) | Err(GPUError::NoMatchingQueueFamily(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(ctx.device_count(), 0);
}

#[test]
#[serial]
fn test_multiple_devices() {
    let Some(ctx) = default_context() else {
        return;
    };
    let first = ctx.get_single_device().handle();
    let second = ctx.init_device(&DeviceInfo::default()).unwrap();
    assert_eq!(ctx.device_count(), 2);
    assert_ne!(first, second);
    assert!(ctx.get_device(second).is_some());

    ctx.delete_device(second);
    assert_eq!(ctx.device_count(), 1);
    assert!(ctx.get_device(second).is_none());
    assert_eq!(ctx.get_single_device().handle(), first);
}

#[test]
#[serial]
fn test_sync_objects() {
    let Some(ctx) = default_context() else {
        return;
    };
    let device = ctx.get_single_device();

    let semaphores = create_binary_semaphores(&device, 3).unwrap();
    assert_eq!(semaphores.len(), 3);
    assert!(create_event(&device, "Event").is_ok());

    let fence = create_fence(&device, "Fence").unwrap();
    assert_eq!(
        wait_for_fence(&device, fence, Duration::from_millis(1)).unwrap(),
        FenceStatus::Timeout
    );

    let cmd_buf = allocate_command_buffer(&device, vk::CommandBufferLevel::PRIMARY, None).unwrap();
    begin_and_end_command_buffer(&device, cmd_buf).unwrap();
    let submit = create_submit_info(&cmd_buf, None, None, None, None).build();
    unsafe {
        device
            .raw()
            .queue_submit(device.queue().unwrap(), &[submit], fence)
            .unwrap();
    }
    assert_eq!(
        wait_for_fence(&device, fence, FENCE_TIMEOUT).unwrap(),
        FenceStatus::Signaled
    );
    reset_fence(&device, fence).unwrap();
    assert_eq!(
        wait_for_fence(&device, fence, Duration::from_millis(1)).unwrap(),
        FenceStatus::Timeout
    );
}

#[test]
#[serial]
fn test_timeline_semaphores() {
    let info = ContextInfo {
        api_version: vk::API_VERSION_1_2,
        ..Default::default()
    };
    let request = DeviceInfo {
        extensions: vec![TimelineSemaphore::name()],
        ..Default::default()
    };
    let Some(ctx) = headless(&info, &request) else {
        return;
    };
    let device = ctx.get_single_device();

    let timelines = create_timeline_semaphores(&device, 2, 10).unwrap();
    assert_eq!(timeline_semaphore_value(&device, timelines[0]).unwrap(), 10);

    signal_timeline_semaphore(&device, timelines[0], 20).unwrap();
    assert_eq!(timeline_semaphore_value(&device, timelines[0]).unwrap(), 20);
    wait_timeline_semaphores(&device, &timelines[..1], &[20], 0).unwrap();

    assert!(matches!(
        wait_timeline_semaphores(&device, &timelines[1..], &[20], 1_000),
        Err(GPUError::VulkanError(_))
    ));
}

#[test]
#[serial]
fn test_record_through_primary() {
    copy_input_to_output(&ContextInfo::default());
}

#[test]
#[serial]
fn test_record_through_secondary() {
    copy_input_to_output(&ContextInfo {
        secondary: true,
        ..Default::default()
    });
}

#[test]
#[serial]
fn test_crash_check_on_healthy_device() {
    let Some(ctx) = default_context() else {
        return;
    };
    let outcome = run_with_crash_check(&ctx, |_| Ok(())).unwrap();
    assert_eq!(outcome, CrashCheckOutcome::NoFaultDetected);
    assert!(!outcome.is_detected());
}

#[test]
#[serial]
fn test_crash_check_passes_workload_errors_through() {
    let Some(ctx) = default_context() else {
        return;
    };
    let err = run_with_crash_check(&ctx, |ctx| {
        ctx.get_single_device().buffers()?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, GPUError::BuffersNotAllocated));
}
