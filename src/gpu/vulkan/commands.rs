//! Command buffer recording helpers.

use ash::vk;

use super::{create_event, Result, VulkanDevice};

/// Records into one command buffer on behalf of a caller-supplied closure.
pub struct CommandRecorder<'a> {
    device: &'a VulkanDevice,
    cmd_buf: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a VulkanDevice, cmd_buf: vk::CommandBuffer) -> Self {
        Self { device, cmd_buf }
    }

    /// The command buffer being recorded; secondary when routing through one.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd_buf
    }

    pub fn device(&self) -> &'a VulkanDevice {
        self.device
    }

    pub fn bind_compute_pipeline(&mut self) -> Result<()> {
        let pipeline = self.device.pipeline()?;
        unsafe {
            self.device.raw().cmd_bind_pipeline(
                self.cmd_buf,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.raw(),
            );
        }
        Ok(())
    }

    pub fn bind_default_descriptor_set(&mut self) -> Result<()> {
        let pipeline = self.device.pipeline()?;
        let set = self
            .device
            .descriptor_set()
            .ok_or(super::GPUError::BuffersNotAllocated)?;
        unsafe {
            self.device.raw().cmd_bind_descriptor_sets(
                self.cmd_buf,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout(),
                0,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.device.raw().cmd_dispatch(self.cmd_buf, x, y, z) };
    }

    /// Binds the default pipeline and descriptor set and dispatches one
    /// workgroup `count` times.
    pub fn record_dispatch(&mut self, count: usize) -> Result<()> {
        self.bind_compute_pipeline()?;
        self.bind_default_descriptor_set()?;
        for _ in 0..count {
            self.dispatch(1, 1, 1);
        }
        Ok(())
    }

    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer(self.cmd_buf, src, dst, regions)
        };
    }

    /// Records a device wait on a fresh event that nothing will ever set.
    /// Work recorded after this point can only run if the device is reset.
    pub fn wait_on_event_that_never_signals(&mut self) -> Result<vk::Event> {
        let event = create_event(self.device, "Never-signaled Event")?;
        unsafe {
            self.device.raw().cmd_wait_events(
                self.cmd_buf,
                &[event],
                vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                &[],
                &[],
                &[],
            );
        }
        Ok(event)
    }
}

/// Where and under what name to record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordInfo<'a> {
    /// Base name; buffers get " Primary Command Buffer" or
    /// " Secondary Command Buffer" appended. `None` leaves them unnamed.
    pub debug_name: Option<&'a str>,
    /// Index into the device's command pools; `None` is the default pool.
    pub pool: Option<usize>,
}

impl<'a> RecordInfo<'a> {
    pub fn named(debug_name: &'a str) -> Self {
        Self {
            debug_name: Some(debug_name),
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: usize) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// The buffers produced by [`create_and_record_command_buffers`]. Submit
/// `primary`; `secondary` is only set when recording went through one.
#[derive(Debug, Clone, Copy)]
pub struct RecordedCommands {
    pub primary: vk::CommandBuffer,
    pub secondary: Option<vk::CommandBuffer>,
}

pub fn allocate_command_buffer(
    device: &VulkanDevice,
    level: vk::CommandBufferLevel,
    pool: Option<usize>,
) -> Result<vk::CommandBuffer> {
    device.command_pool_at(pool.unwrap_or(0))?.alloc(level)
}

/// Begins `cmd_buf`, lets `record` fill it, and ends it.
pub fn record_command_buffer<F>(
    device: &VulkanDevice,
    cmd_buf: vk::CommandBuffer,
    begin_info: &vk::CommandBufferBeginInfo,
    record: F,
) -> Result<()>
where
    F: FnOnce(&mut CommandRecorder) -> Result<()>,
{
    unsafe { device.raw().begin_command_buffer(cmd_buf, begin_info)? };
    let mut recorder = CommandRecorder::new(device, cmd_buf);
    record(&mut recorder)?;
    unsafe { device.raw().end_command_buffer(cmd_buf)? };
    Ok(())
}

/// Records an empty command buffer.
pub fn begin_and_end_command_buffer(device: &VulkanDevice, cmd_buf: vk::CommandBuffer) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    record_command_buffer(device, cmd_buf, &begin_info, |_| Ok(()))
}

/// Allocates and records a one-time-submit primary command buffer.
///
/// When the device routes through secondaries, `record` fills a secondary
/// buffer instead and the primary only executes it, so every workload runs
/// the same way in both modes.
pub fn create_and_record_command_buffers<F>(
    device: &VulkanDevice,
    info: &RecordInfo,
    record: F,
) -> Result<RecordedCommands>
where
    F: FnOnce(&mut CommandRecorder) -> Result<()>,
{
    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let primary = allocate_command_buffer(device, vk::CommandBufferLevel::PRIMARY, info.pool)?;
    if let Some(name) = info.debug_name {
        device.set_name(primary, &format!("{} Primary Command Buffer", name));
    }

    if !device.uses_secondary() {
        record_command_buffer(device, primary, &begin_info, record)?;
        return Ok(RecordedCommands {
            primary,
            secondary: None,
        });
    }

    let secondary = allocate_command_buffer(device, vk::CommandBufferLevel::SECONDARY, info.pool)?;
    if let Some(name) = info.debug_name {
        device.set_name(secondary, &format!("{} Secondary Command Buffer", name));
    }

    let inheritance = vk::CommandBufferInheritanceInfo::builder();
    let secondary_begin = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        .inheritance_info(&inheritance);
    record_command_buffer(device, secondary, &secondary_begin, record)?;

    record_command_buffer(device, primary, &begin_info, |rec| {
        unsafe {
            device
                .raw()
                .cmd_execute_commands(rec.raw(), &[secondary])
        };
        Ok(())
    })?;

    Ok(RecordedCommands {
        primary,
        secondary: Some(secondary),
    })
}
