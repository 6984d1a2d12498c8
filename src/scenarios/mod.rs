//! The fault scenarios.
//!
//! Each scenario is a row in one table: the device it needs ([`Setup`]) and
//! a [`Workload`]. Most workloads run on a single prepared device under
//! [`run_with_crash_check`]; the few that juggle several devices or
//! contexts build their own.

use std::ffi::CStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ash::extensions::khr::TimelineSemaphore;
use ash::vk;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::gpu::{
    init_vulkan, run_with_crash_check, BufferInitialization, ContextInfo, CrashCheckOutcome,
    DeviceInfo, GPUError, QueueType, VulkanContext, VulkanDevice,
};
use crate::watchdog::Watchdog;

pub mod bind_sparse;
mod crash;
mod host_event;
mod infinite_loop;
mod load_shader;
mod markers;
mod timeline;

pub use bind_sparse::{LedgerError, SemaphoreLedger, SemaphoreOp, SemaphoreRef, StepKind, SubmissionStep};

/// Storage buffer passthrough, 4x1x1.
pub const READ_WRITE_SHADER: &str = "read_write.comp.spv";
/// Triple nested loop whose trip count comes from the input buffer.
pub const INFINITE_LOOP_SHADER: &str = "infinite_loop.comp.spv";
/// Indexes a small local array with an input-derived index.
pub const INVALID_INDEX_SHADER: &str = "invalid_index.comp.spv";
/// Reads and writes the I/O buffers; run after their memory is freed.
pub const CRASH_COMPUTE_SHADER: &str = "crash_compute.comp.spv";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Unknown scenario: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    /// Instance or device creation failed. The process exits with status 1.
    #[error("initialization failed: {0}")]
    Init(#[source] GPUError),
    /// A required flag was missing or malformed.
    #[error("{0}")]
    Usage(String),
    /// Anything else. Fatal.
    #[error(transparent)]
    Harness(#[from] GPUError),
}

/// `None` for scenarios that do not end with a canary check.
pub type ScenarioResult = Result<Option<CrashCheckOutcome>, RunError>;

/// Everything a scenario reads from the command line.
#[derive(Debug, Clone)]
pub struct ScenarioEnv {
    pub info: ContextInfo,
    /// Directory the fixed shader binaries are loaded from.
    pub shader_dir: PathBuf,
    /// Explicit SPIR-V file, for `load_shader`.
    pub shader: Option<PathBuf>,
}

impl ScenarioEnv {
    pub fn new(info: ContextInfo, shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            info,
            shader_dir: shader_dir.into(),
            shader: None,
        }
    }

    pub fn shader_path(&self, file: &str) -> PathBuf {
        self.shader_dir.join(file)
    }

    pub fn device_info(&self, setup: &Setup) -> DeviceInfo {
        DeviceInfo {
            extensions: setup.extensions.clone(),
            shader: setup.shader.map(|s| self.shader_path(s)),
            queues: setup.queues.clone(),
        }
    }
}

/// The device a scenario runs on.
#[derive(Debug, Clone, Default)]
pub struct Setup {
    /// File name under the shader directory; `None` builds no pipeline.
    pub shader: Option<&'static str>,
    pub extensions: Vec<&'static CStr>,
    pub queues: Option<Vec<QueueType>>,
    /// Allocates the I/O pair with this policy before the workload runs. The
    /// descriptor set is written too when a shader is loaded.
    pub buffers: Option<BufferInitialization>,
}

impl Setup {
    fn compute(shader: &'static str, buffers: BufferInitialization) -> Self {
        Self {
            shader: Some(shader),
            buffers: Some(buffers),
            ..Default::default()
        }
    }

    fn with_extension(mut self, extension: &'static CStr) -> Self {
        self.extensions.push(extension);
        self
    }

    fn with_queues(mut self, queues: Vec<QueueType>) -> Self {
        self.queues = Some(queues);
        self
    }
}

pub type CheckedWorkload = fn(&VulkanContext) -> crate::gpu::Result<()>;
pub type StandaloneWorkload = fn(&ScenarioEnv, &Setup) -> ScenarioResult;

#[derive(Clone, Copy)]
pub enum Workload {
    /// Runs on one prepared device under the crash check.
    Checked(CheckedWorkload),
    /// Creates its own contexts and devices.
    Standalone(StandaloneWorkload),
}

macro_rules! scenarios {
    ($($variant:ident => $name:literal,)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Scenario {
            $($variant,)+
        }

        impl Scenario {
            pub const ALL: &'static [Scenario] = &[$(Scenario::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Scenario::$variant => $name,)+
                }
            }
        }
    };
}

scenarios! {
    HangHostEvent => "hang_host_event",
    HangHostEventReset => "hang_host_event_reset",
    HangHostEventMultiDevice => "hang_host_event_multi_device",
    HangHostEventMultiContext => "hang_host_event_multi_context",
    HangInfiniteLoop => "hang_infinite_loop",
    HangInfiniteLoopMultiQueue => "hang_infinite_loop_multi_queue",
    HangTimelineSemaphoreGpu => "hang_timeline_semaphore_gpu",
    HangTimelineSemaphoreHost => "hang_timeline_semaphore_host",
    HangBinaryTimelineSemaphoreGpu => "hang_binary_timeline_semaphore_gpu",
    HangBinaryTimelineSemaphoreGpuBindSparse => "hang_binary_timeline_semaphore_gpu_bind_sparse",
    InvalidLocalArrayIndex => "invalid_local_array_index",
    CrashShaderFreedMemory => "crash_shader_freed_memory",
    CrashCopy => "crash_copy",
    BufferMarker => "buffer_marker",
    LoadShader => "load_shader",
}

impl Scenario {
    pub fn setup(self) -> Setup {
        use BufferInitialization as Init;
        match self {
            Scenario::HangHostEvent
            | Scenario::HangHostEventReset
            | Scenario::HangHostEventMultiDevice
            | Scenario::HangHostEventMultiContext => Setup::compute(READ_WRITE_SHADER, Init::Default),
            Scenario::HangInfiniteLoop => Setup::compute(INFINITE_LOOP_SHADER, Init::SixtyFourK),
            Scenario::HangInfiniteLoopMultiQueue => {
                Setup::compute(INFINITE_LOOP_SHADER, Init::SixtyFourK).with_queues(vec![
                    QueueType::Graphics,
                    QueueType::Compute,
                    QueueType::Compute,
                ])
            }
            Scenario::HangTimelineSemaphoreGpu
            | Scenario::HangTimelineSemaphoreHost
            | Scenario::HangBinaryTimelineSemaphoreGpu
            | Scenario::HangBinaryTimelineSemaphoreGpuBindSparse => {
                Setup::compute(READ_WRITE_SHADER, Init::Default)
                    .with_extension(TimelineSemaphore::name())
            }
            Scenario::InvalidLocalArrayIndex => Setup::compute(INVALID_INDEX_SHADER, Init::MinusOne),
            Scenario::CrashShaderFreedMemory => Setup::compute(CRASH_COMPUTE_SHADER, Init::SixtyFourK),
            Scenario::CrashCopy => Setup {
                buffers: Some(Init::Transfer),
                ..Default::default()
            },
            Scenario::BufferMarker => Setup::compute(READ_WRITE_SHADER, Init::Default)
                .with_extension(vk::AmdBufferMarkerFn::name()),
            Scenario::LoadShader => Setup::default(),
        }
    }

    pub fn workload(self) -> Workload {
        use Workload::{Checked, Standalone};
        match self {
            Scenario::HangHostEvent => Checked(host_event::hang),
            Scenario::HangHostEventReset => Checked(host_event::hang_after_pool_reset),
            Scenario::HangHostEventMultiDevice => Standalone(host_event::multi_device),
            Scenario::HangHostEventMultiContext => Standalone(host_event::multi_context),
            Scenario::HangInfiniteLoop => Checked(infinite_loop::hang),
            Scenario::HangInfiniteLoopMultiQueue => Checked(infinite_loop::hang_multi_queue),
            Scenario::HangTimelineSemaphoreGpu => Checked(timeline::hang_gpu),
            Scenario::HangTimelineSemaphoreHost => Checked(timeline::hang_host),
            Scenario::HangBinaryTimelineSemaphoreGpu => Checked(timeline::hang_binary_and_timeline),
            Scenario::HangBinaryTimelineSemaphoreGpuBindSparse => Checked(bind_sparse::hang),
            Scenario::InvalidLocalArrayIndex => Checked(crash::invalid_local_array_index),
            Scenario::CrashShaderFreedMemory => Checked(crash::shader_freed_memory),
            Scenario::CrashCopy => Checked(crash::copy_freed_memory),
            Scenario::BufferMarker => Standalone(markers::run),
            Scenario::LoadShader => Standalone(load_shader::run),
        }
    }

    /// Names of every scenario, one per line.
    pub fn listing() -> String {
        Self::ALL
            .iter()
            .map(|s| format!("  {}\n", s.name()))
            .collect()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| ScenarioError::Unknown(s.to_string()))
    }
}

/// Allocates what `setup` asks for on an existing device.
pub fn prepare_resources(device: &VulkanDevice, setup: &Setup) -> crate::gpu::Result<()> {
    if let Some(init) = setup.buffers {
        device.allocate_input_output_buffers(init)?;
        if setup.shader.is_some() {
            device.create_descriptor_sets()?;
        }
    }
    Ok(())
}

/// Creates a context with one device built for `setup`, resources included.
pub fn prepare(env: &ScenarioEnv, setup: &Setup) -> Result<VulkanContext, RunError> {
    let ctx = init_vulkan(&env.info, &env.device_info(setup)).map_err(RunError::Init)?;
    prepare_resources(&ctx.get_single_device(), setup)?;
    Ok(ctx)
}

/// Prepares a device for `setup` and runs `workload` on it under the crash check.
pub fn run_checked(env: &ScenarioEnv, setup: &Setup, workload: CheckedWorkload) -> ScenarioResult {
    let ctx = prepare(env, setup)?;
    info!("starting the test...");
    Ok(Some(run_with_crash_check(&ctx, workload)?))
}

pub fn execute(scenario: Scenario, env: &ScenarioEnv) -> ScenarioResult {
    let setup = scenario.setup();
    match scenario.workload() {
        Workload::Checked(workload) => run_checked(env, &setup, workload),
        Workload::Standalone(run) => run(env, &setup),
    }
}

fn report(outcome: CrashCheckOutcome) {
    match outcome {
        CrashCheckOutcome::NoFaultDetected => {
            info!("Canary completed: no crash or hang detected.")
        }
        CrashCheckOutcome::Timeout => warn!("Canary fence timed out: hang detected."),
        CrashCheckOutcome::Fault { stage, result } => {
            warn!("Fault detected at {:?}: {}", stage, result)
        }
    }
}

/// Runs one scenario under the watchdog and returns the process exit status.
///
/// Any canary outcome is 0, setup failures are 1 and harness failures abort.
/// Expiry of the watchdog or a failed validated call ends the process from
/// inside with status 0.
pub fn run(scenario: Scenario, env: &ScenarioEnv) -> i32 {
    let mut watchdog = Watchdog::new(env.info.watchdog_timeout);
    watchdog.arm();

    info!("Running {}", scenario);
    let status = match execute(scenario, env) {
        Ok(Some(outcome)) => {
            report(outcome);
            0
        }
        Ok(None) => 0,
        Err(RunError::Init(e)) => {
            error!("{}", e);
            1
        }
        Err(RunError::Usage(message)) => {
            error!("{}", message);
            1
        }
        Err(RunError::Harness(e)) => crate::vk_check!(Err::<i32, _>(e)),
    };

    watchdog.disarm();
    status
}

/// Shader directory default when `--shader_dir` is absent.
pub fn default_shader_dir() -> &'static Path {
    Path::new(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>().unwrap(), *scenario);
        }
        assert_eq!(Scenario::ALL.len(), 15);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "hang_forever".parse::<Scenario>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown scenario: hang_forever");
    }

    #[test]
    fn timeline_scenarios_request_the_extension() {
        for scenario in [
            Scenario::HangTimelineSemaphoreGpu,
            Scenario::HangTimelineSemaphoreHost,
            Scenario::HangBinaryTimelineSemaphoreGpu,
            Scenario::HangBinaryTimelineSemaphoreGpuBindSparse,
        ] {
            assert!(scenario.setup().extensions.contains(&TimelineSemaphore::name()));
        }
        assert!(Scenario::HangHostEvent.setup().extensions.is_empty());
    }

    #[test]
    fn setups_match_their_kernels() {
        let copy = Scenario::CrashCopy.setup();
        assert_eq!(copy.shader, None);
        assert_eq!(copy.buffers, Some(BufferInitialization::Transfer));

        let oob = Scenario::InvalidLocalArrayIndex.setup();
        assert_eq!(oob.shader, Some(INVALID_INDEX_SHADER));
        assert_eq!(oob.buffers, Some(BufferInitialization::MinusOne));

        let multi = Scenario::HangInfiniteLoopMultiQueue.setup();
        assert_eq!(
            multi.queues.as_deref(),
            Some(&[QueueType::Graphics, QueueType::Compute, QueueType::Compute][..])
        );
    }

    #[test]
    fn device_info_resolves_shader_dir() {
        let env = ScenarioEnv::new(ContextInfo::default(), "/opt/hcf/shaders");
        let request = env.device_info(&Scenario::HangInfiniteLoop.setup());
        assert_eq!(
            request.shader.as_deref(),
            Some(Path::new("/opt/hcf/shaders/infinite_loop.comp.spv"))
        );
        assert!(request.queues.is_none());
    }

    #[test]
    fn listing_has_every_scenario() {
        let listing = Scenario::listing();
        assert_eq!(listing.lines().count(), Scenario::ALL.len());
        assert!(listing.contains("  crash_copy\n"));
    }
}
