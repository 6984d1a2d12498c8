use std::ffi::CString;
use std::str::FromStr;
use std::time::Duration;

use ash::vk;
#[cfg(feature = "hcf-serde")]
use serde::{Deserialize, Serialize};

use super::error::GPUError;
use crate::flags::Flags;
use crate::watchdog::DEFAULT_TIMEOUT;

/// Elements in each of the input and output buffers.
pub const NUM_BUFFER_ENTRIES: usize = 256;
/// Size of one buffer element in bytes.
pub const BUFFER_ENTRY_SIZE: usize = std::mem::size_of::<f32>();
/// Byte size of a single buffer (input or output).
pub const BUFFER_SIZE: vk::DeviceSize = (NUM_BUFFER_ENTRIES * BUFFER_ENTRY_SIZE) as vk::DeviceSize;
/// The input and output buffers share one allocation.
pub const NUM_BUFFERS: usize = 2;
pub const MEMORY_SIZE: vk::DeviceSize = NUM_BUFFERS as vk::DeviceSize * BUFFER_SIZE;

pub const APPLICATION_NAME: &str = "Halt And Catch Fire";
pub const ENGINE_NAME: &str = "halt_and_catch_fire";

#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "hcf-serde", derive(Serialize, Deserialize))]
pub enum QueueType {
    Undefined,
    #[default]
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    /// Parses an optional flag value. Absent or empty text yields `default`.
    pub fn from_flag(value: Option<&str>, default: QueueType) -> Result<QueueType, GPUError> {
        match value {
            None | Some("") => Ok(default),
            Some(s) => s.parse(),
        }
    }

    /// Whether a queue family with `flags` can serve this queue type.
    pub fn accepts(self, flags: vk::QueueFlags) -> bool {
        match self {
            QueueType::Compute => {
                flags.contains(vk::QueueFlags::COMPUTE) && !flags.contains(vk::QueueFlags::GRAPHICS)
            }
            QueueType::Transfer => {
                flags.contains(vk::QueueFlags::TRANSFER)
                    && !flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            }
            QueueType::Graphics | QueueType::Undefined => flags.contains(vk::QueueFlags::GRAPHICS),
        }
    }
}

impl FromStr for QueueType {
    type Err = GPUError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "graphics" => Ok(QueueType::Graphics),
            "compute" => Ok(QueueType::Compute),
            "transfer" => Ok(QueueType::Transfer),
            _ => Err(GPUError::UnknownQueueType(s.to_string())),
        }
    }
}

/// How the input half of the I/O allocation is filled.
#[repr(C)]
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "hcf-serde", derive(Serialize, Deserialize))]
pub enum BufferInitialization {
    /// Leave the memory unmapped and untouched.
    None,
    /// Ascending floats `2 + 2i`.
    #[default]
    Default,
    /// Every element `-1.0`; an invalid index for the out-of-bounds kernel.
    MinusOne,
    /// Every element the integer 65535.
    SixtyFourK,
    /// Input left as allocated, output zeroed; transfer usage on both buffers.
    Transfer,
}

impl BufferInitialization {
    pub fn input_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferInitialization::Transfer => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC
            }
            _ => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }

    pub fn output_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferInitialization::Transfer => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            _ => vk::BufferUsageFlags::STORAGE_BUFFER,
        }
    }
}

/// Options shared by every run, resolved once from the command line.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    /// Queue type used when a device is created without an explicit list.
    pub queue: QueueType,
    /// Record through a secondary command buffer.
    pub secondary: bool,
    /// Attach debug names and install a validation messenger.
    pub debug_utils: bool,
    pub watchdog_timeout: Duration,
    pub instance_extensions: Vec<CString>,
    pub instance_layers: Vec<CString>,
    pub api_version: u32,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            queue: QueueType::Graphics,
            secondary: false,
            debug_utils: false,
            watchdog_timeout: DEFAULT_TIMEOUT,
            instance_extensions: Vec::new(),
            instance_layers: Vec::new(),
            api_version: vk::API_VERSION_1_0,
        }
    }
}

impl ContextInfo {
    /// Resolves the common flags. `--watchdog_ms` is honoured when declared.
    pub fn from_flags(flags: &Flags) -> Result<Self, GPUError> {
        let mut info = ContextInfo {
            queue: QueueType::from_flag(flags.get("--queue"), QueueType::Graphics)?,
            secondary: flags.is_set("--secondary"),
            debug_utils: flags.is_set("--debug_utils"),
            ..Default::default()
        };

        if let Some(ms) = flags.try_get("--watchdog_ms") {
            info.watchdog_timeout = parse_watchdog_timeout(ms)?;
        }
        if let Some(version) = flags.try_get("--api_version") {
            info.api_version = parse_api_version(version)?;
        }
        if let Some(list) = flags.try_get("--instance_extensions") {
            info.instance_extensions = parse_name_list(list)?;
        }
        if let Some(list) = flags.try_get("--instance_layers") {
            info.instance_layers = parse_name_list(list)?;
        }

        Ok(info)
    }
}

/// Milliseconds, as a plain unsigned integer.
pub fn parse_watchdog_timeout(value: &str) -> Result<Duration, GPUError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| GPUError::InvalidWatchdogTimeout(value.to_string()))
}

/// Accepts "1.0" through "1.3".
pub fn parse_api_version(value: &str) -> Result<u32, GPUError> {
    match value {
        "1.0" => Ok(vk::API_VERSION_1_0),
        "1.1" => Ok(vk::API_VERSION_1_1),
        "1.2" => Ok(vk::API_VERSION_1_2),
        "1.3" => Ok(vk::API_VERSION_1_3),
        other => Err(GPUError::UnknownApiVersion(other.to_string())),
    }
}

/// Splits a comma separated list of extension or layer names.
pub fn parse_name_list(value: &str) -> Result<Vec<CString>, GPUError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| CString::new(name).map_err(|_| GPUError::InvalidName(name.to_string())))
        .collect()
}
