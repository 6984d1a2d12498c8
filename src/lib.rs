//! Halt And Catch Fire: small Vulkan programs that deliberately hang or crash
//! the GPU, plus the harness that sets them up and tells whether the device
//! survived.

pub mod flags;
pub mod gpu;
pub mod scenarios;
pub mod utils;
pub mod watchdog;

#[doc(hidden)]
pub use tracing;

pub use flags::{FlagError, Flags};
pub use gpu::*;
pub use watchdog::Watchdog;
