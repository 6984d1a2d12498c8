pub mod vulkan;

pub use vulkan::*;
