#![allow(dead_code)]

use std::path::PathBuf;

use hcf::{init_vulkan, ContextInfo, DeviceInfo, VulkanContext};

/// Opens a context with one device, or `None` when the machine has no
/// usable Vulkan driver. Tests that get `None` pass without doing anything.
pub fn headless(info: &ContextInfo, request: &DeviceInfo) -> Option<VulkanContext> {
    match init_vulkan(info, request) {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            eprintln!("skipping: no usable Vulkan device ({})", err);
            None
        }
    }
}

pub fn default_context() -> Option<VulkanContext> {
    headless(&ContextInfo::default(), &DeviceInfo::default())
}

/// Compiled SPIR-V for `name`, looked up in `HCF_SHADER_DIR` or the crate's
/// `shaders/` directory. Returns `None` if it has not been built.
pub fn compiled_shader(name: &str) -> Option<PathBuf> {
    let dir = std::env::var_os("HCF_SHADER_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders"));
    let path = dir.join(name);
    if path.exists() {
        Some(path)
    } else {
        eprintln!("skipping: {} has not been compiled", path.display());
        None
    }
}
