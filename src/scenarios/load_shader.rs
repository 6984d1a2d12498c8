//! Loads an arbitrary SPIR-V file into a shader module and stops there.

use tracing::info;

use super::{prepare, RunError, ScenarioEnv, ScenarioResult, Setup};
use crate::gpu::load_shader;

pub(super) fn run(env: &ScenarioEnv, setup: &Setup) -> ScenarioResult {
    let Some(path) = env.shader.as_deref() else {
        return Err(RunError::Usage("load_shader needs --shader=<file>".to_string()));
    };

    let ctx = prepare(env, setup)?;
    let device = ctx.get_single_device();

    info!("Loading shader \"{}\"", path.display());
    let module = load_shader(device.raw(), path).map_err(RunError::Init)?;
    unsafe { device.raw().destroy_shader_module(module, None) };
    info!("Shader module created.");
    Ok(None)
}
