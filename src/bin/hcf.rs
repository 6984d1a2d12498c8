use std::io;
use std::path::PathBuf;

use hcf::scenarios::{self, Scenario, ScenarioEnv};
use hcf::{ContextInfo, Flags};
use tracing_subscriber::{fmt, EnvFilter};

fn declare_flags() -> Flags {
    let mut flags = Flags::new();
    flags.define("--scenario", "Fault scenario to run (see the list below).");
    flags.define("--shader_dir", "Directory holding the compiled shaders (default: .).");
    flags.define("--shader", "SPIR-V file for load_shader.");
    flags.define("--watchdog_ms", "Watchdog ceiling in milliseconds (default: 120000).");
    flags.define("--api_version", "Vulkan API version to request: 1.0, 1.1, 1.2 or 1.3.");
    flags.define("--instance_extensions", "Comma separated instance extensions to enable.");
    flags.define("--instance_layers", "Comma separated instance layers to enable.");
    flags
}

fn exit_with_usage(flags: &Flags, message: &str) -> ! {
    eprintln!("{}", message);
    eprint!("{}", flags.usage(None));
    eprint!("Scenarios:\n{}", Scenario::listing());
    std::process::exit(1);
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut flags = declare_flags();
    flags.init(std::env::args());

    let info = match ContextInfo::from_flags(&flags) {
        Ok(info) => info,
        Err(e) => exit_with_usage(&flags, &e.to_string()),
    };

    let scenario = match flags.get("--scenario").map(str::parse::<Scenario>) {
        Some(Ok(scenario)) => scenario,
        Some(Err(e)) => exit_with_usage(&flags, &e.to_string()),
        None => exit_with_usage(&flags, "Missing --scenario"),
    };

    let shader_dir = flags
        .get("--shader_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| scenarios::default_shader_dir().to_path_buf());
    let mut env = ScenarioEnv::new(info, shader_dir);
    env.shader = flags.get("--shader").map(PathBuf::from);

    std::process::exit(scenarios::run(scenario, &env));
}
