use std::{collections::HashMap, process::ExitCode};

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use w1remote_agent::{
    AgentArgs, AgentConfig,
    config::{debug_requested, read_env_file},
};

mod signal;

#[tokio::main]
async fn main() -> ExitCode {
    let args = AgentArgs::parse();
    let env_file = read_env_file(&args.env_file);
    let no_values = HashMap::new();
    let debug = debug_requested(&args, env_file.as_ref().unwrap_or(&no_values));

    tracing_subscriber::fmt()
        .with_max_level(if debug { Level::DEBUG } else { Level::INFO })
        .init();
    info!("1-wire remote agent {}", env!("CARGO_PKG_VERSION"));

    let env_file = env_file.unwrap_or_else(|err| {
        warn!("can't read {}: {}", args.env_file.display(), err);
        HashMap::new()
    });

    let config = match AgentConfig::resolve(args, &env_file) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    debug!("system id {}", config.system_id);
    debug!(
        "controller {}:{}",
        config.adapter_host, config.adapter_port
    );
    debug!("1-wire devices path {}", config.w1_devices_path.display());

    match w1remote_agent::run_until(config, signal::shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("agent failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
