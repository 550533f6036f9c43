use std::{
    collections::HashMap,
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use lib::{
    constants::{DEFAULT_ADAPTER_PORT, DEFAULT_W1_DEVICES_PATH, RECONNECT_DELAY},
    protocol::{AdapterKey, KeyError},
};
use tracing::warn;

/// Keys honoured in the env file; anything else there is ignored.
const ENV_KEYS: [&str; 6] = [
    "ADAPTER_HOST",
    "ADAPTER_KEY",
    "ADAPTER_PORT",
    "DEBUG",
    "SYSTEM_ID",
    "W1_DEVICES_PATH",
];

#[derive(Debug, Parser)]
#[command(
    name = "w1remote-agent",
    version,
    about = "Serves local 1-wire temperature sensors to a remote controller"
)]
pub struct AgentArgs {
    /// Unique name of this system (defaults to the host name)
    #[arg(long, env = "SYSTEM_ID")]
    pub system_id: Option<String>,

    /// Controller host to connect to
    #[arg(long, env = "ADAPTER_HOST")]
    pub adapter_host: Option<String>,

    /// Controller port
    #[arg(long, env = "ADAPTER_PORT")]
    pub adapter_port: Option<String>,

    /// 32-byte shared key as 64 hex characters
    #[arg(long, env = "ADAPTER_KEY", hide_env_values = true)]
    pub adapter_key: Option<String>,

    /// Root of the 1-wire device tree
    #[arg(long, env = "W1_DEVICES_PATH")]
    pub w1_devices_path: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG", num_args = 0..=1, default_missing_value = "true")]
    pub debug: Option<String>,

    /// KEY=value file consulted for settings not given as flags or environment
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingHost,
    InvalidPort(String),
    InvalidKey(KeyError),
    MissingDevicesPath(PathBuf),
    Hostname(io::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingHost => f.write_str("no ADAPTER_HOST given"),
            ConfigError::InvalidPort(port) => write!(f, "invalid ADAPTER_PORT {:?}", port),
            ConfigError::InvalidKey(err) => write!(f, "ADAPTER_KEY is not a valid key: {}", err),
            ConfigError::MissingDevicesPath(path) => write!(
                f,
                "the 1-wire devices path {} does not exist",
                path.display()
            ),
            ConfigError::Hostname(err) => {
                write!(f, "no SYSTEM_ID given and the host name is unavailable: {}", err)
            }
        }
    }
}

impl Error for ConfigError {}

/// Reads the env file at `path`. A missing file is the same as an empty one.
pub fn read_env_file(path: &Path) -> io::Result<HashMap<String, String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_env_file(&content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(err) => Err(err),
    }
}

fn parse_env_file(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if !ENV_KEYS.contains(&key) {
                return None;
            }
            let value = value.trim();
            let value = value.strip_prefix('"').unwrap_or(value);
            let value = value.strip_suffix('"').unwrap_or(value);
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Whether debug logging was asked for, before the rest of the settings are validated.
pub fn debug_requested(args: &AgentArgs, env_file: &HashMap<String, String>) -> bool {
    args.debug
        .as_deref()
        .or_else(|| env_file.get("DEBUG").map(String::as_str))
        .is_some_and(is_truthy)
}

/// Validated agent settings, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_id: String,
    pub adapter_host: String,
    pub adapter_port: u16,
    pub adapter_key: AdapterKey,
    pub w1_devices_path: PathBuf,
    pub reconnect_delay: Duration,
}

impl AgentConfig {
    /// Layers flags and environment over the env file, then applies defaults and validation.
    pub fn resolve(
        args: AgentArgs,
        env_file: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let setting = |value: Option<String>, key: &str| {
            value
                .or_else(|| env_file.get(key).cloned())
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let system_id = match setting(args.system_id, "SYSTEM_ID") {
            Some(system_id) => system_id,
            None => {
                let host = hostname::get().map_err(ConfigError::Hostname)?;
                let system_id = host.to_string_lossy().into_owned();
                warn!(
                    "using the host name {} as system ID; please set SYSTEM_ID to a unique value",
                    system_id
                );
                system_id
            }
        };

        let adapter_port = match setting(args.adapter_port, "ADAPTER_PORT") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(port))?,
            None => DEFAULT_ADAPTER_PORT,
        };

        let adapter_host =
            setting(args.adapter_host, "ADAPTER_HOST").ok_or(ConfigError::MissingHost)?;

        let adapter_key = AdapterKey::from_hex(
            &setting(args.adapter_key, "ADAPTER_KEY").unwrap_or_default(),
        )
        .map_err(ConfigError::InvalidKey)?;

        let w1_devices_path = PathBuf::from(
            setting(args.w1_devices_path, "W1_DEVICES_PATH")
                .unwrap_or_else(|| DEFAULT_W1_DEVICES_PATH.to_owned()),
        );
        if !w1_devices_path.exists() {
            return Err(ConfigError::MissingDevicesPath(w1_devices_path));
        }

        Ok(Self {
            system_id,
            adapter_host,
            adapter_port,
            adapter_key,
            w1_devices_path,
            reconnect_delay: RECONNECT_DELAY,
        })
    }
}
