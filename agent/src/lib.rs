mod app;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod sensors;
pub mod session;

pub use app::run_until;
pub use config::{AgentArgs, AgentConfig, ConfigError};
