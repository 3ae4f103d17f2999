//! Configuration loading, validation and env substitution.
//!
//! Config files: `qq-agent.toml`, `qq-agent.yaml` or `qq-agent.json`,
//! searched in `./` then `~/.config/qq-agent/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, load_config, substitute_env},
    schema::{
        AccountConfig, AgentConfig, BufferConfig, MonitorConfig, NapCatConfig, OutboundConfig,
    },
    validate::{Diagnostic, Severity, validate},
};
