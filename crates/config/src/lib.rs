//! Configuration management for the voice orchestration backend
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (`VOICEHUB__` prefix, `__` separator)
//! - Per-session overrides merged over manager-scoped defaults

pub mod settings;

pub use settings::{
    load_settings, BackoffConfig, SessionConfig, SessionOverrides, Settings, SidecarEndpoint,
    SttSessionConfig, VisionConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
