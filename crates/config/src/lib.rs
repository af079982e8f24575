//! Configuration management for the voice agent gateway.
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, `config/local.toml`)
//! - Environment variables (`VOICE_AGENT_` prefix for ambient settings;
//!   the fixed external-service names from spec §6 for provider credentials)

pub mod settings;

pub use settings::{
    AcsConfig, AuthConfig, AzureOpenAiConfig, AzureSpeechConfig, PoolConfig, RateLimitConfig,
    RedisConfig, ServerConfig, SessionConfig, Settings, load_settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voice_agent_core::Error {
    fn from(err: ConfigError) -> Self {
        voice_agent_core::Error::Configuration(err.to_string())
    }
}
