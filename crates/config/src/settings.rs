//! Layered settings: defaults -> optional TOML file -> environment.
//!
//! Ambient component configs (server, pools, sessions) load through the
//! `config` crate with a `VOICE_AGENT_` prefix and `__` nesting separator,
//! using the same layered `config::Settings` / `load_settings()` pattern
//! throughout this workspace. The external-service environment variables
//! named in spec §6 (`REDIS_HOST`, `AZURE_OPENAI_ENDPOINT`, ...) are read
//! directly rather than going through a generic config layer, since those
//! names are fixed integration contracts, not ours to namespace.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Top-level settings for the gateway binary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pools: PoolConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub azure_openai: AzureOpenAiConfig,
    #[serde(default)]
    pub azure_speech: AzureSpeechConfig,
    #[serde(default)]
    pub acs: AcsConfig,
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_enabled: true,
            cors_origins: Vec::new(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Auth is an external collaborator (spec §1): this config only gates the
/// stub middleware the core wires in front of it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string(), "/ready".to_string(), "/metrics".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 120,
        }
    }
}

/// Engine pool sizing (spec §4.1, `EnginePool`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub stt_dedicated: usize,
    pub stt_shared: usize,
    pub stt_overflow: usize,
    pub tts_dedicated: usize,
    pub tts_shared: usize,
    pub tts_overflow: usize,
    pub acquire_timeout_ms: u64,
    pub warmup_timeout_ms: u64,
    pub construction_max_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stt_dedicated: 4,
            stt_shared: 16,
            stt_overflow: 8,
            tts_dedicated: 4,
            tts_shared: 16,
            tts_overflow: 8,
            acquire_timeout_ms: 2_000,
            warmup_timeout_ms: 4_000,
            construction_max_retries: 3,
        }
    }
}

/// Session-lifecycle timing (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub barge_in_grace_ms: u64,
    pub disconnect_grace_ms: u64,
    pub greeting_text: String,
    pub system_prompt: String,
    pub dtmf_expected_len: usize,
    pub dtmf_wait_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            barge_in_grace_ms: 300,
            disconnect_grace_ms: 1_000,
            greeting_text: "Hello, thanks for calling. How can I help you today?".to_string(),
            system_prompt: "You are a helpful, concise voice assistant for a healthcare clinic. \
                Keep responses short and conversational since they will be spoken aloud. \
                Use the available tools when the caller asks to schedule an appointment, \
                refill a prescription, look up medication information, or escalate an emergency."
                .to_string(),
            dtmf_expected_len: 3,
            dtmf_wait_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RedisConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub access_key: Option<String>,
    pub use_cluster: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AzureOpenAiConfig {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub api_version: Option<String>,
    pub chat_deployment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AzureSpeechConfig {
    pub key: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AcsConfig {
    pub connection_string: Option<String>,
    pub source_phone_number: Option<String>,
    pub endpoint: Option<String>,
}

/// Load settings from (in ascending priority): built-in defaults, an
/// optional `config/default.toml` / `config/local.toml`, `VOICE_AGENT_`
/// prefixed environment variables, then the fixed external-service
/// environment variables named in spec §6.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false))
        .add_source(config::File::with_name("config/local").required(false))
        .add_source(
            config::Environment::with_prefix("VOICE_AGENT")
                .separator("__")
                .try_parsing(true),
        );

    let raw = builder.build()?;
    let mut settings: Settings = raw.try_deserialize().unwrap_or_default();
    apply_external_env(&mut settings);
    Ok(settings)
}

fn apply_external_env(settings: &mut Settings) {
    use std::env;

    if settings.redis.host.is_none() {
        settings.redis.host = env::var("REDIS_HOST").ok();
    }
    if settings.redis.port.is_none() {
        settings.redis.port = env::var("REDIS_PORT").ok().and_then(|v| v.parse().ok());
    }
    if settings.redis.access_key.is_none() {
        settings.redis.access_key = env::var("REDIS_ACCESS_KEY").ok();
    }
    if !settings.redis.use_cluster {
        settings.redis.use_cluster = env::var("REDIS_USE_CLUSTER")
            .ok()
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
    }

    settings.azure_openai.endpoint = settings
        .azure_openai
        .endpoint
        .clone()
        .or_else(|| env::var("AZURE_OPENAI_ENDPOINT").ok());
    settings.azure_openai.key = settings
        .azure_openai
        .key
        .clone()
        .or_else(|| env::var("AZURE_OPENAI_KEY").ok());
    settings.azure_openai.api_version = settings
        .azure_openai
        .api_version
        .clone()
        .or_else(|| env::var("AZURE_OPENAI_API_VERSION").ok());
    settings.azure_openai.chat_deployment_id = settings
        .azure_openai
        .chat_deployment_id
        .clone()
        .or_else(|| env::var("AZURE_OPENAI_CHAT_DEPLOYMENT_ID").ok());

    settings.azure_speech.key = settings
        .azure_speech
        .key
        .clone()
        .or_else(|| env::var("AZURE_SPEECH_KEY").ok());
    settings.azure_speech.region = settings
        .azure_speech
        .region
        .clone()
        .or_else(|| env::var("AZURE_SPEECH_REGION").ok());

    settings.acs.connection_string = settings
        .acs
        .connection_string
        .clone()
        .or_else(|| env::var("ACS_CONNECTION_STRING").ok());
    settings.acs.source_phone_number = settings
        .acs
        .source_phone_number
        .clone()
        .or_else(|| env::var("ACS_SOURCE_PHONE_NUMBER").ok());
    settings.acs.endpoint = settings
        .acs
        .endpoint
        .clone()
        .or_else(|| env::var("ACS_ENDPOINT").ok());

    if settings.base_url.is_empty() {
        settings.base_url = env::var("BASE_URL").unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.pools.stt_dedicated, 4);
        assert_eq!(settings.session.barge_in_grace_ms, 300);
    }

    #[test]
    fn load_settings_falls_back_to_defaults_without_files_or_env() {
        // Clear a couple of the external vars so the test is hermetic
        // regardless of what the host environment happens to export.
        std::env::remove_var("REDIS_HOST");
        let settings = load_settings().expect("load_settings should not fail");
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn external_env_overlay_fills_unset_fields_only() {
        std::env::set_var("REDIS_HOST", "test-host.redis.cache.windows.net");
        let mut settings = Settings::default();
        apply_external_env(&mut settings);
        assert_eq!(settings.redis.host.as_deref(), Some("test-host.redis.cache.windows.net"));
        std::env::remove_var("REDIS_HOST");
    }
}
