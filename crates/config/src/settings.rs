//! Main settings module
//!
//! `Settings` holds manager-scoped defaults; `SessionOverrides` is
//! the per-session document merged over them to produce the
//! `SessionConfig` a session is actually built from.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use voicehub_core::{AgentDescriptor, BargeInPolicy, UserContext};

use crate::ConfigError;

/// Reconnect backoff for a sidecar stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay (ms)
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    /// Give up after this many attempts
    #[serde(default = "default_backoff_attempts")]
    pub max_attempts: u32,
    /// Delay ceiling (ms)
    #[serde(default = "default_backoff_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_attempts() -> u32 {
    5
}

fn default_backoff_max_delay_ms() -> u64 {
    2_000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_attempts: default_backoff_attempts(),
            max_delay_ms: default_backoff_max_delay_ms(),
        }
    }
}

/// Address and transport options for one sidecar stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarEndpoint {
    /// ws:// or wss:// URL of the sidecar
    #[serde(default)]
    pub address: String,
    /// Bearer token attached to the handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Force transport-level encryption
    #[serde(default)]
    pub tls: bool,
    /// Reject outbound messages larger than this (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_max_message_size() -> usize {
    1 << 20
}

impl Default for SidecarEndpoint {
    fn default() -> Self {
        Self {
            address: String::new(),
            token: None,
            tls: false,
            max_message_size: default_max_message_size(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Recognition options sent in the STT `config` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSessionConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub model_id: String,
    /// Emit partial transcripts
    #[serde(default = "default_true")]
    pub partials: bool,
    #[serde(default = "default_partial_window_ms")]
    pub partial_window_ms: u64,
    #[serde(default = "default_partial_stride_ms")]
    pub partial_stride_ms: u64,
    #[serde(default)]
    pub include_word_times: bool,
    #[serde(default)]
    pub hotwords: Vec<String>,
    #[serde(default)]
    pub initial_prompt: String,
    #[serde(default = "default_task")]
    pub task: String,
    #[serde(default)]
    pub temperature: f32,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

fn default_partial_window_ms() -> u64 {
    3_000
}

fn default_partial_stride_ms() -> u64 {
    500
}

fn default_task() -> String {
    "transcribe".to_string()
}

impl Default for SttSessionConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            model_id: String::new(),
            partials: true,
            partial_window_ms: default_partial_window_ms(),
            partial_stride_ms: default_partial_stride_ms(),
            include_word_times: false,
            hotwords: Vec::new(),
            initial_prompt: String::new(),
            task: default_task(),
            temperature: 0.0,
        }
    }
}

/// Vision subsystem knobs; presence enables frame handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Frame retention window (ms)
    #[serde(default = "default_frame_ttl_ms")]
    pub frame_ttl_ms: u64,
    /// Bounded wait when attaching a description to an utterance (ms)
    #[serde(default = "default_vision_wait_ms")]
    pub attach_wait_ms: u64,
}

fn default_frame_ttl_ms() -> u64 {
    30_000
}

fn default_vision_wait_ms() -> u64 {
    500
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            frame_ttl_ms: default_frame_ttl_ms(),
            attach_wait_ms: default_vision_wait_ms(),
        }
    }
}

/// Manager-scoped defaults, loadable from file + environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub stt: SidecarEndpoint,
    #[serde(default)]
    pub stt_session: SttSessionConfig,
    #[serde(default)]
    pub tts: SidecarEndpoint,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_speed")]
    pub tts_speed: f32,
    #[serde(default)]
    pub barge_in: BargeInPolicy,
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<VisionConfig>,
    /// Registry capacity
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Dead-session sweep interval (secs)
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_voice_id() -> String {
    "default".to_string()
}

fn default_tts_speed() -> f32 {
    1.0
}

fn default_max_sessions() -> usize {
    256
}

fn default_cleanup_interval_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stt: SidecarEndpoint::default(),
            stt_session: SttSessionConfig::default(),
            tts: SidecarEndpoint::default(),
            voice_id: default_voice_id(),
            tts_speed: default_tts_speed(),
            barge_in: BargeInPolicy::default(),
            agents: Vec::new(),
            vision: None,
            max_sessions: default_max_sessions(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tts_speed <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tts_speed must be positive, got {}",
                self.tts_speed
            )));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be non-zero".into()));
        }
        for endpoint in [&self.stt, &self.tts] {
            if endpoint.backoff.max_attempts == 0 {
                return Err(ConfigError::Invalid(
                    "backoff.max_attempts must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Per-session configuration document; unset fields fall back to
/// the manager defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    #[serde(default)]
    pub user_context: UserContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stt: Option<SidecarEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stt_session: Option<SttSessionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<SidecarEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barge_in: Option<BargeInPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<VisionConfig>,
}

/// Fully-resolved configuration a session is built from.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user: UserContext,
    pub stt: SidecarEndpoint,
    pub stt_session: SttSessionConfig,
    pub tts: SidecarEndpoint,
    pub voice_id: String,
    pub tts_speed: f32,
    pub barge_in: BargeInPolicy,
    pub agents: Vec<AgentDescriptor>,
    pub vision: Option<VisionConfig>,
}

impl SessionOverrides {
    /// Merge these overrides over the manager defaults.
    ///
    /// The barge-in policy is normalized here so zero values never
    /// reach the speech controller.
    pub fn merge(self, defaults: &Settings) -> SessionConfig {
        SessionConfig {
            user: self.user_context,
            stt: self.stt.unwrap_or_else(|| defaults.stt.clone()),
            stt_session: self
                .stt_session
                .unwrap_or_else(|| defaults.stt_session.clone()),
            tts: self.tts.unwrap_or_else(|| defaults.tts.clone()),
            voice_id: self.voice_id.unwrap_or_else(|| defaults.voice_id.clone()),
            tts_speed: self.tts_speed.unwrap_or(defaults.tts_speed),
            barge_in: self.barge_in.unwrap_or(defaults.barge_in).normalized(),
            agents: self.agents.unwrap_or_else(|| defaults.agents.clone()),
            vision: self.vision.or_else(|| defaults.vision.clone()),
        }
    }
}

/// Load settings from an optional TOML file plus `VOICEHUB__`
/// environment overrides.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path));
    }

    let config = builder
        .add_source(Environment::with_prefix("VOICEHUB").separator("__"))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let settings: Settings = config
        .try_deserialize()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    settings.validate()?;

    tracing::info!(
        agents = settings.agents.len(),
        max_sessions = settings.max_sessions,
        "Settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_tts_speed() {
        let settings = Settings {
            tts_speed: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_endpoint_defaults_match_serde_defaults() {
        let endpoint = SidecarEndpoint::default();
        assert_eq!(endpoint.max_message_size, 1 << 20);
        assert!(!endpoint.tls);
    }

    #[test]
    fn test_backoff_defaults() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.initial_ms, 100);
        assert_eq!(backoff.max_attempts, 5);
        assert_eq!(backoff.max_delay_ms, 2_000);
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let defaults = Settings {
            voice_id: "alloy".into(),
            tts_speed: 1.0,
            ..Default::default()
        };
        let overrides = SessionOverrides {
            voice_id: Some("nova".into()),
            ..Default::default()
        };

        let merged = overrides.merge(&defaults);
        assert_eq!(merged.voice_id, "nova");
        assert_eq!(merged.tts_speed, 1.0);
    }

    #[test]
    fn test_merge_normalizes_barge_in() {
        let overrides = SessionOverrides {
            barge_in: Some(voicehub_core::BargeInPolicy {
                allow_while_speaking: true,
                min_partial_chars: 0,
                min_silence_for_end_ms: 0,
                debounce_min_ms: 0,
                debounce_max_ms: 0,
            }),
            ..Default::default()
        };

        let merged = overrides.merge(&Settings::default());
        assert!(merged.barge_in.allow_while_speaking);
        assert_eq!(merged.barge_in.min_silence_for_end_ms, 400);
    }

    #[test]
    fn test_overrides_deserialize_sparse() {
        let overrides: SessionOverrides = serde_json::from_str(
            r#"{"user_context": {"user_id": "u1", "name": "N"}, "tts_speed": 1.2}"#,
        )
        .unwrap();
        assert_eq!(overrides.user_context.user_id, "u1");
        assert_eq!(overrides.tts_speed, Some(1.2));
        assert!(overrides.stt.is_none());
    }
}
