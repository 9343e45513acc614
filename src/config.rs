//! Configuration management
//!
//! Loads and saves the bridge's TOML configuration file, mirroring the
//! nested-sub-struct-with-serde-defaults shape used throughout this codebase.

use anyhow::{bail, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub inbound: InboundConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: u32,
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    #[serde(default)]
    pub response_model: Option<String>,
    #[serde(default)]
    pub response_system_prompt: Option<String>,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_max_concurrent_calls() -> u32 {
    5
}

fn default_max_duration_seconds() -> u64 {
    3600
}

fn default_response_timeout_ms() -> u64 {
    15_000
}

/// The shared secret the gateway must present via `X-Bridge-Secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_path() -> String {
    "/bridge".to_string()
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            path: default_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub greeting: Option<String>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            greeting: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundDefaultMode {
    Notify,
    Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ring_timeout_ms")]
    pub ring_timeout_ms: u64,
    #[serde(default = "default_outbound_mode")]
    pub default_mode: OutboundDefaultMode,
}

fn default_ring_timeout_ms() -> u64 {
    30_000
}

fn default_outbound_mode() -> OutboundDefaultMode {
    OutboundDefaultMode::Conversation
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ring_timeout_ms: default_ring_timeout_ms(),
            default_mode: default_outbound_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_model")]
    pub model: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_tts_speed")]
    pub speed: f32,
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "alloy".to_string()
}

fn default_tts_speed() -> f32 {
    1.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: default_tts_model(),
            voice: default_tts_voice(),
            speed: default_tts_speed(),
            instructions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsMode {
    Auto,
    Realtime,
    Chunked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    #[serde(default = "default_sentence_min_chars")]
    pub sentence_min_chars: usize,
    #[serde(default = "default_sentence_max_chars")]
    pub sentence_max_chars: usize,
    #[serde(default = "default_max_parallel_tts")]
    pub max_parallel_tts: usize,
    #[serde(default = "default_jitter_buffer_frames")]
    pub jitter_buffer_frames: usize,
    #[serde(default = "default_tts_mode")]
    pub tts_mode: TtsMode,
    #[serde(default)]
    pub realtime_model: Option<String>,
}

fn default_stt_model() -> String {
    "streaming-transcribe-v1".to_string()
}

fn default_silence_duration_ms() -> u32 {
    500
}

fn default_vad_threshold() -> f32 {
    0.5
}

fn default_sentence_min_chars() -> usize {
    20
}

fn default_sentence_max_chars() -> usize {
    200
}

fn default_max_parallel_tts() -> usize {
    3
}

fn default_jitter_buffer_frames() -> usize {
    25
}

fn default_tts_mode() -> TtsMode {
    TtsMode::Auto
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            stt_model: default_stt_model(),
            silence_duration_ms: default_silence_duration_ms(),
            vad_threshold: default_vad_threshold(),
            sentence_min_chars: default_sentence_min_chars(),
            sentence_max_chars: default_sentence_max_chars(),
            max_parallel_tts: default_max_parallel_tts(),
            jitter_buffer_frames: default_jitter_buffer_frames(),
            tts_mode: default_tts_mode(),
            realtime_model: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDetectionType {
    ServerVad,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetectionConfig {
    #[serde(rename = "type", default = "default_turn_detection_type")]
    pub kind: TurnDetectionType,
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
}

fn default_turn_detection_type() -> TurnDetectionType {
    TurnDetectionType::ServerVad
}

fn default_prefix_padding_ms() -> u32 {
    300
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        Self {
            kind: default_turn_detection_type(),
            threshold: default_vad_threshold(),
            silence_duration_ms: default_silence_duration_ms(),
            prefix_padding_ms: default_prefix_padding_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    #[serde(default)]
    pub deny: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_model")]
    pub model: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default)]
    pub turn_detection: TurnDetectionConfig,
    #[serde(default)]
    pub tools: ToolPolicyConfig,
    #[serde(default = "default_max_session_duration_ms")]
    pub max_session_duration_ms: u64,
}

fn default_realtime_model() -> String {
    "realtime-v1".to_string()
}

/// Hard cap from spec: configured value is clamped at load time.
pub const MAX_SESSION_DURATION_MS_HARD_CAP: u64 = 900_000;

fn default_max_session_duration_ms() -> u64 {
    840_000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model: default_realtime_model(),
            voice: default_tts_voice(),
            turn_detection: TurnDetectionConfig::default(),
            tools: ToolPolicyConfig::default(),
            max_session_duration_ms: default_max_session_duration_ms(),
        }
    }
}

/// Endpoints and credentials for the cloud speech/agent services the bridge
/// talks to. One vendor is assumed to front STT, TTS, the chat-completions
/// agent engine, and the realtime voice endpoint, matching an
/// OpenAI-compatible API surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_realtime_ws_url")]
    pub realtime_ws_url: String,
    #[serde(default = "default_stt_ws_url")]
    pub stt_ws_url: String,
}

fn default_upstream_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_realtime_ws_url() -> String {
    "wss://api.openai.com/v1/realtime".to_string()
}

fn default_stt_ws_url() -> String {
    "wss://api.openai.com/v1/audio/speech-to-text".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            api_key: String::new(),
            realtime_ws_url: default_realtime_ws_url(),
            stt_ws_url: default_stt_ws_url(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationMode {
    Disabled,
    Open,
    Allowlist,
    TenantOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthorizationMode,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default)]
    pub allowed_tenants: Vec<String>,
    #[serde(default)]
    pub allow_pstn: bool,
}

fn default_auth_mode() -> AuthorizationMode {
    AuthorizationMode::Disabled
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            allow_from: Vec::new(),
            allowed_tenants: Vec::new(),
            allow_pstn: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file, generating one with a fresh secret on
    /// first run.
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        let config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config file")?
        } else {
            let config = Config {
                bridge: BridgeConfig {
                    secret: generate_secret(),
                },
                serve: ServeConfig::default(),
                inbound: InboundConfig::default(),
                outbound: OutboundConfig::default(),
                tts: TtsConfig::default(),
                streaming: StreamingConfig::default(),
                realtime: RealtimeConfig::default(),
                upstream: UpstreamConfig::default(),
                authorization: AuthorizationConfig::default(),
                max_concurrent_calls: default_max_concurrent_calls(),
                max_duration_seconds: default_max_duration_seconds(),
                response_model: None,
                response_system_prompt: None,
                response_timeout_ms: default_response_timeout_ms(),
                logging: LoggingConfig::default(),
            };
            config.save()?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent().context("config path has no parent")?;
        std::fs::create_dir_all(parent).context("failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&config_path, contents).context("failed to write config file")?;
        Ok(())
    }

    /// Validate fields that can't be expressed purely through serde defaults.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.secret.len() < 32 {
            bail!("bridge.secret must be at least 32 characters");
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            bail!("tts.speed must be within 0.25..=4.0");
        }
        if !(1..=5).contains(&self.streaming.max_parallel_tts) {
            bail!("streaming.max-parallel-tts must be within 1..=5");
        }
        if !(1..=100).contains(&self.streaming.jitter_buffer_frames)
            && !(10..=100).contains(&self.streaming.jitter_buffer_frames)
        {
            bail!("streaming.jitter-buffer-frames must be within 10..=100");
        }
        if !(1..=100).contains(&self.max_concurrent_calls) {
            bail!("max-concurrent-calls must be within 1..=100");
        }
        if !(60..=86_400).contains(&self.max_duration_seconds) {
            bail!("max-duration-seconds must be within 60..=86400");
        }
        if self.realtime.max_session_duration_ms > MAX_SESSION_DURATION_MS_HARD_CAP {
            bail!(
                "realtime.max-session-duration-ms exceeds hard cap of {}",
                MAX_SESSION_DURATION_MS_HARD_CAP
            );
        }
        Ok(())
    }
}

/// Generate a fresh, random bridge secret (same random-bytes-then-encode
/// shape as the rest of this codebase's secret generation).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voicebridge", "voicebridge")
        .context("failed to resolve project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voicebridge", "voicebridge")
        .context("failed to resolve project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config {
            bridge: BridgeConfig {
                secret: generate_secret(),
            },
            serve: ServeConfig::default(),
            inbound: InboundConfig::default(),
            outbound: OutboundConfig::default(),
            tts: TtsConfig::default(),
            streaming: StreamingConfig::default(),
            realtime: RealtimeConfig::default(),
            upstream: UpstreamConfig::default(),
            authorization: AuthorizationConfig::default(),
            max_concurrent_calls: default_max_concurrent_calls(),
            max_duration_seconds: default_max_duration_seconds(),
            response_model: None,
            response_system_prompt: None,
            response_timeout_ms: default_response_timeout_ms(),
            logging: LoggingConfig::default(),
        };
        config.validate().unwrap();

        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.serve.port, config.serve.port);
        assert_eq!(parsed.bridge.secret, config.bridge.secret);
    }

    #[test]
    fn rejects_short_secret() {
        let mut config_str = String::from("[bridge]\nsecret = \"tooshort\"\n");
        config_str.push_str("[serve]\n");
        let config: Config = toml::from_str(&config_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_generates_and_persists_secret_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let config = Config::load().unwrap();
        assert!(config.bridge.secret.len() >= 32);
        let path = config_path().unwrap();
        assert!(path.exists());
    }
}
