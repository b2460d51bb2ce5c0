//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{endpoints, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Where the configuration document and secrets live
    #[serde(default)]
    pub document: DocumentConfig,

    #[serde(default)]
    pub behavior: BehaviorConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub completion: CompletionSettings,

    #[serde(default)]
    pub signaling: SignalingConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port must be non-zero".to_string(),
            });
        }

        self.validate_timing()?;

        if self.completion.api_version.trim().is_empty() {
            return Err(ConfigError::MissingField("completion.api_version".to_string()));
        }

        for (field, value) in [
            ("signaling.url", &self.signaling.url),
            ("signaling.session_url", &self.signaling.session_url),
        ] {
            if !value.is_empty() && url::Url::parse(value).is_err() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Not a valid URL: {}", value),
                });
            }
        }

        Ok(())
    }

    fn validate_timing(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        for (field, value) in [
            ("timing.watchdog_interval_ms", t.watchdog_interval_ms),
            ("timing.hung_sample_window_ms", t.hung_sample_window_ms),
            ("timing.connect_timeout_ms", t.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Must be greater than zero".to_string(),
                });
            }
        }

        if t.activation_grace_ms >= t.connect_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "timing.activation_grace_ms".to_string(),
                message: format!(
                    "Must be shorter than connect timeout ({}ms)",
                    t.connect_timeout_ms
                ),
            });
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// File path or http(s) URL of the JSON configuration document
    #[serde(default = "default_document_location")]
    pub location: String,

    #[serde(default = "default_key_store_path")]
    pub key_store_path: String,
}

fn default_document_location() -> String {
    endpoints::CONFIG_DOCUMENT.to_string()
}

fn default_key_store_path() -> String {
    endpoints::KEY_STORE_PATH.to_string()
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            location: default_document_location(),
            key_store_path: default_key_store_path(),
        }
    }
}

/// Tunable conversation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    /// Speak a short filler while a grounded completion is prepared
    #[serde(default)]
    pub enable_quick_reply: bool,

    /// After reconnection re-speak the interrupted utterance instead of moving on
    #[serde(default = "default_true")]
    pub repeat_speaking_sentence_after_reconnection: bool,

    /// Show transcript text as each utterance starts instead of per chunk
    #[serde(default = "default_true")]
    pub enable_display_text_alignment_with_speech: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            enable_quick_reply: false,
            repeat_speaking_sentence_after_reconnection: true,
            enable_display_text_alignment_with_speech: true,
        }
    }
}

/// Session thresholds in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_reconnect_window")]
    pub reconnect_window_ms: u64,

    #[serde(default = "default_idle_disconnect")]
    pub idle_disconnect_ms: u64,

    #[serde(default = "default_activation_grace")]
    pub activation_grace_ms: u64,

    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_ms: u64,

    #[serde(default = "default_hung_sample_window")]
    pub hung_sample_window_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_reconnect_window() -> u64 {
    timeouts::RECONNECT_WINDOW_MS
}

fn default_idle_disconnect() -> u64 {
    timeouts::IDLE_DISCONNECT_MS
}

fn default_activation_grace() -> u64 {
    timeouts::ACTIVATION_GRACE_MS
}

fn default_watchdog_interval() -> u64 {
    timeouts::WATCHDOG_INTERVAL_MS
}

fn default_hung_sample_window() -> u64 {
    timeouts::HUNG_SAMPLE_WINDOW_MS
}

fn default_connect_timeout() -> u64 {
    timeouts::CONNECT_TIMEOUT_MS
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_window_ms: default_reconnect_window(),
            idle_disconnect_ms: default_idle_disconnect(),
            activation_grace_ms: default_activation_grace(),
            watchdog_interval_ms: default_watchdog_interval(),
            hung_sample_window_ms: default_hung_sample_window(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn reconnect_window(&self) -> Duration {
        Duration::from_millis(self.reconnect_window_ms)
    }

    pub fn idle_disconnect(&self) -> Duration {
        Duration::from_millis(self.idle_disconnect_ms)
    }

    pub fn activation_grace(&self) -> Duration {
        Duration::from_millis(self.activation_grace_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn hung_sample_window(&self) -> Duration {
        Duration::from_millis(self.hung_sample_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSettings {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    endpoints::COMPLETION_API_VERSION.to_string()
}

fn default_completion_timeout() -> u64 {
    timeouts::COMPLETION_TIMEOUT_SECS
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

/// Realtime transport signaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// SDP exchange endpoint
    #[serde(default = "default_signaling_url")]
    pub url: String,

    #[serde(default = "default_signaling_model")]
    pub model: String,

    /// Issues ephemeral bearer credentials; used when no static credential is set
    #[serde(default)]
    pub session_url: String,

    #[serde(default)]
    pub credential: Option<String>,
}

fn default_signaling_url() -> String {
    endpoints::SIGNALING_URL.to_string()
}

fn default_signaling_model() -> String {
    endpoints::SIGNALING_MODEL.to_string()
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_signaling_url(),
            model: default_signaling_model(),
            session_url: String::new(),
            credential: None,
        }
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (AVATAR_AGENT_ prefix)
/// 2. config/{env} (if env specified)
/// 3. config/default
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("AVATAR_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
