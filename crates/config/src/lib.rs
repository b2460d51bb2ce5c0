//! Configuration management for the avatar agent
//!
//! Two layers:
//! - [`Settings`]: process settings loaded from `config/` files and
//!   environment variables (AVATAR_AGENT_ prefix)
//! - [`AppConfig`]: the provider/avatar configuration document, resolved by
//!   [`ConfigResolver`] from the document, persisted secrets and overrides

pub mod constants;
pub mod document;
pub mod key_store;
pub mod resolver;
pub mod settings;
pub mod validation;

pub use document::{
    AppConfig, AvatarAppearanceConfig, CompletionServiceConfig, SearchServiceConfig,
    SpeechBehaviorConfig, SpeechServiceConfig,
};
pub use key_store::{mask_secret, missing_keys, KeyStore, SecretKey};
pub use resolver::{ConfigResolver, LoadFailure, LoadStatus, ResolvedConfig};
pub use settings::{
    load_settings, BehaviorConfig, CompletionSettings, DocumentConfig, ObservabilityConfig,
    RuntimeEnvironment, ServerConfig, Settings, SignalingConfig, TimingConfig,
};
pub use validation::{is_critical, validate, ValidationReport};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for avatar_agent_core::Error {
    fn from(err: ConfigError) -> Self {
        avatar_agent_core::Error::Config(err.to_string())
    }
}
