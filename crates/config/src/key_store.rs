//! Persisted provider secrets
//!
//! A small JSON file keyed by the secret's environment-variable name. Read at
//! startup, written when the user supplies a missing key.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::secrets;
use crate::document::AppConfig;
use crate::ConfigError;

/// The three provider secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKey {
    Speech,
    OpenAi,
    Search,
}

impl SecretKey {
    pub const ALL: [SecretKey; 3] = [SecretKey::Speech, SecretKey::OpenAi, SecretKey::Search];

    /// Environment variable, query parameter and store key
    pub fn env_name(&self) -> &'static str {
        match self {
            SecretKey::Speech => secrets::SPEECH_KEY,
            SecretKey::OpenAi => secrets::OPENAI_KEY,
            SecretKey::Search => secrets::SEARCH_KEY,
        }
    }

    pub fn from_env_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.env_name() == name)
    }

    pub fn read<'a>(&self, config: &'a AppConfig) -> &'a str {
        match self {
            SecretKey::Speech => &config.azure_speech.api_key,
            SecretKey::OpenAi => &config.azure_openai.api_key,
            SecretKey::Search => &config.azure_cognitive_search.api_key,
        }
    }

    pub fn write(&self, config: &mut AppConfig, value: impl Into<String>) {
        let value = value.into();
        match self {
            SecretKey::Speech => config.azure_speech.api_key = value,
            SecretKey::OpenAi => config.azure_openai.api_key = value,
            SecretKey::Search => config.azure_cognitive_search.api_key = value,
        }
    }
}

/// Secrets the user still has to supply
///
/// The search key is only asked for when grounding is enabled.
pub fn missing_keys(config: &AppConfig) -> Vec<SecretKey> {
    SecretKey::ALL
        .into_iter()
        .filter(|k| *k != SecretKey::Search || config.grounding_enabled())
        .filter(|k| k.read(config).trim().is_empty())
        .collect()
}

/// Mask a secret for logging
pub fn mask_secret(value: &str) -> String {
    if value.chars().count() <= 8 {
        return "****".to_string();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{}****", prefix)
}

/// JSON-file backed key store
#[derive(Debug)]
pub struct KeyStore {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, String>>,
}

impl KeyStore {
    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Environment(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&text).map_err(|e| {
                ConfigError::ParseError(format!("key store {}: {}", path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path),
            values: RwLock::new(values),
        })
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: SecretKey) -> Option<String> {
        self.values
            .read()
            .get(key.env_name())
            .filter(|v| !v.is_empty())
            .cloned()
    }

    /// Persist one secret
    pub fn set(&self, key: SecretKey, value: &str) -> Result<(), ConfigError> {
        let snapshot = {
            let mut values = self.values.write();
            values.insert(key.env_name().to_string(), value.to_string());
            values.clone()
        };
        self.persist(&snapshot)?;
        tracing::info!(key = key.env_name(), value = %mask_secret(value), "Saved API key");
        Ok(())
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::Environment(e.to_string()))?;
            }
        }
        let text = serde_json::to_string_pretty(values)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| ConfigError::Environment(e.to_string()))
    }
}
