//! Configuration resolution
//!
//! Merges the configuration document, persisted secrets, process environment
//! and explicit query overrides into one effective [`AppConfig`]. A document
//! that cannot be read or parsed is replaced by [`AppConfig::fallback`];
//! resolution itself never fails.

use serde_json::Value;
use std::sync::Arc;

use crate::document::AppConfig;
use crate::key_store::{missing_keys, KeyStore, SecretKey};

/// Why the configuration document was not used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    /// Transport or permission failure while fetching
    Network(String),
    /// Document fetched but not valid configuration JSON
    Parse(String),
    NotFound,
}

/// Outcome of loading the document, for the status display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStatus {
    pub failure: Option<LoadFailure>,
    pub message: String,
}

impl LoadStatus {
    fn loaded(location: &str) -> Self {
        Self {
            failure: None,
            message: format!(
                "Configuration loaded successfully from {} with environment variables",
                location
            ),
        }
    }

    fn failed(location: &str, failure: LoadFailure) -> Self {
        let message = match &failure {
            LoadFailure::Network(_) => format!(
                "Using built-in configuration with environment variables ({} not accessible)",
                location
            ),
            LoadFailure::Parse(_) => format!(
                "Error: Invalid JSON in {}. Using built-in configuration with environment variables.",
                location
            ),
            LoadFailure::NotFound => format!(
                "Using built-in configuration with environment variables ({} not found)",
                location
            ),
        };
        Self {
            failure: Some(failure),
            message,
        }
    }
}

/// Effective configuration plus how it was obtained
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AppConfig,
    pub load: LoadStatus,
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds the effective configuration from all sources
///
/// Precedence, highest first: query parameter, persisted key store, process
/// environment (secrets only), configuration document, compiled-in fallback.
pub struct ConfigResolver {
    location: String,
    query: Vec<(String, String)>,
    key_store: Arc<KeyStore>,
    env: EnvLookup,
    http: reqwest::Client,
}

impl ConfigResolver {
    pub fn new(location: impl Into<String>, key_store: Arc<KeyStore>) -> Self {
        Self {
            location: location.into(),
            query: Vec::new(),
            key_store,
            env: Arc::new(|name| std::env::var(name).ok()),
            http: reqwest::Client::new(),
        }
    }

    /// Explicit overrides: secret names or dotted document paths
    pub fn with_query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Replace the process environment lookup
    pub fn with_env(mut self, env: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub async fn resolve(&self) -> ResolvedConfig {
        let (document, load) = match self.load_document().await {
            Ok(value) => match serde_json::from_value::<AppConfig>(value) {
                // Re-serialize so every field exists for dotted overrides
                Ok(doc) => (
                    serde_json::to_value(doc).unwrap_or_else(|_| fallback_value()),
                    LoadStatus::loaded(&self.location),
                ),
                Err(e) => (
                    fallback_value(),
                    LoadStatus::failed(&self.location, LoadFailure::Parse(e.to_string())),
                ),
            },
            Err(failure) => (fallback_value(), LoadStatus::failed(&self.location, failure)),
        };

        match &load.failure {
            None => tracing::info!(location = %self.location, "Configuration document loaded"),
            Some(failure) => {
                tracing::warn!(location = %self.location, ?failure, "Using built-in configuration")
            }
        }

        let mut config = self.apply_overrides(document);
        self.apply_secrets(&mut config);

        let missing = missing_keys(&config);
        if !missing.is_empty() {
            let names: Vec<_> = missing.iter().map(|k| k.env_name()).collect();
            tracing::warn!(missing = ?names, "API keys not found; set them via environment, query or key prompt");
        }

        ResolvedConfig { config, load }
    }

    async fn load_document(&self) -> Result<Value, LoadFailure> {
        let text = if self.location.starts_with("http://") || self.location.starts_with("https://")
        {
            let response = self
                .http
                .get(&self.location)
                .send()
                .await
                .map_err(|e| LoadFailure::Network(e.to_string()))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(LoadFailure::NotFound);
            }
            if !response.status().is_success() {
                return Err(LoadFailure::Network(format!(
                    "HTTP error! status: {}",
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| LoadFailure::Network(e.to_string()))?
        } else {
            match tokio::fs::read_to_string(&self.location).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(LoadFailure::NotFound)
                }
                Err(e) => return Err(LoadFailure::Network(e.to_string())),
            }
        };

        serde_json::from_str(&text).map_err(|e| LoadFailure::Parse(e.to_string()))
    }

    fn apply_overrides(&self, mut document: Value) -> AppConfig {
        for (key, raw) in &self.query {
            if !key.contains('.') {
                continue;
            }
            let previous = document.clone();
            if !set_path(&mut document, key, raw) {
                tracing::warn!(key = %key, "Ignoring override for unknown configuration path");
                continue;
            }
            if serde_json::from_value::<AppConfig>(document.clone()).is_err() {
                tracing::warn!(key = %key, "Ignoring override with wrong value type");
                document = previous;
            }
        }

        serde_json::from_value(document).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Configuration document rejected after overrides");
            AppConfig::fallback()
        })
    }

    fn apply_secrets(&self, config: &mut AppConfig) {
        for key in SecretKey::ALL {
            let name = key.env_name();
            let chosen = self
                .query
                .iter()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.clone())
                .or_else(|| self.key_store.get(key))
                .or_else(|| (self.env)(name).filter(|v| !v.is_empty()));
            if let Some(value) = chosen {
                key.write(config, value);
            }
        }
    }
}

fn fallback_value() -> Value {
    serde_json::to_value(AppConfig::fallback()).unwrap_or(Value::Null)
}

/// Set a dotted path inside an existing object, coercing to the current type
fn set_path(document: &mut Value, path: &str, raw: &str) -> bool {
    let mut current = document;
    for segment in path.split('.') {
        match current.get_mut(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    *current = match current {
        Value::Bool(_) => match raw.parse::<bool>() {
            Ok(b) => Value::Bool(b),
            Err(_) => return false,
        },
        Value::Number(_) => match serde_json::from_str::<serde_json::Number>(raw) {
            Ok(n) => Value::Number(n),
            Err(_) => return false,
        },
        Value::Object(_) | Value::Array(_) => return false,
        _ => Value::String(raw.to_string()),
    };
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_document(dir: &tempfile::TempDir, text: &str) -> String {
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn test_missing_document_uses_fallback() {
        let resolver = ConfigResolver::new("/nonexistent/config.json", Arc::new(KeyStore::in_memory()))
            .with_env(no_env);
        let resolved = resolver.resolve().await;
        assert_eq!(resolved.load.failure, Some(LoadFailure::NotFound));
        assert_eq!(resolved.config, AppConfig::fallback());
        assert!(resolved.load.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_malformed_document_records_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_document(&dir, "{ not json");
        let resolver =
            ConfigResolver::new(location.clone(), Arc::new(KeyStore::in_memory())).with_env(no_env);
        let resolved = resolver.resolve().await;
        assert!(matches!(resolved.load.failure, Some(LoadFailure::Parse(_))));
        assert_eq!(
            resolved.load.message,
            format!(
                "Error: Invalid JSON in {}. Using built-in configuration with environment variables.",
                location
            )
        );
        assert_eq!(resolved.config.azure_speech.region, "swedencentral");
    }

    #[tokio::test]
    async fn test_document_replaces_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_document(
            &dir,
            r#"{"azureSpeech": {"region": "westeurope", "apiKey": "doc-key"}}"#,
        );
        let resolver =
            ConfigResolver::new(location, Arc::new(KeyStore::in_memory())).with_env(no_env);
        let resolved = resolver.resolve().await;
        assert!(resolved.load.failure.is_none());
        assert_eq!(resolved.config.azure_speech.region, "westeurope");
        assert_eq!(resolved.config.azure_speech.api_key, "doc-key");
        // Sections absent from the document are empty, not fallback
        assert!(resolved.config.azure_openai.deployment_name.is_empty());
    }

    #[tokio::test]
    async fn test_secret_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let location = write_document(
            &dir,
            r#"{"azureSpeech": {"apiKey": "doc"}, "azureOpenAI": {"apiKey": "doc"}, "azureCognitiveSearch": {"apiKey": "doc"}}"#,
        );
        let store = Arc::new(KeyStore::in_memory());
        store.set(SecretKey::Speech, "stored").unwrap();
        store.set(SecretKey::OpenAi, "stored").unwrap();

        let resolver = ConfigResolver::new(location, store)
            .with_env(|name| match name {
                "AZURE_OPENAI_API_KEY" | "AZURE_SEARCH_API_KEY" => Some("env".to_string()),
                _ => None,
            })
            .with_query([("AZURE_SPEECH_API_KEY", "query")]);
        let config = resolver.resolve().await.config;

        assert_eq!(config.azure_speech.api_key, "query");
        assert_eq!(config.azure_openai.api_key, "stored");
        assert_eq!(config.azure_cognitive_search.api_key, "env");
    }

    #[tokio::test]
    async fn test_dotted_query_overrides() {
        let resolver = ConfigResolver::new("/nonexistent.json", Arc::new(KeyStore::in_memory()))
            .with_env(no_env)
            .with_query([
                ("azureSpeech.region", "northeurope"),
                ("avatarConfig.useLocalVideoForIdle", "true"),
                ("avatarConfig.showSubtitles", "maybe"),
                ("nope.field", "x"),
            ]);
        let config = resolver.resolve().await.config;
        assert_eq!(config.azure_speech.region, "northeurope");
        assert!(config.avatar_config.use_local_video_for_idle);
        // Unparseable boolean keeps the previous value
        assert!(config.avatar_config.show_subtitles);
    }
}
