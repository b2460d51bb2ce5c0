//! Configuration document model
//!
//! Mirrors the JSON document (`config.json`) the agent is deployed with.
//! Every field defaults to empty or `false` so that a partial document still
//! parses and validation can name exactly what is missing.

use serde::{Deserialize, Serialize};

use crate::constants::fallback;

/// Effective application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub azure_speech: SpeechServiceConfig,
    #[serde(rename = "azureOpenAI")]
    pub azure_openai: CompletionServiceConfig,
    pub azure_cognitive_search: SearchServiceConfig,
    pub speech_config: SpeechBehaviorConfig,
    pub avatar_config: AvatarAppearanceConfig,
}

/// Speech provider credentials and endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechServiceConfig {
    pub region: String,
    pub api_key: String,
    pub enable_private_endpoint: bool,
    pub private_endpoint: String,
}

impl SpeechServiceConfig {
    /// Private endpoint host, without the `https://` scheme
    ///
    /// `None` unless the private endpoint is enabled and non-blank.
    pub fn private_endpoint_host(&self) -> Option<&str> {
        if !self.enable_private_endpoint {
            return None;
        }
        let trimmed = self.private_endpoint.trim();
        let host = trimmed.strip_prefix("https://").unwrap_or(trimmed);
        let host = host.trim_end_matches('/');
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// Chat completion provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionServiceConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment_name: String,
    pub system_prompt: String,
    /// Ground completions on the cognitive search index ("on your data")
    pub enable_oyd: bool,
}

/// Document grounding index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchServiceConfig {
    pub endpoint: String,
    pub api_key: String,
    pub index_name: String,
}

/// Recognition and synthesis selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechBehaviorConfig {
    /// Comma-separated locale list
    pub stt_locales: String,
    pub tts_voice: String,
    pub custom_voice_endpoint_id: String,
    pub continuous_conversation: bool,
}

impl SpeechBehaviorConfig {
    pub fn locales(&self) -> Vec<String> {
        self.stt_locales
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Avatar appearance and session behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AvatarAppearanceConfig {
    pub character: String,
    pub style: String,
    pub customized: bool,
    pub use_built_in_voice: bool,
    pub auto_reconnect: bool,
    pub use_local_video_for_idle: bool,
    pub show_subtitles: bool,
}

impl AppConfig {
    /// Compiled-in configuration used when the document cannot be loaded
    pub fn fallback() -> Self {
        Self {
            azure_speech: SpeechServiceConfig {
                region: fallback::SPEECH_REGION.to_string(),
                ..Default::default()
            },
            azure_openai: CompletionServiceConfig {
                endpoint: fallback::OPENAI_ENDPOINT.to_string(),
                deployment_name: fallback::OPENAI_DEPLOYMENT.to_string(),
                system_prompt: fallback::SYSTEM_PROMPT.to_string(),
                ..Default::default()
            },
            azure_cognitive_search: SearchServiceConfig::default(),
            speech_config: SpeechBehaviorConfig {
                stt_locales: fallback::STT_LOCALES.to_string(),
                tts_voice: fallback::TTS_VOICE.to_string(),
                custom_voice_endpoint_id: String::new(),
                continuous_conversation: true,
            },
            avatar_config: AvatarAppearanceConfig {
                character: fallback::AVATAR_CHARACTER.to_string(),
                style: fallback::AVATAR_STYLE.to_string(),
                customized: false,
                use_built_in_voice: false,
                auto_reconnect: true,
                use_local_video_for_idle: false,
                show_subtitles: true,
            },
        }
    }

    /// Whether completions are grounded on the search index
    pub fn grounding_enabled(&self) -> bool {
        self.azure_openai.enable_oyd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_field_names() {
        let json = r#"{
            "azureSpeech": {"region": "westeurope", "enablePrivateEndpoint": true, "privateEndpoint": "https://my-speech.cognitiveservices.azure.com/"},
            "azureOpenAI": {"endpoint": "https://x.openai.azure.com/", "deploymentName": "gpt", "enableOyd": true},
            "azureCognitiveSearch": {"indexName": "docs"},
            "speechConfig": {"sttLocales": "en-US,de-DE", "continuousConversation": false},
            "avatarConfig": {"character": "lisa", "useLocalVideoForIdle": true}
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.azure_speech.region, "westeurope");
        assert_eq!(
            config.azure_speech.private_endpoint_host(),
            Some("my-speech.cognitiveservices.azure.com")
        );
        assert!(config.grounding_enabled());
        assert_eq!(config.azure_cognitive_search.index_name, "docs");
        assert_eq!(config.speech_config.locales(), vec!["en-US", "de-DE"]);
        assert!(config.avatar_config.use_local_video_for_idle);
        // Missing fields default to empty
        assert!(config.azure_openai.api_key.is_empty());
        assert!(config.avatar_config.style.is_empty());
    }

    #[test]
    fn test_private_endpoint_requires_flag() {
        let speech = SpeechServiceConfig {
            private_endpoint: "https://host".to_string(),
            ..Default::default()
        };
        assert_eq!(speech.private_endpoint_host(), None);
    }

    #[test]
    fn test_fallback_values() {
        let config = AppConfig::fallback();
        assert_eq!(config.azure_speech.region, "swedencentral");
        assert_eq!(config.azure_openai.deployment_name, "gpt-4.1");
        assert!(config.speech_config.continuous_conversation);
        assert!(config.avatar_config.auto_reconnect);
        assert!(config.avatar_config.show_subtitles);
        assert!(!config.grounding_enabled());
    }
}
