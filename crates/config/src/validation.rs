//! Configuration validation
//!
//! Produces human-readable issue strings naming the exact field and the
//! remediation. Validation never fails; it only reports.

use serde::Serialize;
use url::Url;

use crate::constants::secrets;
use crate::document::AppConfig;

/// Validate the effective configuration, returning issues in a stable order
pub fn validate(config: &AppConfig) -> Vec<String> {
    let mut issues = Vec::new();

    let speech = &config.azure_speech;
    if speech.region.trim().is_empty() {
        issues.push("Azure Speech region not set".to_string());
    }
    if speech.api_key.trim().is_empty() {
        issues.push(format!("Azure Speech API key missing (set {})", secrets::SPEECH_KEY));
    }
    if speech.enable_private_endpoint && speech.private_endpoint.trim().is_empty() {
        issues.push("Private endpoint enabled but URL not configured".to_string());
    }

    let openai = &config.azure_openai;
    if openai.endpoint.trim().is_empty() {
        issues.push("Azure OpenAI endpoint not set".to_string());
    } else if !is_valid_url(&openai.endpoint) {
        issues.push("Azure OpenAI endpoint is not a valid URL".to_string());
    }
    if openai.api_key.trim().is_empty() {
        issues.push(format!("Azure OpenAI API key missing (set {})", secrets::OPENAI_KEY));
    }
    if openai.deployment_name.trim().is_empty() {
        issues.push("Azure OpenAI deployment name not set".to_string());
    }
    if openai.system_prompt.trim().is_empty() {
        issues.push("System prompt not configured".to_string());
    }

    if openai.enable_oyd {
        let search = &config.azure_cognitive_search;
        if search.endpoint.trim().is_empty() {
            issues.push("Cognitive Search endpoint not set (required for OYD)".to_string());
        } else if !is_valid_url(&search.endpoint) {
            issues.push("Cognitive Search endpoint is not a valid URL".to_string());
        }
        if search.api_key.trim().is_empty() {
            issues.push(format!(
                "Cognitive Search API key missing (set {})",
                secrets::SEARCH_KEY
            ));
        }
        if search.index_name.trim().is_empty() {
            issues.push("Cognitive Search index name not set".to_string());
        }
    }

    if config.speech_config.stt_locales.trim().is_empty() {
        issues.push("Speech-to-text locales not configured".to_string());
    }
    if config.speech_config.tts_voice.trim().is_empty() {
        issues.push("Text-to-speech voice not configured".to_string());
    }
    if config.avatar_config.character.trim().is_empty() {
        issues.push("Avatar character not set".to_string());
    }
    if config.avatar_config.style.trim().is_empty() {
        issues.push("Avatar style not set".to_string());
    }

    issues
}

fn is_valid_url(value: &str) -> bool {
    Url::parse(value.trim()).is_ok()
}

/// Issues that prevent a session from working at all
pub fn is_critical(issue: &str) -> bool {
    issue.contains("API key missing")
        || issue.contains("endpoint not set")
        || issue.contains("deployment name not set")
}

/// Validation outcome split by severity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub critical: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::from_issues(validate(config))
    }

    pub fn from_issues(issues: Vec<String>) -> Self {
        let (critical, warnings) = issues.into_iter().partition(|i| is_critical(i));
        Self { critical, warnings }
    }

    pub fn is_valid(&self) -> bool {
        self.critical.is_empty() && self.warnings.is_empty()
    }

    /// One-line readiness summary for the status display
    pub fn status_line(&self) -> String {
        if !self.critical.is_empty() {
            format!("Critical configuration errors: {}", self.critical.join(", "))
        } else if !self.warnings.is_empty() {
            format!(
                "Configuration warnings: {} - App may still work",
                self.warnings.join(", ")
            )
        } else {
            "Configuration valid - Ready to start conversation!".to_string()
        }
    }
}
