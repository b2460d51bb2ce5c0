//! Azure OpenAI chat completions client
//!
//! Builds the streaming request (history, tool definitions, optional grounding
//! data source) and returns the raw response body as a byte stream. Parsing is
//! left to [`crate::StreamParser`] so the client stays mockable behind
//! [`CompletionBackend`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;

use avatar_agent_config::constants::{endpoints, timeouts};
use avatar_agent_config::AppConfig;
use avatar_agent_core::{Message, ToolDefinition};

use crate::LlmError;

/// Raw response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// Deployment endpoint and credentials
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: api_version.into(),
            timeout: Duration::from_secs(timeouts::COMPLETION_TIMEOUT_SECS),
        }
    }

    /// From the resolved configuration document
    pub fn from_app_config(config: &AppConfig, api_version: &str) -> Self {
        Self::azure(
            config.azure_openai.endpoint.clone(),
            config.azure_openai.api_key.clone(),
            config.azure_openai.deployment_name.clone(),
            api_version,
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Chat completions URL; grounded requests go through the extensions path
    pub fn chat_url(&self, grounded: bool) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let path = if grounded {
            "extensions/chat/completions"
        } else {
            "chat/completions"
        };
        let version = if self.api_version.is_empty() {
            endpoints::COMPLETION_API_VERSION
        } else {
            self.api_version.as_str()
        };
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            base, self.deployment, path, version
        )
    }

    fn build_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| LlmError::Configuration(format!("Invalid API key header: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Grounding data source descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub parameters: DataSourceParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceParameters {
    pub endpoint: String,
    pub key: String,
    pub index_name: String,
    pub semantic_configuration: String,
    pub query_type: String,
    pub fields_mapping: FieldsMapping,
    pub in_scope: bool,
    pub role_information: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldsMapping {
    pub content_fields_separator: String,
    pub content_fields: Vec<String>,
    pub filepath_field: Option<String>,
    pub title_field: Option<String>,
    pub url_field: Option<String>,
}

impl DataSource {
    /// Cognitive search index with the system prompt as role information
    pub fn azure_search(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        index_name: impl Into<String>,
        role_information: impl Into<String>,
    ) -> Self {
        Self {
            source_type: "AzureCognitiveSearch".to_string(),
            parameters: DataSourceParameters {
                endpoint: endpoint.into(),
                key: key.into(),
                index_name: index_name.into(),
                semantic_configuration: String::new(),
                query_type: "simple".to_string(),
                fields_mapping: FieldsMapping {
                    content_fields_separator: "\n".to_string(),
                    content_fields: vec!["content".to_string()],
                    filepath_field: None,
                    title_field: Some("title".to_string()),
                    url_field: None,
                },
                in_scope: true,
                role_information: role_information.into(),
            },
        }
    }

    /// `None` unless grounding is enabled in `config`
    pub fn from_app_config(config: &AppConfig) -> Option<Self> {
        if !config.grounding_enabled() {
            return None;
        }
        let search = &config.azure_cognitive_search;
        Some(Self::azure_search(
            search.endpoint.clone(),
            search.api_key.clone(),
            search.index_name.clone(),
            config.azure_openai.system_prompt.clone(),
        ))
    }
}

/// Streaming completion request body
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    #[serde(rename = "dataSources", skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Vec<DataSource>>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            data_sources: None,
            messages,
            tools,
            tool_choice: "auto".to_string(),
            stream: true,
        }
    }

    pub fn with_data_sources(mut self, data_sources: Vec<DataSource>) -> Self {
        if !data_sources.is_empty() {
            self.data_sources = Some(data_sources);
        }
        self
    }

    pub fn is_grounded(&self) -> bool {
        self.data_sources.is_some()
    }
}

/// Source of streamed completion bodies
#[async_trait]
pub trait CompletionBackend: Send + Sync + 'static {
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<ByteStream, LlmError>;
}

/// HTTP implementation
pub struct CompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<ByteStream, LlmError> {
        let url = self.config.chat_url(request.is_grounded());
        tracing::debug!(
            url = %url,
            messages = request.messages.len(),
            grounded = request.is_grounded(),
            "Sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .headers(self.config.build_headers()?)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api(format!(
                "Chat API response status: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(LlmError::from)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CompletionConfig {
        CompletionConfig::azure(
            "https://example.openai.azure.com/",
            "secret",
            "gpt-4.1",
            "2023-06-01-preview",
        )
    }

    #[test]
    fn test_standard_url() {
        assert_eq!(
            config().chat_url(false),
            "https://example.openai.azure.com/openai/deployments/gpt-4.1/chat/completions?api-version=2023-06-01-preview"
        );
    }

    #[test]
    fn test_grounded_url() {
        assert_eq!(
            config().chat_url(true),
            "https://example.openai.azure.com/openai/deployments/gpt-4.1/extensions/chat/completions?api-version=2023-06-01-preview"
        );
    }

    #[test]
    fn test_headers() {
        let headers = config().build_headers().unwrap();
        assert_eq!(headers.get("api-key").unwrap(), "secret");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_ungrounded_body_has_no_data_sources() {
        let request = CompletionRequest::new(vec![Message::user("hi")], vec![]);
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("dataSources").is_none());
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["stream"], true);
        assert!(!request.is_grounded());
    }

    #[test]
    fn test_grounded_body_shape() {
        let request = CompletionRequest::new(vec![Message::user("hi")], vec![]).with_data_sources(
            vec![DataSource::azure_search("https://s.net", "k", "idx", "prompt")],
        );
        let body = serde_json::to_value(&request).unwrap();
        let params = &body["dataSources"][0]["parameters"];
        assert_eq!(body["dataSources"][0]["type"], "AzureCognitiveSearch");
        assert_eq!(params["indexName"], "idx");
        assert_eq!(params["queryType"], "simple");
        assert_eq!(params["inScope"], true);
        assert_eq!(params["roleInformation"], "prompt");
        assert!(params["fieldsMapping"]["filepathField"].is_null());
        assert_eq!(params["fieldsMapping"]["titleField"], "title");
        assert!(request.is_grounded());
    }

    #[test]
    fn test_data_source_requires_grounding() {
        let mut app = AppConfig::fallback();
        assert!(DataSource::from_app_config(&app).is_none());
        app.azure_openai.enable_oyd = true;
        assert!(DataSource::from_app_config(&app).is_some());
    }
}
