//! Relay (TURN) credential client
//!
//! The avatar service hands out short-lived relay credentials; the peer
//! connection is configured with the first relay URL.

use async_trait::async_trait;
use serde::Deserialize;

use avatar_agent_config::{mask_secret, SpeechServiceConfig};

use crate::TransportError;

/// Relay URL, username and password authorizing one media session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayCredential {
    #[serde(rename = "Urls")]
    pub urls: Vec<String>,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
}

impl RelayCredential {
    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

#[async_trait]
pub trait RelayTokenSource: Send + Sync + 'static {
    async fn fetch(&self) -> Result<RelayCredential, TransportError>;
}

/// Relay token endpoint for the speech resource
pub fn relay_token_url(speech: &SpeechServiceConfig) -> String {
    match speech.private_endpoint_host() {
        Some(host) => format!("https://{}/tts/cognitiveservices/avatar/relay/token/v1", host),
        None => format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/avatar/relay/token/v1",
            speech.region
        ),
    }
}

pub struct HttpRelayTokenSource {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpRelayTokenSource {
    pub fn new(speech: &SpeechServiceConfig) -> Self {
        Self::with_url(relay_token_url(speech), speech.api_key.clone())
    }

    pub fn with_url(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    async fn request(&self) -> Result<RelayCredential, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Network(format!("relay token status {}", status)));
        }
        let credential: RelayCredential = response.json().await?;
        if credential.urls.is_empty() {
            return Err(TransportError::Network("relay token has no URLs".to_string()));
        }
        Ok(credential)
    }
}

#[async_trait]
impl RelayTokenSource for HttpRelayTokenSource {
    async fn fetch(&self) -> Result<RelayCredential, TransportError> {
        match self.request().await {
            Ok(credential) => {
                tracing::debug!(
                    url = ?credential.primary_url(),
                    username = %credential.username,
                    password = %mask_secret(&credential.password),
                    "Relay credential received"
                );
                Ok(credential)
            }
            Err(e) => {
                tracing::error!(error = %e, url = %self.url, "Relay token request failed");
                Err(TransportError::RelayToken)
            }
        }
    }
}
