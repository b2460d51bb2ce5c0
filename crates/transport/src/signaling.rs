//! SDP offer/answer exchange with the realtime endpoint

use async_trait::async_trait;
use serde::Deserialize;

use avatar_agent_config::SignalingConfig;

use crate::TransportError;

/// Exchanges a local offer for the remote answer
#[async_trait]
pub trait Signaler: Send + Sync + 'static {
    async fn exchange(&self, offer_sdp: &str) -> Result<String, TransportError>;
}

#[derive(Deserialize)]
struct EphemeralSession {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

/// HTTP signaler: `POST {url}?model={model}` with the raw offer as body
pub struct HttpSignaler {
    client: reqwest::Client,
    config: SignalingConfig,
    api_key: String,
}

impl HttpSignaler {
    pub fn new(config: SignalingConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key: api_key.into(),
        }
    }

    pub fn exchange_url(&self) -> String {
        format!("{}?model={}", self.config.url, self.config.model)
    }

    /// Static credential, or an ephemeral one issued by the session endpoint
    async fn credential(&self) -> Result<String, TransportError> {
        if let Some(credential) = self.config.credential.as_ref().filter(|c| !c.is_empty()) {
            return Ok(credential.clone());
        }
        if self.config.session_url.is_empty() {
            return Err(TransportError::Signaling(
                "no signaling credential or session endpoint configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.config.session_url)
            .header("api-key", &self.api_key)
            .json(&serde_json::json!({ "model": self.config.model }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Signaling(format!(
                "session request failed: {}",
                status
            )));
        }
        let session: EphemeralSession = response.json().await?;
        Ok(session.client_secret.value)
    }
}

#[async_trait]
impl Signaler for HttpSignaler {
    async fn exchange(&self, offer_sdp: &str) -> Result<String, TransportError> {
        let credential = self.credential().await?;
        let response = self
            .client
            .post(self.exchange_url())
            .header("Authorization", format!("Bearer {}", credential))
            .header("Content-Type", "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Signaling(format!("SDP exchange failed: {}", status)));
        }
        let answer = response.text().await?;
        tracing::debug!(bytes = answer.len(), "Received SDP answer");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_url_carries_model() {
        let signaler = HttpSignaler::new(
            SignalingConfig {
                url: "https://example.test/v1/realtimertc".to_string(),
                model: "gpt-4o-realtime-preview-2".to_string(),
                session_url: String::new(),
                credential: Some("token".to_string()),
            },
            "key",
        );
        assert_eq!(
            signaler.exchange_url(),
            "https://example.test/v1/realtimertc?model=gpt-4o-realtime-preview-2"
        );
    }

    #[tokio::test]
    async fn test_missing_credential_source() {
        let signaler = HttpSignaler::new(
            SignalingConfig {
                url: "https://example.test".to_string(),
                model: "m".to_string(),
                session_url: String::new(),
                credential: None,
            },
            "key",
        );
        assert!(matches!(
            signaler.exchange("v=0").await,
            Err(TransportError::Signaling(_))
        ));
    }

    #[test]
    fn test_ephemeral_session_shape() {
        let session: EphemeralSession =
            serde_json::from_str(r#"{"id":"s","client_secret":{"value":"eph","expires_at":1}}"#)
                .unwrap();
        assert_eq!(session.client_secret.value, "eph");
    }
}
