//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;

use avatar_agent_agent::{AvatarSession, AzureServices, ServiceFactory};
use avatar_agent_config::{ConfigResolver, KeyStore, ResolvedConfig, Settings, ValidationReport};
use avatar_agent_pipeline::{MicrophoneFeed, SynthesizedAudio};

use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub session: AvatarSession,
    /// Client microphone audio, consumed by the recognizer
    pub microphone: MicrophoneFeed,
    /// Synthesized speech, pushed to WebSocket clients as binary frames
    pub audio: broadcast::Sender<SynthesizedAudio>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Resolve the configuration document and build the Azure-backed session
    pub async fn initialize(settings: Settings) -> Result<Self, ServerError> {
        let key_store = Arc::new(KeyStore::open(&settings.document.key_store_path)?);
        let resolved = ConfigResolver::new(settings.document.location.clone(), key_store.clone())
            .resolve()
            .await;

        tracing::info!(status = %resolved.load.message, "Configuration resolved");
        let report = ValidationReport::from_config(&resolved.config);
        if report.critical.is_empty() {
            tracing::info!("{}", report.status_line());
        } else {
            tracing::warn!(critical = ?report.critical, "{}", report.status_line());
        }

        let microphone = MicrophoneFeed::new();
        let (audio, _) = broadcast::channel(64);
        let services = AzureServices::new(settings.clone(), microphone.clone(), audio.clone());

        Self::with_services(settings, resolved, key_store, Arc::new(services), microphone, audio)
    }

    /// Build state around an explicit service factory
    pub fn with_services(
        settings: Settings,
        resolved: ResolvedConfig,
        key_store: Arc<KeyStore>,
        services: Arc<dyn ServiceFactory>,
        microphone: MicrophoneFeed,
        audio: broadcast::Sender<SynthesizedAudio>,
    ) -> Result<Self, ServerError> {
        let session = AvatarSession::new(settings.clone(), resolved, key_store, services)?;
        Ok(Self {
            settings: Arc::new(settings),
            session,
            microphone,
            audio,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
