//! Avatar session orchestration
//!
//! `AvatarSession` owns everything that outlives a single connection (the
//! resolved configuration, the speak queue, the chat controller and its
//! history) and rebuilds the per-connection parts (media session, speech
//! recognition, service clients) from a configuration snapshot on every
//! `start`. Component events are mapped into [`SessionEvent`]s on one
//! broadcast channel.
//!
//! ```text
//!  microphone ─▶ SpeechSessionManager ─▶ utterances ─▶ ChatController
//!                                                        │
//!  MediaSession ◀─ synthesizer slot ◀─ SpeakQueue ◀──────┘
//! ```

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use avatar_agent_config::{
    missing_keys, validate, AppConfig, BehaviorConfig, KeyStore, LoadStatus, ResolvedConfig,
    SecretKey, Settings, ValidationReport,
};
use avatar_agent_core::SynthesizerFactory;
use avatar_agent_llm::{CompletionBackend, CompletionClient, CompletionConfig};
use avatar_agent_pipeline::{
    AzureRecognizerFactory, AzureSynthesizerFactory, MicrophoneFeed, RecognizerFactory,
    SpeakEvent, SpeakQueue, SpeakQueueConfig, SpeechEvent, SpeechSessionManager,
    SynthesizedAudio,
};
use avatar_agent_tools::{MermaidChartTool, RenderedChart, ToolRegistry};
use avatar_agent_transport::{
    HttpRelayTokenSource, HttpSignaler, MediaEvent, MediaSession, MediaSessionConfig,
    MediaState, PeerConnector, RelayTokenSource, WebRtcConnector,
};

use crate::controller::{ChatController, ControllerConfig, InteractionTracker};
use crate::conversation::DocumentContext;
use crate::events::SessionEvent;
use crate::AgentError;

/// Service clients for one connection
pub struct SessionServices {
    pub relay: Arc<dyn RelayTokenSource>,
    pub connector: Arc<dyn PeerConnector>,
    pub synthesizers: Arc<dyn SynthesizerFactory>,
    pub recognizers: Arc<dyn RecognizerFactory>,
    pub backend: Arc<dyn CompletionBackend>,
}

/// Builds service clients from a configuration snapshot
pub trait ServiceFactory: Send + Sync + 'static {
    fn build(&self, config: &AppConfig) -> Result<SessionServices, AgentError>;
}

/// Azure Speech, Azure OpenAI and WebRTC clients
pub struct AzureServices {
    settings: Settings,
    microphone: MicrophoneFeed,
    audio: broadcast::Sender<SynthesizedAudio>,
}

impl AzureServices {
    pub fn new(
        settings: Settings,
        microphone: MicrophoneFeed,
        audio: broadcast::Sender<SynthesizedAudio>,
    ) -> Self {
        Self {
            settings,
            microphone,
            audio,
        }
    }
}

impl ServiceFactory for AzureServices {
    fn build(&self, config: &AppConfig) -> Result<SessionServices, AgentError> {
        let completion =
            CompletionConfig::from_app_config(config, &self.settings.completion.api_version)
                .with_timeout(Duration::from_secs(self.settings.completion.timeout_secs));
        let signaler = HttpSignaler::new(
            self.settings.signaling.clone(),
            config.azure_openai.api_key.clone(),
        );

        Ok(SessionServices {
            relay: Arc::new(HttpRelayTokenSource::new(&config.azure_speech)),
            connector: Arc::new(WebRtcConnector::new(Arc::new(signaler))),
            synthesizers: Arc::new(AzureSynthesizerFactory::new(
                &config.azure_speech,
                &config.speech_config,
                self.audio.clone(),
            )),
            recognizers: Arc::new(AzureRecognizerFactory::new(
                &config.azure_speech,
                self.microphone.clone(),
            )),
            backend: Arc::new(CompletionClient::new(completion)?),
        })
    }
}

/// Fail fast, before any network call, when a required setting is missing
pub fn check_preconditions(config: &AppConfig) -> Result<(), AgentError> {
    let missing = |message: &str| Err(AgentError::Precondition(message.to_string()));

    let speech = &config.azure_speech;
    if speech.api_key.trim().is_empty() {
        return missing("Azure Speech API key is missing - please set AZURE_SPEECH_API_KEY environment variable or add to config.json");
    }
    if speech.enable_private_endpoint && speech.private_endpoint_host().is_none() {
        return missing("Private endpoint is enabled but URL not configured - please set privateEndpoint in config.json");
    }

    let openai = &config.azure_openai;
    if openai.endpoint.trim().is_empty() {
        return missing("Azure OpenAI endpoint is missing - please set endpoint in config.json");
    }
    if openai.api_key.trim().is_empty() {
        return missing("Azure OpenAI API key is missing - please set AZURE_OPENAI_API_KEY environment variable or add to config.json");
    }
    if openai.deployment_name.trim().is_empty() {
        return missing("Azure OpenAI deployment name is missing - please set deploymentName in config.json");
    }

    if config.grounding_enabled() {
        let search = &config.azure_cognitive_search;
        if search.endpoint.trim().is_empty() {
            return missing("Cognitive Search endpoint is missing - please set endpoint in config.json (required for On Your Data)");
        }
        if search.api_key.trim().is_empty() {
            return missing("Cognitive Search API key is missing - please set AZURE_SEARCH_API_KEY environment variable (required for On Your Data)");
        }
        if search.index_name.trim().is_empty() {
            return missing("Cognitive Search index name is missing - please set indexName in config.json (required for On Your Data)");
        }
    }
    Ok(())
}

/// Readiness summary for clients
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    pub load_status: String,
    pub status: String,
    pub critical: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_keys: Vec<String>,
}

fn queue_config(config: &AppConfig, behavior: &BehaviorConfig) -> SpeakQueueConfig {
    SpeakQueueConfig {
        voice: config.speech_config.tts_voice.clone(),
        align_display_with_speech: behavior.enable_display_text_alignment_with_speech,
    }
}

/// Per-connection handles, cheap to clone out of the runtime slot
#[derive(Clone)]
struct Connection {
    media: MediaSession,
    speech: SpeechSessionManager,
    locales: Vec<String>,
    continuous: bool,
    idle_video: bool,
}

struct Runtime {
    connection: Connection,
    tasks: Vec<JoinHandle<()>>,
}

struct Query {
    text: String,
    image_url: Option<String>,
}

struct SessionInner {
    settings: Settings,
    config: RwLock<AppConfig>,
    load: LoadStatus,
    key_store: Arc<KeyStore>,
    services: Arc<dyn ServiceFactory>,
    synthesizer: avatar_agent_core::SynthesizerSlot,
    queue: SpeakQueue,
    controller: Arc<ChatController>,
    runtime: Mutex<Option<Runtime>>,
    events: broadcast::Sender<SessionEvent>,
}

/// One avatar conversation
#[derive(Clone)]
pub struct AvatarSession {
    inner: Arc<SessionInner>,
}

impl AvatarSession {
    /// Build the long-lived parts of a session
    ///
    /// Must be called from within a Tokio runtime; event forwarding tasks are
    /// spawned immediately.
    pub fn new(
        settings: Settings,
        resolved: ResolvedConfig,
        key_store: Arc<KeyStore>,
        services: Arc<dyn ServiceFactory>,
    ) -> Result<Self, AgentError> {
        let ResolvedConfig { config, load } = resolved;
        let initial = services.build(&config)?;

        let (events, _) = broadcast::channel(512);
        let (charts, chart_rx) = broadcast::channel(16);

        let synthesizer: avatar_agent_core::SynthesizerSlot = Arc::new(RwLock::new(None));
        let queue = SpeakQueue::new(queue_config(&config, &settings.behavior), synthesizer.clone());

        let mut tools = ToolRegistry::new();
        tools.register(MermaidChartTool::new(charts));

        let controller = Arc::new(ChatController::new(
            ControllerConfig::from_config(&config, &settings.behavior),
            initial.backend,
            Arc::new(tools),
            queue.clone(),
            events.clone(),
        ));

        tokio::spawn(forward_speak_events(queue.subscribe(), events.clone()));
        tokio::spawn(forward_charts(chart_rx, events.clone()));

        Ok(Self {
            inner: Arc::new(SessionInner {
                settings,
                config: RwLock::new(config),
                load,
                key_store,
                services,
                synthesizer,
                queue,
                controller,
                runtime: Mutex::new(None),
                events,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> AppConfig {
        self.inner.config.read().clone()
    }

    pub fn controller(&self) -> &Arc<ChatController> {
        &self.inner.controller
    }

    pub fn is_started(&self) -> bool {
        self.inner.runtime.lock().is_some()
    }

    pub fn media_state(&self) -> Option<MediaState> {
        self.inner.connection().map(|c| c.media.state())
    }

    pub fn config_status(&self) -> ConfigStatus {
        let config = self.inner.config.read().clone();
        let report = ValidationReport::from_config(&config);
        ConfigStatus {
            load_status: self.inner.load.message.clone(),
            status: report.status_line(),
            critical: report.critical,
            warnings: report.warnings,
            missing_keys: missing_keys(&config)
                .into_iter()
                .map(|k| k.env_name().to_string())
                .collect(),
        }
    }

    /// Start (or restart) the avatar connection
    ///
    /// Configuration problems and connection failures are returned to the
    /// caller and also reported as a status event.
    pub async fn start(&self) -> Result<(), AgentError> {
        let inner = &self.inner;
        let config = inner.config.read().clone();
        if let Err(e) = check_preconditions(&config) {
            inner.emit(SessionEvent::status(format!("❌ {}", e)));
            return Err(e);
        }

        let previous = inner.runtime.lock().take();
        if let Some(previous) = previous {
            tracing::info!("Replacing running avatar session");
            inner.shutdown(previous).await;
        }

        let services = inner.services.build(&config)?;
        let behavior = &inner.settings.behavior;
        inner
            .controller
            .reconfigure(
                ControllerConfig::from_config(&config, behavior),
                services.backend.clone(),
            )
            .await;
        inner.queue.set_config(queue_config(&config, behavior));

        let media = MediaSession::new(
            MediaSessionConfig::from_config(&config, &inner.settings.timing),
            services.relay,
            services.connector,
            services.synthesizers,
            inner.synthesizer.clone(),
            Arc::new(inner.queue.clone()),
        );
        let speech = SpeechSessionManager::new(services.recognizers);
        media.set_recognition(Arc::new(speech.clone()));
        inner
            .controller
            .set_interaction_tracker(Some(Arc::new(media.clone()) as Arc<dyn InteractionTracker>));
        inner.controller.ensure_history().await;

        let connection = Connection {
            media: media.clone(),
            speech: speech.clone(),
            locales: config.speech_config.locales(),
            continuous: config.speech_config.continuous_conversation,
            idle_video: config.avatar_config.use_local_video_for_idle,
        };

        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(inner);
        let tasks = vec![
            tokio::spawn(forward_media_events(
                media.subscribe(),
                inner.queue.clone(),
                behavior.repeat_speaking_sentence_after_reconnection,
                inner.events.clone(),
            )),
            tokio::spawn(forward_speech_events(
                speech.subscribe(),
                query_tx,
                inner.events.clone(),
            )),
            tokio::spawn(run_queries(query_rx, weak)),
            media.spawn_watchdog(),
        ];
        *inner.runtime.lock() = Some(Runtime {
            connection: connection.clone(),
            tasks,
        });

        inner.emit(SessionEvent::status("Starting conversation..."));
        if let Err(e) = media.start().await {
            inner.emit(SessionEvent::status(format!(
                "❌ Error starting conversation: {}",
                e
            )));
            return Err(e.into());
        }

        if connection.continuous && !connection.idle_video {
            match speech.start(connection.locales.clone(), true).await {
                Ok(()) => {
                    inner.emit(SessionEvent::Microphone { listening: true });
                    inner.emit(SessionEvent::status(
                        "🎤 Listening... Start speaking to chat with the avatar!",
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to start continuous recognition");
                    inner.emit(SessionEvent::status(format!(
                        "❌ Error starting speech recognition: {}",
                        e
                    )));
                }
            }
        } else {
            inner.emit(SessionEvent::status("Ready to chat"));
        }
        Ok(())
    }

    /// User stop: tear down the connection and clear pending speech
    pub async fn stop(&self) {
        let runtime = self.inner.runtime.lock().take();
        match runtime {
            Some(runtime) => self.inner.shutdown(runtime).await,
            None => tracing::debug!("Stop requested without a running session"),
        }
        self.inner.queue.stop().await;
        self.inner.controller.set_interaction_tracker(None);
        self.inner.emit(SessionEvent::SessionState {
            state: MediaState::Closed,
        });
        self.inner
            .emit(SessionEvent::status("Ready to start conversation"));
    }

    /// Start or stop listening; returns whether the microphone is now on
    pub async fn toggle_microphone(&self) -> Result<bool, AgentError> {
        let connection = self.inner.connection().ok_or(AgentError::NotStarted)?;
        connection.media.touch_interaction();

        if connection.speech.is_running().await {
            connection.speech.stop().await;
            self.inner.emit(SessionEvent::Microphone { listening: false });
            return Ok(false);
        }

        if connection.idle_video && !connection.media.is_active() {
            let media = connection.media.clone();
            let events = self.inner.events.clone();
            tokio::spawn(async move {
                if let Err(e) = media.ensure_connected().await {
                    let _ = events.send(SessionEvent::status(format!(
                        "❌ Error starting conversation: {}",
                        e
                    )));
                }
            });
        }

        if let Err(e) = connection
            .speech
            .start(connection.locales.clone(), connection.continuous)
            .await
        {
            self.inner.emit(SessionEvent::status(format!(
                "❌ Error starting speech recognition: {}",
                e
            )));
            return Err(e.into());
        }
        self.inner.emit(SessionEvent::Microphone { listening: true });
        Ok(true)
    }

    /// Typed query
    pub async fn submit_query(&self, text: &str, image_url: Option<&str>) -> Result<(), AgentError> {
        self.inner.submit_query(text, image_url).await
    }

    /// Silence the avatar and drop queued sentences
    pub async fn stop_speaking(&self) {
        if let Some(connection) = self.inner.connection() {
            connection.media.touch_interaction();
        }
        self.inner.queue.stop().await;
    }

    pub async fn clear_history(&self) {
        self.inner.controller.clear_history().await;
        self.inner
            .emit(SessionEvent::status("📝 Conversation history cleared"));
    }

    pub async fn set_document(&self, document: DocumentContext) {
        self.inner.controller.set_document(Some(document)).await;
    }

    pub async fn clear_document(&self) {
        self.inner.controller.set_document(None).await;
    }

    /// Persist user-supplied secrets and apply them to the live configuration
    ///
    /// Unknown names and blank values are ignored. Returns the number saved.
    pub fn save_keys(&self, keys: &HashMap<String, String>) -> Result<usize, AgentError> {
        let mut saved = 0;
        {
            let mut config = self.inner.config.write();
            for (name, value) in keys {
                let Some(key) = SecretKey::from_env_name(name) else {
                    tracing::warn!(key = %name, "Ignoring unknown key name");
                    continue;
                };
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                self.inner.key_store.set(key, value)?;
                key.write(&mut *config, value);
                saved += 1;
            }
        }

        if saved == 0 {
            self.inner
                .emit(SessionEvent::status("ℹ️ No API keys were provided"));
            return Ok(0);
        }

        self.inner.emit(SessionEvent::status(format!(
            "✅ {} API key(s) saved successfully!",
            saved
        )));
        let issues = validate(&self.inner.config.read());
        let status = if issues.is_empty() {
            "✅ Configuration complete - Ready to start conversation!".to_string()
        } else {
            let remaining: Vec<_> = issues
                .into_iter()
                .filter(|i| !i.contains("API key missing"))
                .take(2)
                .collect();
            if remaining.is_empty() {
                "✅ All API keys configured - Ready to start conversation!".to_string()
            } else {
                format!(
                    "⚠️ Some configuration issues remain: {}",
                    remaining.join(", ")
                )
            }
        };
        self.inner.emit(SessionEvent::status(status));
        Ok(saved)
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn connection(&self) -> Option<Connection> {
        self.runtime.lock().as_ref().map(|r| r.connection.clone())
    }

    async fn shutdown(&self, runtime: Runtime) {
        for task in &runtime.tasks {
            task.abort();
        }
        runtime.connection.media.stop().await;
        runtime.connection.speech.stop().await;
    }

    async fn submit_query(&self, text: &str, image_url: Option<&str>) -> Result<(), AgentError> {
        let connection = self.connection().ok_or(AgentError::NotStarted)?;
        if connection.idle_video && !connection.media.is_active() {
            if let Err(e) = connection.media.ensure_connected().await {
                self.emit(SessionEvent::status(format!(
                    "❌ Error starting conversation: {}",
                    e
                )));
            }
        }
        self.controller.handle_user_query(text, image_url).await
    }
}

/// Process recognized utterances one at a time, in arrival order
async fn run_queries(mut queries: mpsc::UnboundedReceiver<Query>, session: Weak<SessionInner>) {
    while let Some(query) = queries.recv().await {
        let Some(inner) = session.upgrade() else {
            break;
        };
        if let Err(e) = inner
            .submit_query(&query.text, query.image_url.as_deref())
            .await
        {
            tracing::debug!(error = %e, "Spoken query failed");
        }
    }
}

async fn forward_speech_events(
    mut rx: broadcast::Receiver<SpeechEvent>,
    queries: mpsc::UnboundedSender<Query>,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Speech event consumer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let mapped = match event {
            SpeechEvent::Recognizing { text } => SessionEvent::Recognizing { text },
            SpeechEvent::Utterance { text } => {
                tracing::info!(text = %text, "Recognized utterance");
                let status =
                    SessionEvent::status(format!("🗣️ You said: \"{}\" - Processing...", text));
                if queries
                    .send(Query {
                        text,
                        image_url: None,
                    })
                    .is_err()
                {
                    break;
                }
                status
            }
            SpeechEvent::Stopped => SessionEvent::Microphone { listening: false },
            SpeechEvent::Canceled { reason } => {
                tracing::warn!(reason = %reason, "Speech recognition canceled");
                SessionEvent::status(format!("❌ Speech recognition canceled: {}", reason))
            }
        };
        let _ = events.send(mapped);
    }
}

async fn forward_media_events(
    mut rx: broadcast::Receiver<MediaEvent>,
    queue: SpeakQueue,
    repeat_after_reconnect: bool,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Media event consumer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let mapped = match event {
            MediaEvent::StateChanged { state } => {
                if state == MediaState::Idle {
                    queue.abandon_interrupted();
                }
                Some(SessionEvent::SessionState { state })
            }
            MediaEvent::VideoTrackAdded => {
                queue.resume_after_reconnect(repeat_after_reconnect);
                None
            }
            MediaEvent::SubtitleShown { text } => Some(SessionEvent::SubtitleShown { text }),
            MediaEvent::SubtitleHidden => Some(SessionEvent::SubtitleHidden),
            MediaEvent::IdleFallback { visible } => Some(SessionEvent::IdleFallback { visible }),
            MediaEvent::SinkBound { kind, track_id } => {
                tracing::debug!(?kind, track_id = %track_id, "Media sink bound");
                None
            }
            MediaEvent::SinkRemoved { kind, track_id } => {
                tracing::debug!(?kind, track_id = %track_id, "Media sink removed");
                None
            }
            MediaEvent::VideoPlaying => None,
        };
        if let Some(mapped) = mapped {
            let _ = events.send(mapped);
        }
    }
}

async fn forward_speak_events(
    mut rx: broadcast::Receiver<SpeakEvent>,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(SpeakEvent::DisplayText { text }) => {
                let _ = events.send(SessionEvent::DisplayText { text });
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Speak event consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn forward_charts(
    mut rx: broadcast::Receiver<RenderedChart>,
    events: broadcast::Sender<SessionEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(chart) => {
                tracing::info!(id = %chart.id, chart_type = %chart.chart_type, "Chart rendered");
                let _ = events.send(SessionEvent::Chart { chart });
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Chart consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
