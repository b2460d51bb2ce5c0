//! Azure Speech WebSocket recognizer
//!
//! One connection per recognition run. Microphone audio arrives on a
//! broadcast [`MicrophoneFeed`] and is framed into `audio` messages; service
//! messages are mapped to [`RecognitionEvent`]s.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use avatar_agent_config::constants::timeouts;
use avatar_agent_config::SpeechServiceConfig;
use avatar_agent_core::{RecognitionEvent, RecognitionRequest, SpeechRecognizer};

use super::protocol::{self, ServiceMessage};
use crate::SpeechError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const MICROPHONE_BUFFER: usize = 256;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Recognition endpoint for the speech resource
pub fn recognizer_url(speech: &SpeechServiceConfig) -> String {
    match speech.private_endpoint_host() {
        Some(host) => format!("wss://{}/stt/speech/universal/v2", host),
        None => format!(
            "wss://{}.stt.speech.microsoft.com/speech/universal/v2",
            speech.region
        ),
    }
}

/// Fan-out of raw microphone audio (16 kHz mono PCM16)
#[derive(Clone)]
pub struct MicrophoneFeed {
    tx: broadcast::Sender<Bytes>,
}

impl MicrophoneFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MICROPHONE_BUFFER);
        Self { tx }
    }

    /// Publish one chunk; dropped silently when nobody is listening
    pub fn push(&self, chunk: Bytes) {
        let _ = self.tx.send(chunk);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MicrophoneFeed {
    fn default() -> Self {
        Self::new()
    }
}

struct RunningStream {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct AzureSpeechRecognizer {
    url: String,
    api_key: String,
    microphone: MicrophoneFeed,
    running: Mutex<Option<RunningStream>>,
}

impl AzureSpeechRecognizer {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        microphone: MicrophoneFeed,
    ) -> Result<Self, SpeechError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SpeechError::MissingCredential(
                "Azure Speech API key not configured".to_string(),
            ));
        }
        Ok(Self {
            url: url.into(),
            api_key,
            microphone,
            running: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<WsStream, SpeechError> {
        let connection_id = protocol::request_id();
        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Ocp-Apim-Subscription-Key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| SpeechError::Protocol(format!("Invalid API key header: {}", e)))?,
        );
        headers.insert(
            "X-ConnectionId",
            HeaderValue::from_str(&connection_id)
                .map_err(|e| SpeechError::Protocol(e.to_string()))?,
        );

        info!(url = %self.url, "Connecting to speech recognition service");
        let (ws_stream, response) = timeout(
            Duration::from_millis(timeouts::CONNECT_TIMEOUT_MS),
            connect_async(request),
        )
        .await
        .map_err(|_| SpeechError::Network("Speech recognition connect timed out".to_string()))??;
        debug!(status = %response.status(), "Speech recognition WebSocket connected");
        Ok(ws_stream)
    }
}

/// Map a phrase status to an event; `None` for statuses that carry nothing
fn phrase_event(status: &str, text: String) -> Option<RecognitionEvent> {
    match status {
        "Success" => Some(RecognitionEvent::Recognized { text }),
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => {
            Some(RecognitionEvent::Recognized { text: String::new() })
        }
        "EndOfDictation" => None,
        other => Some(RecognitionEvent::Canceled {
            reason: other.to_string(),
        }),
    }
}

async fn run_stream(
    ws_stream: WsStream,
    mut microphone: broadcast::Receiver<Bytes>,
    events: mpsc::Sender<RecognitionEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
    request_id: String,
) {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut header_sent = false;

    loop {
        tokio::select! {
            chunk = microphone.recv() => match chunk {
                Ok(chunk) => {
                    if !header_sent {
                        let header = match protocol::wav_header() {
                            Ok(h) => h,
                            Err(e) => {
                                error!("Failed to build WAV header: {}", e);
                                break;
                            }
                        };
                        let frame = protocol::audio_message(&request_id, &header);
                        if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                            error!("Failed to send audio header: {}", e);
                            let _ = events.send(RecognitionEvent::Canceled { reason: e.to_string() }).await;
                            break;
                        }
                        header_sent = true;
                    }
                    let frame = protocol::audio_message(&request_id, &chunk);
                    if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                        error!("Failed to send audio: {}", e);
                        let _ = events.send(RecognitionEvent::Canceled { reason: e.to_string() }).await;
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Microphone feed lagged; audio chunks dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Microphone feed closed");
                    break;
                }
            },
            message = ws_rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let event = match protocol::parse_service_message(text.as_str()) {
                        Ok(ServiceMessage::Hypothesis { text }) => {
                            Some(RecognitionEvent::Recognizing { text })
                        }
                        Ok(ServiceMessage::Phrase { status, text }) => phrase_event(&status, text),
                        Ok(ServiceMessage::TurnEnd) => {
                            debug!("Recognition turn ended");
                            None
                        }
                        Ok(ServiceMessage::Other { path }) => {
                            debug!(path = %path, "Ignoring service message");
                            None
                        }
                        Err(e) => {
                            warn!("Unparseable service message: {}", e);
                            None
                        }
                    };
                    if let Some(event) = event {
                        if events.send(event).await.is_err() {
                            debug!("Recognition event receiver dropped");
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Speech recognition WebSocket closed by service");
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Connection closed".to_string());
                    let _ = events.send(RecognitionEvent::Canceled { reason }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Speech recognition WebSocket error: {}", e);
                    let _ = events.send(RecognitionEvent::Canceled { reason: e.to_string() }).await;
                    break;
                }
                None => {
                    info!("Speech recognition WebSocket stream ended");
                    break;
                }
            },
            _ = &mut shutdown_rx => {
                debug!("Stopping speech recognition stream");
                let end_of_audio = protocol::audio_message(&request_id, &[]);
                let _ = ws_tx.send(Message::Binary(end_of_audio)).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = events.send(RecognitionEvent::SessionStopped).await;
}

#[async_trait]
impl SpeechRecognizer for AzureSpeechRecognizer {
    async fn start(
        &self,
        request: RecognitionRequest,
        events: mpsc::Sender<RecognitionEvent>,
    ) -> avatar_agent_core::Result<()> {
        if self.running.lock().is_some() {
            return Err(SpeechError::Stt("Recognition already running".to_string()).into());
        }

        let mut ws_stream = self.connect().await?;
        let request_id = protocol::request_id();
        ws_stream
            .send(Message::Text(protocol::speech_config_message(&request_id).into()))
            .await
            .map_err(SpeechError::from)?;
        ws_stream
            .send(Message::Text(
                protocol::speech_context_message(&request_id, &request.locales).into(),
            ))
            .await
            .map_err(SpeechError::from)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_stream(
            ws_stream,
            self.microphone.subscribe(),
            events,
            shutdown_rx,
            request_id,
        ));
        *self.running.lock() = Some(RunningStream {
            shutdown: shutdown_tx,
            task,
        });
        info!(locales = ?request.locales, continuous = request.continuous, "Speech recognition started");
        Ok(())
    }

    async fn stop(&self) -> avatar_agent_core::Result<()> {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Ok(());
        };
        let _ = running.shutdown.send(());
        match timeout(SHUTDOWN_TIMEOUT, running.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SpeechError::Stt(format!("Recognition task failed: {}", e)).into()),
            Err(_) => Err(SpeechError::Stt("Recognition did not stop in time".to_string()).into()),
        }
    }

    fn close(&self) {
        if let Some(running) = self.running.lock().take() {
            running.task.abort();
        }
    }
}

/// Builds recognizers on demand
pub trait RecognizerFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Arc<dyn SpeechRecognizer>, SpeechError>;
}

pub struct AzureRecognizerFactory {
    url: String,
    api_key: String,
    microphone: MicrophoneFeed,
}

impl AzureRecognizerFactory {
    pub fn new(speech: &SpeechServiceConfig, microphone: MicrophoneFeed) -> Self {
        Self {
            url: recognizer_url(speech),
            api_key: speech.api_key.clone(),
            microphone,
        }
    }
}

impl RecognizerFactory for AzureRecognizerFactory {
    fn create(&self) -> Result<Arc<dyn SpeechRecognizer>, SpeechError> {
        let recognizer =
            AzureSpeechRecognizer::new(&self.url, &self.api_key, self.microphone.clone())?;
        Ok(Arc::new(recognizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech() -> SpeechServiceConfig {
        SpeechServiceConfig {
            region: "westus2".to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_public_recognizer_url() {
        assert_eq!(
            recognizer_url(&speech()),
            "wss://westus2.stt.speech.microsoft.com/speech/universal/v2"
        );
    }

    #[test]
    fn test_private_recognizer_url() {
        let mut config = speech();
        config.enable_private_endpoint = true;
        config.private_endpoint = "https://my-speech.cognitiveservices.azure.com/".to_string();
        assert_eq!(
            recognizer_url(&config),
            "wss://my-speech.cognitiveservices.azure.com/stt/speech/universal/v2"
        );
    }

    #[test]
    fn test_factory_rejects_missing_key() {
        let mut config = speech();
        config.api_key = String::new();
        let factory = AzureRecognizerFactory::new(&config, MicrophoneFeed::new());
        let err = factory.create().err().unwrap();
        assert_eq!(err.to_string(), "Azure Speech API key not configured");
    }

    #[test]
    fn test_phrase_statuses() {
        assert_eq!(
            phrase_event("Success", "hi".to_string()),
            Some(RecognitionEvent::Recognized { text: "hi".to_string() })
        );
        assert_eq!(
            phrase_event("InitialSilenceTimeout", "ignored".to_string()),
            Some(RecognitionEvent::Recognized { text: String::new() })
        );
        assert_eq!(phrase_event("EndOfDictation", String::new()), None);
        assert!(matches!(
            phrase_event("Error", String::new()),
            Some(RecognitionEvent::Canceled { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let recognizer = AzureSpeechRecognizer::new("wss://x", "k", MicrophoneFeed::new()).unwrap();
        assert!(recognizer.stop().await.is_ok());
        recognizer.close();
    }
}
