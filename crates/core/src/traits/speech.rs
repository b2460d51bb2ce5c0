//! Speech processing traits
//!
//! Recognition and synthesis are driven through these seams so the session
//! orchestration never depends on a particular cloud SDK's callback shape.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::Instant;
use tokio::sync::mpsc;

/// Parameters for one recognition run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRequest {
    /// Candidate locales for continuous language identification
    pub locales: Vec<String>,
    /// Keep listening after the first finalized phrase
    pub continuous: bool,
}

/// Raw events produced by a recognizer backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Partial hypothesis for UI feedback
    Recognizing { text: String },
    /// Finalized phrase; may be empty when only silence was heard
    Recognized { text: String },
    /// Backend gave up; the run is over
    Canceled { reason: String },
    SessionStopped,
}

/// Speech-to-text stream
///
/// Implementations:
/// - `AzureSpeechRecognizer` - Azure Speech WebSocket protocol
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Begin recognition, delivering events on `events` until stopped
    async fn start(
        &self,
        request: RecognitionRequest,
        events: mpsc::Sender<RecognitionEvent>,
    ) -> Result<()>;

    /// Request graceful shutdown of the running stream
    async fn stop(&self) -> Result<()>;

    /// Release all resources held by the recognizer
    fn close(&self);
}

/// How a synthesis request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Completed,
    Canceled { reason: String },
}

/// Text-to-speech (talking avatar) backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one SSML document, resolving once playback finished
    async fn speak_ssml(&self, ssml: &str) -> Result<SynthesisOutcome>;

    /// Cancel whatever is being spoken
    async fn stop_speaking(&self) -> Result<()>;

    /// Release the handle
    async fn close(&self);
}

/// Builds a fresh synthesizer for each media connection
pub trait SynthesizerFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Arc<dyn SpeechSynthesizer>>;
}

/// Shared, replaceable synthesizer handle
///
/// The media session installs a new synthesizer on every connection and
/// clears it on teardown; the speak queue reads whatever is current.
pub type SynthesizerSlot = Arc<RwLock<Option<Arc<dyn SpeechSynthesizer>>>>;

/// Read-only view of speaking activity used by the session watchdogs
pub trait SpeechActivity: Send + Sync + 'static {
    fn is_speaking(&self) -> bool;

    /// Text of the utterance in flight, empty when idle
    fn speaking_text(&self) -> String;

    /// Last time an utterance started or completed successfully
    fn last_speak(&self) -> Option<Instant>;
}

/// Handle the media session uses to stop recognition on teardown
#[async_trait]
pub trait RecognitionControl: Send + Sync + 'static {
    async fn stop(&self);
}
