//! Speech pipeline for the avatar agent
//!
//! - [`stt`]: the speech session manager and the Azure Speech WebSocket
//!   recognizer feeding it
//! - [`tts`]: SSML construction, the single-speaker [`SpeakQueue`] and the
//!   Azure synthesis backend

pub mod stt;
pub mod tts;

pub use stt::{
    recognizer_url, AzureRecognizerFactory, AzureSpeechRecognizer, MicrophoneFeed,
    RecognizerFactory, SpeechEvent, SpeechSessionManager,
};
pub use tts::{
    build_ssml, html_encode, AzureSpeechSynthesizer, AzureSynthesizerFactory, SpeakEvent,
    SpeakQueue, SpeakQueueConfig, SynthesizedAudio,
};

use thiserror::Error;

/// Speech pipeline errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("{0}")]
    MissingCredential(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Not initialized")]
    NotInitialized,
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        SpeechError::Network(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SpeechError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SpeechError::Network(err.to_string())
    }
}

impl From<SpeechError> for avatar_agent_core::Error {
    fn from(err: SpeechError) -> Self {
        avatar_agent_core::Error::Speech(err.to_string())
    }
}
