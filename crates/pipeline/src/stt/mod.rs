//! Speech recognition
//!
//! [`SpeechSessionManager`] owns the recognition run; the Azure recognizer
//! speaks the service's WebSocket protocol defined in `protocol`.

mod azure;
mod protocol;
mod session;

pub use azure::{
    recognizer_url, AzureRecognizerFactory, AzureSpeechRecognizer, MicrophoneFeed,
    RecognizerFactory,
};
pub use session::{SpeechEvent, SpeechSessionManager};
