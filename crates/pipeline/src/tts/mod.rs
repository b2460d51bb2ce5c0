//! Speech synthesis

mod azure;
mod queue;
mod ssml;

pub use azure::{AzureSpeechSynthesizer, AzureSynthesizerFactory, SynthesizedAudio};
pub use queue::{SpeakEvent, SpeakQueue, SpeakQueueConfig};
pub use ssml::{build_ssml, html_encode};
