//! Core traits for pluggable speech backends

mod speech;

pub use speech::{
    RecognitionControl, RecognitionEvent, RecognitionRequest, SpeechActivity, SpeechRecognizer,
    SpeechSynthesizer, SynthesisOutcome, SynthesizerFactory, SynthesizerSlot,
};
