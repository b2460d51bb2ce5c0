//! Core traits and types for the avatar agent
//!
//! This crate provides foundational types used across all other crates:
//! - Chat message model shared by the completion client and the controller
//! - Speech recognition and synthesis traits for pluggable backends
//! - Error types

pub mod error;
pub mod llm_types;
pub mod traits;

pub use error::{Error, Result};
pub use llm_types::{
    ContentPart, FunctionCall, FunctionDefinition, ImageUrl, Message, MessageContent, Role,
    ToolCall, ToolDefinition,
};

pub use traits::{
    RecognitionControl, RecognitionEvent, RecognitionRequest, SpeechActivity, SpeechRecognizer,
    SpeechSynthesizer, SynthesisOutcome, SynthesizerFactory, SynthesizerSlot,
};
