//! Streaming chat completion
//!
//! Features:
//! - Azure OpenAI chat completions client (standard and grounded endpoints)
//! - Incremental server-sent-event parser with chunk carry-over
//! - Sentence segmentation of streamed content for speech
//! - Tool-call fragment accumulation
//! - Turn driver tying the above together

pub mod client;
pub mod parser;
pub mod segmenter;
pub mod tool_calls;
pub mod turn;

pub use client::{
    ByteStream, CompletionBackend, CompletionClient, CompletionConfig, CompletionRequest,
    DataSource,
};
pub use parser::{ResponseShape, StreamEvent, StreamParser};
pub use segmenter::SentenceSegmenter;
pub use tool_calls::{PendingToolCall, ToolCallAccumulator};
pub use turn::{stream_turn, TurnObserver, TurnOutput};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for avatar_agent_core::Error {
    fn from(err: LlmError) -> Self {
        avatar_agent_core::Error::Llm(err.to_string())
    }
}
