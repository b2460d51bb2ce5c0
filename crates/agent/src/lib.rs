//! Avatar conversation orchestration
//!
//! Features:
//! - Conversation history with optional background document context
//! - Chat controller: one serialized turn per user query, sentence-level
//!   speech while the completion streams, tool execution after the stream
//! - `AvatarSession`: wires configuration, media session, speech recognition,
//!   the speak queue and the controller into one event stream

pub mod controller;
pub mod conversation;
pub mod events;
pub mod session;

pub use controller::{ChatController, ControllerConfig, InteractionTracker};
pub use conversation::{Conversation, DocumentContext};
pub use events::SessionEvent;
pub use session::{
    check_preconditions, AvatarSession, AzureServices, ConfigStatus, ServiceFactory,
    SessionServices,
};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required setting is missing; the message names it and the remedy
    #[error("{0}")]
    Precondition(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session not started")]
    NotStarted,
}

impl From<avatar_agent_config::ConfigError> for AgentError {
    fn from(err: avatar_agent_config::ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<avatar_agent_llm::LlmError> for AgentError {
    fn from(err: avatar_agent_llm::LlmError) -> Self {
        AgentError::Llm(err.to_string())
    }
}

impl From<avatar_agent_tools::ToolError> for AgentError {
    fn from(err: avatar_agent_tools::ToolError) -> Self {
        AgentError::Tool(err.to_string())
    }
}

impl From<avatar_agent_pipeline::SpeechError> for AgentError {
    fn from(err: avatar_agent_pipeline::SpeechError) -> Self {
        AgentError::Speech(err.to_string())
    }
}

impl From<avatar_agent_transport::TransportError> for AgentError {
    fn from(err: avatar_agent_transport::TransportError) -> Self {
        AgentError::Transport(err.to_string())
    }
}

impl From<avatar_agent_core::Error> for AgentError {
    fn from(err: avatar_agent_core::Error) -> Self {
        match err {
            avatar_agent_core::Error::Speech(msg) => AgentError::Speech(msg),
            avatar_agent_core::Error::Transport(msg) => AgentError::Transport(msg),
            avatar_agent_core::Error::Llm(msg) => AgentError::Llm(msg),
            other => AgentError::Config(other.to_string()),
        }
    }
}

impl From<AgentError> for avatar_agent_core::Error {
    fn from(err: AgentError) -> Self {
        avatar_agent_core::Error::Agent(err.to_string())
    }
}
