//! Shared error type
//!
//! Each crate keeps its own error enum and converts into this one at the
//! crate boundary.

use thiserror::Error;

/// Workspace-wide error
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
