//! Tool trait and errors

use async_trait::async_trait;
use avatar_agent_core::ToolDefinition;
use serde_json::Value;
use thiserror::Error;

/// Default timeout for tool execution (30 seconds)
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Tool '{name}' timed out after {secs} seconds")]
    Timeout { name: String, secs: u64 },
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    pub fn timeout(name: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            name: name.into(),
            secs,
        }
    }
}

/// A side-effecting action the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Definition advertised in completion requests
    fn definition(&self) -> ToolDefinition;

    fn timeout_secs(&self) -> u64 {
        DEFAULT_TOOL_TIMEOUT_SECS
    }

    /// Run with parsed arguments, returning a short confirmation for history
    async fn execute(&self, arguments: Value) -> Result<String, ToolError>;
}
