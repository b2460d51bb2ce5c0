//! Tool Registry
//!
//! Maps fully assembled tool calls to registered handlers. Every outcome,
//! including malformed arguments and unknown names, is returned as text.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use avatar_agent_core::ToolDefinition;

use crate::tool::{Tool, ToolError};

/// Tool executor trait
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name with its raw argument text
    async fn execute(&self, name: &str, arguments: &str) -> String;

    /// Definitions for every available tool
    fn definitions(&self) -> Vec<ToolDefinition>;
}

/// Tool registry
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    async fn run(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        if arguments.trim().is_empty() {
            return Err(ToolError::invalid_params(
                "Function arguments are empty or undefined",
            ));
        }

        let parsed: Value = serde_json::from_str(arguments).map_err(|e| {
            ToolError::invalid_params(format!("Invalid JSON in function arguments: {}", e))
        })?;

        let Some(tool) = self.tools.get(name) else {
            return Ok(format!("Unknown function: {}", name));
        };

        let timeout_secs = tool.timeout_secs();
        tracing::trace!(tool = name, timeout_secs = timeout_secs, "Executing tool with timeout");

        match tokio::time::timeout(Duration::from_secs(timeout_secs), tool.execute(parsed)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ToolError::timeout(name, timeout_secs)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, arguments: &str) -> String {
        match self.run(name, arguments).await {
            Ok(output) => {
                metrics::counter!("avatar_tool_calls_total", "outcome" => "ok").increment(1);
                output
            }
            Err(e) => {
                metrics::counter!("avatar_tool_calls_total", "outcome" => "error").increment(1);
                tracing::warn!(tool = name, error = %e, "Tool execution failed");
                format!("Error executing function: {}", e)
            }
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tool_names()
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.definition())
            .collect()
    }
}
