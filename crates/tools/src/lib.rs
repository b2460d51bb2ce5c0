//! Model-callable tools
//!
//! The model requests tools by name with JSON arguments; the
//! [`ToolRegistry`] dispatches them and always answers with text suitable for
//! a `tool` history entry, never an error.

pub mod mermaid;
pub mod registry;
pub mod tool;

pub use mermaid::{build_mermaid_syntax, MermaidChartTool, RenderedChart};
pub use registry::{ToolExecutor, ToolRegistry};
pub use tool::{Tool, ToolError};

impl From<ToolError> for avatar_agent_core::Error {
    fn from(err: ToolError) -> Self {
        avatar_agent_core::Error::Tool(err.to_string())
    }
}
