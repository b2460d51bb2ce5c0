//! `createMermaidChart` tool
//!
//! Turns a chart type, title and body into Mermaid syntax and publishes it on
//! the chart channel for whatever panel is displaying charts.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use avatar_agent_core::ToolDefinition;

use crate::tool::{Tool, ToolError};

pub const TOOL_NAME: &str = "createMermaidChart";

const CHART_TYPES: [&str; 7] = [
    "flowchart", "sequence", "gantt", "class", "pie", "mindmap", "timeline",
];

/// A chart ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedChart {
    pub id: String,
    pub chart_type: String,
    pub title: String,
    pub syntax: String,
}

/// Build full Mermaid source from the chart body
///
/// Unrecognized types pass the content through unchanged.
pub fn build_mermaid_syntax(chart_type: &str, title: Option<&str>, content: &str) -> String {
    let title = title.filter(|t| !t.is_empty());
    match chart_type.to_lowercase().as_str() {
        "flowchart" => format!("flowchart TD\n{}", content),
        "sequence" => format!("sequenceDiagram\n{}", content),
        "gantt" => format!(
            "gantt\n    title {}\n{}",
            title.unwrap_or("Project Timeline"),
            content
        ),
        "class" => format!("classDiagram\n{}", content),
        "pie" => format!("pie title {}\n{}", title.unwrap_or("Pie Chart"), content),
        "mindmap" => format!(
            "mindmap\n  root){})\n{}",
            title.unwrap_or("Main Topic"),
            content
        ),
        "timeline" => format!(
            "timeline\n    title {}\n{}",
            title.unwrap_or("Timeline"),
            content
        ),
        _ => content.to_string(),
    }
}

pub struct MermaidChartTool {
    charts: broadcast::Sender<RenderedChart>,
}

impl MermaidChartTool {
    pub fn new(charts: broadcast::Sender<RenderedChart>) -> Self {
        Self { charts }
    }

    fn render(&self, arguments: &Value) -> Result<String, ToolError> {
        let chart_type = match &arguments["chartType"] {
            Value::String(s) => s.as_str(),
            _ => return Err(ToolError::invalid_params("chartType must be a string")),
        };
        let content = match &arguments["content"] {
            Value::String(s) => s.as_str(),
            _ => return Err(ToolError::invalid_params("content must be a string")),
        };
        let title = arguments["title"].as_str().filter(|t| !t.is_empty());

        let chart = RenderedChart {
            id: format!("mermaid-chart-{}", chrono::Utc::now().timestamp_millis()),
            chart_type: chart_type.to_string(),
            title: title.unwrap_or("Generated Chart").to_string(),
            syntax: build_mermaid_syntax(chart_type, title, content),
        };

        if self.charts.send(chart.clone()).is_err() {
            tracing::debug!(chart_id = %chart.id, "No chart subscribers");
        }
        tracing::info!(chart_id = %chart.id, chart_type = chart_type, "Chart created");

        Ok(format!(
            "Successfully created {} chart: \"{}\". The chart is now displayed in the chart panel to the right of the video.",
            chart_type, chart.title
        ))
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Bool(b) => !b,
        _ => false,
    }
}

#[async_trait]
impl Tool for MermaidChartTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            TOOL_NAME,
            "Create and display Mermaid diagrams and charts. Supports flowcharts, sequence diagrams, Gantt charts, class diagrams, pie charts, mindmaps, and timelines.",
            json!({
                "type": "object",
                "properties": {
                    "chartType": {
                        "type": "string",
                        "enum": CHART_TYPES,
                        "description": "Type of chart to create"
                    },
                    "title": {
                        "type": "string",
                        "description": "Title for the chart"
                    },
                    "content": {
                        "type": "string",
                        "description": "Mermaid syntax content for the chart body (without the chart type declaration)"
                    }
                },
                "required": ["chartType", "content"]
            }),
        )
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        if is_missing(&arguments["chartType"]) || is_missing(&arguments["content"]) {
            return Ok(
                "Error: Chart type and content are required to create a Mermaid chart."
                    .to_string(),
            );
        }

        Ok(self
            .render(&arguments)
            .unwrap_or_else(|e| format!("Error creating Mermaid chart: {}", e)))
    }
}
