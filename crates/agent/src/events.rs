//! Session events pushed to clients

use serde::Serialize;

use avatar_agent_tools::RenderedChart;
use avatar_agent_transport::MediaState;

/// Everything a client needs to render the conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Human-readable status line
    Status { message: String },
    /// Partial recognition result while the user speaks
    Recognizing { text: String },
    UserMessage { text: String },
    /// Assistant transcript text
    DisplayText { text: String },
    SubtitleShown { text: String },
    SubtitleHidden,
    IdleFallback { visible: bool },
    /// Visible marker for a finished tool call
    ToolMarker { text: String, success: bool },
    Chart { chart: RenderedChart },
    SessionState { state: MediaState },
    Microphone { listening: bool },
}

impl SessionEvent {
    pub fn status(message: impl Into<String>) -> Self {
        SessionEvent::Status {
            message: message.into(),
        }
    }
}
