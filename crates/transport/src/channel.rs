//! Out-of-band event channel messages
//!
//! The avatar service opens a data channel carrying
//! `{"event":{"eventType":"EVENT_TYPE_..."}}` lifecycle messages.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    TurnStart,
    SessionEnd,
    SwitchToIdle,
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: EventBody,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBody {
    event_type: String,
}

/// Parse one channel message; `None` when it is not an event envelope
pub fn parse_channel_message(raw: &str) -> Option<ChannelEvent> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring non-event channel message");
            return None;
        }
    };
    Some(match envelope.event.event_type.as_str() {
        "EVENT_TYPE_TURN_START" => ChannelEvent::TurnStart,
        "EVENT_TYPE_SESSION_END" => ChannelEvent::SessionEnd,
        "EVENT_TYPE_SWITCH_TO_IDLE" => ChannelEvent::SwitchToIdle,
        _ => ChannelEvent::Other(envelope.event.event_type),
    })
}
