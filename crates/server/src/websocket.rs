//! WebSocket Handler
//!
//! Pushes session events to the client and accepts microphone audio and
//! typed queries in return.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

/// Messages accepted from the client as text frames
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Typed query
    Text {
        content: String,
        #[serde(default)]
        image_url: Option<String>,
    },
    /// Silence the avatar
    StopSpeaking,
    Ping,
}

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (mut sender, mut receiver) = socket.split();
        let mut events = state.session.subscribe();
        let mut audio = state.audio.subscribe();
        tracing::info!("Event socket connected");

        let outbound = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    event = events.recv() => match next_event(event) {
                        Step::Send(event) => match serde_json::to_string(&event) {
                            Ok(json) => Message::Text(json),
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to encode session event");
                                continue;
                            }
                        },
                        Step::Skip => continue,
                        Step::Done => break,
                    },
                    chunk = audio.recv() => match next_event(chunk) {
                        Step::Send(chunk) => Message::Binary(chunk.wav.to_vec()),
                        Step::Skip => continue,
                        Step::Done => break,
                    },
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Binary(data) => state.microphone.push(Bytes::from(data)),
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client) => Self::dispatch(&state, client),
                    Err(e) => tracing::debug!(error = %e, "Ignoring unrecognized text frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        outbound.abort();
        tracing::info!("Event socket disconnected");
    }

    fn dispatch(state: &AppState, message: ClientMessage) {
        let session = state.session.clone();
        match message {
            ClientMessage::Text { content, image_url } => {
                if content.trim().is_empty() && image_url.is_none() {
                    return;
                }
                // Turns run off the receive loop so audio keeps flowing
                tokio::spawn(async move {
                    if let Err(e) = session.submit_query(&content, image_url.as_deref()).await {
                        tracing::debug!(error = %e, "Typed query failed");
                    }
                });
            }
            ClientMessage::StopSpeaking => {
                tokio::spawn(async move { session.stop_speaking().await });
            }
            ClientMessage::Ping => {}
        }
    }
}

enum Step<T> {
    Send(T),
    Skip,
    Done,
}

fn next_event<T>(received: Result<T, RecvError>) -> Step<T> {
    match received {
        Ok(value) => Step::Send(value),
        Err(RecvError::Lagged(n)) => {
            tracing::warn!(skipped = n, "Event socket lagged");
            Step::Skip
        }
        Err(RecvError::Closed) => Step::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_query() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"text","content":"What is a control?"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Text {
                content: "What is a control?".to_string(),
                image_url: None,
            }
        );

        let with_image: ClientMessage = serde_json::from_str(
            r#"{"type":"text","content":"Describe","image_url":"data:image/png;base64,AAA"}"#,
        )
        .unwrap();
        assert!(matches!(with_image, ClientMessage::Text { image_url: Some(_), .. }));
    }

    #[test]
    fn test_parse_control_messages() {
        let stop: ClientMessage = serde_json::from_str(r#"{"type":"stop_speaking"}"#).unwrap();
        assert_eq!(stop, ClientMessage::StopSpeaking);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"audio"}"#).is_err());
    }

    #[test]
    fn test_lagged_receiver_skips() {
        assert!(matches!(next_event::<u8>(Err(RecvError::Lagged(3))), Step::Skip));
        assert!(matches!(next_event::<u8>(Err(RecvError::Closed)), Step::Done));
        assert!(matches!(next_event(Ok(7u8)), Step::Send(7)));
    }
}
