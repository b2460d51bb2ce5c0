//! Real-time media transport for the talking avatar
//!
//! The [`MediaSession`] supervises one WebRTC peer connection at a time:
//! relay credentials, SDP signaling, inbound track bookkeeping, the
//! out-of-band event channel, and bounded automatic reconnection driven by
//! a liveness watchdog.

pub mod channel;
pub mod peer;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod sinks;
pub mod webrtc;

pub use channel::{parse_channel_message, ChannelEvent};
pub use peer::{IceState, MediaClock, PeerConnector, PeerEvent, PeerHandle, TrackKind};
pub use relay::{relay_token_url, HttpRelayTokenSource, RelayCredential, RelayTokenSource};
pub use session::{MediaEvent, MediaSession, MediaSessionConfig, MediaState};
pub use signaling::{HttpSignaler, Signaler};
pub use sinks::{MediaSinks, SinkChange};
pub use webrtc::WebRtcConnector;

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to get avatar token")]
    RelayToken,

    #[error("Signaling failed: {0}")]
    Signaling(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Avatar video did not start within {0} ms")]
    MediaTimeout(u64),

    #[error("Synthesizer error: {0}")]
    Synthesizer(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

impl From<TransportError> for avatar_agent_core::Error {
    fn from(err: TransportError) -> Self {
        avatar_agent_core::Error::Transport(err.to_string())
    }
}
