//! Peer connection seam
//!
//! The media session drives connections through [`PeerConnector`] and reacts
//! to [`PeerEvent`]s, so it never depends on a WebRTC library's callback
//! shape.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::relay::RelayCredential;
use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Events raised by one peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Inbound track negotiated; media may not flow yet
    TrackAdded { kind: TrackKind, track_id: String },
    /// First video frame arrived for the track
    VideoPlaying { track_id: String },
    /// Text message on the remote-opened data channel
    ChannelMessage(String),
    IceStateChanged(IceState),
}

/// Playback position of the inbound video
///
/// Advanced by the connector as frames arrive; the liveness watchdog samples
/// it twice and treats an unchanged value as a stalled stream.
#[derive(Debug, Clone, Default)]
pub struct MediaClock {
    position_ms: Arc<AtomicU64>,
}

impl MediaClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_to(&self, position: Duration) {
        self.position_ms
            .store(position.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms.load(Ordering::Relaxed))
    }
}

/// A live peer connection
#[async_trait]
pub trait PeerHandle: Send + Sync + 'static {
    fn media_clock(&self) -> MediaClock;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Establishes peer connections configured with a relay credential
#[async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    /// Negotiate a connection; events flow on `events` until it closes
    async fn open(
        &self,
        relay: &RelayCredential,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, TransportError>;
}
