//! WebRTC peer connector
//!
//! Receives one audio and one video track from the avatar service and opens
//! a local `eventChannel` data channel so the service opens its companion
//! channel. The offer is sent only after ICE gathering completes (no trickle
//! ICE); the relay credential is the only ICE server.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use crate::peer::{IceState, MediaClock, PeerConnector, PeerEvent, PeerHandle, TrackKind};
use crate::relay::RelayCredential;
use crate::signaling::Signaler;
use crate::TransportError;

const ICE_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(5);
const ICE_FAILED_TIMEOUT: Duration = Duration::from_secs(25);
const ICE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(10);
const VIDEO_CLOCK_RATE: u64 = 90_000;
const EVENT_CHANNEL_LABEL: &str = "eventChannel";

fn internal(e: impl std::fmt::Display) -> TransportError {
    TransportError::Internal(e.to_string())
}

fn failed(e: impl std::fmt::Display) -> TransportError {
    TransportError::ConnectionFailed(e.to_string())
}

impl From<RTCIceConnectionState> for IceState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => IceState::Checking,
            RTCIceConnectionState::Connected => IceState::Connected,
            RTCIceConnectionState::Completed => IceState::Completed,
            RTCIceConnectionState::Disconnected => IceState::Disconnected,
            RTCIceConnectionState::Failed => IceState::Failed,
            RTCIceConnectionState::Closed => IceState::Closed,
            _ => IceState::New,
        }
    }
}

/// Connector negotiating through a [`Signaler`]
pub struct WebRtcConnector {
    signaler: Arc<dyn Signaler>,
}

impl WebRtcConnector {
    pub fn new(signaler: Arc<dyn Signaler>) -> Self {
        Self { signaler }
    }

    fn create_api(&self) -> Result<API, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(internal)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(internal)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_timeouts(
            Some(ICE_DISCONNECTED_TIMEOUT),
            Some(ICE_FAILED_TIMEOUT),
            Some(ICE_KEEPALIVE_INTERVAL),
        );

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build())
    }

    fn rtc_config(relay: &RelayCredential) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: relay.primary_url().map(str::to_string).into_iter().collect(),
                username: relay.username.clone(),
                credential: relay.password.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn register_handlers(
        pc: &Arc<RTCPeerConnection>,
        events: mpsc::UnboundedSender<PeerEvent>,
        clock: MediaClock,
    ) {
        let ice_events = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            tracing::info!(state = %state, "WebRTC ICE connection state changed");
            let _ = ice_events.send(PeerEvent::IceStateChanged(state.into()));
            Box::pin(async {})
        }));

        let channel_events = events.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            tracing::debug!(label = %channel.label(), "Remote data channel opened");
            let channel_events = channel_events.clone();
            channel.on_message(Box::new(move |message: DataChannelMessage| {
                match String::from_utf8(message.data.to_vec()) {
                    Ok(text) => {
                        tracing::debug!(message = %text, "WebRTC event received");
                        let _ = channel_events.send(PeerEvent::ChannelMessage(text));
                    }
                    Err(e) => tracing::warn!(error = %e, "Non-UTF-8 channel message dropped"),
                }
                Box::pin(async {})
            }));
            Box::pin(async {})
        }));

        let mut on_track = track_handler(events, clock);
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let track_id = track.id();
                on_track(kind, track_id, track)
            },
        ));
    }
}

/// Inbound RTP packets of one remote track
#[async_trait]
trait PacketSource: Send + Sync + 'static {
    /// Timestamp and payload length of the next packet, `None` once the track ends
    async fn next_packet(&self) -> Option<(u32, usize)>;
}

#[async_trait]
impl PacketSource for TrackRemote {
    async fn next_packet(&self) -> Option<(u32, usize)> {
        match self.read_rtp().await {
            Ok((packet, _)) => Some((packet.header.timestamp, packet.payload.len())),
            Err(e) => {
                tracing::debug!(error = %e, track_id = %self.id(), "Track ended");
                None
            }
        }
    }
}

/// Track callback body
///
/// The peer connection holds its handler lock while the returned future
/// runs, so the reader gets its own task and the future completes at once.
fn track_handler(
    events: mpsc::UnboundedSender<PeerEvent>,
    clock: MediaClock,
) -> impl FnMut(TrackKind, String, Arc<dyn PacketSource>) -> BoxFuture<'static, ()> + Send + Sync {
    move |kind, track_id, source| {
        tracing::info!(kind = ?kind, track_id = %track_id, "Received track");
        let _ = events.send(PeerEvent::TrackAdded {
            kind,
            track_id: track_id.clone(),
        });
        tokio::spawn(read_track(kind, track_id, source, events.clone(), clock.clone()));
        Box::pin(async {})
    }
}

/// Drain a track; video packets drive the media clock
async fn read_track(
    kind: TrackKind,
    track_id: String,
    source: Arc<dyn PacketSource>,
    events: mpsc::UnboundedSender<PeerEvent>,
    clock: MediaClock,
) {
    let mut first_timestamp: Option<u32> = None;
    while let Some((timestamp, payload_len)) = source.next_packet().await {
        if kind != TrackKind::Video || payload_len == 0 {
            continue;
        }
        let first = match first_timestamp {
            Some(first) => first,
            None => {
                first_timestamp = Some(timestamp);
                let _ = events.send(PeerEvent::VideoPlaying {
                    track_id: track_id.clone(),
                });
                timestamp
            }
        };
        let ticks = timestamp.wrapping_sub(first) as u64;
        clock.advance_to(Duration::from_millis(ticks * 1_000 / VIDEO_CLOCK_RATE));
    }
    tracing::debug!(track_id = %track_id, "Track reader finished");
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(
        &self,
        relay: &RelayCredential,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerHandle>, TransportError> {
        let api = self.create_api()?;
        let pc = Arc::new(
            api.new_peer_connection(Self::rtc_config(relay))
                .await
                .map_err(failed)?,
        );
        let clock = MediaClock::new();
        Self::register_handlers(&pc, events, clock.clone());

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("add transceiver: {}", e)))?;
        }

        pc.create_data_channel(EVENT_CHANNEL_LABEL, None)
            .await
            .map_err(failed)?;

        let offer = pc.create_offer(None).await.map_err(failed)?;
        let mut gathering_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.map_err(failed)?;
        if tokio::time::timeout(ICE_GATHERING_TIMEOUT, gathering_complete.recv())
            .await
            .is_err()
        {
            tracing::warn!("ICE gathering timed out, sending partial candidates");
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| failed("no local description after gathering"))?;
        let answer_sdp = self.signaler.exchange(&local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp).map_err(failed)?;
        pc.set_remote_description(answer).await.map_err(failed)?;

        tracing::info!("WebRTC negotiation complete");
        Ok(Arc::new(WebRtcPeer { pc, clock }))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    clock: MediaClock,
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    fn media_clock(&self) -> MediaClock {
        self.clock.clone()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await.map_err(internal)
    }
}
