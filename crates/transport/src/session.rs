//! Real-time media session
//!
//! State machine: `Idle -> Connecting -> Active -> Reconnecting -> Active`,
//! with any state going to `Closed` on stop and `Closed -> Connecting` on
//! start.
//!
//! A connect attempt resolves only after inbound video plays and a short
//! grace period elapses. Unexpected disconnects (service `SESSION_END`
//! events or a stalled video clock) trigger a reconnect when auto-reconnect
//! is on, the user did not close the session, and the last interaction is
//! recent. At most one reconnect is in flight: the guard is taken with a
//! compare-exchange before connecting and released by the reconnect when
//! its attempt ends, successfully or not. Initial connect failures are never
//! retried.
//!
//! Every attempt remembers the connection generation it started from. A
//! stop or disconnect bumps the generation, and an attempt that finds it
//! changed closes whatever it opened instead of going live.

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use avatar_agent_config::{AppConfig, TimingConfig};
use avatar_agent_core::{
    RecognitionControl, SpeechActivity, SpeechSynthesizer, SynthesizerFactory, SynthesizerSlot,
};

use crate::channel::{parse_channel_message, ChannelEvent};
use crate::peer::{IceState, MediaClock, PeerConnector, PeerEvent, PeerHandle, TrackKind};
use crate::relay::RelayTokenSource;
use crate::sinks::{MediaSinks, SinkChange};
use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaState {
    Idle,
    Connecting,
    Active,
    Reconnecting,
    Closed,
}

/// Observable session activity
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    StateChanged { state: MediaState },
    SinkBound { kind: TrackKind, track_id: String },
    SinkRemoved { kind: TrackKind, track_id: String },
    /// A new video track arrived; speech interrupted by a reconnect can resume
    VideoTrackAdded,
    VideoPlaying,
    SubtitleShown { text: String },
    SubtitleHidden,
    /// Show or hide the local idle video
    IdleFallback { visible: bool },
}

impl From<SinkChange> for MediaEvent {
    fn from(change: SinkChange) -> Self {
        match change {
            SinkChange::Bound { kind, track_id } => MediaEvent::SinkBound { kind, track_id },
            SinkChange::Removed { kind, track_id } => MediaEvent::SinkRemoved { kind, track_id },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaSessionConfig {
    pub timing: TimingConfig,
    pub auto_reconnect: bool,
    pub use_local_video_for_idle: bool,
    pub show_subtitles: bool,
}

impl MediaSessionConfig {
    pub fn from_config(config: &AppConfig, timing: &TimingConfig) -> Self {
        Self {
            timing: timing.clone(),
            auto_reconnect: config.avatar_config.auto_reconnect,
            use_local_video_for_idle: config.avatar_config.use_local_video_for_idle,
            show_subtitles: config.avatar_config.show_subtitles,
        }
    }
}

struct SessionState {
    phase: MediaState,
    user_closed: bool,
    last_interaction: Instant,
    video_started_at: Option<Instant>,
    /// Bumped per connection so events from a replaced peer are ignored
    connection: u64,
    peer: Option<Arc<dyn PeerHandle>>,
    sinks: MediaSinks,
}

struct Inner {
    config: RwLock<MediaSessionConfig>,
    relay: Arc<dyn RelayTokenSource>,
    connector: Arc<dyn PeerConnector>,
    synthesizers: Arc<dyn SynthesizerFactory>,
    synthesizer: SynthesizerSlot,
    activity: Arc<dyn SpeechActivity>,
    recognition: RwLock<Option<Arc<dyn RecognitionControl>>>,
    state: Mutex<SessionState>,
    active: AtomicBool,
    reconnecting: AtomicBool,
    events: broadcast::Sender<MediaEvent>,
}

/// Supervisor for one avatar media connection at a time
#[derive(Clone)]
pub struct MediaSession {
    inner: Arc<Inner>,
}

impl MediaSession {
    pub fn new(
        config: MediaSessionConfig,
        relay: Arc<dyn RelayTokenSource>,
        connector: Arc<dyn PeerConnector>,
        synthesizers: Arc<dyn SynthesizerFactory>,
        synthesizer: SynthesizerSlot,
        activity: Arc<dyn SpeechActivity>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                relay,
                connector,
                synthesizers,
                synthesizer,
                activity,
                recognition: RwLock::new(None),
                state: Mutex::new(SessionState {
                    phase: MediaState::Idle,
                    user_closed: false,
                    last_interaction: Instant::now(),
                    video_started_at: None,
                    connection: 0,
                    peer: None,
                    sinks: MediaSinks::new(),
                }),
                active: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.inner.events.subscribe()
    }

    /// Recognition to stop on teardown
    pub fn set_recognition(&self, recognition: Arc<dyn RecognitionControl>) {
        *self.inner.recognition.write() = Some(recognition);
    }

    pub fn set_config(&self, config: MediaSessionConfig) {
        *self.inner.config.write() = config;
    }

    pub fn state(&self) -> MediaState {
        self.inner.state.lock().phase
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    pub fn user_closed(&self) -> bool {
        self.inner.state.lock().user_closed
    }

    pub fn touch_interaction(&self) {
        self.inner.state.lock().last_interaction = Instant::now();
    }

    /// User start: clears the closed flag and connects
    ///
    /// With the idle video enabled the connection is deferred until the user
    /// first speaks or types; the idle video is shown instead.
    pub async fn start(&self) -> Result<(), TransportError> {
        {
            let mut state = self.inner.state.lock();
            state.user_closed = false;
            state.last_interaction = Instant::now();
        }
        if self.inner.config.read().use_local_video_for_idle {
            self.inner.emit(MediaEvent::IdleFallback { visible: true });
            return Ok(());
        }
        self.connect().await
    }

    /// User stop: marks the session closed and tears it down
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.user_closed = true;
            state.last_interaction = Instant::now();
        }
        self.inner.disconnect(MediaState::Closed).await;
    }

    /// Connect if no session is active or on its way (idle-video mode wake-up)
    pub async fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_active() || self.is_reconnecting() {
            return Ok(());
        }
        if matches!(
            self.state(),
            MediaState::Connecting | MediaState::Reconnecting
        ) {
            return Ok(());
        }
        self.connect().await
    }

    /// Establish a connection, resolving once video plays
    pub async fn connect(&self) -> Result<(), TransportError> {
        let generation = self.inner.state.lock().connection;
        Inner::connect(&self.inner, generation).await
    }

    /// Best-effort teardown back to `Idle`
    pub async fn disconnect(&self) {
        self.inner.disconnect(MediaState::Idle).await;
    }

    /// Liveness check: reconnect when the video clock stops advancing
    pub async fn check_hung(&self) {
        Inner::check_hung(&self.inner).await;
    }

    /// Idle check: drop the connection after a silent period
    pub async fn check_last_speak(&self) {
        self.inner.check_last_speak().await;
    }

    /// Run both watchdogs on the configured interval
    pub fn spawn_watchdog(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            let period = session.inner.config.read().timing.watchdog_interval();
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                session.check_last_speak().await;
                session.check_hung().await;
            }
        })
    }
}

impl Inner {
    fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: MediaState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        };
        if changed {
            tracing::debug!(state = ?phase, "Media session state changed");
            self.emit(MediaEvent::StateChanged { state: phase });
        }
    }

    /// One attempt; a failure leaves the session `Idle` unless a stop or
    /// disconnect superseded the attempt
    async fn connect(inner: &Arc<Inner>, generation: u64) -> Result<(), TransportError> {
        let result = Inner::connect_once(inner, generation).await;
        match &result {
            Err(TransportError::SessionClosed) => {
                tracing::info!("Session closed while connecting, attempt abandoned");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Avatar connection failed");
                if !inner.state.lock().user_closed {
                    inner.set_phase(MediaState::Idle);
                }
            }
            Ok(()) => {}
        }
        result
    }

    /// True once a stop or disconnect happened after `generation` was read
    fn superseded(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.user_closed || state.connection != generation
    }

    /// Move an attempt to `phase`; false when it was already superseded
    fn advance_attempt(&self, generation: u64, phase: MediaState) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if state.user_closed || state.connection != generation {
                return false;
            }
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        };
        if changed {
            tracing::debug!(state = ?phase, "Media session state changed");
            self.emit(MediaEvent::StateChanged { state: phase });
        }
        true
    }

    async fn connect_once(inner: &Arc<Inner>, generation: u64) -> Result<(), TransportError> {
        let phase = match inner.state.lock().phase {
            MediaState::Reconnecting => MediaState::Reconnecting,
            _ => MediaState::Connecting,
        };
        if !inner.advance_attempt(generation, phase) {
            return Err(TransportError::SessionClosed);
        }

        let synthesizer = inner
            .synthesizers
            .create()
            .map_err(|e| TransportError::Synthesizer(e.to_string()))?;
        let previous = inner.synthesizer.write().replace(Arc::clone(&synthesizer));
        if let Some(previous) = previous {
            previous.close().await;
        }
        if inner.superseded(generation) {
            inner.release_synthesizer(&synthesizer).await;
            return Err(TransportError::SessionClosed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let opened = match inner.relay.fetch().await {
            Ok(relay) => inner.connector.open(&relay, tx).await,
            Err(e) => Err(e),
        };
        let peer = match opened {
            Ok(peer) => peer,
            Err(e) => {
                inner.release_synthesizer(&synthesizer).await;
                return Err(e);
            }
        };

        let (playing_tx, playing_rx) = oneshot::channel();
        let installed = {
            let mut state = inner.state.lock();
            if state.user_closed || state.connection != generation {
                None
            } else {
                state.connection += 1;
                let replaced = state.peer.replace(Arc::clone(&peer));
                Some((state.connection, replaced))
            }
        };
        let Some((connection, replaced)) = installed else {
            close_peer(peer.as_ref()).await;
            inner.release_synthesizer(&synthesizer).await;
            return Err(TransportError::SessionClosed);
        };
        if let Some(replaced) = replaced {
            if let Err(e) = replaced.close().await {
                tracing::debug!(error = %e, "Failed to close replaced peer connection");
            }
        }
        tokio::spawn(Inner::pump(Arc::clone(inner), connection, rx, playing_tx));

        let timing = inner.config.read().timing.clone();
        let playing = match time::timeout(timing.connect_timeout(), playing_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "peer connection closed before video started".to_string(),
            )),
            Err(_) => Err(TransportError::MediaTimeout(timing.connect_timeout_ms)),
        };
        if let Err(e) = playing {
            inner.abandon_connection(connection, peer, &synthesizer).await;
            return Err(e);
        }

        time::sleep(timing.activation_grace()).await;

        if inner.superseded(connection) {
            return Err(TransportError::SessionClosed);
        }
        inner.active.store(true, Ordering::SeqCst);
        inner.set_phase(MediaState::Active);
        tracing::info!("Avatar session active");
        Ok(())
    }

    /// Drop a connection that never went live
    ///
    /// A disconnect that already bumped the generation has closed the peer
    /// and the synthesizer, so only a still-current connection is torn down.
    async fn abandon_connection(
        &self,
        connection: u64,
        peer: Arc<dyn PeerHandle>,
        synthesizer: &Arc<dyn SpeechSynthesizer>,
    ) {
        let changes = {
            let mut state = self.state.lock();
            if state.connection != connection {
                return;
            }
            state.connection += 1;
            state.video_started_at = None;
            state.peer = None;
            state.sinks.clear()
        };
        close_peer(peer.as_ref()).await;
        changes.into_iter().for_each(|c| self.emit(c.into()));
        self.release_synthesizer(synthesizer).await;
    }

    /// Close `ours` if it is still the shared synthesizer
    async fn release_synthesizer(&self, ours: &Arc<dyn SpeechSynthesizer>) {
        let released = {
            let mut slot = self.synthesizer.write();
            let current = slot
                .as_ref()
                .is_some_and(|s| Arc::as_ptr(s) as *const () == Arc::as_ptr(ours) as *const ());
            if current {
                slot.take()
            } else {
                None
            }
        };
        if let Some(synthesizer) = released {
            synthesizer.close().await;
        }
    }

    /// Handle events of one peer connection until it is replaced or closed
    async fn pump(
        inner: Arc<Inner>,
        connection: u64,
        mut rx: mpsc::UnboundedReceiver<PeerEvent>,
        playing_tx: oneshot::Sender<()>,
    ) {
        let mut playing_tx = Some(playing_tx);
        let mut channel_attached = true;

        while let Some(event) = rx.recv().await {
            if inner.state.lock().connection != connection {
                break;
            }
            match event {
                PeerEvent::TrackAdded {
                    kind: TrackKind::Audio,
                    track_id,
                } => {
                    let changes = inner.state.lock().sinks.bind_audio(&track_id);
                    changes.into_iter().for_each(|c| inner.emit(c.into()));
                }
                PeerEvent::TrackAdded {
                    kind: TrackKind::Video,
                    track_id,
                } => {
                    inner.state.lock().sinks.stage_video(&track_id);
                    inner.emit(MediaEvent::VideoTrackAdded);
                }
                PeerEvent::VideoPlaying { track_id } => {
                    let changes = {
                        let mut state = inner.state.lock();
                        state.video_started_at = Some(Instant::now());
                        state.sinks.promote_video(&track_id)
                    };
                    changes.into_iter().for_each(|c| inner.emit(c.into()));
                    inner.emit(MediaEvent::VideoPlaying);
                    if inner.config.read().use_local_video_for_idle {
                        inner.emit(MediaEvent::IdleFallback { visible: false });
                    }
                    if let Some(tx) = playing_tx.take() {
                        let _ = tx.send(());
                    }
                }
                PeerEvent::ChannelMessage(raw) => {
                    if !channel_attached {
                        continue;
                    }
                    match parse_channel_message(&raw) {
                        Some(ChannelEvent::TurnStart) => {
                            if inner.config.read().show_subtitles {
                                let text = inner.activity.speaking_text();
                                inner.emit(MediaEvent::SubtitleShown { text });
                            }
                        }
                        Some(ChannelEvent::SwitchToIdle) => inner.emit(MediaEvent::SubtitleHidden),
                        Some(ChannelEvent::SessionEnd) => {
                            inner.emit(MediaEvent::SubtitleHidden);
                            if inner.try_begin_reconnect() {
                                tracing::info!("The avatar session ended unexpectedly, reconnecting");
                                channel_attached = false;
                                tokio::spawn(Inner::reconnect(Arc::clone(&inner), "session_end"));
                            }
                        }
                        Some(ChannelEvent::Other(_)) | None => {}
                    }
                }
                PeerEvent::IceStateChanged(IceState::Disconnected) => {
                    if inner.config.read().use_local_video_for_idle {
                        inner.emit(MediaEvent::IdleFallback { visible: true });
                    }
                }
                PeerEvent::IceStateChanged(_) => {}
            }
        }
        tracing::debug!(connection, "Peer event pump finished");
    }

    /// Reconnect policy check plus guard acquisition
    fn try_begin_reconnect(&self) -> bool {
        let config = self.config.read().clone();
        if !config.auto_reconnect {
            return false;
        }
        {
            let state = self.state.lock();
            if state.user_closed
                || state.last_interaction.elapsed() >= config.timing.reconnect_window()
            {
                return false;
            }
        }
        self.reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the current synthesizer and connect again
    ///
    /// Runs with the guard held and releases it when the attempt ends.
    fn reconnect(inner: Arc<Inner>, reason: &'static str) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let generation = inner.state.lock().connection;
            if !inner.advance_attempt(generation, MediaState::Reconnecting) {
                inner.reconnecting.store(false, Ordering::SeqCst);
                return;
            }
            metrics::counter!("avatar_reconnects_total", "reason" => reason).increment(1);

            let released = inner.synthesizer.write().take();
            if let Some(synthesizer) = released {
                synthesizer.close().await;
            }

            let result = Inner::connect(&inner, generation).await;
            inner.reconnecting.store(false, Ordering::SeqCst);
            if let Err(e) = result {
                tracing::warn!(error = %e, reason, "Reconnect attempt failed");
            }
        })
    }

    async fn check_hung(inner: &Arc<Inner>) {
        if !inner.active.load(Ordering::SeqCst) {
            return;
        }
        let Some((connection, clock)) = inner.current_clock() else {
            return;
        };
        let before = clock.position();
        let window = inner.config.read().timing.hung_sample_window();
        time::sleep(window).await;

        if clock.position() != before {
            return;
        }
        if inner.state.lock().connection != connection {
            return;
        }
        // Re-verify: the session may have been torn down during the window
        if inner
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        tracing::info!("The video stream got disconnected");
        if inner.try_begin_reconnect() {
            tracing::info!("Reconnecting stalled avatar session");
            Inner::reconnect(Arc::clone(inner), "video_stalled").await;
        }
    }

    fn current_clock(&self) -> Option<(u64, MediaClock)> {
        let state = self.state.lock();
        state
            .peer
            .as_ref()
            .map(|peer| (state.connection, peer.media_clock()))
    }

    async fn check_last_speak(&self) {
        let config = self.config.read().clone();
        if !config.use_local_video_for_idle || !self.active.load(Ordering::SeqCst) {
            return;
        }
        if self.activity.is_speaking() {
            return;
        }
        let video_started = self.state.lock().video_started_at;
        let reference = match (self.activity.last_speak(), video_started) {
            (Some(spoke), Some(started)) => spoke.max(started),
            (spoke, started) => match spoke.or(started) {
                Some(reference) => reference,
                None => return,
            },
        };
        if reference.elapsed() <= config.timing.idle_disconnect() {
            return;
        }
        tracing::info!("No speech for a while, switching to idle video");
        self.disconnect(MediaState::Idle).await;
        self.emit(MediaEvent::IdleFallback { visible: true });
    }

    /// Every step runs even if an earlier one fails
    async fn disconnect(&self, phase: MediaState) {
        self.active.store(false, Ordering::SeqCst);

        let recognition = self.recognition.read().clone();
        if let Some(recognition) = recognition {
            recognition.stop().await;
        }

        let synthesizer = self.synthesizer.write().take();
        if let Some(synthesizer) = synthesizer {
            synthesizer.close().await;
        }

        let (peer, changes) = {
            let mut state = self.state.lock();
            state.connection += 1;
            state.video_started_at = None;
            (state.peer.take(), state.sinks.clear())
        };
        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                tracing::warn!(error = %e, "Error closing peer connection");
            }
        }
        changes.into_iter().for_each(|c| self.emit(c.into()));

        self.set_phase(phase);
        tracing::info!(state = ?phase, "Avatar session disconnected");
    }
}

async fn close_peer(peer: &dyn PeerHandle) {
    if let Err(e) = peer.close().await {
        tracing::debug!(error = %e, "Failed to close abandoned peer connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayCredential;
    use async_trait::async_trait;
    use avatar_agent_core::{Result as CoreResult, SpeechSynthesizer, SynthesisOutcome};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticRelay {
        fail: bool,
    }

    #[async_trait]
    impl RelayTokenSource for StaticRelay {
        async fn fetch(&self) -> Result<RelayCredential, TransportError> {
            if self.fail {
                return Err(TransportError::RelayToken);
            }
            Ok(RelayCredential {
                urls: vec!["turn:relay.test:3478".to_string()],
                username: "u".to_string(),
                password: "p".to_string(),
            })
        }
    }

    struct MockPeer {
        clock: MediaClock,
        closed: AtomicBool,
    }

    #[async_trait]
    impl PeerHandle for MockPeer {
        fn media_clock(&self) -> MediaClock {
            self.clock.clone()
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Plays video right away; records whether the session was active at
    /// each open and keeps event senders so tests can inject channel events
    struct MockConnector {
        opens: AtomicUsize,
        open_delay: Duration,
        play_video: AtomicBool,
        session: Mutex<Option<MediaSession>>,
        active_at_open: Mutex<Vec<bool>>,
        senders: Mutex<Vec<mpsc::UnboundedSender<PeerEvent>>>,
        peers: Mutex<Vec<Arc<MockPeer>>>,
    }

    impl MockConnector {
        fn new(open_delay: Duration, play_video: bool) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                open_delay,
                play_video: AtomicBool::new(play_video),
                session: Mutex::new(None),
                active_at_open: Mutex::new(Vec::new()),
                senders: Mutex::new(Vec::new()),
                peers: Mutex::new(Vec::new()),
            })
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn last_sender(&self) -> mpsc::UnboundedSender<PeerEvent> {
            self.senders.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl PeerConnector for MockConnector {
        async fn open(
            &self,
            _relay: &RelayCredential,
            events: mpsc::UnboundedSender<PeerEvent>,
        ) -> Result<Arc<dyn PeerHandle>, TransportError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            let active = self.session.lock().as_ref().map(|s| s.is_active());
            if let Some(active) = active {
                self.active_at_open.lock().push(active);
            }
            time::sleep(self.open_delay).await;

            let track_id = format!("video-{}", n);
            let _ = events.send(PeerEvent::TrackAdded {
                kind: TrackKind::Audio,
                track_id: format!("audio-{}", n),
            });
            let _ = events.send(PeerEvent::TrackAdded {
                kind: TrackKind::Video,
                track_id: track_id.clone(),
            });
            if self.play_video.load(Ordering::SeqCst) {
                let _ = events.send(PeerEvent::VideoPlaying { track_id });
            }
            self.senders.lock().push(events);

            let peer = Arc::new(MockPeer {
                clock: MediaClock::new(),
                closed: AtomicBool::new(false),
            });
            self.peers.lock().push(Arc::clone(&peer));
            Ok(peer)
        }
    }

    struct NullSynth {
        closed: AtomicBool,
    }

    #[async_trait]
    impl SpeechSynthesizer for NullSynth {
        async fn speak_ssml(&self, _ssml: &str) -> CoreResult<SynthesisOutcome> {
            Ok(SynthesisOutcome::Completed)
        }

        async fn stop_speaking(&self) -> CoreResult<()> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct SynthFactory {
        created: Mutex<Vec<Arc<NullSynth>>>,
    }

    impl SynthesizerFactory for SynthFactory {
        fn create(&self) -> CoreResult<Arc<dyn SpeechSynthesizer>> {
            let synth = Arc::new(NullSynth {
                closed: AtomicBool::new(false),
            });
            self.created.lock().push(Arc::clone(&synth));
            Ok(synth)
        }
    }

    #[derive(Default)]
    struct Activity {
        speaking: AtomicBool,
        text: Mutex<String>,
        last: Mutex<Option<Instant>>,
    }

    impl SpeechActivity for Activity {
        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }

        fn speaking_text(&self) -> String {
            self.text.lock().clone()
        }

        fn last_speak(&self) -> Option<Instant> {
            *self.last.lock()
        }
    }

    #[derive(Default)]
    struct Recognition {
        stops: AtomicUsize,
    }

    #[async_trait]
    impl RecognitionControl for Recognition {
        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        session: MediaSession,
        connector: Arc<MockConnector>,
        synths: Arc<SynthFactory>,
        activity: Arc<Activity>,
        slot: SynthesizerSlot,
    }

    fn harness_with(
        config: MediaSessionConfig,
        connector: Arc<MockConnector>,
        relay_fails: bool,
    ) -> Harness {
        let synths = Arc::new(SynthFactory::default());
        let activity = Arc::new(Activity::default());
        let slot: SynthesizerSlot = Arc::new(RwLock::new(None));
        let session = MediaSession::new(
            config,
            Arc::new(StaticRelay { fail: relay_fails }),
            connector.clone(),
            synths.clone(),
            slot.clone(),
            activity.clone(),
        );
        *connector.session.lock() = Some(session.clone());
        Harness {
            session,
            connector,
            synths,
            activity,
            slot,
        }
    }

    fn config() -> MediaSessionConfig {
        MediaSessionConfig {
            timing: TimingConfig::default(),
            auto_reconnect: true,
            use_local_video_for_idle: false,
            show_subtitles: true,
        }
    }

    fn harness() -> Harness {
        harness_with(config(), MockConnector::new(Duration::ZERO, true), false)
    }

    fn session_end() -> PeerEvent {
        PeerEvent::ChannelMessage(r#"{"event":{"eventType":"EVENT_TYPE_SESSION_END"}}"#.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_resolves_after_video_and_grace() {
        let h = harness();
        let started = Instant::now();
        h.session.connect().await.unwrap();

        assert!(h.session.is_active());
        assert_eq!(h.session.state(), MediaState::Active);
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert!(h.slot.read().is_some());
        assert!(!h.session.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_video() {
        let h = harness_with(config(), MockConnector::new(Duration::ZERO, false), false);
        let err = h.session.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::MediaTimeout(30_000)));
        assert!(!h.session.is_active());
        assert_eq!(h.session.state(), MediaState::Idle);
        assert!(h.connector.peers.lock()[0].closed.load(Ordering::SeqCst));
        assert!(h.synths.created.lock()[0].closed.load(Ordering::SeqCst));
        assert!(h.slot.read().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_failure_propagates_without_retry() {
        let h = harness_with(config(), MockConnector::new(Duration::ZERO, true), true);
        let err = h.session.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to get avatar token");

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.connector.opens(), 0);
        assert!(!h.session.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_video_reconnects_once() {
        let h = harness();
        h.session.connect().await.unwrap();
        assert_eq!(h.connector.opens(), 1);

        time::sleep(Duration::from_secs(10)).await;
        h.session.check_hung().await;

        assert_eq!(h.connector.opens(), 2);
        assert_eq!(*h.connector.active_at_open.lock(), vec![false, false]);
        assert!(h.synths.created.lock()[0].closed.load(Ordering::SeqCst));
        assert!(h.session.is_active());
        assert!(!h.session.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advancing_clock_is_not_hung() {
        let h = harness();
        h.session.connect().await.unwrap();
        let clock = h.connector.peers.lock()[0].clock.clone();

        let ticker = tokio::spawn(async move {
            for i in 1..=10u64 {
                time::sleep(Duration::from_millis(500)).await;
                clock.advance_to(Duration::from_millis(i * 500));
            }
        });
        h.session.check_hung().await;
        ticker.abort();

        assert_eq!(h.connector.opens(), 1);
        assert!(h.session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_issue_one_connect() {
        let connector = MockConnector::new(Duration::from_millis(500), true);
        let h = harness_with(config(), connector, false);
        h.session.connect().await.unwrap();

        // Session end starts a reconnect; a stall check fires meanwhile
        h.connector.last_sender().send(session_end()).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(h.session.is_reconnecting());
        h.connector.last_sender().send(session_end()).unwrap();
        h.session.check_hung().await;

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.connector.opens(), 2);
        assert!(!h.session.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_after_user_stop() {
        let h = harness();
        h.session.connect().await.unwrap();
        let sender = h.connector.last_sender();
        h.session.stop().await;

        sender.send(session_end()).unwrap();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.connector.opens(), 1);
        assert_eq!(h.session.state(), MediaState::Closed);
        assert!(h.connector.peers.lock()[0].closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_releases_guard() {
        let h = harness();
        h.session.connect().await.unwrap();

        h.connector.play_video.store(false, Ordering::SeqCst);
        h.connector.last_sender().send(session_end()).unwrap();
        time::sleep(Duration::from_secs(35)).await;

        assert_eq!(h.connector.opens(), 2);
        assert!(!h.session.is_reconnecting());
        assert!(!h.session.is_active());
        assert_eq!(h.session.state(), MediaState::Idle);
        assert!(h.connector.peers.lock()[1].closed.load(Ordering::SeqCst));
        assert!(h.slot.read().is_none());

        // A later session end reconnects again
        h.connector.play_video.store(true, Ordering::SeqCst);
        h.session.connect().await.unwrap();
        h.connector.last_sender().send(session_end()).unwrap();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.connector.opens(), 4);
        assert!(h.session.is_active());
        assert!(!h.session.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_stays_closed() {
        let connector = MockConnector::new(Duration::from_millis(500), true);
        let h = harness_with(config(), connector, false);
        h.session.connect().await.unwrap();

        h.connector.last_sender().send(session_end()).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert!(h.session.is_reconnecting());
        h.session.stop().await;
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.connector.opens(), 2);
        assert_eq!(h.session.state(), MediaState::Closed);
        assert!(!h.session.is_active());
        assert!(h.session.user_closed());
        assert!(!h.session.is_reconnecting());
        assert!(h.connector.peers.lock()[1].closed.load(Ordering::SeqCst));
        assert!(h.slot.read().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_up_during_reconnect_does_not_connect_again() {
        let mut idle_config = config();
        idle_config.use_local_video_for_idle = true;
        let connector = MockConnector::new(Duration::from_millis(500), true);
        let h = harness_with(idle_config, connector, false);
        h.session.start().await.unwrap();
        h.session.ensure_connected().await.unwrap();
        assert_eq!(h.connector.opens(), 1);

        let watchdog = h.session.clone();
        tokio::spawn(async move { watchdog.check_hung().await });
        time::sleep(Duration::from_millis(2_100)).await;
        assert!(h.session.is_reconnecting());
        assert_eq!(h.session.state(), MediaState::Reconnecting);

        h.session.ensure_connected().await.unwrap();
        assert!(h.session.is_reconnecting());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.connector.opens(), 2);
        assert!(h.session.is_active());
        assert!(!h.session.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_after_inactivity_window() {
        let h = harness();
        h.session.connect().await.unwrap();

        time::sleep(Duration::from_secs(301)).await;
        h.session.check_hung().await;

        assert_eq!(h.connector.opens(), 1);
        assert!(!h.session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_start_shows_speaking_text() {
        let h = harness();
        let mut rx = h.session.subscribe();
        h.session.connect().await.unwrap();
        *h.activity.text.lock() = "Hello there.".to_string();

        h.connector
            .last_sender()
            .send(PeerEvent::ChannelMessage(
                r#"{"event":{"eventType":"EVENT_TYPE_TURN_START"}}"#.to_string(),
            ))
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        let mut shown = None;
        while let Ok(event) = rx.try_recv() {
            if let MediaEvent::SubtitleShown { text } = event {
                shown = Some(text);
            }
        }
        assert_eq!(shown.as_deref(), Some("Hello there."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_video_disconnects_after_silence() {
        let mut idle_config = config();
        idle_config.use_local_video_for_idle = true;
        let h = harness_with(idle_config, MockConnector::new(Duration::ZERO, true), false);
        let recognition = Arc::new(Recognition::default());
        h.session.set_recognition(recognition.clone());

        let mut rx = h.session.subscribe();
        h.session.start().await.unwrap();
        assert_eq!(h.connector.opens(), 0);
        assert_eq!(
            rx.recv().await.unwrap(),
            MediaEvent::IdleFallback { visible: true }
        );

        h.session.ensure_connected().await.unwrap();
        assert!(h.session.is_active());

        time::sleep(Duration::from_secs(10)).await;
        h.session.check_last_speak().await;
        assert!(h.session.is_active());

        time::sleep(Duration::from_secs(6)).await;
        h.session.check_last_speak().await;
        assert!(!h.session.is_active());
        assert_eq!(h.session.state(), MediaState::Idle);
        assert_eq!(recognition.stops.load(Ordering::SeqCst), 1);
        assert!(h.slot.read().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_check_skipped_while_speaking() {
        let mut idle_config = config();
        idle_config.use_local_video_for_idle = true;
        let h = harness_with(idle_config, MockConnector::new(Duration::ZERO, true), false);
        h.session.connect().await.unwrap();
        h.activity.speaking.store(true, Ordering::SeqCst);

        time::sleep(Duration::from_secs(30)).await;
        h.session.check_last_speak().await;
        assert!(h.session.is_active());
    }
}
