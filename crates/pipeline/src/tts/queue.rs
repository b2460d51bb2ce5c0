//! Single-speaker speak queue
//!
//! Exactly one utterance is in flight at a time. Utterances submitted while
//! speaking are appended and drained strictly FIFO; the drain step runs the
//! same way whether synthesis succeeded or failed. Every synthesis carries a
//! generation number so completions that arrive after `stop` or a
//! reconnect-resume are ignored instead of advancing the queue twice.
//!
//! When the synthesizer an utterance ran on is released (media reconnect)
//! and the utterance did not complete, the queue parks: the in-flight text is
//! kept for [`SpeakQueue::resume_after_reconnect`] and nothing is drained.
//! If the reconnect fails, [`SpeakQueue::abandon_interrupted`] drops the
//! parked speech so later utterances play again.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

use avatar_agent_core::{SpeechActivity, SynthesisOutcome, SynthesizerSlot};

use super::ssml::build_ssml;

/// Queue behavior
#[derive(Debug, Clone)]
pub struct SpeakQueueConfig {
    pub voice: String,
    /// Emit each utterance as display text when it starts playing
    pub align_display_with_speech: bool,
}

/// Observable queue activity
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakEvent {
    UtteranceStarted { text: String },
    UtteranceFinished { text: String, success: bool },
    /// Transcript text aligned with speech
    DisplayText { text: String },
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
struct Utterance {
    text: String,
    trailing_silence_ms: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Utterance>,
    speaking: bool,
    /// Waiting for a reconnect after the synthesizer was released
    parked: bool,
    in_flight: Option<Utterance>,
    generation: u64,
    last_speak: Option<Instant>,
}

struct Inner {
    state: Mutex<QueueState>,
    synthesizer: SynthesizerSlot,
    config: Mutex<SpeakQueueConfig>,
    events: broadcast::Sender<SpeakEvent>,
}

/// FIFO, single-in-flight speech queue
#[derive(Clone)]
pub struct SpeakQueue {
    inner: Arc<Inner>,
}

impl SpeakQueue {
    pub fn new(config: SpeakQueueConfig, synthesizer: SynthesizerSlot) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                synthesizer,
                config: Mutex::new(config),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeakEvent> {
        self.inner.events.subscribe()
    }

    /// Replace voice/alignment settings for subsequent utterances
    pub fn set_config(&self, config: SpeakQueueConfig) {
        *self.inner.config.lock() = config;
    }

    /// Speak now if idle, otherwise append to the queue
    pub fn speak(&self, text: impl Into<String>, trailing_silence_ms: u64) {
        let utterance = Utterance {
            text: text.into(),
            trailing_silence_ms,
        };
        let mut state = self.inner.state.lock();
        if state.speaking {
            state.pending.push_back(utterance);
            return;
        }
        Inner::start(&self.inner, &mut state, utterance, false);
    }

    /// Clear the queue, cancel in-flight synthesis and mark idle
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            state.pending.clear();
            state.in_flight = None;
            state.speaking = false;
            state.parked = false;
            state.generation += 1;
        }

        let synthesizer = self.inner.synthesizer.read().clone();
        if let Some(synthesizer) = synthesizer {
            if let Err(e) = synthesizer.stop_speaking().await {
                tracing::warn!(error = %e, "Failed to stop speaking");
            }
        }
        let _ = self.inner.events.send(SpeakEvent::Idle);
    }

    /// Continue after a new video track started playing
    ///
    /// With `repeat_in_flight` the interrupted utterance is spoken again from
    /// the start (without repeating its display text); otherwise the next
    /// queued entry is spoken.
    pub fn resume_after_reconnect(&self, repeat_in_flight: bool) {
        let mut state = self.inner.state.lock();
        if repeat_in_flight {
            if let Some(utterance) = state.in_flight.clone().filter(|u| !u.text.is_empty()) {
                tracing::info!(text = %utterance.text, "Repeating interrupted utterance");
                Inner::start(&self.inner, &mut state, utterance, true);
            }
        } else if let Some(next) = state.pending.pop_front() {
            Inner::start(&self.inner, &mut state, next, false);
        } else if state.speaking {
            state.speaking = false;
            state.in_flight = None;
            let _ = self.inner.events.send(SpeakEvent::Idle);
        }
    }

    /// Drop speech interrupted by a reconnect that did not come back
    ///
    /// Applies when the queue is parked or its synthesizer is gone; a late
    /// completion of the dropped utterance is ignored.
    pub fn abandon_interrupted(&self) {
        let mut state = self.inner.state.lock();
        if !state.speaking {
            return;
        }
        if !state.parked && self.inner.synthesizer.read().is_some() {
            return;
        }
        let dropped = state.pending.len() as u64 + 1;
        tracing::info!(dropped, "Avatar connection lost; dropping queued speech");
        metrics::counter!("avatar_utterances_total", "outcome" => "dropped").increment(dropped);
        state.pending.clear();
        state.in_flight = None;
        state.speaking = false;
        state.parked = false;
        state.generation += 1;
        let _ = self.inner.events.send(SpeakEvent::Idle);
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }
}

impl Inner {
    fn start(inner: &Arc<Inner>, state: &mut QueueState, utterance: Utterance, skip_display: bool) {
        state.generation += 1;
        let generation = state.generation;
        state.last_speak = Some(Instant::now());
        state.speaking = true;
        state.parked = false;
        state.in_flight = Some(utterance.clone());

        let synthesizer = inner.synthesizer.read().clone();
        let Some(synthesizer) = synthesizer else {
            // Queued entries go too, so a later utterance cannot overtake them
            let dropped = state.pending.len() as u64 + 1;
            tracing::warn!(text = %utterance.text, dropped, "Avatar synthesizer not initialized yet");
            metrics::counter!("avatar_utterances_total", "outcome" => "dropped").increment(dropped);
            state.pending.clear();
            state.speaking = false;
            state.in_flight = None;
            let _ = inner.events.send(SpeakEvent::Idle);
            return;
        };

        let config = inner.config.lock().clone();
        if config.align_display_with_speech && !skip_display {
            let _ = inner.events.send(SpeakEvent::DisplayText {
                text: utterance.text.clone(),
            });
        }
        let _ = inner.events.send(SpeakEvent::UtteranceStarted {
            text: utterance.text.clone(),
        });

        let ssml = build_ssml(&config.voice, &utterance.text, utterance.trailing_silence_ms);
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let result = synthesizer.speak_ssml(&ssml).await;
            let released = !inner
                .synthesizer
                .read()
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &synthesizer));
            let success = match &result {
                Ok(SynthesisOutcome::Completed) => true,
                Ok(SynthesisOutcome::Canceled { reason }) => {
                    tracing::warn!(reason = %reason, "Speech synthesis canceled");
                    false
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Speech synthesis failed");
                    false
                }
            };
            inner.finish(generation, utterance.text, success, released);
        });
    }

    fn finish(self: &Arc<Self>, generation: u64, text: String, success: bool, released: bool) {
        let outcome = if success { "completed" } else { "failed" };
        metrics::counter!("avatar_utterances_total", "outcome" => outcome).increment(1);

        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::debug!(text = %text, "Ignoring completion of superseded utterance");
            return;
        }
        if !success && released {
            tracing::info!(text = %text, "Synthesizer released mid-utterance; holding queue");
            state.parked = true;
            return;
        }

        if success {
            state.last_speak = Some(Instant::now());
        }
        state.in_flight = None;
        let _ = self
            .events
            .send(SpeakEvent::UtteranceFinished { text, success });

        match state.pending.pop_front() {
            Some(next) => Inner::start(self, &mut state, next, false),
            None => {
                state.speaking = false;
                let _ = self.events.send(SpeakEvent::Idle);
            }
        }
    }
}

impl SpeechActivity for SpeakQueue {
    fn is_speaking(&self) -> bool {
        self.inner.state.lock().speaking
    }

    fn speaking_text(&self) -> String {
        self.inner
            .state
            .lock()
            .in_flight
            .as_ref()
            .map(|u| u.text.clone())
            .unwrap_or_default()
    }

    fn last_speak(&self) -> Option<Instant> {
        self.inner.state.lock().last_speak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use avatar_agent_core::{Result as CoreResult, SpeechSynthesizer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records spoken text and the maximum number of overlapping syntheses
    struct MockSynth {
        spoken: Mutex<Vec<String>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_on: Option<&'static str>,
        stops: AtomicUsize,
    }

    impl MockSynth {
        fn new(fail_on: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                spoken: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                fail_on,
                stops: AtomicUsize::new(0),
            })
        }
    }

    fn text_of(ssml: &str) -> String {
        let start = ssml.find("value='0'/>").map(|i| i + 11).unwrap_or(0);
        let end = ssml[start..].find('<').map(|i| start + i).unwrap_or(ssml.len());
        ssml[start..end].to_string()
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSynth {
        async fn speak_ssml(&self, ssml: &str) -> CoreResult<SynthesisOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let text = text_of(ssml);
            // Longer text takes less time, so overlap would reorder completions
            let delay = 100u64.saturating_sub(text.len() as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.spoken.lock().push(text.clone());
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on == Some(text.as_str()) {
                return Err(avatar_agent_core::Error::Speech("boom".to_string()));
            }
            Ok(SynthesisOutcome::Completed)
        }

        async fn stop_speaking(&self) -> CoreResult<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {}
    }

    fn queue_with(synth: Option<Arc<MockSynth>>) -> SpeakQueue {
        let slot: SynthesizerSlot = Arc::new(parking_lot::RwLock::new(
            synth.map(|s| s as Arc<dyn SpeechSynthesizer>),
        ));
        SpeakQueue::new(
            SpeakQueueConfig {
                voice: "test-voice".to_string(),
                align_display_with_speech: true,
            },
            slot,
        )
    }

    async fn wait_idle(rx: &mut broadcast::Receiver<SpeakEvent>) {
        loop {
            match rx.recv().await {
                Ok(SpeakEvent::Idle) => return,
                Ok(_) => continue,
                Err(e) => panic!("event channel: {}", e),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_single_in_flight() {
        let synth = MockSynth::new(None);
        let queue = queue_with(Some(synth.clone()));
        let mut rx = queue.subscribe();

        queue.speak("t1", 0);
        queue.speak("t2 longer", 0);
        queue.speak("t3", 0);
        assert!(queue.is_speaking());
        assert_eq!(queue.pending_len(), 2);

        wait_idle(&mut rx).await;
        assert_eq!(*synth.spoken.lock(), vec!["t1", "t2 longer", "t3"]);
        assert_eq!(synth.max_active.load(Ordering::SeqCst), 1);
        assert!(!queue.is_speaking());
        assert!(queue.last_speak().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_stall_queue() {
        let synth = MockSynth::new(Some("bad"));
        let queue = queue_with(Some(synth.clone()));
        let mut rx = queue.subscribe();

        queue.speak("bad", 0);
        queue.speak("good", 0);

        let mut finished = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                SpeakEvent::UtteranceFinished { text, success } => finished.push((text, success)),
                SpeakEvent::Idle => break,
                _ => {}
            }
        }
        assert_eq!(
            finished,
            vec![("bad".to_string(), false), ("good".to_string(), true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_queue() {
        let synth = MockSynth::new(None);
        let queue = queue_with(Some(synth.clone()));

        queue.speak("one", 0);
        queue.speak("two", 0);
        queue.speak("three", 0);
        queue.stop().await;

        assert!(!queue.is_speaking());
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(synth.stops.load(Ordering::SeqCst), 1);

        // The superseded completion must not start "two"
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*synth.spoken.lock(), vec!["one"]);
        assert!(!queue.is_speaking());
    }

    #[tokio::test]
    async fn test_stop_without_synthesizer_is_noop() {
        let queue = queue_with(None);
        queue.stop().await;
        queue.stop().await;
        assert!(!queue.is_speaking());
    }

    #[tokio::test]
    async fn test_speak_without_synthesizer_drops_utterance() {
        let queue = queue_with(None);
        queue.speak("lost", 0);
        assert!(!queue.is_speaking());
        assert_eq!(queue.speaking_text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_text_emitted_on_start() {
        let synth = MockSynth::new(None);
        let queue = queue_with(Some(synth));
        let mut rx = queue.subscribe();
        queue.speak("Hello there.", 0);
        assert_eq!(
            rx.recv().await.unwrap(),
            SpeakEvent::DisplayText {
                text: "Hello there.".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_repeats_in_flight_text() {
        let synth = MockSynth::new(None);
        let queue = queue_with(Some(synth.clone()));
        let mut rx = queue.subscribe();

        queue.speak("interrupted", 0);
        queue.speak("next", 0);
        assert_eq!(queue.speaking_text(), "interrupted");

        queue.resume_after_reconnect(true);
        wait_idle(&mut rx).await;

        // The original synthesis completes too but is superseded; "next" plays once
        let spoken = synth.spoken.lock().clone();
        assert_eq!(spoken.iter().filter(|t| *t == "interrupted").count(), 2);
        assert_eq!(spoken.iter().filter(|t| *t == "next").count(), 1);
        assert_eq!(spoken.last().map(String::as_str), Some("next"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_synthesizer_parks_queue() {
        let synth = MockSynth::new(Some("cut off"));
        let slot: SynthesizerSlot = Arc::new(parking_lot::RwLock::new(Some(
            synth.clone() as Arc<dyn SpeechSynthesizer>,
        )));
        let queue = SpeakQueue::new(
            SpeakQueueConfig {
                voice: "v".to_string(),
                align_display_with_speech: false,
            },
            slot.clone(),
        );

        queue.speak("cut off", 0);
        queue.speak("after", 0);
        *slot.write() = None;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(queue.is_speaking());
        assert_eq!(queue.speaking_text(), "cut off");
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(*synth.spoken.lock(), vec!["cut off"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_releases_parked_queue() {
        let synth = MockSynth::new(Some("a"));
        let slot: SynthesizerSlot = Arc::new(parking_lot::RwLock::new(Some(
            synth.clone() as Arc<dyn SpeechSynthesizer>,
        )));
        let queue = SpeakQueue::new(
            SpeakQueueConfig {
                voice: "v".to_string(),
                align_display_with_speech: false,
            },
            slot.clone(),
        );

        queue.speak("a", 0);
        queue.speak("bb", 0);
        *slot.write() = None;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_speaking());

        // The reconnect failed; a later connection brings a new synthesizer
        queue.abandon_interrupted();
        assert!(!queue.is_speaking());
        assert_eq!(queue.pending_len(), 0);

        let replacement = MockSynth::new(None);
        *slot.write() = Some(replacement.clone() as Arc<dyn SpeechSynthesizer>);
        let mut rx = queue.subscribe();
        queue.speak("ccc", 0);
        wait_idle(&mut rx).await;
        assert_eq!(*replacement.spoken.lock(), vec!["ccc"]);
        assert_eq!(*synth.spoken.lock(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_ignores_healthy_queue() {
        let synth = MockSynth::new(None);
        let queue = queue_with(Some(synth.clone()));
        let mut rx = queue.subscribe();

        queue.speak("one", 0);
        queue.speak("two", 0);
        queue.abandon_interrupted();
        assert!(queue.is_speaking());
        assert_eq!(queue.pending_len(), 1);

        wait_idle(&mut rx).await;
        assert_eq!(*synth.spoken.lock(), vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_synthesizer_drops_backlog() {
        let synth = MockSynth::new(None);
        let slot: SynthesizerSlot = Arc::new(parking_lot::RwLock::new(Some(
            synth.clone() as Arc<dyn SpeechSynthesizer>,
        )));
        let queue = SpeakQueue::new(
            SpeakQueueConfig {
                voice: "v".to_string(),
                align_display_with_speech: false,
            },
            slot.clone(),
        );

        queue.speak("first", 0);
        queue.speak("second", 0);
        queue.speak("third", 0);
        // Gone by the time "first" completes, so "second" finds no synthesizer
        *slot.write() = None;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!queue.is_speaking());
        assert_eq!(queue.pending_len(), 0);

        let replacement = MockSynth::new(None);
        *slot.write() = Some(replacement.clone() as Arc<dyn SpeechSynthesizer>);
        let mut rx = queue.subscribe();
        queue.speak("fourth", 0);
        wait_idle(&mut rx).await;
        assert_eq!(*replacement.spoken.lock(), vec!["fourth"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_without_repeat_moves_on() {
        let synth = MockSynth::new(None);
        let queue = queue_with(Some(synth.clone()));
        let mut rx = queue.subscribe();

        queue.speak("interrupted", 0);
        queue.speak("next", 0);
        queue.resume_after_reconnect(false);
        wait_idle(&mut rx).await;

        let spoken = synth.spoken.lock().clone();
        assert_eq!(spoken.iter().filter(|t| *t == "interrupted").count(), 1);
        assert_eq!(spoken.iter().filter(|t| *t == "next").count(), 1);
    }
}
