//! Speech session manager
//!
//! Owns at most one running recognizer and republishes its raw events as
//! [`SpeechEvent`]s. Empty phrases never surface as utterances; in
//! single-utterance mode the first utterance ends the run.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use avatar_agent_core::{RecognitionControl, RecognitionEvent, RecognitionRequest, SpeechRecognizer};

use super::azure::RecognizerFactory;
use crate::SpeechError;

const EVENT_BUFFER: usize = 64;

/// Events observed by the session controller
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Recognizing { text: String },
    Utterance { text: String },
    Stopped,
    Canceled { reason: String },
}

struct Inner {
    factory: Arc<dyn RecognizerFactory>,
    recognizer: Mutex<Option<Arc<dyn SpeechRecognizer>>>,
    events: broadcast::Sender<SpeechEvent>,
}

#[derive(Clone)]
pub struct SpeechSessionManager {
    inner: Arc<Inner>,
}

impl SpeechSessionManager {
    pub fn new(factory: Arc<dyn RecognizerFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                factory,
                recognizer: Mutex::new(None),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.inner.events.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.recognizer.lock().await.is_some()
    }

    /// Start recognition; a no-op while a run is already active
    pub async fn start(&self, locales: Vec<String>, continuous: bool) -> Result<(), SpeechError> {
        let mut slot = self.inner.recognizer.lock().await;
        if slot.is_some() {
            debug!("Speech recognition already running");
            return Ok(());
        }

        let recognizer = self.inner.factory.create()?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let request = RecognitionRequest { locales, continuous };
        if let Err(e) = recognizer.start(request, tx).await {
            recognizer.close();
            return Err(SpeechError::Stt(e.to_string()));
        }
        *slot = Some(Arc::clone(&recognizer));
        drop(slot);

        tokio::spawn(pump(self.clone(), recognizer, rx, continuous));
        Ok(())
    }

    /// Stop recognition; calling it when nothing runs does nothing
    pub async fn stop(&self) {
        let recognizer = self.inner.recognizer.lock().await.take();
        let Some(recognizer) = recognizer else {
            return;
        };
        if let Err(e) = recognizer.stop().await {
            warn!("Failed to stop speech recognition cleanly: {}", e);
        }
        recognizer.close();
        info!("Speech recognition stopped");
    }

    /// Release the slot if it still holds `recognizer`
    async fn release(&self, recognizer: &Arc<dyn SpeechRecognizer>) {
        let mut slot = self.inner.recognizer.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, recognizer)) {
            *slot = None;
            drop(slot);
            recognizer.close();
        }
    }
}

async fn pump(
    manager: SpeechSessionManager,
    recognizer: Arc<dyn SpeechRecognizer>,
    mut rx: mpsc::Receiver<RecognitionEvent>,
    continuous: bool,
) {
    let events = &manager.inner.events;
    while let Some(event) = rx.recv().await {
        match event {
            RecognitionEvent::Recognizing { text } => {
                let _ = events.send(SpeechEvent::Recognizing { text });
            }
            RecognitionEvent::Recognized { text } => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let _ = events.send(SpeechEvent::Utterance {
                    text: text.to_string(),
                });
                if !continuous {
                    manager.stop().await;
                }
            }
            RecognitionEvent::Canceled { reason } => {
                warn!(reason = %reason, "Speech recognition canceled");
                let _ = events.send(SpeechEvent::Canceled { reason });
            }
            RecognitionEvent::SessionStopped => break,
        }
    }
    manager.release(&recognizer).await;
    let _ = events.send(SpeechEvent::Stopped);
}

#[async_trait]
impl RecognitionControl for SpeechSessionManager {
    async fn stop(&self) {
        SpeechSessionManager::stop(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockRecognizer {
        events: SyncMutex<Option<mpsc::Sender<RecognitionEvent>>>,
        stops: AtomicUsize,
        closes: AtomicUsize,
    }

    impl MockRecognizer {
        fn sender(&self) -> mpsc::Sender<RecognitionEvent> {
            self.events.lock().clone().unwrap()
        }
    }

    #[async_trait]
    impl SpeechRecognizer for MockRecognizer {
        async fn start(
            &self,
            _request: RecognitionRequest,
            events: mpsc::Sender<RecognitionEvent>,
        ) -> avatar_agent_core::Result<()> {
            *self.events.lock() = Some(events);
            Ok(())
        }

        async fn stop(&self) -> avatar_agent_core::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = self.events.lock().take() {
                let _ = tx.try_send(RecognitionEvent::SessionStopped);
            }
            Ok(())
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockFactory(Arc<MockRecognizer>);

    impl RecognizerFactory for MockFactory {
        fn create(&self) -> Result<Arc<dyn SpeechRecognizer>, SpeechError> {
            Ok(self.0.clone())
        }
    }

    struct FailingFactory;

    impl RecognizerFactory for FailingFactory {
        fn create(&self) -> Result<Arc<dyn SpeechRecognizer>, SpeechError> {
            Err(SpeechError::MissingCredential(
                "Azure Speech API key not configured".to_string(),
            ))
        }
    }

    fn manager() -> (SpeechSessionManager, Arc<MockRecognizer>) {
        let mock = Arc::new(MockRecognizer::default());
        (SpeechSessionManager::new(Arc::new(MockFactory(mock.clone()))), mock)
    }

    async fn next_event(rx: &mut broadcast::Receiver<SpeechEvent>) -> SpeechEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let (manager, mock) = manager();
        manager.start(vec!["en-US".to_string()], true).await.unwrap();
        assert!(manager.is_running().await);

        manager.stop().await;
        assert!(!manager.is_running().await);
        manager.stop().await;

        assert_eq!(mock.stops.load(Ordering::SeqCst), 1);
        assert!(mock.closes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_empty_phrases_filtered() {
        let (manager, mock) = manager();
        let mut rx = manager.subscribe();
        manager.start(vec![], true).await.unwrap();

        let tx = mock.sender();
        tx.send(RecognitionEvent::Recognized { text: "   ".to_string() }).await.unwrap();
        tx.send(RecognitionEvent::Recognizing { text: "what".to_string() }).await.unwrap();
        tx.send(RecognitionEvent::Recognized {
            text: " What is the project scope? ".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            SpeechEvent::Recognizing { text: "what".to_string() }
        );
        assert_eq!(
            next_event(&mut rx).await,
            SpeechEvent::Utterance {
                text: "What is the project scope?".to_string()
            }
        );
        assert!(manager.is_running().await);
    }

    #[tokio::test]
    async fn test_single_mode_stops_after_first_utterance() {
        let (manager, mock) = manager();
        let mut rx = manager.subscribe();
        manager.start(vec![], false).await.unwrap();

        mock.sender()
            .send(RecognitionEvent::Recognized { text: "hello".to_string() })
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            SpeechEvent::Utterance { text: "hello".to_string() }
        );
        assert_eq!(next_event(&mut rx).await, SpeechEvent::Stopped);
        assert!(!manager.is_running().await);
        assert_eq!(mock.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let (manager, _mock) = manager();
        manager.start(vec![], true).await.unwrap();
        manager.start(vec![], true).await.unwrap();
        assert!(manager.is_running().await);
    }

    #[tokio::test]
    async fn test_missing_credential_surfaces() {
        let manager = SpeechSessionManager::new(Arc::new(FailingFactory));
        let err = manager.start(vec![], true).await.unwrap_err();
        assert_eq!(err.to_string(), "Azure Speech API key not configured");
        assert!(!manager.is_running().await);
    }
}
