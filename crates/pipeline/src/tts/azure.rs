//! Azure Speech synthesis backend
//!
//! Posts SSML to the synthesis REST endpoint (public region or private
//! endpoint), publishes the returned audio, and holds the request "in flight"
//! for the audio's playback duration so the speak queue observes real
//! utterance timing. `stop_speaking` and `close` cancel immediately.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use avatar_agent_config::{SpeechBehaviorConfig, SpeechServiceConfig};
use avatar_agent_core::{SpeechSynthesizer, SynthesisOutcome, SynthesizerFactory};

use crate::SpeechError;

const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

/// One synthesized utterance
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub wav: Bytes,
    pub duration: Duration,
}

/// Synthesis endpoint for the speech resource
pub fn synthesis_url(speech: &SpeechServiceConfig, custom_voice_endpoint_id: &str) -> String {
    let base = match speech.private_endpoint_host() {
        Some(host) => format!("https://{}/tts/cognitiveservices/v1", host),
        None => format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            speech.region
        ),
    };
    if custom_voice_endpoint_id.is_empty() {
        base
    } else {
        format!("{}?deploymentId={}", base, custom_voice_endpoint_id)
    }
}

fn wav_duration(wav: &[u8]) -> Duration {
    match hound::WavReader::new(Cursor::new(wav)) {
        Ok(reader) => {
            let rate = reader.spec().sample_rate.max(1);
            Duration::from_secs_f64(reader.duration() as f64 / rate as f64)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Synthesized audio is not WAV; assuming zero duration");
            Duration::ZERO
        }
    }
}

pub struct AzureSpeechSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    cancel: Notify,
    closed: AtomicBool,
    audio: broadcast::Sender<SynthesizedAudio>,
}

impl AzureSpeechSynthesizer {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        audio: broadcast::Sender<SynthesizedAudio>,
    ) -> Result<Self, SpeechError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SpeechError::MissingCredential(
                "Azure Speech API key not configured".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
            cancel: Notify::new(),
            closed: AtomicBool::new(false),
            audio,
        })
    }

    async fn synthesize(&self, ssml: &str) -> Result<Bytes, SpeechError> {
        let response = self
            .client
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "avatar-agent")
            .body(ssml.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechError::Tts(format!("Synthesis request failed: {}", status)));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeechSynthesizer {
    async fn speak_ssml(&self, ssml: &str) -> avatar_agent_core::Result<SynthesisOutcome> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpeechError::NotInitialized.into());
        }

        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);

        let wav = tokio::select! {
            result = self.synthesize(ssml) => result?,
            _ = &mut cancelled => {
                return Ok(SynthesisOutcome::Canceled { reason: "stopped".to_string() });
            }
        };

        let duration = wav_duration(&wav);
        let _ = self.audio.send(SynthesizedAudio { wav, duration });

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(SynthesisOutcome::Completed),
            _ = &mut cancelled => Ok(SynthesisOutcome::Canceled { reason: "stopped".to_string() }),
        }
    }

    async fn stop_speaking(&self) -> avatar_agent_core::Result<()> {
        self.cancel.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }
}

/// Builds one synthesizer per media connection
pub struct AzureSynthesizerFactory {
    url: String,
    api_key: String,
    audio: broadcast::Sender<SynthesizedAudio>,
}

impl AzureSynthesizerFactory {
    pub fn new(
        speech: &SpeechServiceConfig,
        behavior: &SpeechBehaviorConfig,
        audio: broadcast::Sender<SynthesizedAudio>,
    ) -> Self {
        Self {
            url: synthesis_url(speech, &behavior.custom_voice_endpoint_id),
            api_key: speech.api_key.clone(),
            audio,
        }
    }
}

impl SynthesizerFactory for AzureSynthesizerFactory {
    fn create(&self) -> avatar_agent_core::Result<Arc<dyn SpeechSynthesizer>> {
        let synthesizer = AzureSpeechSynthesizer::new(&self.url, &self.api_key, self.audio.clone())?;
        Ok(Arc::new(synthesizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech(region: &str) -> SpeechServiceConfig {
        SpeechServiceConfig {
            region: region.to_string(),
            api_key: "k".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            synthesis_url(&speech("westeurope"), ""),
            "https://westeurope.tts.speech.microsoft.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn test_private_url_with_custom_voice() {
        let mut config = speech("westeurope");
        config.enable_private_endpoint = true;
        config.private_endpoint = "https://my-speech.cognitiveservices.azure.com/".to_string();
        assert_eq!(
            synthesis_url(&config, "abc"),
            "https://my-speech.cognitiveservices.azure.com/tts/cognitiveservices/v1?deploymentId=abc"
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        let (tx, _) = broadcast::channel(1);
        let result = AzureSpeechSynthesizer::new("https://x", "", tx);
        assert!(matches!(result, Err(SpeechError::MissingCredential(_))));
    }

    #[test]
    fn test_wav_duration() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..8_000 {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        assert_eq!(wav_duration(cursor.get_ref()), Duration::from_millis(500));
        assert_eq!(wav_duration(b"not wav"), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_closed_synthesizer_refuses() {
        let (tx, _) = broadcast::channel(1);
        let synth = AzureSpeechSynthesizer::new("http://127.0.0.1:9", "k", tx).unwrap();
        synth.close().await;
        assert!(synth.speak_ssml("<speak/>").await.is_err());
    }
}
