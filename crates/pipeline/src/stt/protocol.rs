//! Azure Speech WebSocket message framing
//!
//! Text messages are `header: value` lines, a blank line, then a body.
//! Binary messages start with a 2-byte big-endian header length, the header
//! block, then raw audio.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::json;
use std::io::Cursor;

use crate::SpeechError;

pub const SAMPLE_RATE: u32 = 16_000;

/// Timestamp format the service expects
fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

pub fn request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn text_message(path: &str, request_id: &str, content_type: &str, body: &str) -> String {
    format!(
        "Path: {}\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: {}\r\n\r\n{}",
        path,
        request_id,
        timestamp(),
        content_type,
        body
    )
}

/// `speech.config` payload describing the client
pub fn speech_config_message(request_id: &str) -> String {
    let body = json!({
        "context": {
            "system": {"name": "avatar-agent", "version": env!("CARGO_PKG_VERSION"), "build": "rust", "lang": "Rust"},
            "os": {"platform": std::env::consts::OS, "name": std::env::consts::OS, "version": ""},
            "audio": {"source": {"bitspersample": 16, "channelcount": 1, "samplerate": SAMPLE_RATE, "type": "Microphones"}}
        }
    });
    text_message("speech.config", request_id, "application/json", &body.to_string())
}

/// `speech.context` payload enabling continuous language identification
pub fn speech_context_message(request_id: &str, locales: &[String]) -> String {
    let body = json!({
        "languageId": {
            "mode": "DetectContinuous",
            "Priority": "PrioritizeLatency",
            "languages": locales,
            "onSuccess": {"action": "Recognize"},
            "onUnknown": {"action": "None"}
        },
        "phraseOutput": {
            "interimResults": {"resultType": "Auto"},
            "phraseResults": {"resultType": "Always"}
        }
    });
    text_message("speech.context", request_id, "application/json", &body.to_string())
}

/// Binary audio frame; an empty chunk marks end of audio
pub fn audio_message(request_id: &str, audio: &[u8]) -> Bytes {
    let header = format!(
        "Path: audio\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: audio/x-wav\r\n",
        request_id,
        timestamp()
    );
    let mut frame = BytesMut::with_capacity(2 + header.len() + audio.len());
    frame.put_u16(header.len() as u16);
    frame.put_slice(header.as_bytes());
    frame.put_slice(audio);
    frame.freeze()
}

/// RIFF header for a 16 kHz mono PCM16 stream of unknown length
pub fn wav_header() -> Result<Vec<u8>, SpeechError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    hound::WavWriter::new(&mut cursor, spec)
        .and_then(|w| w.finalize())
        .map_err(|e| SpeechError::Protocol(format!("WAV header: {}", e)))?;
    Ok(cursor.into_inner())
}

/// Parsed service message
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMessage {
    Hypothesis { text: String },
    Phrase { status: String, text: String },
    TurnEnd,
    Other { path: String },
}

#[derive(Debug, Deserialize)]
struct HypothesisBody {
    #[serde(rename = "Text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PhraseBody {
    #[serde(rename = "RecognitionStatus", default)]
    status: String,
    #[serde(rename = "DisplayText", default)]
    display_text: String,
}

pub fn parse_service_message(raw: &str) -> Result<ServiceMessage, SpeechError> {
    let (headers, body) = raw
        .split_once("\r\n\r\n")
        .ok_or_else(|| SpeechError::Protocol("missing header separator".to_string()))?;

    let path = headers
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("path"))
        .map(|(_, value)| value.trim().to_string())
        .ok_or_else(|| SpeechError::Protocol("missing Path header".to_string()))?;

    let parse_error = |e: serde_json::Error| SpeechError::Protocol(format!("{}: {}", path, e));
    match path.to_ascii_lowercase().as_str() {
        "speech.hypothesis" => {
            let body: HypothesisBody = serde_json::from_str(body).map_err(parse_error)?;
            Ok(ServiceMessage::Hypothesis { text: body.text })
        }
        "speech.phrase" => {
            let body: PhraseBody = serde_json::from_str(body).map_err(parse_error)?;
            Ok(ServiceMessage::Phrase {
                status: body.status,
                text: body.display_text,
            })
        }
        "turn.end" => Ok(ServiceMessage::TurnEnd),
        _ => Ok(ServiceMessage::Other { path }),
    }
}
