//! Extraction of audio payloads from generative backend envelopes.
//!
//! The backend nests the base64 audio chunk at one of several known paths
//! depending on server version; each legal shape is tried in order.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no audio payload at any known envelope path")]
    NoAudioPayload,
    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decoded content of one backend message.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeContent {
    /// Raw PCM bytes, forwarded verbatim downstream.
    Audio(Vec<u8>),
    /// Explicit backend rejection; surfaced, never fatal.
    Error(String),
    /// Control chatter (acks, keepalives) with nothing to route.
    Ignorable,
}

/// Envelope paths that may carry the base64 audio chunk, in probe order.
const AUDIO_PATHS: [&[&str]; 3] = [
    &["audio"],
    &["data", "audio"],
    &["serverContent", "audioChunk", "data"],
];

/// Parse one text message from the generative backend.
pub fn parse_envelope(text: &str) -> Result<EnvelopeContent, EnvelopeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    if let Some(message) = extract_error(&value) {
        return Ok(EnvelopeContent::Error(message));
    }

    for path in AUDIO_PATHS {
        if let Some(encoded) = lookup_path(&value, path).and_then(|v| v.as_str()) {
            let bytes = BASE64.decode(encoded)?;
            return Ok(EnvelopeContent::Audio(bytes));
        }
    }

    // Messages without audio or error content are control chatter; the
    // caller decides whether an unexpected shape is worth logging.
    if value.get("ack").is_some() || value.get("keepalive").is_some() {
        return Ok(EnvelopeContent::Ignorable);
    }
    Err(EnvelopeError::NoAudioPayload)
}

fn lookup_path<'a>(value: &'a serde_json::Value, path: &[&str]) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    Some(current)
}

fn extract_error(value: &serde_json::Value) -> Option<String> {
    if value.get("type").and_then(|t| t.as_str()) == Some("error") {
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unspecified backend error");
        return Some(message.to_string());
    }
    match value.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(obj @ serde_json::Value::Object(_)) => Some(
            obj.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unspecified backend error")
                .to_string(),
        ),
        _ => None,
    }
}
