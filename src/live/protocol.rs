//! Wire protocol for the live tutoring session
//!
//! JSON message types exchanged with the remote conversational service over
//! WebSocket.
//!
//! # Protocol Overview
//!
//! 1. Connect to the live endpoint
//! 2. Send `session.setup` with the session configuration
//! 3. Receive `session.ready`
//! 4. Stream microphone audio via `input_audio.append`
//! 5. Receive synthesized audio (`audio.delta`), transcript deltas
//!    (`transcript.delta`) and turn boundaries (`turn.complete`)
//!
//! Inbound decoding is defensive: unknown message types map to
//! [`ServerEvent::Unknown`] and missing payload fields degrade to values the
//! session can skip, never a deserialization failure.

use serde::{Deserialize, Serialize};

use crate::pcm;

/// Live session WebSocket endpoint
pub const LIVE_API_URL: &str = "wss://api.voxtutor.dev/v1/live";

/// Outbound audio framing: 16 kHz mono 16-bit little-endian PCM
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Inbound audio framing: 24 kHz mono 16-bit little-endian PCM
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Session configuration sent in `session.setup`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Response modality - the tutor always answers with speech
    pub response_modality: String,

    /// Synthesized voice name
    pub voice: String,

    /// Tutor persona / course context prompt
    pub system_prompt: String,

    /// Transcribe the user's speech server-side
    pub input_transcription: bool,

    /// Transcribe the tutor's speech server-side
    pub output_transcription: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            response_modality: "audio".to_string(),
            voice: "Puck".to_string(),
            system_prompt: String::new(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

impl LiveConfig {
    /// Config with a specific tutor prompt, other fields at defaults
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// A text-safe encoded audio frame, tagged with its format descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    /// Base64-encoded little-endian PCM16 bytes
    pub data: String,

    /// MIME-like descriptor, e.g. `audio/pcm;rate=16000`
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl EncodedChunk {
    /// Encode PCM16 samples at the given rate
    pub fn pcm16(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            data: pcm::encode_transport(&pcm::i16_to_le_bytes(samples)),
            mime_type: format!("audio/pcm;rate={}", sample_rate),
        }
    }
}

/// Which speaker a transcript fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The user's speech (input transcription)
    Input,
    /// The tutor's synthesized speech (output transcription)
    Output,
}

/// Error details from the service
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Client Messages (sent TO the service)
// ============================================================================

/// Messages sent from client to the live service
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Configure the session (first message after connect)
    #[serde(rename = "session.setup")]
    Setup { session: LiveConfig },

    /// Append a microphone audio frame to the input stream
    #[serde(rename = "input_audio.append")]
    AudioAppend {
        #[serde(flatten)]
        chunk: EncodedChunk,
    },

    /// Send a typed user message
    #[serde(rename = "input_text.send")]
    TextInput { text: String },
}

impl ClientMessage {
    /// Setup message for the given config
    pub fn setup(config: LiveConfig) -> Self {
        Self::Setup { session: config }
    }

    /// Audio append message wrapping an already-encoded chunk
    pub fn audio_append(chunk: EncodedChunk) -> Self {
        Self::AudioAppend { chunk }
    }

    /// Text input message
    pub fn text_input(text: impl Into<String>) -> Self {
        Self::TextInput { text: text.into() }
    }
}

// ============================================================================
// Server Events (received FROM the service)
// ============================================================================

/// Events received from the live service
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Session is configured and ready for audio
    #[serde(rename = "session.ready")]
    Ready,

    /// A fragment of synthesized tutor speech (24 kHz PCM16, base64)
    ///
    /// `audio` may be absent on malformed frames; the session skips those.
    #[serde(rename = "audio.delta")]
    AudioChunk {
        #[serde(default)]
        audio: Option<String>,
    },

    /// Incremental transcript text for one speaker
    #[serde(rename = "transcript.delta")]
    TranscriptFragment {
        #[serde(default)]
        speaker: Option<Channel>,
        #[serde(default)]
        delta: String,
    },

    /// The current utterance exchange has ended
    #[serde(rename = "turn.complete")]
    TurnComplete,

    /// The user started speaking over the tutor; stop playback now
    #[serde(rename = "interrupted")]
    Interrupted,

    /// Fatal error for this connection
    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// Catch-all for event types this client does not handle
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup(LiveConfig::with_system_prompt("You are a tutor."));
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"session.setup\""));
        assert!(json.contains("\"responseModality\":\"audio\""));
        assert!(json.contains("\"systemPrompt\":\"You are a tutor.\""));
        assert!(json.contains("\"inputTranscription\":true"));
        assert!(json.contains("\"outputTranscription\":true"));
    }

    #[test]
    fn test_audio_append_serialization() {
        let chunk = EncodedChunk::pcm16(&[0x1234, 0x5678], INPUT_SAMPLE_RATE);
        let msg = ClientMessage::audio_append(chunk);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"input_audio.append\""));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
        assert!(json.contains("\"data\":"));
    }

    #[test]
    fn test_encoded_chunk_payload_bytes() {
        let chunk = EncodedChunk::pcm16(&[0x1234, 0x5678], INPUT_SAMPLE_RATE);
        let decoded = pcm::decode_transport(&chunk.data).unwrap();

        // Little-endian: 0x1234 -> [0x34, 0x12], 0x5678 -> [0x78, 0x56]
        assert_eq!(decoded, vec![0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_text_input_serialization() {
        let msg = ClientMessage::text_input("What is recursion?");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"input_text.send\""));
        assert!(json.contains("\"text\":\"What is recursion?\""));
    }

    #[test]
    fn test_audio_chunk_deserialization() {
        let json = r#"{"type": "audio.delta", "audio": "AAAA"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();

        match event {
            ServerEvent::AudioChunk { audio } => assert_eq!(audio.as_deref(), Some("AAAA")),
            _ => panic!("Expected AudioChunk"),
        }
    }

    #[test]
    fn test_audio_chunk_missing_payload_is_not_a_parse_error() {
        let json = r#"{"type": "audio.delta"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();

        match event {
            ServerEvent::AudioChunk { audio } => assert!(audio.is_none()),
            _ => panic!("Expected AudioChunk"),
        }
    }

    #[test]
    fn test_transcript_fragment_deserialization() {
        let json = r#"{"type": "transcript.delta", "speaker": "output", "delta": "Hello"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();

        match event {
            ServerEvent::TranscriptFragment { speaker, delta } => {
                assert_eq!(speaker, Some(Channel::Output));
                assert_eq!(delta, "Hello");
            }
            _ => panic!("Expected TranscriptFragment"),
        }
    }

    #[test]
    fn test_transcript_fragment_missing_speaker() {
        let json = r#"{"type": "transcript.delta", "delta": "x"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();

        match event {
            ServerEvent::TranscriptFragment { speaker, .. } => assert!(speaker.is_none()),
            _ => panic!("Expected TranscriptFragment"),
        }
    }

    #[test]
    fn test_error_deserialization() {
        let json = r#"{
            "type": "error",
            "error": {"type": "quota_exceeded", "code": "429", "message": "Out of quota"}
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();

        match event {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Out of quota");
                assert_eq!(error.code, Some("429".to_string()));
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let json = r#"{"type": "some.future.event", "data": "whatever"}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();

        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_live_config_default() {
        let config = LiveConfig::default();

        assert_eq!(config.response_modality, "audio");
        assert!(config.input_transcription);
        assert!(config.output_transcription);
        assert!(config.system_prompt.is_empty());
    }
}
