//! Live session transport for the tutoring service
//!
//! WebSocket-based bidirectional session: outbound microphone audio and
//! typed text, inbound synthesized speech, transcript deltas and control
//! signals.
//!
//! # Architecture
//!
//! ```text
//! Mic frames (16kHz PCM16) ──▶ EncodedChunk ──▶ LiveSession (WebSocket)
//!                                                     │
//!                                                     ▼
//!                                  ServerEvent channel (arrival order):
//!                                  audio.delta / transcript.delta /
//!                                  turn.complete / interrupted / error
//! ```
//!
//! There is no retry or reconnection logic at this layer; a failed or
//! dropped connection is reported once and the session state machine owns
//! the policy.

mod client;
mod protocol;

pub use client::{get_api_key, LiveSession};
pub use protocol::{
    Channel, ClientMessage, EncodedChunk, ErrorInfo, LiveConfig, ServerEvent, INPUT_SAMPLE_RATE,
    LIVE_API_URL, OUTPUT_SAMPLE_RATE,
};

/// Errors that can occur on the live session transport
#[derive(Debug, Clone)]
pub enum LiveError {
    /// Service API key not configured
    MissingApiKey,
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// Authentication with the service failed
    AuthenticationFailed(String),
    /// WebSocket protocol error
    ProtocolError(String),
    /// Connection was closed unexpectedly
    Disconnected(String),
    /// Failed to send a message
    SendFailed(String),
}

impl std::fmt::Display for LiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveError::MissingApiKey => {
                write!(
                    f,
                    "Service API key not configured. Set VOXTUTOR_API_KEY environment variable."
                )
            }
            LiveError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to live service: {}", e)
            }
            LiveError::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {}", e)
            }
            LiveError::ProtocolError(e) => {
                write!(f, "WebSocket protocol error: {}", e)
            }
            LiveError::Disconnected(e) => {
                write!(f, "WebSocket disconnected: {}", e)
            }
            LiveError::SendFailed(e) => {
                write!(f, "Failed to send message: {}", e)
            }
        }
    }
}

impl std::error::Error for LiveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_error_display() {
        let err = LiveError::MissingApiKey;
        assert!(err.to_string().contains("VOXTUTOR_API_KEY"));

        let err = LiveError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = LiveError::SendFailed("broken pipe".to_string());
        assert!(err.to_string().contains("broken pipe"));
    }
}
