//! voxtutor: real-time voice tutoring session core
//!
//! Streams microphone audio to a remote conversational tutoring service and
//! plays back synthesized speech in near real time, while maintaining a
//! text transcript of the exchange.
//!
//! # Pipeline
//!
//! ```text
//! microphone (cpal) ─▶ 16 kHz PCM16 frames ─▶ LiveSession (WebSocket)
//!                                                   │
//!                                   24 kHz audio deltas, transcripts,
//!                                   turn boundaries, interruptions
//!                                                   ▼
//!                      PlaybackScheduler + TurnBuffers, driven by
//!                      TutorSession::pump()
//! ```
//!
//! Embedders construct a [`TutorSession`], call [`TutorSession::start`], and
//! drive [`TutorSession::pump`] from their event loop; `stop`, `send_text`
//! and `clear_history` are available throughout. No logger is installed
//! here; the embedding application configures the `log` backend.

mod capture;
mod lifecycle;
mod live;
mod pcm;
mod playback;
mod session;
mod transcript;

pub use capture::{CaptureError, CaptureHandle, MicCapture, FRAME_SAMPLES};
pub use lifecycle::{ConnectionState, LifecycleEffect, LifecycleEvent};
pub use live::{
    get_api_key, Channel, EncodedChunk, LiveConfig, LiveError, LiveSession, ServerEvent,
    INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use pcm::{
    decode_transport, deinterleave, encode_transport, f32_to_i16, i16_to_f32, i16_to_le_bytes,
    interleave, le_bytes_to_i16,
};
pub use playback::{
    AudioSink, CpalClock, CpalPlayer, CpalSink, OutputClock, PlaybackError, PlaybackScheduler,
};
pub use session::TutorSession;
pub use transcript::{Role, TranscriptEntry, TurnBuffers};
