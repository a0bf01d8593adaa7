//! Tutoring session orchestration
//!
//! [`TutorSession`] wires the capture pipeline, live transport, playback
//! scheduler and transcript aggregation together under the lifecycle
//! reducer. It owns every shared resource: the microphone, the one live
//! connection, the transcript list and the playback state all live here and
//! are torn down together.
//!
//! # Architecture
//!
//! ```text
//! cpal callback ──frames──▶ forwarder ──┐
//!                                       ▼
//! send_text() ──────────────▶ outbound channel ──▶ writer task (LiveSession)
//!
//! receiver task ──ServerEvent channel──▶ pump() ──▶ playback / transcript /
//!                                                   lifecycle events
//! ```
//!
//! The embedding presentation layer calls `start`, then drives `pump` until
//! it returns `false`, and may call `stop`, `send_text` and `clear_history`
//! at any point.

use tokio::sync::mpsc;

use crate::capture::{CaptureHandle, MicCapture};
use crate::lifecycle::{reduce, ConnectionState, LifecycleEffect, LifecycleEvent};
use crate::live::{EncodedChunk, LiveConfig, LiveSession, ServerEvent};
use crate::pcm;
use crate::playback::{AudioSink, CpalPlayer, OutputClock, PlaybackError, PlaybackScheduler};
use crate::transcript::{TranscriptEntry, TurnBuffers};

/// Capacity of the outbound message channel (audio frames + text)
const OUTBOUND_CAPACITY: usize = 64;

/// Capacity of the capture frame channel
const FRAME_CAPACITY: usize = 32;

/// Messages flowing to the writer task that owns the live connection.
#[derive(Debug, Clone, PartialEq)]
enum Outbound {
    Audio(EncodedChunk),
    Text(String),
    Close,
}

/// One voice tutoring session: state machine, transcript, audio pipeline.
pub struct TutorSession {
    state: ConnectionState,
    api_key: String,
    config: LiveConfig,
    transcript: Vec<TranscriptEntry>,
    turns: TurnBuffers,
    playback: PlaybackScheduler,
    /// Keeps the output stream thread alive when using the default output
    _player: Option<CpalPlayer>,
    mic: Option<MicCapture>,
    capture: Option<CaptureHandle>,
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    events_rx: Option<mpsc::Receiver<ServerEvent>>,
    writer_task: Option<tokio::task::JoinHandle<()>>,
}

impl TutorSession {
    /// Build a session with an injected playback sink and clock.
    pub fn new(
        api_key: impl Into<String>,
        config: LiveConfig,
        sink: Box<dyn AudioSink>,
        clock: Box<dyn OutputClock>,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            api_key: api_key.into(),
            config,
            transcript: Vec::new(),
            turns: TurnBuffers::new(),
            playback: PlaybackScheduler::new(sink, clock),
            _player: None,
            mic: None,
            capture: None,
            outbound_tx: None,
            events_rx: None,
            writer_task: None,
        }
    }

    /// Build a session playing through the default audio output device.
    pub fn with_default_output(
        api_key: impl Into<String>,
        config: LiveConfig,
    ) -> Result<Self, PlaybackError> {
        let player = CpalPlayer::start()?;
        let sink = Box::new(player.sink());
        let clock = Box::new(player.clock());
        let mut session = Self::new(api_key, config, sink, clock);
        session._player = Some(player);
        Ok(session)
    }

    /// Current connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Ordered committed transcript.
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Scheduled, not-yet-finished playback units.
    pub fn active_playback_units(&self) -> usize {
        self.playback.active_units()
    }

    /// Start a session: acquire the microphone, connect, arm the pipeline.
    ///
    /// Legal from `Disconnected` and `Error`; anywhere else this is a no-op.
    /// Returns the resulting state.
    pub async fn start(&mut self) -> &ConnectionState {
        let (next, effects) = reduce(&self.state, LifecycleEvent::StartRequested);
        let opened = effects.contains(&LifecycleEffect::OpenConnection);
        self.transition(next, &effects);

        if opened {
            let outcome = self.open_connection().await;
            self.apply(outcome);
        }

        &self.state
    }

    /// Stop the session and release everything. Idempotent.
    pub fn stop(&mut self) -> &ConnectionState {
        self.apply(LifecycleEvent::StopRequested);
        &self.state
    }

    /// Send a typed user message.
    ///
    /// Only legal while `Connected`; in any other state nothing is sent and
    /// no transcript entry is appended. The user entry is appended
    /// immediately, before any server acknowledgment.
    pub fn send_text(&mut self, text: &str) {
        if self.state != ConnectionState::Connected {
            log::debug!("send_text ignored in state {:?}", self.state);
            return;
        }

        if let Some(tx) = &self.outbound_tx {
            if tx.try_send(Outbound::Text(text.to_string())).is_err() {
                log::warn!("Outbound channel unavailable, text not sent");
            }
        }

        self.transcript.push(TranscriptEntry::user(text));
    }

    /// Clear the committed transcript. Pending turn fragments are untouched.
    pub fn clear_history(&mut self) {
        self.transcript.clear();
    }

    /// Process the next server event.
    ///
    /// Returns `false` once the event channel is closed (connection gone);
    /// the presentation layer's drive loop exits then.
    pub async fn pump(&mut self) -> bool {
        let Some(rx) = self.events_rx.as_mut() else {
            return false;
        };

        match rx.recv().await {
            Some(event) => {
                self.handle_server_event(event);
                true
            }
            None => {
                log::info!("Server event channel closed");
                self.apply(LifecycleEvent::TransportClosed);
                false
            }
        }
    }

    /// Dispatch one inbound server event.
    ///
    /// Malformed payloads are skipped without a state transition; only
    /// connection-level errors move the state machine.
    pub fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::AudioChunk { audio: Some(data) } => match pcm::decode_transport(&data) {
                Ok(bytes) => {
                    self.playback.enqueue(pcm::le_bytes_to_i16(&bytes));
                }
                Err(e) => {
                    log::warn!("Skipping undecodable audio chunk: {}", e);
                }
            },
            ServerEvent::AudioChunk { audio: None } => {
                log::debug!("Skipping audio chunk with no payload");
            }
            ServerEvent::TranscriptFragment {
                speaker: Some(speaker),
                delta,
            } => {
                self.turns.push_fragment(speaker, &delta);
            }
            ServerEvent::TranscriptFragment { speaker: None, .. } => {
                log::debug!("Skipping transcript fragment with no speaker");
            }
            ServerEvent::TurnComplete => {
                let entries = self.turns.complete_turn();
                self.transcript.extend(entries);
            }
            ServerEvent::Interrupted => {
                self.playback.interrupt();
                // The in-flight answer is abandoned; its fragments must not
                // be committed by the next turn boundary
                self.turns.reset();
            }
            ServerEvent::Error { error } => {
                log::warn!("Server error: {}", error.message);
                self.apply(LifecycleEvent::TransportError {
                    message: error.message,
                });
            }
            ServerEvent::Ready | ServerEvent::Unknown => {}
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle plumbing
    // ------------------------------------------------------------------

    /// Reduce an event and execute the resulting synchronous effects.
    fn apply(&mut self, event: LifecycleEvent) {
        let (next, effects) = reduce(&self.state, event);
        self.transition(next, &effects);

        for effect in &effects {
            match effect {
                LifecycleEffect::Teardown => self.teardown(),
                LifecycleEffect::ArmSession => {
                    if let Err(e) = self.arm_capture() {
                        log::error!("Failed to arm capture: {}", e);
                        self.apply(LifecycleEvent::TransportError {
                            message: e.to_string(),
                        });
                        return;
                    }
                }
                // OpenConnection is driven by start(); NotifyState is
                // handled in transition()
                LifecycleEffect::OpenConnection | LifecycleEffect::NotifyState => {}
            }
        }
    }

    fn transition(&mut self, next: ConnectionState, effects: &[LifecycleEffect]) {
        if effects.contains(&LifecycleEffect::NotifyState) && next != self.state {
            log::info!("Session state: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    /// Acquire the microphone and open the live connection.
    ///
    /// Returns the lifecycle event describing the outcome. The capture
    /// stream is deliberately not started here: frames may only flow once
    /// the session is `Connected` (see [`Self::arm_capture`]).
    async fn open_connection(&mut self) -> LifecycleEvent {
        let mic = match MicCapture::new() {
            Ok(mic) => mic,
            Err(e) => {
                log::error!("Microphone acquisition failed: {}", e);
                return LifecycleEvent::ConnectFailed {
                    message: e.to_string(),
                };
            }
        };

        let mut live = match LiveSession::connect(&self.api_key, self.config.clone()).await {
            Ok(live) => live,
            Err(e) => {
                log::error!("Connection failed: {}", e);
                return LifecycleEvent::ConnectFailed {
                    message: e.to_string(),
                };
            }
        };

        let Some(events_rx) = live.take_event_receiver() else {
            return LifecycleEvent::ConnectFailed {
                message: "Event receiver already taken".to_string(),
            };
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

        // Writer task: sole owner of the connection's send half
        let writer_task = tokio::spawn(async move {
            loop {
                match outbound_rx.recv().await {
                    Some(Outbound::Audio(chunk)) => {
                        if let Err(e) = live.send_audio(chunk).await {
                            log::warn!("Audio send failed: {}", e);
                            break;
                        }
                    }
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = live.send_text(&text).await {
                            log::warn!("Text send failed: {}", e);
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }
            live.close().await;
        });

        // New connection: fresh playback cursor and turn buffers
        self.playback.interrupt();
        self.turns.reset();

        self.mic = Some(mic);
        self.outbound_tx = Some(outbound_tx);
        self.events_rx = Some(events_rx);
        self.writer_task = Some(writer_task);

        LifecycleEvent::ConnectOk
    }

    /// Start the capture stream against the now-live connection.
    ///
    /// Second phase of the two-phase setup: runs only after `Connected`, so
    /// no frame can ever race an unready channel.
    fn arm_capture(&mut self) -> Result<(), crate::capture::CaptureError> {
        let Some(mic) = self.mic.take() else {
            // Already armed or never acquired; nothing to do
            return Ok(());
        };
        let Some(outbound_tx) = self.outbound_tx.clone() else {
            return Ok(());
        };

        let (frames_tx, mut frames_rx) = mpsc::channel::<EncodedChunk>(FRAME_CAPACITY);
        let handle = mic.start(frames_tx)?;

        // Forwarder: capture frames -> outbound channel, fire-and-forget
        tokio::spawn(async move {
            while let Some(chunk) = frames_rx.recv().await {
                if outbound_tx.try_send(Outbound::Audio(chunk)).is_err() {
                    log::debug!("Outbound channel full or closed, dropping frame");
                }
            }
        });

        self.capture = Some(handle);
        Ok(())
    }

    /// Release every held resource. Safe to call repeatedly.
    fn teardown(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        self.mic = None;

        if let Some(tx) = self.outbound_tx.take() {
            // Best-effort close; the writer task also exits when the
            // channel drops
            let _ = tx.try_send(Outbound::Close);
        }
        self.events_rx = None;
        self.writer_task = None;

        self.playback.interrupt();
        self.turns.reset();
    }
}

impl Drop for TutorSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
