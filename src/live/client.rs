//! Live session WebSocket client
//!
//! Manages one bidirectional connection to the tutoring service.
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket, send `session.setup`, await
//!    `session.ready`
//! 2. `send_audio()` / `send_text()` - Stream outbound frames and messages
//! 3. `take_event_receiver()` - Consume inbound [`ServerEvent`]s in arrival
//!    order
//! 4. `close()` - Clean shutdown
//!
//! The client performs no automatic retry or reconnection; a dropped
//! connection surfaces as a closed event channel and the session layer
//! decides what to do with it.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, EncodedChunk, LiveConfig, ServerEvent, LIVE_API_URL};
use super::LiveError;

/// Connection timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for waiting for `session.ready` after sending the setup message
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the inbound event channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Handle to an active live session connection
///
/// Owns the WebSocket write half; inbound traffic is parsed by a background
/// task and delivered through a bounded channel, preserving arrival order.
pub struct LiveSession {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    /// Inbound event receiver; `Option` so it can be taken for concurrent
    /// processing while the write half keeps sending
    events_rx: Option<mpsc::Receiver<ServerEvent>>,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl LiveSession {
    /// Connect and configure a live session
    ///
    /// Establishes the WebSocket, sends `session.setup` with `config`, and
    /// waits for `session.ready` before returning. Any failure along the way
    /// is fatal for this connection attempt.
    pub async fn connect(api_key: &str, config: LiveConfig) -> Result<Self, LiveError> {
        if api_key.is_empty() {
            return Err(LiveError::MissingApiKey);
        }

        let mut request = LIVE_API_URL
            .into_client_request()
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| LiveError::AuthenticationFailed(e.to_string()))?,
        );

        log::info!("Connecting to live tutoring service...");

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(
                request, None, false, // disable_nagle (we want low latency)
            ),
        )
        .await
        .map_err(|_| LiveError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // Configure the session before anything else goes over the wire
        let setup = serde_json::to_string(&ClientMessage::setup(config))
            .map_err(|e| LiveError::ProtocolError(e.to_string()))?;
        write
            .send(Message::Text(setup))
            .await
            .map_err(|e| LiveError::SendFailed(e.to_string()))?;

        log::info!("WebSocket connected, waiting for session.ready...");

        timeout(READY_TIMEOUT, async {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::Ready) => {
                            log::info!("Live session ready");
                            return Ok(());
                        }
                        Ok(ServerEvent::Error { error }) => {
                            return Err(LiveError::AuthenticationFailed(error.message));
                        }
                        Ok(_) => {
                            log::debug!("Ignoring event while waiting for session.ready");
                        }
                        Err(e) => {
                            log::warn!("Failed to parse event: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        return Err(LiveError::Disconnected(
                            "Connection closed before session ready".to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(LiveError::ProtocolError(e.to_string()));
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            Err(LiveError::Disconnected("Stream ended".to_string()))
        })
        .await
        .map_err(|_| LiveError::ConnectionFailed("Session setup timeout".to_string()))??;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Background task: parse inbound frames and forward in arrival order
        let receiver_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if events_tx.send(event).await.is_err() {
                                log::debug!("Event channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to parse event: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        log::warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            log::debug!("Receiver task exiting");
        });

        Ok(Self {
            write,
            events_rx: Some(events_rx),
            receiver_task,
        })
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), LiveError> {
        let json = serde_json::to_string(msg).map_err(|e| LiveError::ProtocolError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| LiveError::SendFailed(e.to_string()))?;

        Ok(())
    }

    /// Send one encoded microphone frame
    ///
    /// Fast path: just queues the WebSocket send.
    pub async fn send_audio(&mut self, chunk: EncodedChunk) -> Result<(), LiveError> {
        self.send_message(&ClientMessage::audio_append(chunk)).await
    }

    /// Send a typed user message
    pub async fn send_text(&mut self, text: &str) -> Result<(), LiveError> {
        self.send_message(&ClientMessage::text_input(text)).await
    }

    /// Take ownership of the inbound event receiver
    ///
    /// Allows server events to be consumed concurrently while this handle
    /// keeps sending audio. Returns `None` if already taken.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.events_rx.take()
    }

    /// Gracefully close the connection
    ///
    /// Invalidates all pending sends.
    pub async fn close(mut self) {
        log::info!("Closing live session...");

        self.receiver_task.abort();

        if let Err(e) = self.write.close().await {
            log::warn!("Error closing WebSocket: {}", e);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Receiver task must not outlive the session handle
        self.receiver_task.abort();
    }
}

/// Get the service API key from the environment
pub fn get_api_key() -> Option<String> {
    std::env::var("VOXTUTOR_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}
