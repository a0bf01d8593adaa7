//! Connection lifecycle state machine
//!
//! Single-writer pattern: every lifecycle transition goes through
//! [`reduce`], which returns the next state and a list of effects for the
//! session to execute. The reducer never mutates state and never performs
//! I/O itself.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──ok──▶ Connected
//!      ▲                      │                 │
//!      │                      fail       error／close／stop
//!      └──────stop────── Error ◀────────────────┘
//! ```
//!
//! `Error` is terminal until the user explicitly restarts.

/// Connection state exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error { message: String },
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl ConnectionState {
    /// Whether `start()` is legal from this state.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Error { .. }
        )
    }
}

/// Events that drive lifecycle transitions.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// User asked to start a session
    StartRequested,
    /// Microphone acquired and transport connection opened
    ConnectOk,
    /// Microphone denied or connection open failed
    ConnectFailed { message: String },
    /// User asked to stop (valid from any state, idempotent)
    StopRequested,
    /// The transport reported a fatal connection error
    TransportError { message: String },
    /// The transport connection closed
    TransportClosed,
}

/// Effects to be executed after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEffect {
    /// Acquire the microphone and open the transport connection
    OpenConnection,
    /// Wire capture and playback against the now-live connection
    ArmSession,
    /// Close the connection, stop capture, force-stop playback.
    /// Must be safe when nothing is active.
    Teardown,
    /// Surface the new state to the presentation layer
    NotifyState,
}

/// Reducer: (state, event) -> (next_state, effects)
pub fn reduce(
    state: &ConnectionState,
    event: LifecycleEvent,
) -> (ConnectionState, Vec<LifecycleEffect>) {
    use ConnectionState::*;
    use LifecycleEffect::*;
    use LifecycleEvent::*;

    match (state, event) {
        // Starting is only legal when nothing is in flight
        (Disconnected | Error { .. }, StartRequested) => (
            Connecting,
            vec![OpenConnection, NotifyState],
        ),

        (Connecting, ConnectOk) => (Connected, vec![ArmSession, NotifyState]),
        (Connecting, ConnectFailed { message }) => (
            Error { message },
            vec![Teardown, NotifyState],
        ),

        // Stop is legal everywhere and always lands in Disconnected;
        // Teardown is a no-op when nothing is held
        (_, StopRequested) => (Disconnected, vec![Teardown, NotifyState]),

        (Connecting | Connected, TransportError { message }) => (
            Error { message },
            vec![Teardown, NotifyState],
        ),

        (Connected, TransportClosed) => (Disconnected, vec![Teardown, NotifyState]),

        // Everything else: stale or illegal, no transition
        (s, _) => (s.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_from_disconnected_opens_connection() {
        let (next, effects) = reduce(&ConnectionState::Disconnected, LifecycleEvent::StartRequested);
        assert_eq!(next, ConnectionState::Connecting);
        assert!(effects.contains(&LifecycleEffect::OpenConnection));
        assert!(effects.contains(&LifecycleEffect::NotifyState));
    }

    #[test]
    fn test_start_from_error_restarts() {
        let state = ConnectionState::Error {
            message: "mic denied".to_string(),
        };
        let (next, effects) = reduce(&state, LifecycleEvent::StartRequested);
        assert_eq!(next, ConnectionState::Connecting);
        assert!(effects.contains(&LifecycleEffect::OpenConnection));
    }

    #[test]
    fn test_start_while_connected_is_ignored() {
        let (next, effects) = reduce(&ConnectionState::Connected, LifecycleEvent::StartRequested);
        assert_eq!(next, ConnectionState::Connected);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_connect_ok_arms_session() {
        let (next, effects) = reduce(&ConnectionState::Connecting, LifecycleEvent::ConnectOk);
        assert_eq!(next, ConnectionState::Connected);
        assert!(effects.contains(&LifecycleEffect::ArmSession));
    }

    #[test]
    fn test_connect_failure_is_terminal_error_with_cleanup() {
        let (next, effects) = reduce(
            &ConnectionState::Connecting,
            LifecycleEvent::ConnectFailed {
                message: "permission denied".to_string(),
            },
        );
        assert!(matches!(next, ConnectionState::Error { .. }));
        assert!(effects.contains(&LifecycleEffect::Teardown));
    }

    #[test]
    fn test_stop_from_connected_tears_down() {
        let (next, effects) = reduce(&ConnectionState::Connected, LifecycleEvent::StopRequested);
        assert_eq!(next, ConnectionState::Disconnected);
        assert!(effects.contains(&LifecycleEffect::Teardown));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (after_one, _) = reduce(&ConnectionState::Connected, LifecycleEvent::StopRequested);
        let (after_two, effects) = reduce(&after_one, LifecycleEvent::StopRequested);
        assert_eq!(after_one, after_two);
        assert_eq!(after_two, ConnectionState::Disconnected);
        // Teardown must be safe to run with nothing active
        assert!(effects.contains(&LifecycleEffect::Teardown));
    }

    #[test]
    fn test_transport_error_while_connected_cleans_up() {
        let (next, effects) = reduce(
            &ConnectionState::Connected,
            LifecycleEvent::TransportError {
                message: "socket reset".to_string(),
            },
        );
        assert_eq!(
            next,
            ConnectionState::Error {
                message: "socket reset".to_string()
            }
        );
        assert!(effects.contains(&LifecycleEffect::Teardown));
    }

    #[test]
    fn test_transport_closed_returns_to_disconnected() {
        let (next, _) = reduce(&ConnectionState::Connected, LifecycleEvent::TransportClosed);
        assert_eq!(next, ConnectionState::Disconnected);
    }

    #[test]
    fn test_stale_connect_ok_after_stop_is_ignored() {
        let (next, effects) = reduce(&ConnectionState::Disconnected, LifecycleEvent::ConnectOk);
        assert_eq!(next, ConnectionState::Disconnected);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_error_is_terminal_until_restart() {
        let state = ConnectionState::Error {
            message: "gone".to_string(),
        };
        let (next, effects) = reduce(&state, LifecycleEvent::TransportClosed);
        assert_eq!(next, state);
        assert!(effects.is_empty());
    }
}
