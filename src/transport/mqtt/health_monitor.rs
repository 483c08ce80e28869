//! Pure session state machine and reconnection decisions
//!
//! The supervisor task feeds [`ConnectionEvent`]s through these functions
//! and publishes the resulting [`SessionState`]; nothing here performs I/O
//! apart from logging.

use super::connection::{connack_code, ReconnectConfig, SessionState};
use crate::error::{ConnectionError, TransportError};
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Connection events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A new connection attempt is about to be made
    AttemptStarted(u32),
    /// The connection-result callback: CONNACK with this return code
    ConnAckReceived { code: u8 },
    /// The transport failed (network error, broker disconnect, timeout)
    TransportFailed(TransportError),
    /// The session was closed on purpose
    Closed,
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Proceed with reconnection attempt after the delay
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
}

/// Pure session health and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine next state after a connection event (pure function)
    pub fn determine_next_state(event: &ConnectionEvent) -> SessionState {
        match event {
            ConnectionEvent::AttemptStarted(_) => SessionState::Connecting,
            ConnectionEvent::ConnAckReceived { code: 0 } => SessionState::Connected,
            ConnectionEvent::ConnAckReceived { code } => {
                SessionState::Failed(ConnectionError::from_return_code(*code).to_string())
            }
            ConnectionEvent::TransportFailed(error) => SessionState::Failed(error.to_string()),
            ConnectionEvent::Closed => SessionState::Disconnected,
        }
    }

    /// Classify a rumqttc connection error into a session event (pure function)
    ///
    /// A refused CONNACK surfaces from rumqttc as an error; it is still the
    /// result of the connection attempt and is reported as such.
    pub fn classify_connection_error(error: &rumqttc::ConnectionError) -> ConnectionEvent {
        match error {
            rumqttc::ConnectionError::ConnectionRefused(code) => ConnectionEvent::ConnAckReceived {
                code: connack_code(*code),
            },
            rumqttc::ConnectionError::NetworkTimeout | rumqttc::ConnectionError::FlushTimeout => {
                ConnectionEvent::TransportFailed(TransportError::Timeout)
            }
            other => ConnectionEvent::TransportFailed(TransportError::Network(other.to_string())),
        }
    }

    /// Determine if reconnection should be attempted (pure function)
    ///
    /// Attempts are unlimited; only a shutdown request stops them.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: config.next_delay(attempt),
        }
    }

    /// Check if session state allows publishing (pure function)
    pub fn can_publish(state: &SessionState) -> bool {
        state.is_usable()
    }

    /// Log a session state transition with its timestamp
    pub fn log_state_transition(client_id: &str, from: &SessionState, to: &SessionState) {
        let at = Utc::now().to_rfc3339();
        match (from, to) {
            (_, SessionState::Connected) => {
                info!(client_id, at = %at, state = %to, "MQTT session established");
            }
            (SessionState::Connected, SessionState::Failed(reason)) => {
                error!(client_id, at = %at, state = %to, "MQTT session lost: {}", reason);
            }
            (_, SessionState::Failed(reason)) => {
                warn!(client_id, at = %at, state = %to, "MQTT connection attempt failed: {}", reason);
            }
            _ => {
                info!(client_id, at = %at, state = %to, "MQTT session state: {} -> {}", from, to);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::ConnectReturnCode;

    #[test]
    fn test_connack_zero_makes_session_usable() {
        let state = HealthMonitor::determine_next_state(&ConnectionEvent::ConnAckReceived {
            code: 0,
        });
        assert_eq!(state, SessionState::Connected);
        assert!(HealthMonitor::can_publish(&state));
    }

    #[test]
    fn test_nonzero_connack_fails_with_code() {
        for code in 1..=5u8 {
            let state =
                HealthMonitor::determine_next_state(&ConnectionEvent::ConnAckReceived { code });
            assert!(!HealthMonitor::can_publish(&state));
            match state {
                SessionState::Failed(reason) => {
                    assert!(reason.contains(&code.to_string()), "got: {reason}")
                }
                other => panic!("Expected Failed state, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_determine_next_state_other_events() {
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::AttemptStarted(3)),
            SessionState::Connecting
        );
        assert_eq!(
            HealthMonitor::determine_next_state(&ConnectionEvent::Closed),
            SessionState::Disconnected
        );
        assert!(matches!(
            HealthMonitor::determine_next_state(&ConnectionEvent::TransportFailed(
                TransportError::DisconnectedByBroker
            )),
            SessionState::Failed(_)
        ));
    }

    #[test]
    fn test_classify_refused_connection() {
        let error = rumqttc::ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(
            HealthMonitor::classify_connection_error(&error),
            ConnectionEvent::ConnAckReceived { code: 5 }
        );

        let error =
            rumqttc::ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert_eq!(
            HealthMonitor::classify_connection_error(&error),
            ConnectionEvent::ConnAckReceived { code: 4 }
        );
    }

    #[test]
    fn test_classify_transport_errors() {
        assert_eq!(
            HealthMonitor::classify_connection_error(&rumqttc::ConnectionError::NetworkTimeout),
            ConnectionEvent::TransportFailed(TransportError::Timeout)
        );

        let io = rumqttc::ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            HealthMonitor::classify_connection_error(&io),
            ConnectionEvent::TransportFailed(TransportError::Network(_))
        ));
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        };

        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(1_000)
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 3,
                delay: Duration::from_millis(4_000)
            }
        );

        // Never gives up, delay stays at the cap
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(10_000, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 10_001,
                delay: Duration::from_millis(30_000)
            }
        );

        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }
}
