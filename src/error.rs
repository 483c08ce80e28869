//! Error taxonomy for the traffic generator
//!
//! Connection and transport errors are recovered by the session's
//! reconnection supervisor; publish errors by moving on to the next sequence
//! number. Only [`PublisherError`] ever reaches `main`.

use crate::transport::mqtt::SessionState;
use thiserror::Error;

/// Broker refused the CONNECT with a non-zero return code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Connection refused with return code {code}: {}", describe_return_code(*code))]
pub struct ConnectionError {
    pub code: u8,
}

impl ConnectionError {
    pub fn from_return_code(code: u8) -> Self {
        Self { code }
    }

    pub fn reason(&self) -> &'static str {
        describe_return_code(self.code)
    }
}

/// Human-readable meaning of an MQTT 3.1.1 CONNACK return code
pub fn describe_return_code(code: u8) -> &'static str {
    match code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "client identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// Failure of an established (or establishing) transport connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Broker closed the session")]
    DisconnectedByBroker,
    #[error("Network error: {0}")]
    Network(String),
    #[error("No response from broker within keep-alive window")]
    Timeout,
}

/// Failure of a single publish attempt
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublishError {
    #[error("Session not usable - current state: {state}")]
    NotUsable { state: SessionState },
    #[error("Transport queue rejected message {sequence}: {reason}")]
    Rejected { sequence: u64, reason: String },
    #[error("No acknowledgement for message {sequence} within {timeout_ms}ms")]
    AckTimeout { sequence: u64, timeout_ms: u64 },
    #[error("Session lost before message {sequence} was acknowledged")]
    SessionLost { sequence: u64 },
}

/// Top-level error for the binary
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Failed to start health server: {0}")]
    HealthServer(#[from] warp::Error),
}

/// Result type for publisher operations
pub type PublisherResult<T> = Result<T, PublisherError>;
