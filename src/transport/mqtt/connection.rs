//! Pure connection state management for the MQTT session
//!
//! This module contains the session state type, the reconnection backoff
//! policy and the translation from an [`Identity`] into rumqttc options.

use crate::protocol::Identity;
use rand::Rng;
use rumqttc::{ConnectReturnCode, MqttOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Session state as observed by the publish loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No connection and none being attempted (before start, after shutdown)
    Disconnected,
    /// Connection attempt in flight, waiting for CONNACK
    Connecting,
    /// CONNACK with return code 0 received; publishes are accepted
    Connected,
    /// Last attempt or live connection failed with the given reason
    Failed(String),
}

impl SessionState {
    /// Only a connected session may be handed messages
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Exponential backoff policy for reconnection
///
/// Attempts are unlimited; the supervisor never gives up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, jitter included
    pub max_delay_ms: u64,
    /// Growth factor between consecutive attempts
    pub multiplier: f64,
    /// Relative jitter; 0.2 spreads each delay over ±20%
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Base delay for the given attempt (1-based), before jitter
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);

        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay as u64
        }
    }

    /// Spread `delay_ms` by `sample` in `[-1.0, 1.0]` scaled by the jitter
    /// factor, never exceeding the cap
    pub fn apply_jitter(&self, delay_ms: u64, sample: f64) -> u64 {
        let sample = sample.clamp(-1.0, 1.0);
        let jittered = delay_ms as f64 * (1.0 + self.jitter * sample);
        (jittered.max(0.0) as u64).min(self.max_delay_ms)
    }

    /// Delay to wait before the given attempt, with random jitter
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.calculate_backoff_delay(attempt);
        let sample = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        Duration::from_millis(self.apply_jitter(base, sample))
    }
}

/// Map a CONNACK return code onto its MQTT 3.1.1 numeric value
pub fn connack_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Pure function to build rumqttc options for an identity
pub fn configure_mqtt_options(identity: &Identity, keep_alive: Duration) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(
        identity.client_id(),
        identity.broker_host(),
        identity.broker_port(),
    );

    // Anonymous brokers get no credentials at all rather than an empty user
    if !identity.username().is_empty() {
        mqtt_options.set_credentials(identity.username(), identity.password());
    }

    mqtt_options.set_keep_alive(keep_alive);
    mqtt_options.set_clean_session(true);

    mqtt_options
}
