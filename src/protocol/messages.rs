//! Message types for the synthetic publish stream
//!
//! A [`Message`] is built once per attempted tick, handed to the session for
//! a single delivery attempt and then dropped. Its payload is a pure function
//! of the sequence number so a broker-side capture can be checked for gaps.

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Build the payload for a sequence number
///
/// # Examples
/// ```
/// use mqtt_traffic_gen::protocol::payload;
///
/// assert_eq!(payload(0), "messages: 0");
/// assert_eq!(payload(41), "messages: 41");
/// ```
pub fn payload(sequence_number: u64) -> String {
    format!("messages: {sequence_number}")
}

/// Delivery guarantee requested from the broker
///
/// Serialized as the numeric MQTT level (0, 1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    /// QoS 0: success means the local transport queue accepted the message
    AtMostOnce,
    /// QoS 1: success means PUBACK was received
    AtLeastOnce,
    /// QoS 2: success means the PUBREC/PUBREL/PUBCOMP handshake completed
    #[default]
    ExactlyOnce,
}

impl QosLevel {
    pub fn level(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }

    /// Whether success has to wait for a broker acknowledgement
    pub fn requires_handshake(self) -> bool {
        !matches!(self, QosLevel::AtMostOnce)
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        qos.level()
    }
}

impl From<QosLevel> for QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QoS {}", self.level())
    }
}

/// One generated message, immutable after construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    sequence_number: u64,
    topic: String,
    payload: String,
    qos: QosLevel,
}

impl Message {
    pub fn new(sequence_number: u64, topic: impl Into<String>, qos: QosLevel) -> Self {
        Self {
            sequence_number,
            topic: topic.into(),
            payload: payload(sequence_number),
            qos,
        }
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn qos(&self) -> QosLevel {
        self.qos
    }
}

/// Result of one publish attempt, kept only for logs and metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub sequence_number: u64,
    pub success: bool,
    pub error_detail: Option<String>,
}

impl PublishOutcome {
    pub fn succeeded(sequence_number: u64) -> Self {
        Self {
            sequence_number,
            success: true,
            error_detail: None,
        }
    }

    pub fn failed(sequence_number: u64, detail: impl ToString) -> Self {
        Self {
            sequence_number,
            success: false,
            error_detail: Some(detail.to_string()),
        }
    }
}
