//! Topic and client identifier validation
//!
//! MQTT topics are published verbatim (a leading slash is significant), so
//! nothing here rewrites a topic; these functions only reject values the
//! broker would refuse or that make no sense for a publisher.

use thiserror::Error;

/// Topic the generator publishes to unless configured otherwise
pub const DEFAULT_TOPIC: &str = "/hello/there";

/// Largest UTF-8 encoded string MQTT can carry in a length-prefixed field
const MAX_MQTT_STRING_LEN: usize = 65_535;

pub fn validate_topic_name(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }

    if topic.len() > MAX_MQTT_STRING_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }

    // Wildcards are only legal in subscriptions
    for ch in topic.chars() {
        if ch == '+' || ch == '#' || ch == '\0' {
            return Err(ValidationError::InvalidTopicChar(ch));
        }
    }

    Ok(())
}

pub fn validate_client_id_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.is_empty() {
        return Err(ValidationError::EmptyClientIdPrefix);
    }

    for ch in prefix.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topics and client identifiers
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Topic is {0} bytes, longer than the MQTT limit")]
    TopicTooLong(usize),
    #[error("Topic contains invalid character: '{0}'")]
    InvalidTopicChar(char),
    #[error("Client ID prefix cannot be empty")]
    EmptyClientIdPrefix,
    #[error("Client ID prefix contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
}
