//! Transport layer for the publisher
//!
//! The publish loop only talks to a [`SessionProvider`]; the MQTT session is
//! the production implementation and tests substitute a mock.

use crate::error::PublishError;
use crate::protocol::Message;
use std::time::Duration;

pub mod mqtt;

use mqtt::{Session, SessionState};

/// Read-only view of a session plus a way to publish through it
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    /// Whether a publish would be accepted right now
    fn is_usable(&self) -> bool;

    /// Current session state
    fn state(&self) -> SessionState;

    /// Publish one message, waiting at most `ack_timeout` for its QoS guarantee
    async fn publish(&self, message: &Message, ack_timeout: Duration) -> Result<(), PublishError>;
}

#[async_trait::async_trait]
impl SessionProvider for Session {
    fn is_usable(&self) -> bool {
        Session::is_usable(self)
    }

    fn state(&self) -> SessionState {
        Session::state(self)
    }

    async fn publish(&self, message: &Message, ack_timeout: Duration) -> Result<(), PublishError> {
        Session::publish(self, message, ack_timeout).await
    }
}
