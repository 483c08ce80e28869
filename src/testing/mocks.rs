//! Mock implementations for testing
//!
//! Provides a mock [`SessionProvider`] so the publish loop can be exercised
//! without a broker.

use crate::error::PublishError;
use crate::protocol::Message;
use crate::transport::{mqtt::SessionState, SessionProvider};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock session whose usability is flipped by the test
#[derive(Debug, Default)]
pub struct MockSession {
    usable: AtomicBool,
    publish_calls: AtomicU64,
    pub published_messages: Arc<Mutex<Vec<Message>>>,
    failing_sequences: HashSet<u64>,
    publish_delay: Option<Duration>,
}

impl MockSession {
    /// A session that has not connected yet
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that is already usable
    pub fn connected() -> Self {
        let session = Self::default();
        session.set_usable(true);
        session
    }

    /// Reject publishes of these sequence numbers
    pub fn with_failing_sequences(mut self, sequences: impl IntoIterator<Item = u64>) -> Self {
        self.failing_sequences = sequences.into_iter().collect();
        self
    }

    /// Delay every publish, simulating a slow acknowledgement
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    pub fn set_usable(&self, usable: bool) {
        self.usable.store(usable, Ordering::SeqCst);
    }

    /// Number of publish calls, failed ones included
    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub async fn get_published_messages(&self) -> Vec<Message> {
        self.published_messages.lock().await.clone()
    }

    pub async fn published_sequences(&self) -> Vec<u64> {
        self.published_messages
            .lock()
            .await
            .iter()
            .map(Message::sequence_number)
            .collect()
    }
}

#[async_trait]
impl SessionProvider for MockSession {
    fn is_usable(&self) -> bool {
        self.usable.load(Ordering::SeqCst)
    }

    fn state(&self) -> SessionState {
        if self.is_usable() {
            SessionState::Connected
        } else {
            SessionState::Connecting
        }
    }

    async fn publish(&self, message: &Message, ack_timeout: Duration) -> Result<(), PublishError> {
        if !self.is_usable() {
            return Err(PublishError::NotUsable {
                state: self.state(),
            });
        }

        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        let sequence = message.sequence_number();

        if let Some(delay) = self.publish_delay {
            if delay > ack_timeout {
                tokio::time::sleep(ack_timeout).await;
                return Err(PublishError::AckTimeout {
                    sequence,
                    timeout_ms: ack_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(delay).await;
        }

        if self.failing_sequences.contains(&sequence) {
            return Err(PublishError::Rejected {
                sequence,
                reason: "mock rejection".to_string(),
            });
        }

        self.published_messages.lock().await.push(message.clone());
        Ok(())
    }
}
