//! Fixed-cadence publish loop
//!
//! Each tick sleeps for the interval, then publishes one numbered message if
//! the session is usable. Sequence numbers are consumed only by attempts, so
//! ticks skipped while the session is down leave no gaps.

use crate::config::PublishSection;
use crate::error::PublishError;
use crate::observability::metrics::metrics;
use crate::protocol::{Message, PublishOutcome, QosLevel};
use crate::transport::SessionProvider;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    /// Session not usable; nothing generated
    Skipped,
    /// One message was attempted
    Attempted(PublishOutcome),
}

/// Totals reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Sequence number the next attempt would have used
    pub next_sequence: u64,
}

impl PublishReport {
    fn record(&mut self, result: &TickResult) {
        match result {
            TickResult::Skipped => self.skipped += 1,
            TickResult::Attempted(outcome) => {
                self.attempted += 1;
                if outcome.success {
                    self.succeeded += 1;
                } else {
                    self.failed += 1;
                }
            }
        }
    }
}

/// Generates and publishes the synthetic message stream
#[derive(Debug)]
pub struct PublishLoop {
    topic: String,
    qos: QosLevel,
    interval: Duration,
    ack_timeout: Duration,
    next_sequence: u64,
}

impl PublishLoop {
    pub fn new(
        topic: impl Into<String>,
        qos: QosLevel,
        interval: Duration,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            topic: topic.into(),
            qos,
            interval,
            ack_timeout,
            next_sequence: 0,
        }
    }

    pub fn from_config(section: &PublishSection) -> Self {
        Self::new(
            section.topic.clone(),
            section.qos,
            section.interval(),
            section.ack_timeout(),
        )
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Publish the next message if the session allows it
    pub async fn tick<P>(&mut self, session: &P) -> TickResult
    where
        P: SessionProvider + ?Sized,
    {
        if !session.is_usable() {
            info!(state = %session.state(), "waiting for session");
            metrics().tick_skipped();
            return TickResult::Skipped;
        }

        let sequence = self.next_sequence;
        let message = Message::new(sequence, self.topic.as_str(), self.qos);

        let outcome = match session.publish(&message, self.ack_timeout).await {
            Ok(()) => {
                metrics().message_attempted(sequence);
                metrics().message_published();
                info!(
                    sequence,
                    topic = %message.topic(),
                    payload = %message.payload(),
                    qos = %self.qos,
                    success = true,
                    "Message published"
                );
                PublishOutcome::succeeded(sequence)
            }
            // Lost between the check and the publish; nothing was sent
            Err(PublishError::NotUsable { state }) => {
                info!(state = %state, "waiting for session");
                metrics().tick_skipped();
                return TickResult::Skipped;
            }
            Err(e) => {
                metrics().message_attempted(sequence);
                metrics().publish_failed();
                warn!(
                    sequence,
                    topic = %message.topic(),
                    qos = %self.qos,
                    success = false,
                    error = %e,
                    "Message publish failed"
                );
                PublishOutcome::failed(sequence, &e)
            }
        };

        self.next_sequence += 1;
        TickResult::Attempted(outcome)
    }

    /// Tick at the configured interval until shutdown is signalled
    ///
    /// The signal interrupts the sleep immediately. An attempt already in
    /// flight is allowed to finish; it is bounded by the ack timeout.
    pub async fn run<P>(&mut self, session: &P, mut shutdown_rx: watch::Receiver<bool>) -> PublishReport
    where
        P: SessionProvider + ?Sized,
    {
        info!(
            topic = %self.topic,
            qos = %self.qos,
            interval_ms = self.interval.as_millis() as u64,
            "Publish loop started"
        );

        let mut report = PublishReport::default();

        while Self::sleep_or_shutdown(&mut shutdown_rx, self.interval).await {
            let result = self.tick(session).await;
            report.record(&result);
        }

        report.next_sequence = self.next_sequence;
        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Publish loop stopped"
        );
        report
    }

    /// Returns false if shutdown was requested before `interval` elapsed
    async fn sleep_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, interval: Duration) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }

        let deadline = Instant::now() + interval;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        return false;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => return true,
            }
        }
    }
}
