//! Impure I/O operations for the MQTT session
//!
//! [`SessionManager::establish`] hands back a [`Session`] immediately and
//! leaves the connection to a background supervisor task. The supervisor is
//! the only writer of the session state; the publisher reads it through a
//! watch channel and never waits on the supervisor.

use super::connection::{configure_mqtt_options, ReconnectConfig, SessionState};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{DeliveryEvent, EventRoute, MessageHandler};
use crate::error::{describe_return_code, PublishError, TransportError};
use crate::observability::metrics::metrics;
use crate::protocol::{Identity, Message, QosLevel};
use rumqttc::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 10;

/// How long `shutdown` waits for the supervisor before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Opens sessions against a fixed broker with a shared reconnection policy
#[derive(Debug, Clone)]
pub struct SessionManager {
    reconnect_config: ReconnectConfig,
    keep_alive: Duration,
}

impl SessionManager {
    pub fn new(reconnect_config: ReconnectConfig, keep_alive: Duration) -> Self {
        Self {
            reconnect_config,
            keep_alive,
        }
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect_config
    }

    /// Start connecting `identity` and return its session in `Connecting` state
    ///
    /// Does not wait for the CONNACK; the outcome is applied to the session
    /// by the supervisor when it arrives. Must be called from within a tokio
    /// runtime.
    pub fn establish(&self, identity: &Identity) -> Session {
        let mqtt_options = configure_mqtt_options(identity, self.keep_alive);
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_session_channels();
        let state_tx = Arc::new(state_tx);
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

        info!(
            client_id = identity.client_id(),
            broker = %identity.broker_address(),
            "Connecting to MQTT broker"
        );
        metrics().mqtt_connection_attempt();

        let supervisor = SessionSupervisor {
            client_id: identity.client_id().to_string(),
            state_tx: state_tx.clone(),
            delivery_tx,
            reconnect_config: self.reconnect_config.clone(),
            reconnect_attempts: 0,
        };
        let supervisor_handle = tokio::spawn(supervisor.run(event_loop, shutdown_rx));

        Session {
            client_id: identity.client_id().to_string(),
            client,
            state_tx,
            state_rx,
            shutdown_tx,
            deliveries: Mutex::new(delivery_rx),
            supervisor_handle: Some(supervisor_handle),
        }
    }

    /// Create session state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_session_channels() -> (
        (watch::Sender<SessionState>, watch::Receiver<SessionState>),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(SessionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }
}

/// Background task driving the rumqttc event loop
///
/// Every poll result is mapped to a state transition; connection failures of
/// any kind are followed by a backoff delay and another attempt, until
/// shutdown is requested.
struct SessionSupervisor {
    client_id: String,
    state_tx: Arc<watch::Sender<SessionState>>,
    delivery_tx: mpsc::UnboundedSender<DeliveryEvent>,
    reconnect_config: ReconnectConfig,
    reconnect_attempts: u32,
}

impl SessionSupervisor {
    async fn run(mut self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        info!(client_id = %self.client_id, "Starting MQTT session supervisor");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping session supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => self.handle_event(MessageHandler::route_mqtt_event(&event)),
                        Err(e) => self.handle_error(e, &mut event_loop, shutdown_rx.clone()).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.set_state(HealthMonitor::determine_next_state(&ConnectionEvent::Closed));
        metrics().mqtt_session_closed();
        info!(client_id = %self.client_id, "MQTT session supervisor stopped");
    }

    /// Act on a routed event; returns false once the session is closing
    fn handle_event(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { code } => {
                self.on_connection_result(code);
                true
            }
            EventRoute::Delivery(delivery) => {
                // Nobody waiting is fine; QoS 0 publishes never read these
                let _ = self.delivery_tx.send(delivery);
                true
            }
            EventRoute::Disconnected => {
                metrics().mqtt_connection_lost();
                self.set_state(HealthMonitor::determine_next_state(
                    &ConnectionEvent::TransportFailed(TransportError::DisconnectedByBroker),
                ));
                true
            }
            EventRoute::ClientDisconnected => {
                info!(client_id = %self.client_id, "DISCONNECT sent, closing session");
                false
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// The connection-result callback, run once per attempt
    fn on_connection_result(&mut self, code: u8) {
        if code == 0 {
            self.reconnect_attempts = 0;
            metrics().mqtt_connection_established();
        } else {
            metrics().mqtt_connection_failed();
            warn!(
                client_id = %self.client_id,
                return_code = code,
                "Broker refused connection: {}",
                describe_return_code(code)
            );
        }

        let event = ConnectionEvent::ConnAckReceived { code };
        self.set_state(HealthMonitor::determine_next_state(&event));
    }

    /// Record a failed poll and wait out the backoff delay
    ///
    /// Returns false if shutdown was requested before the next attempt.
    async fn handle_error(
        &mut self,
        error: rumqttc::ConnectionError,
        event_loop: &mut EventLoop,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        match HealthMonitor::classify_connection_error(&error) {
            ConnectionEvent::ConnAckReceived { code } => self.on_connection_result(code),
            event => {
                if self.state_tx.borrow().is_usable() {
                    metrics().mqtt_connection_lost();
                } else if matches!(*self.state_tx.borrow(), SessionState::Connecting) {
                    metrics().mqtt_connection_failed();
                }
                self.set_state(HealthMonitor::determine_next_state(&event));
            }
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay } => {
                self.reconnect_attempts = attempt;
                info!(
                    client_id = %self.client_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to MQTT broker"
                );

                if !interruptible_sleep(shutdown_rx, delay).await {
                    return false;
                }

                self.discard_unacknowledged(event_loop);
                metrics().mqtt_connection_attempt();
                self.set_state(HealthMonitor::determine_next_state(
                    &ConnectionEvent::AttemptStarted(attempt),
                ));
                true
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
        }
    }

    /// Drop requests left over from the lost connection
    ///
    /// rumqttc replays unacknowledged publishes on the next connection, but
    /// their attempts were already reported as failed. `clean` also moves
    /// requests still sitting in the client channel into `pending`.
    fn discard_unacknowledged(&self, event_loop: &mut EventLoop) {
        event_loop.clean();
        let discarded = event_loop.pending.len();
        event_loop.pending.clear();

        if discarded > 0 {
            debug!(
                client_id = %self.client_id,
                discarded,
                "Discarded requests from previous connection"
            );
        }
    }

    fn set_state(&self, next: SessionState) {
        let current = self.state_tx.borrow().clone();
        if current == next {
            return;
        }
        HealthMonitor::log_state_transition(&self.client_id, &current, &next);
        self.state_tx.send_replace(next);
    }
}

/// Sleep for `delay` unless shutdown is signalled first
///
/// Returns true if the sleep completed, false if shutdown was requested.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Handle to one logical broker session
///
/// Cheap to query from any task. Publishing is serialized internally; the
/// session expects a single publisher.
pub struct Session {
    client_id: String,
    client: AsyncClient,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    deliveries: Mutex<mpsc::UnboundedReceiver<DeliveryEvent>>,
    supervisor_handle: Option<JoinHandle<()>>,
}

impl Session {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_usable(&self) -> bool {
        HealthMonitor::can_publish(&self.state_rx.borrow())
    }

    /// A receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Wait until the session becomes usable; false on timeout
    pub async fn wait_until_usable(&self, timeout: Duration) -> bool {
        let mut state_rx = self.state_rx.clone();
        let usable = matches!(
            tokio::time::timeout(timeout, state_rx.wait_for(SessionState::is_usable)).await,
            Ok(Ok(_))
        );
        usable
    }

    /// Publish one message and wait for the delivery guarantee of its QoS
    ///
    /// QoS 0 succeeds once the transport queue accepts the message. QoS 1
    /// waits for PUBACK and QoS 2 for PUBCOMP. Everything, including queueing,
    /// is bounded by `ack_timeout`.
    pub async fn publish(&self, message: &Message, ack_timeout: Duration) -> Result<(), PublishError> {
        let state = self.state();
        if !HealthMonitor::can_publish(&state) {
            return Err(PublishError::NotUsable { state });
        }

        let sequence = message.sequence_number();
        let mut deliveries = self.deliveries.lock().await;

        // Acknowledgements for earlier, abandoned publishes
        while deliveries.try_recv().is_ok() {}

        let attempt = async {
            let queued = self
                .client
                .publish(
                    message.topic(),
                    message.qos().into(),
                    false,
                    message.payload().as_bytes().to_vec(),
                )
                .await;

            if let Err(e) = queued {
                return Err(PublishError::Rejected {
                    sequence,
                    reason: e.to_string(),
                });
            }

            if !message.qos().requires_handshake() {
                return Ok(());
            }

            let mut state_rx = self.state_rx.clone();
            Self::await_acknowledgement(&mut deliveries, &mut state_rx, message.qos(), sequence)
                .await
        };

        match tokio::time::timeout(ack_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::AckTimeout {
                sequence,
                timeout_ms: ack_timeout.as_millis() as u64,
            }),
        }
    }

    /// Follow delivery events until the handshake for our publish completes
    ///
    /// The first `Sent` after queueing carries our packet id; publishes are
    /// never issued concurrently.
    async fn await_acknowledgement(
        deliveries: &mut mpsc::UnboundedReceiver<DeliveryEvent>,
        state_rx: &mut watch::Receiver<SessionState>,
        qos: QosLevel,
        sequence: u64,
    ) -> Result<(), PublishError> {
        let mut packet_id = None;

        loop {
            tokio::select! {
                delivery = deliveries.recv() => match (delivery, packet_id) {
                    (Some(DeliveryEvent::Sent(pkid)), None) => {
                        debug!(sequence, pkid, "Publish written to broker");
                        packet_id = Some(pkid);
                    }
                    (Some(event), Some(pkid)) => {
                        if MessageHandler::completes_delivery(qos, pkid, &event) {
                            return Ok(());
                        }
                    }
                    (Some(_), None) => {}
                    (None, _) => return Err(PublishError::SessionLost { sequence }),
                },
                changed = state_rx.changed() => {
                    if changed.is_err() || !state_rx.borrow().is_usable() {
                        return Err(PublishError::SessionLost { sequence });
                    }
                }
            }
        }
    }

    /// Close the session and stop its supervisor
    ///
    /// A connected session sends DISCONNECT first. The supervisor is aborted
    /// if it has not stopped within a short grace period.
    pub async fn shutdown(&mut self) {
        let Some(mut handle) = self.supervisor_handle.take() else {
            return;
        };

        let disconnect_queued = self.is_usable() && self.client.try_disconnect().is_ok();
        if !disconnect_queued {
            let _ = self.shutdown_tx.send(true);
        }

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => info!(client_id = %self.client_id, "MQTT session closed"),
            Ok(Err(e)) => warn!("Session supervisor ended with error: {}", e),
            Err(_) => {
                warn!("Session supervisor didn't stop gracefully, forcing abort");
                let _ = self.shutdown_tx.send(true);
                handle.abort();
                self.state_tx.send_replace(SessionState::Disconnected);
                metrics().mqtt_session_closed();
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Async cleanup is impossible here; callers should use shutdown()
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.supervisor_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_identity() -> Identity {
        // Port 1 on loopback is never listening in test environments
        Identity::new("test-session", "u", "p", "127.0.0.1", 1)
    }

    #[test]
    fn test_setup_session_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            SessionManager::setup_session_channels();

        assert_eq!(*state_rx.borrow(), SessionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(SessionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), SessionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_discard_unacknowledged_drops_queued_publishes() {
        let identity = unreachable_identity();
        let (client, mut event_loop) = AsyncClient::new(
            configure_mqtt_options(&identity, Duration::from_secs(60)),
            REQUEST_CAPACITY,
        );
        let (state_tx, _state_rx) = watch::channel(SessionState::Failed("lost".to_string()));
        let (delivery_tx, _delivery_rx) = mpsc::unbounded_channel();
        let supervisor = SessionSupervisor {
            client_id: identity.client_id().to_string(),
            state_tx: Arc::new(state_tx),
            delivery_tx,
            reconnect_config: ReconnectConfig::default(),
            reconnect_attempts: 1,
        };

        for sequence in 0..3u64 {
            let message = Message::new(sequence, "/hello/there", QosLevel::AtLeastOnce);
            client
                .try_publish(
                    message.topic(),
                    message.qos().into(),
                    false,
                    message.payload().as_bytes().to_vec(),
                )
                .unwrap();
        }

        supervisor.discard_unacknowledged(&mut event_loop);
        assert!(event_loop.pending.is_empty());

        // Nothing is left in the client channel either
        event_loop.clean();
        assert!(event_loop.pending.is_empty());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(shutdown_rx, Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_already_shut_down() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        assert!(!interruptible_sleep(shutdown_rx, Duration::from_secs(10)).await);
    }

    #[tokio::test]
    async fn test_establish_returns_connecting_session() {
        let manager = SessionManager::new(ReconnectConfig::default(), Duration::from_secs(60));
        let mut session = manager.establish(&unreachable_identity());

        assert_eq!(session.client_id(), "test-session");
        assert!(!session.is_usable());

        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_fails_when_not_usable() {
        let manager = SessionManager::new(ReconnectConfig::default(), Duration::from_secs(60));
        let mut session = manager.establish(&unreachable_identity());

        let message = Message::new(0, "/hello/there", QosLevel::ExactlyOnce);
        let result = session.publish(&message, Duration::from_millis(100)).await;

        assert!(matches!(result, Err(PublishError::NotUsable { .. })));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_never_becomes_usable() {
        let config = ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_ms: 20,
            ..ReconnectConfig::default()
        };
        let manager = SessionManager::new(config, Duration::from_secs(60));
        let mut session = manager.establish(&unreachable_identity());

        assert!(!session.wait_until_usable(Duration::from_millis(200)).await);

        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_await_acknowledgement_qos2() {
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();
        let (_state_tx, mut state_rx) = watch::channel(SessionState::Connected);

        delivery_tx.send(DeliveryEvent::Sent(4)).unwrap();
        delivery_tx.send(DeliveryEvent::PubRec(4)).unwrap();
        delivery_tx.send(DeliveryEvent::PubComp(3)).unwrap();
        delivery_tx.send(DeliveryEvent::PubComp(4)).unwrap();

        let result = Session::await_acknowledgement(
            &mut delivery_rx,
            &mut state_rx,
            QosLevel::ExactlyOnce,
            9,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_await_acknowledgement_session_lost() {
        let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel();
        let (state_tx, mut state_rx) = watch::channel(SessionState::Connected);

        delivery_tx.send(DeliveryEvent::Sent(1)).unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = state_tx.send(SessionState::Failed("Network error".to_string()));
            // Keep the delivery channel open so only the state change ends the wait
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(delivery_tx);
        });

        let result = Session::await_acknowledgement(
            &mut delivery_rx,
            &mut state_rx,
            QosLevel::AtLeastOnce,
            2,
        )
        .await;
        assert_eq!(result, Err(PublishError::SessionLost { sequence: 2 }));
    }
}
