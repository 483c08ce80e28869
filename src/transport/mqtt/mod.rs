//! MQTT 3.1.1 session management
//!
//! Pure functions are kept apart from the task that performs network I/O:
//!
//! - [`connection`] - Session state, backoff policy and rumqttc options
//! - [`message_handler`] - Routing of rumqttc events
//! - [`health_monitor`] - State transitions and reconnection decisions
//! - [`client`] - The session manager, its supervisor task and the session handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_traffic_gen::protocol::{Identity, Message, QosLevel};
//! use mqtt_traffic_gen::transport::mqtt::{ReconnectConfig, SessionManager};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let identity = Identity::new("rust-mqtt-42", "user", "secret", "localhost", 1883);
//! let manager = SessionManager::new(ReconnectConfig::default(), Duration::from_secs(60));
//!
//! let mut session = manager.establish(&identity);
//! if session.wait_until_usable(Duration::from_secs(5)).await {
//!     let message = Message::new(0, "/hello/there", QosLevel::ExactlyOnce);
//!     session.publish(&message, Duration::from_secs(1)).await?;
//! }
//! session.shutdown().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::{Session, SessionManager};
pub use connection::{configure_mqtt_options, ReconnectConfig, SessionState};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{DeliveryEvent, EventRoute, MessageHandler};
