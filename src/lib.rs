//! MQTT synthetic traffic generator
//!
//! Publishes a steady stream of numbered messages to one MQTT broker, for
//! exercising brokers and honeypots under test.
//!
//! # Overview
//!
//! - [`transport::mqtt::SessionManager`] opens the broker session, reports
//!   the connection result asynchronously and reconnects with exponential
//!   backoff, forever.
//! - [`publisher::PublishLoop`] sleeps for a fixed interval, then publishes
//!   the next `messages: <n>` payload if the session is usable.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_traffic_gen::protocol::{payload, Message, QosLevel};
//!
//! let message = Message::new(0, "/hello/there", QosLevel::ExactlyOnce);
//! assert_eq!(message.payload(), payload(0));
//! assert_eq!(message.payload(), "messages: 0");
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, PublisherConfig};
pub use error::{PublishError, PublisherError, PublisherResult};
pub use protocol::*;
pub use publisher::{PublishLoop, PublishReport, TickResult};
pub use transport::mqtt::{Session, SessionManager, SessionState};
pub use transport::SessionProvider;
