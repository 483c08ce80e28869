//! Testing utilities and mock implementations
//!
//! Lets the publish loop run in tests without an MQTT broker.

pub mod mocks;

pub use mocks::*;
