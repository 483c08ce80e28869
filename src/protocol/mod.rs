//! Data model for the publish stream
//!
//! Identity, generated messages, publish outcomes and the validation rules
//! for topics and client identifiers.

pub mod identity;
pub mod messages;
pub mod topics;

pub use identity::*;
pub use messages::*;
pub use topics::*;
