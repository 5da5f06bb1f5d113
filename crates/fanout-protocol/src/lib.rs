//! Signaling message shapes for the Fanout relay.
//!
//! Session descriptions are carried as a type tag plus an opaque SDP payload.
//! Neither the relay nor this crate ever looks inside the payload.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
