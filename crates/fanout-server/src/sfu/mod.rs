//! SFU (Selective Forwarding Unit)
//!
//! Every peer sends its audio and video to the relay, which forwards each RTP
//! packet unchanged to all other peers. New outbound tracks are announced to a
//! peer through an offer it collects by polling signaling.

pub mod connection;
mod offer_slot;
pub mod peer;
pub mod registry;
pub mod renegotiation;
mod session;
mod track_router;
pub mod webrtc;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connector, MediaConnection, MediaKind};
pub use offer_slot::OfferSlot;
pub use peer::{Peer, PeerId, SignalingState};
pub use registry::PeerRegistry;
pub use session::SfuSessionManager;
pub use track_router::TrackRouter;
pub use self::webrtc::WebRtcConnector;
