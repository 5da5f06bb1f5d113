//! Media transport seam
//!
//! The relay never touches ICE, DTLS or RTP transport directly. It drives one
//! [`MediaConnection`] per peer and reacts to the [`ConnectionEvent`]s that
//! connection emits. The production binding lives in `sfu::webrtc`.

use async_trait::async_trait;
use fanout_protocol::SessionDescription;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// RTP packets are forwarded untouched
pub type MediaPacket = webrtc::rtp::packet::Packet;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Codec of a track, copied from the inbound side onto every outbound track
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

/// Transport connectivity as reported by the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// States after which the connection will never carry media again
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectivityState::Failed | ConnectivityState::Closed)
    }

    pub fn is_established(self) -> bool {
        matches!(
            self,
            ConnectivityState::Connected | ConnectivityState::Completed
        )
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Checking => "checking",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Completed => "completed",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A track received from a peer
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn id(&self) -> String;

    fn stream_id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn codec(&self) -> CodecCapability;

    /// Wait for the next packet. An error means the track is finished.
    async fn read_packet(&self) -> Result<MediaPacket, RelayError>;
}

/// A track the relay sends toward a peer
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    /// Best-effort write, nothing waits for delivery
    async fn write_packet(&self, packet: &MediaPacket) -> Result<(), RelayError>;

    /// Read (and discard) one batch of sender feedback. Errors once the sender is gone.
    async fn read_feedback(&self) -> Result<(), RelayError>;
}

pub enum ConnectionEvent {
    InboundTrack(Arc<dyn InboundTrack>),
    ConnectivityChanged(ConnectivityState),
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::InboundTrack(track) => f
                .debug_struct("InboundTrack")
                .field("id", &track.id())
                .field("kind", &track.kind())
                .finish(),
            ConnectionEvent::ConnectivityChanged(state) => {
                f.debug_tuple("ConnectivityChanged").field(state).finish()
            }
        }
    }
}

pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

/// One peer's media transport session
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RelayError>;

    async fn create_answer(&self) -> Result<SessionDescription, RelayError>;

    async fn create_offer(&self) -> Result<SessionDescription, RelayError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RelayError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_outbound_track(
        &self,
        kind: MediaKind,
        codec: &CodecCapability,
        track_id: &str,
        stream_id: &str,
    ) -> Result<Arc<dyn OutboundTrack>, RelayError>;

    async fn close(&self) -> Result<(), RelayError>;
}

/// Creates media connections for newly arriving peers
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Arc<dyn MediaConnection>, ConnectionEvents), RelayError>;
}
