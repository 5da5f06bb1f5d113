//! Per-peer relay state

use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use super::connection::{InboundTrack, MediaConnection, MediaKind, OutboundTrack};
use super::offer_slot::OfferSlot;

/// Upper bound (exclusive) of the numeric part of generated peer ids
const PEER_ID_SPACE: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Draw a fresh `peer-<n>` id.
    ///
    /// Collisions are possible and are rejected by the registry.
    pub fn generate() -> Self {
        let n = rand::thread_rng().gen_range(0..PEER_ID_SPACE);
        Self(format!("peer-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signaling lifecycle of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Created,
    AnswerSent,
    Active,
    RenegotiationPending,
    Closed,
}

/// Things that move a peer through its signaling lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingEvent {
    AnswerSent,
    Connected,
    OfferQueued,
    AnswerApplied,
    Closed,
}

impl SignalingState {
    pub fn advance(self, event: SignalingEvent) -> SignalingState {
        use SignalingEvent as E;
        use SignalingState as S;

        match (self, event) {
            (S::Closed, _) => S::Closed,
            (_, E::Closed) => S::Closed,
            (S::Created, E::AnswerSent) => S::AnswerSent,
            (S::AnswerSent, E::Connected) => S::Active,
            (S::AnswerSent | S::Active, E::OfferQueued) => S::RenegotiationPending,
            (S::AnswerSent | S::RenegotiationPending, E::AnswerApplied) => S::Active,
            (state, _) => state,
        }
    }
}

/// A published track and the token that stops its router
pub struct InboundRoute {
    pub track: Arc<dyn InboundTrack>,
    pub stop: CancellationToken,
}

/// Track maps guarded by the peer's mutex
#[derive(Default)]
pub struct PeerTracks {
    /// At most one routed track per kind
    pub inbound: HashMap<MediaKind, InboundRoute>,
    pub outbound: HashMap<MediaKind, Arc<dyn OutboundTrack>>,
}

/// One connected session
pub struct Peer {
    id: PeerId,
    connection: Arc<dyn MediaConnection>,
    /// Held for the whole lazy-create-then-write sequence of a forward
    pub tracks: Mutex<PeerTracks>,
    pub offers: OfferSlot,
    state: RwLock<SignalingState>,
    shutdown: CancellationToken,
}

impl Peer {
    pub fn new(id: PeerId, connection: Arc<dyn MediaConnection>) -> Self {
        Self {
            id,
            connection,
            tracks: Mutex::new(PeerTracks::default()),
            offers: OfferSlot::new(),
            state: RwLock::new(SignalingState::Created),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn connection(&self) -> &Arc<dyn MediaConnection> {
        &self.connection
    }

    pub async fn signaling_state(&self) -> SignalingState {
        *self.state.read().await
    }

    pub async fn transition(&self, event: SignalingEvent) -> SignalingState {
        let mut state = self.state.write().await;
        let next = state.advance(event);
        if next != *state {
            tracing::debug!("Peer {} signaling {:?} -> {:?}", self.id, *state, next);
            *state = next;
        }
        next
    }

    /// Token cancelled when the peer is torn down
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every task tied to this peer and close its connection
    pub async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.transition(SignalingEvent::Closed).await;

        if let Err(e) = self.connection.close().await {
            tracing::warn!("Error closing connection for peer {}: {}", self.id, e);
        }
    }
}
