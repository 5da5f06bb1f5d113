//! Offer/answer round trips after the relay attaches a new outbound track
//!
//! The relay produces the offer and parks it in the peer's one-slot handoff.
//! The peer collects it by polling signaling and sends its answer back.
//! Only one offer is ever outstanding per peer; extra offers are dropped.

use fanout_protocol::{SdpType, SessionDescription};
use std::time::Duration;

use super::peer::{Peer, SignalingEvent};
use crate::error::RelayError;

/// Create a fresh offer for `peer` and queue it for delivery.
///
/// Must be called while holding the peer's track lock, right after the track
/// that triggered it was created. Returns whether the offer was queued.
pub async fn renegotiate(peer: &Peer) -> Result<bool, RelayError> {
    let connection = peer.connection();

    let offer = connection.create_offer().await?;
    connection.set_local_description(offer.clone()).await?;
    let offer = connection.local_description().await.unwrap_or(offer);

    if peer.offers.try_offer(offer) {
        peer.transition(SignalingEvent::OfferQueued).await;
        tracing::info!("Queued renegotiation offer for peer {}", peer.id());
        Ok(true)
    } else {
        tracing::warn!(
            "Offer slot full for peer {}, dropping renegotiation offer",
            peer.id()
        );
        Ok(false)
    }
}

/// Wait up to `wait` for a queued offer
pub async fn poll_offer(peer: &Peer, wait: Duration) -> Option<SessionDescription> {
    let offer = peer.offers.poll(wait).await;
    if offer.is_some() {
        tracing::info!("Delivered renegotiation offer to peer {}", peer.id());
    }
    offer
}

/// Apply the peer's answer to the last offer it collected
pub async fn apply_answer(peer: &Peer, answer: SessionDescription) -> Result<(), RelayError> {
    answer.expect(SdpType::Answer)?;

    peer.connection().set_remote_description(answer).await?;
    peer.transition(SignalingEvent::AnswerApplied).await;

    tracing::info!("Applied renegotiation answer from peer {}", peer.id());
    Ok(())
}
