//! SFU Session Manager
//!
//! Owns the peer registry and drives each peer from its first offer until its
//! connection fails or the relay shuts down.

use fanout_protocol::{SdpType, SessionDescription};
use std::sync::Arc;
use std::time::Duration;

use super::TrackRouter;
use super::connection::{ConnectionEvent, ConnectionEvents, Connector, InboundTrack, MediaConnection};
use super::peer::{InboundRoute, Peer, PeerId, SignalingEvent};
use super::registry::PeerRegistry;
use super::renegotiation;
use crate::error::RelayError;

/// How many fresh ids to try before giving up on registering a peer
const MAX_ID_ATTEMPTS: usize = 8;

pub struct SfuSessionManager {
    connector: Arc<dyn Connector>,
    registry: Arc<PeerRegistry>,
    renegotiate_timeout: Duration,
}

impl SfuSessionManager {
    pub fn new(connector: Arc<dyn Connector>, renegotiate_timeout: Duration) -> Self {
        Self {
            connector,
            registry: Arc::new(PeerRegistry::new()),
            renegotiate_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub async fn peer(&self, id: &PeerId) -> Result<Arc<Peer>, RelayError> {
        self.registry.lookup(id).await
    }

    /// Accept a new peer's offer and return its id together with the answer.
    ///
    /// Nothing is registered unless the answer was produced.
    pub async fn join(
        self: &Arc<Self>,
        offer: SessionDescription,
    ) -> Result<(PeerId, SessionDescription), RelayError> {
        offer.expect(SdpType::Offer)?;

        let (connection, events) = self.connector.connect().await?;

        let answer = match answer_offer(connection.as_ref(), offer).await {
            Ok(answer) => answer,
            Err(e) => {
                close_quietly(connection.as_ref()).await;
                return Err(e);
            }
        };

        let peer = match self.register_peer(connection.clone()).await {
            Ok(peer) => peer,
            Err(e) => {
                close_quietly(connection.as_ref()).await;
                return Err(e);
            }
        };

        self.spawn_event_pump(peer.clone(), events);

        tracing::info!(
            "Peer {} joined ({} peers connected)",
            peer.id(),
            self.registry.len().await
        );

        Ok((peer.id().clone(), answer))
    }

    /// Wait for the renegotiation offer queued for a peer, if any
    pub async fn poll_offer(&self, id: &PeerId) -> Result<Option<SessionDescription>, RelayError> {
        let peer = self.registry.lookup(id).await?;
        Ok(renegotiation::poll_offer(&peer, self.renegotiate_timeout).await)
    }

    pub async fn apply_answer(
        &self,
        id: &PeerId,
        answer: SessionDescription,
    ) -> Result<(), RelayError> {
        let peer = self.registry.lookup(id).await?;
        renegotiation::apply_answer(&peer, answer).await
    }

    /// Evict a peer, stop its tasks and close its connection
    pub async fn remove_peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        let peer = self.registry.remove(id).await?;
        peer.close().await;
        tracing::info!("Removed peer {} from the relay", id);
        Some(peer)
    }

    /// Close every peer. The manager is empty afterwards.
    pub async fn shutdown(&self) {
        let peers = self.registry.drain().await;
        let count = peers.len();
        futures_util::future::join_all(peers.iter().map(|peer| peer.close())).await;
        tracing::info!("Closed {} peers on shutdown", count);
    }

    async fn register_peer(&self, connection: Arc<dyn MediaConnection>) -> Result<Arc<Peer>, RelayError> {
        let mut last_id = None;

        for _ in 0..MAX_ID_ATTEMPTS {
            let peer = Arc::new(Peer::new(PeerId::generate(), connection.clone()));
            // The answer is already on its way; record that before others can see the peer
            peer.transition(SignalingEvent::AnswerSent).await;

            match self.registry.register(peer.clone()).await {
                Ok(()) => return Ok(peer),
                Err(RelayError::DuplicateId(id)) => {
                    tracing::warn!("Peer id {} already taken, drawing another", id);
                    last_id = Some(id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RelayError::DuplicateId(
            last_id.unwrap_or_else(|| PeerId::from("unassigned")),
        ))
    }

    fn spawn_event_pump(self: &Arc<Self>, peer: Arc<Peer>, mut events: ConnectionEvents) {
        let manager = self.clone();

        tokio::spawn(async move {
            let shutdown = peer.shutdown_token().clone();

            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                match event {
                    ConnectionEvent::InboundTrack(track) => {
                        manager.handle_inbound_track(&peer, track).await;
                    }
                    ConnectionEvent::ConnectivityChanged(state) => {
                        tracing::info!("[{}] Connectivity state: {}", peer.id(), state);

                        if state.is_established() {
                            peer.transition(SignalingEvent::Connected).await;
                        }
                        if state.is_terminal() {
                            manager.remove_peer(peer.id()).await;
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Event pump for peer {} finished", peer.id());
        });
    }

    async fn handle_inbound_track(&self, peer: &Arc<Peer>, track: Arc<dyn InboundTrack>) {
        let kind = track.kind();
        tracing::info!(
            "[{}] Received {} track {} ({})",
            peer.id(),
            kind,
            track.id(),
            track.codec().mime_type
        );

        let stop = peer.shutdown_token().child_token();
        let route = InboundRoute {
            track: track.clone(),
            stop: stop.clone(),
        };

        if let Some(previous) = peer.tracks.lock().await.inbound.insert(kind, route) {
            previous.stop.cancel();
            tracing::warn!(
                "[{}] {} track {} replaced by {}",
                peer.id(),
                kind,
                previous.track.id(),
                track.id()
            );
        }

        let router = Arc::new(TrackRouter::new(
            track,
            peer.id().clone(),
            self.registry.clone(),
            stop,
        ));
        tokio::spawn(router.start_forwarding());
    }
}

async fn answer_offer(
    connection: &dyn MediaConnection,
    offer: SessionDescription,
) -> Result<SessionDescription, RelayError> {
    connection.set_remote_description(offer).await?;
    let answer = connection.create_answer().await?;
    connection.set_local_description(answer.clone()).await?;
    Ok(connection.local_description().await.unwrap_or(answer))
}

async fn close_quietly(connection: &dyn MediaConnection) {
    if let Err(e) = connection.close().await {
        tracing::warn!("Error closing abandoned connection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfu::connection::{ConnectivityState, MediaKind};
    use crate::sfu::peer::SignalingState;
    use crate::sfu::testing::{FakeConnector, FakeInboundTrack, eventually, packet};
    use std::sync::atomic::Ordering;

    const TEST_TIMEOUT: Duration = Duration::from_millis(200);

    fn manager() -> (Arc<SfuSessionManager>, Arc<FakeConnector>) {
        let connector = FakeConnector::new();
        let manager = Arc::new(SfuSessionManager::new(connector.clone(), TEST_TIMEOUT));
        (manager, connector)
    }

    #[tokio::test]
    async fn test_join_answers_and_registers() {
        let (manager, connector) = manager();

        let (id, answer) = manager.join(SessionDescription::offer("v=0 p1")).await.unwrap();

        assert!(id.as_str().starts_with("peer-"));
        assert_eq!(answer, SessionDescription::answer("v=0 fake-answer"));
        assert_eq!(
            connector.connection(0).remote_descriptions(),
            vec![SessionDescription::offer("v=0 p1")]
        );

        let peer = manager.peer(&id).await.unwrap();
        assert_eq!(peer.signaling_state().await, SignalingState::AnswerSent);
    }

    #[tokio::test]
    async fn test_join_rejects_answer_without_creating_anything() {
        let (manager, connector) = manager();

        let result = manager.join(SessionDescription::answer("v=0")).await;

        assert!(matches!(result, Err(RelayError::MalformedInput(_))));
        assert_eq!(connector.connection_count(), 0);
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_negotiation_leaves_no_peer_behind() {
        let (manager, connector) = manager();
        connector
            .fail_remote_description
            .store(true, Ordering::SeqCst);

        let result = manager.join(SessionDescription::offer("v=0")).await;

        assert!(matches!(result, Err(RelayError::Negotiation(_))));
        assert!(manager.registry().is_empty().await);
        assert!(connector.connection(0).is_closed());
    }

    #[tokio::test]
    async fn test_late_joiner_gets_track_and_offer() {
        let (manager, connector) = manager();

        let (p1, _) = manager.join(SessionDescription::offer("v=0 p1")).await.unwrap();
        let (track, tx) = FakeInboundTrack::new(MediaKind::Video);
        connector.emit(0, ConnectionEvent::InboundTrack(track));
        tx.send(packet(1)).unwrap();

        let (p2, _) = manager.join(SessionDescription::offer("v=0 p2")).await.unwrap();
        let p2_connection = connector.connection(1);

        let mut seq = 2;
        eventually("p2 to receive video", || {
            let _ = tx.send(packet(seq));
            seq += 1;
            p2_connection
                .outbound(MediaKind::Video)
                .is_some_and(|track| !track.written().is_empty())
        })
        .await;

        assert_eq!(p2_connection.add_track_calls(MediaKind::Video), 1);
        assert_eq!(connector.connection(0).add_track_calls(MediaKind::Video), 0);

        let offer = manager.poll_offer(&p2).await.unwrap().expect("offer for p2");
        assert_eq!(offer, SessionDescription::offer("v=0 fake-offer-1"));
        assert_eq!(manager.poll_offer(&p1).await.unwrap(), None);

        manager
            .apply_answer(&p2, SessionDescription::answer("v=0 p2-answer"))
            .await
            .unwrap();
        assert_eq!(
            p2_connection.remote_descriptions().last(),
            Some(&SessionDescription::answer("v=0 p2-answer"))
        );
        let p2_peer = manager.peer(&p2).await.unwrap();
        assert_eq!(p2_peer.signaling_state().await, SignalingState::Active);
    }

    #[tokio::test]
    async fn test_inbound_track_is_recorded_on_peer() {
        let (manager, connector) = manager();
        let (p1, _) = manager.join(SessionDescription::offer("v=0")).await.unwrap();
        let peer = manager.peer(&p1).await.unwrap();

        let (track, _tx) = FakeInboundTrack::new(MediaKind::Audio);
        connector.emit(0, ConnectionEvent::InboundTrack(track));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !peer.tracks.lock().await.inbound.contains_key(&MediaKind::Audio) {
            assert!(tokio::time::Instant::now() < deadline, "inbound track never recorded");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_replaced_inbound_track_stops_its_router() {
        let (manager, connector) = manager();
        manager.join(SessionDescription::offer("v=0 p1")).await.unwrap();
        manager.join(SessionDescription::offer("v=0 p2")).await.unwrap();
        let p2_connection = connector.connection(1);

        let (first, first_tx) = FakeInboundTrack::new(MediaKind::Video);
        connector.emit(0, ConnectionEvent::InboundTrack(first));
        first_tx.send(packet(1)).unwrap();
        eventually("first track forwarded", || {
            p2_connection
                .outbound(MediaKind::Video)
                .is_some_and(|track| track.written() == vec![1])
        })
        .await;

        let (second, second_tx) = FakeInboundTrack::new(MediaKind::Video);
        connector.emit(0, ConnectionEvent::InboundTrack(second));

        // The old router lets go of its track, so nothing reads it any more
        eventually("first router stopped", || first_tx.is_closed()).await;

        second_tx.send(packet(2)).unwrap();
        let outbound = p2_connection.outbound(MediaKind::Video).unwrap();
        eventually("second track forwarded", || outbound.written() == vec![1, 2]).await;
        assert_eq!(p2_connection.add_track_calls(MediaKind::Video), 1);
    }

    #[tokio::test]
    async fn test_connected_moves_peer_to_active() {
        let (manager, connector) = manager();
        let (p1, _) = manager.join(SessionDescription::offer("v=0")).await.unwrap();
        let peer = manager.peer(&p1).await.unwrap();

        connector.emit(0, ConnectionEvent::ConnectivityChanged(ConnectivityState::Checking));
        connector.emit(0, ConnectionEvent::ConnectivityChanged(ConnectivityState::Connected));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while peer.signaling_state().await != SignalingState::Active {
            assert!(tokio::time::Instant::now() < deadline, "peer never became active");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_failed_connectivity_evicts_peer() {
        let (manager, connector) = manager();
        let (p1, _) = manager.join(SessionDescription::offer("v=0 p1")).await.unwrap();
        let (p2, _) = manager.join(SessionDescription::offer("v=0 p2")).await.unwrap();

        connector.emit(1, ConnectionEvent::ConnectivityChanged(ConnectivityState::Failed));

        let p2_connection = connector.connection(1);
        eventually("p2 connection closed", || p2_connection.is_closed()).await;
        assert!(matches!(
            manager.poll_offer(&p2).await,
            Err(RelayError::UnknownPeer(_))
        ));

        // Media from p1 no longer reaches the evicted peer
        let (track, tx) = FakeInboundTrack::new(MediaKind::Video);
        connector.emit(0, ConnectionEvent::InboundTrack(track));
        tx.send(packet(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(p2_connection.add_track_calls(MediaKind::Video), 0);
        assert!(manager.peer(&p1).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnected_is_not_eviction() {
        let (manager, connector) = manager();
        let (p1, _) = manager.join(SessionDescription::offer("v=0")).await.unwrap();

        connector.emit(0, ConnectionEvent::ConnectivityChanged(ConnectivityState::Disconnected));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.peer(&p1).await.is_ok());
        assert!(!connector.connection(0).is_closed());
    }

    #[tokio::test]
    async fn test_unknown_peer_is_reported_without_side_effects() {
        let (manager, connector) = manager();
        manager.join(SessionDescription::offer("v=0")).await.unwrap();
        let unknown = PeerId::from("unknown-id");

        assert!(matches!(
            manager.poll_offer(&unknown).await,
            Err(RelayError::UnknownPeer(_))
        ));
        assert!(matches!(
            manager
                .apply_answer(&unknown, SessionDescription::answer("v=0"))
                .await,
            Err(RelayError::UnknownPeer(_))
        ));
        assert_eq!(connector.connection(0).remote_descriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_without_offer_times_out_empty() {
        let (manager, _connector) = manager();
        let (p1, _) = manager.join(SessionDescription::offer("v=0")).await.unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(manager.poll_offer(&p1).await.unwrap(), None);
        assert!(started.elapsed() >= TEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_peer() {
        let (manager, connector) = manager();
        manager.join(SessionDescription::offer("v=0 p1")).await.unwrap();
        manager.join(SessionDescription::offer("v=0 p2")).await.unwrap();

        manager.shutdown().await;

        assert!(manager.registry().is_empty().await);
        assert!(connector.connection(0).is_closed());
        assert!(connector.connection(1).is_closed());
    }
}
