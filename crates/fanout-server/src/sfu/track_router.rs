//! Track Router for RTP forwarding
//!
//! Routes RTP packets from one peer's inbound track to the outbound track of
//! the same kind on every other peer, attaching that outbound track the first
//! time a destination needs it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

use super::connection::{CodecCapability, InboundTrack, MediaKind, MediaPacket, OutboundTrack};
use super::peer::{Peer, PeerId};
use super::registry::PeerRegistry;
use super::renegotiation;

/// Failed track attaches are logged on the first occurrence and then once per this many
const ATTACH_FAILURE_LOG_INTERVAL: u64 = 100;

/// Forwards packets from a single inbound track
pub struct TrackRouter {
    source: Arc<dyn InboundTrack>,
    publisher_id: PeerId,
    kind: MediaKind,
    codec: CodecCapability,
    track_id: String,
    stream_id: String,
    registry: Arc<PeerRegistry>,
    shutdown: CancellationToken,
    attach_failures: AtomicU64,
}

impl TrackRouter {
    pub fn new(
        source: Arc<dyn InboundTrack>,
        publisher_id: PeerId,
        registry: Arc<PeerRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            kind: source.kind(),
            codec: source.codec(),
            track_id: source.id(),
            stream_id: source.stream_id(),
            source,
            publisher_id,
            registry,
            shutdown,
            attach_failures: AtomicU64::new(0),
        }
    }

    /// How many times attaching an outbound track to a destination has failed
    pub fn attach_failures(&self) -> u64 {
        self.attach_failures.load(Ordering::Relaxed)
    }

    /// Read and fan out packets until the source track fails or the router is shut down.
    ///
    /// Returns the number of packets read.
    pub async fn start_forwarding(self: Arc<Self>) -> u64 {
        tracing::info!(
            "Starting RTP forwarding for {} track {} from peer {}",
            self.kind,
            self.track_id,
            self.publisher_id
        );

        let mut packet_count = 0u64;

        loop {
            let packet = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Track router {} stopped", self.track_id);
                    break;
                }
                result = self.source.read_packet() => match result {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::info!(
                            "Source track {} from peer {} ended after {} packets: {}",
                            self.track_id,
                            self.publisher_id,
                            packet_count,
                            e
                        );
                        break;
                    }
                }
            };

            packet_count += 1;
            self.forward_packet(&packet, packet_count).await;
        }

        packet_count
    }

    /// Forward one packet to every other registered peer
    async fn forward_packet(&self, packet: &MediaPacket, packet_count: u64) {
        let mut destinations = 0usize;

        self.registry
            .for_each_except(&self.publisher_id, |destination| {
                destinations += 1;
                async move { self.forward_to(&destination, packet).await }
            })
            .await;

        // Log every 100 packets
        if packet_count % 100 == 1 {
            tracing::debug!(
                "Forwarded {} packet {} from {} (seq: {}) to {} peers",
                self.kind,
                packet_count,
                self.publisher_id,
                packet.header.sequence_number,
                destinations
            );
        }
    }

    /// Deliver a packet to one destination, attaching its outbound track on first use.
    ///
    /// Holds only the destination's lock, and only for the duration of this call.
    async fn forward_to(&self, destination: &Peer, packet: &MediaPacket) {
        let mut tracks = destination.tracks.lock().await;

        if destination.is_closed() {
            return;
        }

        let outbound = match tracks.outbound.get(&self.kind) {
            Some(track) => track.clone(),
            None => {
                let track = match destination
                    .connection()
                    .add_outbound_track(self.kind, &self.codec, &self.track_id, &self.stream_id)
                    .await
                {
                    Ok(track) => track,
                    Err(e) => {
                        let failures = self.attach_failures.fetch_add(1, Ordering::Relaxed) + 1;
                        if failures % ATTACH_FAILURE_LOG_INTERVAL == 1 {
                            tracing::warn!(
                                "Cannot attach {} track for peer {} ({} failures so far): {}",
                                self.kind,
                                destination.id(),
                                failures,
                                e
                            );
                        }
                        return;
                    }
                };

                tracks.outbound.insert(self.kind, track.clone());
                spawn_feedback_drain(destination, self.kind, track.clone());

                tracing::info!(
                    "Attached {} track from peer {} to peer {}",
                    self.kind,
                    self.publisher_id,
                    destination.id()
                );

                if let Err(e) = renegotiation::renegotiate(destination).await {
                    tracing::warn!("Renegotiation for peer {} failed: {}", destination.id(), e);
                }

                track
            }
        };

        if let Err(e) = outbound.write_packet(packet).await {
            tracing::warn!(
                "Failed to forward RTP to peer {}: {}",
                destination.id(),
                e
            );
        }
    }
}

/// Keep the sender-feedback channel of a new outbound track drained for as long as it lives
fn spawn_feedback_drain(destination: &Peer, kind: MediaKind, track: Arc<dyn OutboundTrack>) {
    let peer_id = destination.id().clone();
    let shutdown = destination.shutdown_token().clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = track.read_feedback() => {
                    if result.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Feedback drain for {} track of peer {} finished", kind, peer_id);
    });
}
