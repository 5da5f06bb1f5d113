//! One-slot handoff for renegotiation offers
//!
//! The relay side never blocks: if an offer is already waiting, the new one is
//! dropped. The signaling side waits a bounded time for an offer to show up.

use fanout_protocol::SessionDescription;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

pub struct OfferSlot {
    tx: mpsc::Sender<SessionDescription>,
    rx: Mutex<mpsc::Receiver<SessionDescription>>,
}

impl OfferSlot {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Place an offer in the slot. Returns false (and drops the offer) when occupied.
    pub fn try_offer(&self, offer: SessionDescription) -> bool {
        self.tx.try_send(offer).is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Take the pending offer, waiting up to `wait` for one to arrive
    pub async fn poll(&self, wait: Duration) -> Option<SessionDescription> {
        let take = async { self.rx.lock().await.recv().await };
        tokio::time::timeout(wait, take).await.ok().flatten()
    }
}

impl Default for OfferSlot {
    fn default() -> Self {
        Self::new()
    }
}
