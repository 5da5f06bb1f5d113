//! Registry of connected peers

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::peer::{Peer, PeerId};
use crate::error::RelayError;

pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, peer: Arc<Peer>) -> Result<(), RelayError> {
        match self.peers.write().await.entry(peer.id().clone()) {
            Entry::Occupied(entry) => Err(RelayError::DuplicateId(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(peer);
                Ok(())
            }
        }
    }

    pub async fn lookup(&self, id: &PeerId) -> Result<Arc<Peer>, RelayError> {
        self.peers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownPeer(id.clone()))
    }

    pub async fn remove(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.write().await.remove(id)
    }

    /// Every registered peer except `excluded`.
    ///
    /// The registry lock is released before this returns, so peers joining
    /// afterwards are not part of the result.
    pub async fn others(&self, excluded: &PeerId) -> Vec<Arc<Peer>> {
        self.peers
            .read()
            .await
            .iter()
            .filter(|(id, _)| *id != excluded)
            .map(|(_, peer)| peer.clone())
            .collect()
    }

    /// Run `f` for every peer except `excluded`, one at a time, without holding the registry lock
    pub async fn for_each_except<F, Fut>(&self, excluded: &PeerId, mut f: F)
    where
        F: FnMut(Arc<Peer>) -> Fut,
        Fut: Future<Output = ()>,
    {
        for peer in self.others(excluded).await {
            f(peer).await;
        }
    }

    /// Empty the registry, handing back everything that was in it
    pub async fn drain(&self) -> Vec<Arc<Peer>> {
        self.peers.write().await.drain().map(|(_, peer)| peer).collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
