//! Live peer connection bookkeeping

use crate::webrtc::peer::PeerConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Peer connections that are still negotiating or streaming
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<String, Arc<PeerConnection>>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a peer until its connection fails or closes
    pub async fn insert(&self, peer: Arc<PeerConnection>) {
        let id = peer.id().to_string();
        let mut closed = peer.closed_signal();

        {
            let mut peers = self.peers.write().await;
            peers.insert(id.clone(), Arc::clone(&peer));
            log::debug!("Tracking peer {} ({} active)", id, peers.len());
        }

        let registry = self.clone();
        tokio::spawn(async move {
            // An Err means the peer itself was dropped
            let _ = closed.wait_for(|closed| *closed).await;
            registry.remove(&id).await;
        });
    }

    /// Stop tracking a peer and close its connection
    pub async fn remove(&self, id: &str) -> Option<Arc<PeerConnection>> {
        let peer = self.peers.write().await.remove(id)?;

        if let Err(e) = peer.close().await {
            log::warn!("Failed to close peer {}: {}", id, e);
        }
        log::info!("Removed peer {}", id);
        Some(peer)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<PeerConnection>> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Close every tracked peer
    pub async fn close_all(&self) {
        let peers: Vec<Arc<PeerConnection>> =
            self.peers.write().await.drain().map(|(_, p)| p).collect();

        if peers.is_empty() {
            return;
        }
        log::info!("Closing {} peer connection(s)", peers.len());

        for peer in peers {
            if let Err(e) = peer.close().await {
                log::warn!("Failed to close peer {}: {}", peer.id(), e);
            }
        }
    }
}
