// Peer connections and the live peer registry

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex};

use crate::error::ChatError;

/// Registry change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Joined(String),
    Left(String),
}

/// One live connection to a remote node.
///
/// The username is whatever the remote side claimed during the handshake;
/// trust in identity comes from message signatures, not from this string.
#[derive(Clone)]
pub struct Peer {
    username: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl Peer {
    pub fn new(username: String, writer: OwnedWriteHalf) -> Self {
        Self {
            username,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Write one newline-terminated frame to the peer.
    pub async fn send_frame(&self, frame: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

/// The authoritative set of currently connected peers.
///
/// Every mutation and enumeration happens under one lock. Network writes
/// never do: broadcast takes a snapshot under the lock and performs its
/// I/O outside it, so a stalled peer cannot block registration.
pub struct PeerRegistry {
    peers: Mutex<Vec<Peer>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            peers: Mutex::new(Vec::new()),
            events,
        };
        (registry, events_rx)
    }

    /// Add a peer. A username that is already registered is rejected; the
    /// caller must close the rejected connection without starting its
    /// receive loop.
    pub async fn register(&self, peer: Peer) -> Result<(), ChatError> {
        let mut peers = self.peers.lock().await;
        if peers.iter().any(|p| p.username == peer.username) {
            return Err(ChatError::DuplicateUsername(peer.username.clone()));
        }
        tracing::info!(peer = %peer.username, "peer joined");
        let _ = self.events.send(PeerEvent::Joined(peer.username.clone()));
        peers.push(peer);
        Ok(())
    }

    /// Remove a peer by username. Removing an absent peer is logged, not
    /// fatal; it only happens if a receive loop deregisters twice.
    pub async fn remove(&self, username: &str) {
        let mut peers = self.peers.lock().await;
        match peers.iter().position(|p| p.username == username) {
            Some(index) => {
                peers.remove(index);
                tracing::info!(peer = %username, "peer left");
                let _ = self.events.send(PeerEvent::Left(username.to_string()));
            }
            None => {
                tracing::warn!(peer = %username, "remove called for unregistered peer");
            }
        }
    }

    /// Copy of the current peer list, in registration order.
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.lock().await.clone()
    }

    pub async fn usernames(&self) -> Vec<String> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|p| p.username.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }
}
