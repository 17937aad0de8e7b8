// Connection handshake, receive loops, message intake, and broadcast

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::dedup::SeenStore;
use crate::chat::delivery::{delivery_queue, fragment_queue, Deliveries, DeliveryItem};
use crate::chat::peer::{Peer, PeerEvent, PeerRegistry};
use crate::crypt::Cipher;
use crate::error::ChatError;

/// The local endpoint of a small, manually connected peer network.
///
/// A node accepts and initiates connections, runs one receive loop per
/// peer, deduplicates incoming frames, and hands decrypted messages to the
/// presentation layer in arrival order. Clones are cheap and share the
/// registry, the dedup store, and the delivery path.
#[derive(Clone)]
pub struct ChatNode {
    username: String,
    recipients: Arc<Vec<String>>,
    cipher: Arc<dyn Cipher>,
    registry: Arc<PeerRegistry>,
    seen: Arc<SeenStore>,
    delivery: mpsc::Sender<DeliveryItem>,
}

impl ChatNode {
    /// Create a node. Also returns the delivery stream and the peer-event
    /// stream the presentation layer consumes.
    pub fn new(
        username: impl Into<String>,
        recipients: Vec<String>,
        cipher: Arc<dyn Cipher>,
    ) -> (Self, Deliveries, mpsc::UnboundedReceiver<PeerEvent>) {
        let (registry, events) = PeerRegistry::new();
        let (delivery, deliveries) = delivery_queue();

        let node = Self {
            username: username.into(),
            recipients: Arc::new(recipients),
            cipher,
            registry: Arc::new(registry),
            seen: Arc::new(SeenStore::new()),
            delivery,
        };

        (node, deliveries, events)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Usernames of the currently connected peers, in registration order.
    pub async fn peers(&self) -> Vec<String> {
        self.registry.usernames().await
    }

    /// Dial a remote node and run the handshake. Returns the peer's
    /// username once it is registered and its receive loop is running.
    pub async fn connect(&self, addr: &str) -> Result<String, ChatError> {
        let stream = TcpStream::connect(addr).await?;
        self.handle_connection(stream).await
    }

    /// Accept inbound connections on the given port, indefinitely.
    pub async fn listen(&self, port: u16) -> Result<(), ChatError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener, indefinitely.
    ///
    /// A failed handshake abandons that connection and nothing else.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ChatError> {
        let local = listener.local_addr()?;
        info!(addr = %local, "listening for peers");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let node = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_connection(stream).await {
                            warn!(%addr, error = %e, "inbound connection abandoned");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Username exchange, identical for both directions: send ours, read
    /// theirs, register the peer, start its receive loop.
    async fn handle_connection(&self, stream: TcpStream) -> Result<String, ChatError> {
        let (read_half, mut write_half) = stream.into_split();

        write_half
            .write_all(format!("{}\n", self.username).as_bytes())
            .await
            .map_err(|e| ChatError::Handshake(format!("sending username: {e}")))?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ChatError::Handshake(format!("reading username: {e}")))?;
        if read == 0 {
            return Err(ChatError::Handshake(
                "connection closed before username".to_string(),
            ));
        }

        let username = line.trim().to_string();
        if username.is_empty() {
            return Err(ChatError::Handshake("empty username".to_string()));
        }
        debug!(peer = %username, "handshake complete");

        let peer = Peer::new(username.clone(), write_half);
        // A duplicate username drops both stream halves right here, closing
        // the connection without ever starting a receive loop.
        self.registry.register(peer.clone()).await?;

        let node = self.clone();
        tokio::spawn(async move {
            node.receive_loop(peer, reader).await;
        });

        Ok(username)
    }

    /// Read frames from one peer until the connection fails, then
    /// deregister it.
    async fn receive_loop(&self, peer: Peer, mut reader: BufReader<OwnedReadHalf>) {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!(peer = %peer.username(), "connection closed");
                    break;
                }
                Ok(_) => {
                    let frame = line.trim();
                    if frame.is_empty() {
                        continue;
                    }
                    self.intake(frame.to_string(), peer.username()).await;
                }
                Err(e) => {
                    debug!(peer = %peer.username(), error = %e, "read failed");
                    break;
                }
            }
        }
        self.registry.remove(peer.username()).await;
    }

    /// Accept one received frame: drop duplicates, reserve the message's
    /// slot in delivery order, then decrypt off this task.
    pub(crate) async fn intake(&self, frame: String, from: &str) {
        if !self.seen.insert(&frame).await {
            debug!(peer = %from, "ignoring frame we already processed");
            return;
        }

        // Enqueue before decrypting so delivery order matches intake order
        // no matter how long each decryption takes.
        let (fragments, item) = fragment_queue();
        if self.delivery.send(item).await.is_err() {
            // The presentation layer is gone; nothing left to deliver to.
            return;
        }

        let node = self.clone();
        let from = from.to_string();
        tokio::spawn(async move {
            node.reveal(frame, from, fragments).await;
        });
    }

    /// Produce the display fragments for one message. Returning drops the
    /// sender, which completes the delivery item.
    async fn reveal(&self, frame: String, from: String, fragments: mpsc::Sender<String>) {
        let _ = fragments.send("Relayed from ".to_string()).await;
        let _ = fragments.send(from).await;
        let _ = fragments.send(": ".to_string()).await;

        match self.cipher.decrypt(&frame).await {
            Err(e) => {
                let _ = fragments.send("Unable to decrypt =(".to_string()).await;
                let _ = fragments.send(e.to_string()).await;
            }
            Ok(opened) => {
                if let Some(signer) = opened.signer {
                    let _ = fragments.send(signer).await;
                }
                let _ = fragments.send(": ".to_string()).await;
                let _ = fragments
                    .send(String::from_utf8_lossy(&opened.plaintext).into_owned())
                    .await;
            }
        }
    }

    /// Encrypt a locally written message for the configured recipients and
    /// send it to every connected peer.
    ///
    /// Write failures are per-peer: a dead connection is logged and
    /// skipped, and the remaining peers in the snapshot still get the
    /// frame. The local message does not loop back through delivery.
    pub async fn broadcast(&self, plaintext: &str) -> Result<(), ChatError> {
        let frame = self
            .cipher
            .encrypt(plaintext.as_bytes(), &self.recipients)
            .await
            .map_err(ChatError::Encrypt)?;

        for peer in self.registry.snapshot().await {
            debug!(peer = %peer.username(), "sending");
            if let Err(e) = peer.send_frame(&frame).await {
                warn!(peer = %peer.username(), error = %e, "broadcast write failed");
            }
        }

        Ok(())
    }
}
