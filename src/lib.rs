//! peerchat - encrypted chat between directly connected peers
//!
//! Peers are connected by hand, exchange usernames in a one-line
//! handshake, and broadcast signed, multi-recipient-encrypted messages to
//! every connected peer. Received messages are deduplicated and shown in
//! arrival order.

pub mod chat;
pub mod config;
pub mod crypt;
pub mod error;

pub use chat::{ChatNode, Deliveries, DeliveryItem, PeerEvent};
pub use config::Config;
pub use crypt::{Cipher, Identity, Keyring, KeyringCipher, OpenedMessage};
pub use error::{ChatError, CryptError};
