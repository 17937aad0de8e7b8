// Peer-connection and message-distribution core
//
// A node holds direct TCP connections to a handful of peers. Each
// connection starts with a one-line username handshake, then carries
// newline-terminated ciphertext frames. Received frames are deduplicated,
// decrypted asynchronously, and delivered to the presentation layer in
// arrival order.

pub mod dedup;
pub mod delivery;
pub mod node;
pub mod peer;
pub mod store;

pub use dedup::SeenStore;
pub use delivery::{Deliveries, DeliveryItem};
pub use node::ChatNode;
pub use peer::{Peer, PeerEvent, PeerRegistry};
pub use store::{KnownPeer, PeerStore};
