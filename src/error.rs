// Error taxonomy for the peer network and the message crypto

use thiserror::Error;

/// Errors from the peer-connection and message-distribution core.
///
/// None of these are fatal to the process: a failed handshake or a dead
/// connection affects only the peer it belongs to.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The username exchange did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A peer with the same username is already registered.
    #[error("already connected to a peer named '{0}'")]
    DuplicateUsername(String),

    /// Encrypting an outgoing broadcast failed; nothing was sent.
    #[error("failed to encrypt message: {0}")]
    Encrypt(#[source] CryptError),

    /// Read/write failure on a peer connection.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
}

/// Errors from the message confidentiality/authenticity transform.
///
/// Decrypt-side errors surface to the user in-band, as text inside the
/// delivery item for the message that failed.
#[derive(Debug, Error)]
pub enum CryptError {
    #[error("no public key for '{0}' in keyring")]
    UnknownRecipient(String),

    #[error("message is not addressed to this identity")]
    NotAddressed,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("cipher failure")]
    Cipher,

    #[error("signature verification failed")]
    BadSignature,

    #[error("key storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("key encoding: {0}")]
    KeyEncoding(String),
}
