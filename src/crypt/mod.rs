// Message confidentiality and authenticity
//
// One envelope per broadcast: the plaintext is encrypted once under a
// fresh content key, the content key is wrapped for every recipient via an
// ephemeral x25519 exchange, and the ciphertext is signed by the sender.
// The base64 text form never contains a newline, which the wire framing
// relies on.

pub mod keyring;

pub use keyring::{Identity, Keyring, PublicEntry};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptError;

/// A decrypted message.
#[derive(Debug)]
pub struct OpenedMessage {
    pub plaintext: Vec<u8>,
    /// Display name of the signer, when the signature verifies against a
    /// key in the local keyring.
    pub signer: Option<String>,
}

/// The encrypt/decrypt pair the chat core depends on.
#[async_trait]
pub trait Cipher: Send + Sync {
    /// Encrypt and sign a message for a set of recipient usernames,
    /// producing one newline-free text blob valid for all of them.
    async fn encrypt(&self, plaintext: &[u8], recipients: &[String])
        -> Result<String, CryptError>;

    /// Open a received blob, returning the plaintext and the resolved
    /// signer, if any.
    async fn decrypt(&self, frame: &str) -> Result<OpenedMessage, CryptError>;
}

/// Wire form of one encrypted message.
#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Ephemeral x25519 public key for this message.
    ephemeral: [u8; 32],
    /// One slot per recipient, each wrapping the content key.
    slots: Vec<KeySlot>,
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
    verify_key: [u8; 32],
    /// ed25519 signature over the ciphertext.
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct KeySlot {
    /// First 8 bytes of SHA-256 of the recipient's exchange public key.
    key_id: [u8; 8],
    nonce: [u8; 12],
    wrapped_key: Vec<u8>,
}

/// `Cipher` backed by the local identity and the keyring.
pub struct KeyringCipher {
    identity: Identity,
    keyring: Keyring,
}

impl KeyringCipher {
    pub fn new(identity: Identity, keyring: Keyring) -> Self {
        Self { identity, keyring }
    }

    fn seal(&self, plaintext: &[u8], recipients: &[String]) -> Result<String, CryptError> {
        // Resolve every recipient up front; one unknown name fails the
        // whole send.
        let mut entries = Vec::with_capacity(recipients.len());
        for username in recipients {
            entries.push(self.keyring.resolve(username)?);
        }

        let mut content_key = [0u8; 32];
        OsRng.fill_bytes(&mut content_key);

        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);

        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            let shared = ephemeral.diffie_hellman(&entry.exchange);
            let wrap_key = Sha256::digest(shared.as_bytes());

            let mut nonce = [0u8; 12];
            OsRng.fill_bytes(&mut nonce);
            let wrapped_key = ChaCha20Poly1305::new(Key::from_slice(wrap_key.as_slice()))
                .encrypt(Nonce::from_slice(&nonce), content_key.as_slice())
                .map_err(|_| CryptError::Cipher)?;

            slots.push(KeySlot {
                key_id: entry.key_id(),
                nonce,
                wrapped_key,
            });
        }

        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = ChaCha20Poly1305::new(Key::from_slice(&content_key))
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptError::Cipher)?;

        let signature = self.identity.signing_key().sign(&ciphertext);

        let envelope = Envelope {
            ephemeral: *ephemeral_public.as_bytes(),
            slots,
            nonce,
            ciphertext,
            verify_key: *self.identity.verify_key().as_bytes(),
            signature: signature.to_bytes().to_vec(),
        };

        let bytes =
            bincode::serialize(&envelope).map_err(|e| CryptError::Malformed(e.to_string()))?;
        Ok(BASE64.encode(bytes))
    }

    fn open(&self, frame: &str) -> Result<OpenedMessage, CryptError> {
        let bytes = BASE64
            .decode(frame.trim())
            .map_err(|e| CryptError::Malformed(e.to_string()))?;
        let envelope: Envelope =
            bincode::deserialize(&bytes).map_err(|e| CryptError::Malformed(e.to_string()))?;

        let our_id = keyring::key_id(self.identity.exchange_public().as_bytes());
        let slot = envelope
            .slots
            .iter()
            .find(|slot| slot.key_id == our_id)
            .ok_or(CryptError::NotAddressed)?;

        let ephemeral = PublicKey::from(envelope.ephemeral);
        let shared = self.identity.exchange_secret().diffie_hellman(&ephemeral);
        let wrap_key = Sha256::digest(shared.as_bytes());

        let content_key = ChaCha20Poly1305::new(Key::from_slice(wrap_key.as_slice()))
            .decrypt(Nonce::from_slice(&slot.nonce), slot.wrapped_key.as_slice())
            .map_err(|_| CryptError::Cipher)?;
        let content_key: [u8; 32] = content_key
            .try_into()
            .map_err(|_| CryptError::Malformed("bad content key length".to_string()))?;

        let plaintext = ChaCha20Poly1305::new(Key::from_slice(&content_key))
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| CryptError::Cipher)?;

        let verify_key =
            VerifyingKey::from_bytes(&envelope.verify_key).map_err(|_| CryptError::BadSignature)?;
        let signature_bytes: [u8; 64] = envelope
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CryptError::BadSignature)?;
        let signature = Signature::from_bytes(&signature_bytes);
        verify_key
            .verify(&envelope.ciphertext, &signature)
            .map_err(|_| CryptError::BadSignature)?;

        Ok(OpenedMessage {
            plaintext,
            signer: self.keyring.name_for_verify_key(&verify_key),
        })
    }
}

#[async_trait]
impl Cipher for KeyringCipher {
    async fn encrypt(
        &self,
        plaintext: &[u8],
        recipients: &[String],
    ) -> Result<String, CryptError> {
        self.seal(plaintext, recipients)
    }

    async fn decrypt(&self, frame: &str) -> Result<OpenedMessage, CryptError> {
        self.open(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher_for(identity: Identity, known: &[&PublicEntry]) -> KeyringCipher {
        let mut keyring = Keyring::empty();
        for entry in known {
            keyring.insert((*entry).clone());
        }
        KeyringCipher::new(identity, keyring)
    }

    #[test]
    fn test_roundtrip_with_two_recipients() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let carol = Identity::generate("carol");
        let (alice_pub, bob_pub, carol_pub) =
            (alice.public_entry(), bob.public_entry(), carol.public_entry());

        let sender = cipher_for(alice, &[&bob_pub, &carol_pub]);
        let frame = sender
            .seal(b"hi", &["bob".to_string(), "carol".to_string()])
            .unwrap();
        assert!(!frame.contains('\n'));

        let receiver = cipher_for(bob, &[&alice_pub]);
        let opened = receiver.open(&frame).unwrap();
        assert_eq!(opened.plaintext, b"hi");
        assert_eq!(opened.signer, Some("alice".to_string()));

        let receiver = cipher_for(carol, &[&alice_pub]);
        let opened = receiver.open(&frame).unwrap();
        assert_eq!(opened.plaintext, b"hi");
    }

    #[test]
    fn test_unknown_recipient_fails_encrypt() {
        let alice = Identity::generate("alice");
        let sender = cipher_for(alice, &[]);

        let err = sender.seal(b"hi", &["bob".to_string()]).unwrap_err();
        assert!(matches!(err, CryptError::UnknownRecipient(name) if name == "bob"));
    }

    #[test]
    fn test_non_recipient_cannot_open() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let dave = Identity::generate("dave");
        let bob_pub = bob.public_entry();

        let sender = cipher_for(alice, &[&bob_pub]);
        let frame = sender.seal(b"hi", &["bob".to_string()]).unwrap();

        let outsider = cipher_for(dave, &[]);
        let err = outsider.open(&frame).unwrap_err();
        assert!(matches!(err, CryptError::NotAddressed));
    }

    #[test]
    fn test_unknown_signer_is_omitted() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let bob_pub = bob.public_entry();

        let sender = cipher_for(alice, &[&bob_pub]);
        let frame = sender.seal(b"hi", &["bob".to_string()]).unwrap();

        // Bob has no entry for alice, so the signature verifies but the
        // signer cannot be named.
        let receiver = cipher_for(bob, &[]);
        let opened = receiver.open(&frame).unwrap();
        assert_eq!(opened.plaintext, b"hi");
        assert_eq!(opened.signer, None);
    }

    #[test]
    fn test_tampered_frame_is_rejected() {
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        let bob_pub = bob.public_entry();

        let sender = cipher_for(alice, &[&bob_pub]);
        let frame = sender.seal(b"hi", &["bob".to_string()]).unwrap();

        let mut bytes = BASE64.decode(&frame).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let tampered = BASE64.encode(bytes);

        let receiver = cipher_for(bob, &[]);
        assert!(receiver.open(&tampered).is_err());
    }

    #[test]
    fn test_garbage_frame_is_malformed() {
        let bob = Identity::generate("bob");
        let receiver = cipher_for(bob, &[]);

        assert!(matches!(
            receiver.open("not base64 at all!!!").unwrap_err(),
            CryptError::Malformed(_)
        ));
    }
}
