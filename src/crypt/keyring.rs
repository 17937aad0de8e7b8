// Identity and public-key management
//
// Keys move out of band: every node exports a public entry into a keyring
// directory, and recipients and signers are resolved from whatever entries
// that directory holds.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptError;

/// A peer's published keys.
#[derive(Clone, Debug)]
pub struct PublicEntry {
    pub username: String,
    pub exchange: PublicKey,
    pub verify: VerifyingKey,
}

impl PublicEntry {
    /// Short identifier for the exchange key: first 8 bytes of its SHA-256.
    pub fn key_id(&self) -> [u8; 8] {
        key_id(self.exchange.as_bytes())
    }

    /// Hex fingerprint of the exchange key, for display.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.exchange.as_bytes()))
    }
}

pub(crate) fn key_id(exchange_public: &[u8; 32]) -> [u8; 8] {
    let digest = Sha256::digest(exchange_public);
    let mut id = [0u8; 8];
    id.copy_from_slice(&digest[..8]);
    id
}

/// On-disk form of a public entry; key bytes are base64.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    username: String,
    exchange: String,
    verify: String,
}

/// On-disk form of an identity, secret keys included.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    username: String,
    exchange_secret: String,
    signing_secret: String,
}

/// The local node's key material: an x25519 exchange key and an ed25519
/// signing key.
pub struct Identity {
    pub username: String,
    exchange_secret: StaticSecret,
    signing: SigningKey,
}

impl Identity {
    /// Generate fresh keys for a username.
    pub fn generate(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            exchange_secret: StaticSecret::random_from_rng(OsRng),
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn exchange_public(&self) -> PublicKey {
        PublicKey::from(&self.exchange_secret)
    }

    pub fn verify_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange_secret
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// The public half of this identity, as peers will see it.
    pub fn public_entry(&self) -> PublicEntry {
        PublicEntry {
            username: self.username.clone(),
            exchange: self.exchange_public(),
            verify: self.verify_key(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptError> {
        let stored = StoredIdentity {
            username: self.username.clone(),
            exchange_secret: BASE64.encode(self.exchange_secret.to_bytes()),
            signing_secret: BASE64.encode(self.signing.to_bytes()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| CryptError::KeyEncoding(e.to_string()))?;
        fs::write(path, json)?;

        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CryptError> {
        let json = fs::read_to_string(path)?;
        let stored: StoredIdentity =
            serde_json::from_str(&json).map_err(|e| CryptError::KeyEncoding(e.to_string()))?;

        Ok(Self {
            username: stored.username,
            exchange_secret: StaticSecret::from(decode_key32(&stored.exchange_secret)?),
            signing: SigningKey::from_bytes(&decode_key32(&stored.signing_secret)?),
        })
    }
}

fn decode_key32(encoded: &str) -> Result<[u8; 32], CryptError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptError::KeyEncoding(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptError::KeyEncoding("key must be 32 bytes".to_string()))
}

/// Public entries for every known identity, loaded from a directory of
/// JSON files.
pub struct Keyring {
    entries: HashMap<String, PublicEntry>,
}

impl Keyring {
    /// Load every `.json` entry in the directory. Entries that do not
    /// parse are skipped with a warning; a missing directory is an empty
    /// keyring.
    pub fn load(dir: &Path) -> Result<Self, CryptError> {
        let mut entries = HashMap::new();

        if dir.is_dir() {
            for file in fs::read_dir(dir)? {
                let path = file?.path();
                if path.extension().map_or(true, |ext| ext != "json") {
                    continue;
                }
                match Self::load_entry(&path) {
                    Ok(entry) => {
                        entries.insert(entry.username.clone(), entry);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable keyring entry");
                    }
                }
            }
        }

        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn load_entry(path: &Path) -> Result<PublicEntry, CryptError> {
        let json = fs::read_to_string(path)?;
        let stored: StoredEntry =
            serde_json::from_str(&json).map_err(|e| CryptError::KeyEncoding(e.to_string()))?;

        Ok(PublicEntry {
            username: stored.username,
            exchange: PublicKey::from(decode_key32(&stored.exchange)?),
            verify: VerifyingKey::from_bytes(&decode_key32(&stored.verify)?)
                .map_err(|e| CryptError::KeyEncoding(e.to_string()))?,
        })
    }

    /// Write one public entry into a keyring directory, named after its
    /// username.
    pub fn export_entry(dir: &Path, entry: &PublicEntry) -> Result<PathBuf, CryptError> {
        fs::create_dir_all(dir)?;

        let stored = StoredEntry {
            username: entry.username.clone(),
            exchange: BASE64.encode(entry.exchange.as_bytes()),
            verify: BASE64.encode(entry.verify.as_bytes()),
        };
        let path = dir.join(format!("{}.json", entry.username));
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| CryptError::KeyEncoding(e.to_string()))?;
        fs::write(&path, json)?;

        Ok(path)
    }

    pub fn insert(&mut self, entry: PublicEntry) {
        self.entries.insert(entry.username.clone(), entry);
    }

    /// Recipient key lookup by username.
    pub fn resolve(&self, username: &str) -> Result<&PublicEntry, CryptError> {
        self.entries
            .get(username)
            .ok_or_else(|| CryptError::UnknownRecipient(username.to_string()))
    }

    /// Display name for a verify key, if it belongs to a known identity.
    pub fn name_for_verify_key(&self, verify: &VerifyingKey) -> Option<String> {
        self.entries
            .values()
            .find(|entry| entry.verify == *verify)
            .map(|entry| entry.username.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
