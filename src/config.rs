// Node configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default TCP port for peer connections.
pub const DEFAULT_PORT: u16 = 9999;

/// Node configuration, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Username sent to peers during the handshake.
    pub username: String,

    /// Recipient identities every broadcast is encrypted for. Read once
    /// at startup; edits take effect on the next run.
    pub recipients: Vec<String>,

    /// Directory of public keyring entries.
    pub keyring_dir: PathBuf,

    /// Path to the local identity file (secret keys).
    pub identity_path: PathBuf,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Default state directory, `~/.peerchat`.
    pub fn state_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".peerchat")
    }

    pub fn default_path() -> PathBuf {
        Self::state_dir().join("config.json")
    }

    /// A fresh config with its key material rooted in `dir`.
    pub fn for_dir(username: String, dir: &Path) -> Self {
        Self {
            username,
            recipients: Vec::new(),
            keyring_dir: dir.join("keyring"),
            identity_path: dir.join("identity.json"),
            port: DEFAULT_PORT,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        serde_json::from_str(&json).context("Failed to parse config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::for_dir("alice".to_string(), dir.path());
        config.recipients = vec!["bob".to_string(), "carol".to_string()];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.recipients, vec!["bob", "carol"]);
        assert_eq!(loaded.port, DEFAULT_PORT);
    }

    #[test]
    fn test_missing_port_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(
            &path,
            r#"{
                "username": "alice",
                "recipients": [],
                "keyring_dir": "/tmp/keyring",
                "identity_path": "/tmp/identity.json"
            }"#,
        )
        .unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.port, DEFAULT_PORT);
    }

    #[test]
    fn test_state_dir_under_home() {
        let dir = Config::state_dir();
        assert!(dir.ends_with(".peerchat"));
    }
}
