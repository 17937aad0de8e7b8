// Known-peer persistence using SQLite

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// A peer this node has successfully connected to before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownPeer {
    pub username: String,
    pub address: String,
    pub last_seen: u64,
}

/// Durable address book of known peers, used to re-dial them at startup.
///
/// The store never feeds the live registry directly; it only drives fresh
/// connection attempts.
pub struct PeerStore {
    db_path: PathBuf,
}

impl PeerStore {
    /// Open (creating if needed) the peer database under `base_dir`.
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).context("Failed to create peer store directory")?;

        let db_path = base_dir.join("peers.db");
        let store = Self { db_path };
        store.initialize_db()?;

        Ok(store)
    }

    fn get_connection(&self) -> Result<Connection> {
        Connection::open(&self.db_path).context("Failed to open peer database")
    }

    fn initialize_db(&self) -> Result<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS known_peers (
                username TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                last_seen INTEGER NOT NULL
            )",
            [],
        )
        .context("Failed to create known_peers table")?;

        Ok(())
    }

    /// Record (or refresh) a peer after a successful outbound connect.
    pub fn remember(&self, username: &str, address: &str) -> Result<()> {
        let conn = self.get_connection()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        conn.execute(
            "INSERT INTO known_peers (username, address, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO UPDATE SET address = ?2, last_seen = ?3",
            params![username, address, now],
        )
        .context("Failed to store peer")?;

        Ok(())
    }

    /// Drop a peer from the address book. Returns whether it was present.
    pub fn forget(&self, username: &str) -> Result<bool> {
        let conn = self.get_connection()?;
        let removed = conn
            .execute(
                "DELETE FROM known_peers WHERE username = ?1",
                params![username],
            )
            .context("Failed to delete peer")?;

        Ok(removed > 0)
    }

    /// All known peers, most recently seen first.
    pub fn list(&self) -> Result<Vec<KnownPeer>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(
            "SELECT username, address, last_seen FROM known_peers ORDER BY last_seen DESC",
        )?;

        let peers = stmt
            .query_map([], |row| {
                Ok(KnownPeer {
                    username: row.get(0)?,
                    address: row.get(1)?,
                    last_seen: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to read peers")?;

        Ok(peers)
    }
}
