// Fingerprints of messages this node has already processed

use std::collections::HashSet;
use tokio::sync::Mutex;

/// Records every ciphertext frame already accepted by message intake, so a
/// frame that reaches us twice (from one peer or from two) is processed once.
///
/// The set grows for the lifetime of the process and is never pruned.
pub struct SeenStore {
    seen: Mutex<HashSet<String>>,
}

impl SeenStore {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Record a fingerprint. Returns false if it was already present.
    ///
    /// The membership check and the insert happen under one lock, so two
    /// receive loops handing in the identical frame cannot both see it as
    /// new.
    pub async fn insert(&self, fingerprint: &str) -> bool {
        let mut seen = self.seen.lock().await;
        seen.insert(fingerprint.to_string())
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}

impl Default for SeenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_insert_is_rejected() {
        let store = SeenStore::new();

        assert!(store.insert("frame-a").await);
        assert!(!store.insert("frame-a").await);
        assert!(store.insert("frame-b").await);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_admit_exactly_one() {
        let store = Arc::new(SeenStore::new());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.insert("same-frame").await },
            ));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 1);
        assert_eq!(store.len().await, 1);
    }
}
