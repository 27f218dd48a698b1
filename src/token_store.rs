use std::collections::HashMap;
use std::path::PathBuf;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use tokio::sync::Mutex;

/// Persistent map from `"{peer_id}|{host}"` to an opaque signaling credential token.
///
/// Read-through: the backing file is only read on first access (`get_token` or
/// `discard_token`), not at construction. Write-through: every mutation is persisted
/// immediately. A read error on startup is logged and the store proceeds as if the
/// file were empty (I3: the token still survives restarts as long as the file is
/// intact; a corrupt file simply means fresh tokens will be minted and overwrite it).
pub struct TokenStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    loaded: bool,
    map: HashMap<String, String>,
}

impl TokenStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Returns the token for `(peer_id, host)`, minting and persisting a fresh
    /// ≥128-bit URL-safe token if none exists yet.
    pub async fn get_token(&self, peer_id: &str, host: &str) -> String {
        let key = Self::key(peer_id, host);
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await;
        if let Some(token) = inner.map.get(&key) {
            return token.clone();
        }
        let token = generate_token();
        inner.map.insert(key, token.clone());
        self.persist(&inner.map).await;
        token
    }

    /// Removes the token for `(peer_id, host)`, persisting the removal if it was
    /// present. Called when the signaling server rejects the id the token was
    /// issued for (`unavailable-id`).
    pub async fn discard_token(&self, peer_id: &str, host: &str) {
        let key = Self::key(peer_id, host);
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await;
        if inner.map.remove(&key).is_some() {
            self.persist(&inner.map).await;
        }
    }

    fn key(peer_id: &str, host: &str) -> String {
        format!("{peer_id}|{host}")
    }

    async fn ensure_loaded(&self, inner: &mut Inner) {
        if inner.loaded {
            return;
        }
        inner.loaded = true;
        let Some(path) = &self.path else {
            return;
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(map) => inner.map = map,
                Err(e) => {
                    log::error!("token store {path:?} has invalid json, treating as empty: {e}")
                }
            },
            Err(e) => {
                log::warn!("could not read token store {path:?} (treating as empty): {e}")
            }
        }
    }

    async fn persist(&self, map: &HashMap<String, String>) {
        let Some(path) = &self.path else {
            return;
        };
        match serde_json::to_vec_pretty(map) {
            Ok(bytes) => {
                if let Some(parent) = path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    log::error!("failed to write token store {path:?}: {e}");
                }
            }
            Err(e) => log::error!("failed to serialize token store: {e}"),
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 18]; // 144 bits of entropy, comfortably over the 128-bit floor
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mints_and_persists_a_token() {
        let dir = tempdir();
        let path = dir.join("tokens.json");
        let store = TokenStore::new(Some(path.clone()));
        let token = store.get_token("go-relay-0", "localhost").await;
        assert!(token.len() >= 20);

        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(on_disk.contains("go-relay-0|localhost"));
        assert!(on_disk.contains(&token));
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn get_token_is_idempotent_across_restarts() {
        let dir = tempdir();
        let path = dir.join("tokens.json");
        let first = TokenStore::new(Some(path.clone()));
        let token_a = first.get_token("p", "h").await;

        let second = TokenStore::new(Some(path.clone()));
        let token_b = second.get_token("p", "h").await;
        assert_eq!(token_a, token_b);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn discard_then_get_mints_a_new_token() {
        let dir = tempdir();
        let path = dir.join("tokens.json");
        let store = TokenStore::new(Some(path));
        let first = store.get_token("p", "h").await;
        store.discard_token("p", "h").await;
        let second = store.get_token("p", "h").await;
        assert_ne!(first, second);
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn missing_file_is_treated_as_empty_not_an_error() {
        let dir = tempdir();
        let path = dir.join("does-not-exist").join("tokens.json");
        let store = TokenStore::new(Some(path));
        let token = store.get_token("p", "h").await;
        assert!(!token.is_empty());
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("webrtc-relay-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
