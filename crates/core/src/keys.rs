//! Cached lookup of published identity keys.

use std::sync::Arc;

use dashmap::DashMap;

use crate::crypto::IdentityPublic;
use crate::error::Error;
use crate::error::Result;
use crate::peer_id::PeerId;
use crate::store::KeyStore;

/// Read-through cache in front of a [`KeyStore`].
///
/// Identity keys are long-lived, so a fetched key is kept for the life of
/// the process.
pub struct KeyDirectory {
    store: Arc<dyn KeyStore>,
    cache: DashMap<PeerId, IdentityPublic>,
}

impl KeyDirectory {
    /// New directory backed by `store`.
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Published key of `peer`, from cache or the backing store.
    pub async fn public_key_of(&self, peer: PeerId) -> Result<IdentityPublic> {
        if let Some(key) = self.cache.get(&peer) {
            return Ok(*key.value());
        }
        let key = self
            .store
            .fetch(peer)
            .await?
            .ok_or(Error::KeyNotFound(peer))?;
        self.cache.insert(peer, key);
        Ok(key)
    }

    /// Publish `key` as the identity of `peer`.
    pub async fn publish(&self, peer: PeerId, key: IdentityPublic) -> Result<()> {
        self.store.publish(peer, key).await?;
        self.cache.insert(peer, key);
        Ok(())
    }

    /// Seed the cache without touching the backing store.
    pub fn insert_cached(&self, peer: PeerId, key: IdentityPublic) {
        self.cache.insert(peer, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKeypair;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_unknown_peer_is_an_error() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()));
        let peer = PeerId::random();
        assert!(matches!(
            directory.public_key_of(peer).await,
            Err(Error::KeyNotFound(p)) if p == peer
        ));
    }

    #[tokio::test]
    async fn test_publish_then_lookup() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()));
        let peer = PeerId::random();
        let key = IdentityKeypair::generate().public();

        directory.publish(peer, key).await.unwrap();
        assert_eq!(directory.public_key_of(peer).await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_cached_key_skips_the_store() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()));
        let peer = PeerId::random();
        let key = IdentityKeypair::generate().public();

        directory.insert_cached(peer, key);
        assert_eq!(directory.public_key_of(peer).await.unwrap(), key);
    }
}
