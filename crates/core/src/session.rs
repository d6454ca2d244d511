//! Forward-secret session key lifecycle.
//!
//! Outbound keys are derived per peer and rotated once their lifetime
//! passes. A rotated-out key is kept only for a short grace window so
//! envelopes sealed just before the rotation still open, then its
//! material is dropped. After that, a key id is refused outright:
//! [`SessionKeyManager::open_key`] reports it expired instead of letting
//! anyone re-derive old traffic keys. Inbound keys learned from remote
//! envelopes follow the same retire-then-forget path.
//!
//! Key material lives only in this process. It is never handed to a
//! store and never logged; log lines carry key ids alone.

use std::mem;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::consts::DEFAULT_KEY_MAINTENANCE_INTERVAL_SECS;
use crate::consts::DEFAULT_ROTATION_GRACE_SECS;
use crate::consts::DEFAULT_SESSION_LIFETIME_SECS;
use crate::crypto::agreement;
use crate::crypto::IdentityKeypair;
use crate::crypto::SessionKey;
use crate::error::Error;
use crate::error::Result;
use crate::keys::KeyDirectory;
use crate::peer_id::PeerId;

/// Rotation timing of session keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// How long an outbound key stays current.
    pub lifetime: Duration,
    /// How long a retired key still opens inbound envelopes.
    pub rotation_grace: Duration,
    /// How often the maintenance task runs.
    pub maintenance_interval: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(DEFAULT_SESSION_LIFETIME_SECS),
            rotation_grace: Duration::from_secs(DEFAULT_ROTATION_GRACE_SECS),
            maintenance_interval: Duration::from_secs(DEFAULT_KEY_MAINTENANCE_INTERVAL_SECS),
        }
    }
}

/// Lifecycle state of an outbound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The current key is valid for sealing.
    Active,
    /// The key has expired and a replacement is not established yet.
    Rotating,
}

struct RetiredKey {
    key_id: Uuid,
    key: SessionKey,
    retired_at: Instant,
}

struct PeerSession {
    current_key_id: Uuid,
    key: SessionKey,
    eph_public: [u8; 32],
    expires_at: Instant,
    previous: Option<RetiredKey>,
    state: SessionState,
}

struct InboundKeys {
    current_key_id: Uuid,
    key: SessionKey,
    previous: Option<RetiredKey>,
}

/// Everything needed to seal one payload towards a peer.
pub struct SealingContext {
    /// Id of the key, carried on the envelope.
    pub key_id: Uuid,
    /// Ephemeral public bytes the recipient re-derives from.
    pub eph_public: [u8; 32],
    pub(crate) key: SessionKey,
}

/// Tracks one outbound session and one inbound key set per peer.
pub struct SessionKeyManager {
    identity: Arc<IdentityKeypair>,
    directory: Arc<KeyDirectory>,
    policy: SessionPolicy,
    sessions: DashMap<PeerId, PeerSession>,
    inbound: DashMap<PeerId, InboundKeys>,
}

impl SessionKeyManager {
    /// New manager sealing as `identity`.
    pub fn new(
        identity: Arc<IdentityKeypair>,
        directory: Arc<KeyDirectory>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            identity,
            directory,
            policy,
            sessions: DashMap::new(),
            inbound: DashMap::new(),
        }
    }

    /// The local identity this manager derives keys from.
    pub fn identity(&self) -> &Arc<IdentityKeypair> {
        &self.identity
    }

    /// The configured rotation timing.
    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Current sealing material for `peer`, rotating first if the
    /// session is missing or expired.
    pub async fn sealing_context(&self, peer: PeerId) -> Result<SealingContext> {
        if let Some(mut session) = self.sessions.get_mut(&peer) {
            if Instant::now() < session.expires_at && session.state == SessionState::Active {
                return Ok(SealingContext {
                    key_id: session.current_key_id,
                    eph_public: session.eph_public,
                    key: session.key.clone(),
                });
            }
            session.state = SessionState::Rotating;
        }
        self.rotate_session(peer).await
    }

    /// Force a rotation for `peer` and return the new key id.
    pub async fn rotate(&self, peer: PeerId) -> Result<Uuid> {
        Ok(self.rotate_session(peer).await?.key_id)
    }

    async fn rotate_session(&self, peer: PeerId) -> Result<SealingContext> {
        // Resolve the peer key before touching the map so no shard lock
        // is held across an await point.
        let peer_key = self.directory.public_key_of(peer).await?;
        let key_id = Uuid::new_v4();
        let (key, eph_public) = agreement::derive_for_peer(&peer_key, key_id)?;

        let now = Instant::now();
        let expires_at = now + self.policy.lifetime;
        match self.sessions.entry(peer) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                let old_key = mem::replace(&mut session.key, key.clone());
                let old_id = mem::replace(&mut session.current_key_id, key_id);
                session.previous = Some(RetiredKey {
                    key_id: old_id,
                    key: old_key,
                    retired_at: now,
                });
                session.eph_public = eph_public;
                session.expires_at = expires_at;
                session.state = SessionState::Active;
            }
            Entry::Vacant(entry) => {
                entry.insert(PeerSession {
                    current_key_id: key_id,
                    key: key.clone(),
                    eph_public,
                    expires_at,
                    previous: None,
                    state: SessionState::Active,
                });
            }
        }

        tracing::debug!("Rotated session key for peer {peer}, new key id {key_id}");
        Ok(SealingContext {
            key_id,
            eph_public,
            key,
        })
    }

    /// Look up the key behind `key_id` for traffic with `peer`.
    ///
    /// `Ok(None)` means the id is unknown here and the caller may fall
    /// back to stateless re-derivation. A key retired longer ago than the
    /// grace window is purged and reported expired.
    pub fn open_key(&self, peer: PeerId, key_id: Uuid) -> Result<Option<SessionKey>> {
        let grace = self.policy.rotation_grace;

        if let Some(mut session) = self.sessions.get_mut(&peer) {
            if session.current_key_id == key_id {
                return Ok(Some(session.key.clone()));
            }
            if let Some(prev) = &session.previous {
                if prev.key_id == key_id {
                    if prev.retired_at.elapsed() <= grace {
                        return Ok(Some(prev.key.clone()));
                    }
                    session.previous = None;
                    return Err(Error::SessionKeyExpired(key_id));
                }
            }
        }

        if let Some(mut inbound) = self.inbound.get_mut(&peer) {
            if inbound.current_key_id == key_id {
                return Ok(Some(inbound.key.clone()));
            }
            if let Some(prev) = &inbound.previous {
                if prev.key_id == key_id {
                    if prev.retired_at.elapsed() <= grace {
                        return Ok(Some(prev.key.clone()));
                    }
                    inbound.previous = None;
                    return Err(Error::SessionKeyExpired(key_id));
                }
            }
        }

        Ok(None)
    }

    /// Remember a key re-derived from a remote envelope, retiring the
    /// previously adopted one.
    pub fn adopt_inbound(&self, peer: PeerId, key_id: Uuid, key: SessionKey) {
        match self.inbound.entry(peer) {
            Entry::Occupied(mut entry) => {
                let inbound = entry.get_mut();
                if inbound.current_key_id == key_id {
                    return;
                }
                let old_key = mem::replace(&mut inbound.key, key);
                let old_id = mem::replace(&mut inbound.current_key_id, key_id);
                inbound.previous = Some(RetiredKey {
                    key_id: old_id,
                    key: old_key,
                    retired_at: Instant::now(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(InboundKeys {
                    current_key_id: key_id,
                    key,
                    previous: None,
                });
            }
        }
    }

    /// Rotate every expired session and drop retired keys past their
    /// grace window.
    pub async fn maintain(&self) {
        let now = Instant::now();
        let expired: Vec<PeerId> = self
            .sessions
            .iter()
            .filter(|entry| now >= entry.value().expires_at)
            .map(|entry| *entry.key())
            .collect();

        for peer in expired {
            if let Err(e) = self.rotate_session(peer).await {
                tracing::warn!("Failed to rotate session key for peer {peer}: {e}");
            }
        }

        let grace = self.policy.rotation_grace;
        let past_grace = |prev: &Option<RetiredKey>| {
            prev.as_ref().map_or(false, |p| p.retired_at.elapsed() > grace)
        };

        for mut entry in self.sessions.iter_mut() {
            if past_grace(&entry.previous) {
                entry.previous = None;
            }
        }
        for mut entry in self.inbound.iter_mut() {
            if past_grace(&entry.previous) {
                entry.previous = None;
            }
        }
    }

    /// Lifecycle state of the outbound session with `peer`, if any.
    pub fn state_of(&self, peer: PeerId) -> Option<SessionState> {
        self.sessions.get(&peer).map(|s| s.state)
    }

    /// Forget all key material shared with `peer`.
    pub fn remove(&self, peer: PeerId) {
        self.sessions.remove(&peer);
        self.inbound.remove(&peer);
    }

    /// Forget all key material for every peer.
    pub fn clear(&self) {
        self.sessions.clear();
        self.inbound.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tiny_policy() -> SessionPolicy {
        SessionPolicy {
            lifetime: Duration::from_millis(50),
            rotation_grace: Duration::from_millis(80),
            maintenance_interval: Duration::from_millis(50),
        }
    }

    fn manager_with_peer(policy: SessionPolicy) -> (SessionKeyManager, PeerId) {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()));
        let peer = PeerId::random();
        directory.insert_cached(peer, IdentityKeypair::generate().public());
        let manager = SessionKeyManager::new(
            Arc::new(IdentityKeypair::generate()),
            Arc::new(directory),
            policy,
        );
        (manager, peer)
    }

    #[tokio::test]
    async fn test_first_use_establishes_a_session() {
        let (manager, peer) = manager_with_peer(SessionPolicy::default());
        assert!(manager.state_of(peer).is_none());

        let ctx = manager.sealing_context(peer).await.unwrap();
        assert_eq!(manager.state_of(peer), Some(SessionState::Active));

        let again = manager.sealing_context(peer).await.unwrap();
        assert_eq!(ctx.key_id, again.key_id);
    }

    #[tokio::test]
    async fn test_unknown_peer_key_fails_derivation() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()));
        let manager = SessionKeyManager::new(
            Arc::new(IdentityKeypair::generate()),
            Arc::new(directory),
            SessionPolicy::default(),
        );
        assert!(matches!(
            manager.sealing_context(PeerId::random()).await,
            Err(Error::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retired_key_opens_within_grace_then_expires() {
        let (manager, peer) = manager_with_peer(tiny_policy());

        let old_id = manager.sealing_context(peer).await.unwrap().key_id;
        let new_id = manager.rotate(peer).await.unwrap();
        assert_ne!(old_id, new_id);

        assert!(manager.open_key(peer, old_id).unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            manager.open_key(peer, old_id),
            Err(Error::SessionKeyExpired(id)) if id == old_id
        ));
        // The material is gone; the id is no longer even recognized.
        assert!(manager.open_key(peer, old_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_maintain_rotates_expired_sessions() {
        let (manager, peer) = manager_with_peer(tiny_policy());

        let old_id = manager.sealing_context(peer).await.unwrap().key_id;
        tokio::time::sleep(Duration::from_millis(60)).await;

        manager.maintain().await;
        assert_eq!(manager.state_of(peer), Some(SessionState::Active));

        let current = manager.sealing_context(peer).await.unwrap();
        assert_ne!(current.key_id, old_id);
        // The superseded key still opens until its grace passes.
        assert!(manager.open_key(peer, old_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_adopt_inbound_retires_previous() {
        let (manager, peer) = manager_with_peer(tiny_policy());

        let first = Uuid::new_v4();
        manager.adopt_inbound(peer, first, SessionKey::from_bytes([1u8; 32]));
        manager.adopt_inbound(peer, first, SessionKey::from_bytes([1u8; 32]));
        let second = Uuid::new_v4();
        manager.adopt_inbound(peer, second, SessionKey::from_bytes([2u8; 32]));

        assert!(manager.open_key(peer, second).unwrap().is_some());
        assert!(manager.open_key(peer, first).unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.open_key(peer, first).is_err());
    }

    #[tokio::test]
    async fn test_remove_forgets_all_material() {
        let (manager, peer) = manager_with_peer(SessionPolicy::default());
        let key_id = manager.sealing_context(peer).await.unwrap().key_id;

        manager.remove(peer);
        assert!(manager.state_of(peer).is_none());
        assert!(manager.open_key(peer, key_id).unwrap().is_none());
    }
}
