//! Sealing and opening of message content.
//!
//! [`MessageCipher`] is the only place plaintext and key material meet.
//! Sealing uses the current session key towards the recipient. Opening
//! first consults the key manager; only when the key id is unknown there
//! does it fall back to re-deriving from the ephemeral bytes on the
//! envelope, and it adopts that key only after the ciphertext
//! authenticated. An id the manager reports expired is never re-derived.

use std::sync::Arc;

use crate::crypto::aead;
use crate::crypto::agreement;
use crate::error::Error;
use crate::error::Result;
use crate::message::SealedPayload;
use crate::peer_id::PeerId;
use crate::session::SessionKeyManager;

/// Seals outbound and opens inbound payloads for the local account.
pub struct MessageCipher {
    sessions: Arc<SessionKeyManager>,
}

impl MessageCipher {
    /// New cipher over `sessions`.
    pub fn new(sessions: Arc<SessionKeyManager>) -> Self {
        Self { sessions }
    }

    /// Seal `plaintext` for `peer` under the current session key.
    ///
    /// The key id doubles as associated data, so a payload cannot be
    /// replayed under a different key id.
    pub async fn encrypt_for(&self, peer: PeerId, plaintext: &str) -> Result<SealedPayload> {
        let ctx = self.sessions.sealing_context(peer).await?;
        let (nonce, ciphertext) =
            aead::seal(&ctx.key, plaintext.as_bytes(), ctx.key_id.as_bytes())?;
        Ok(SealedPayload {
            key_id: ctx.key_id,
            eph_public: ctx.eph_public,
            nonce,
            ciphertext,
        })
    }

    /// Open a payload exchanged with `peer`.
    ///
    /// `peer` is the counterpart of the conversation: the sender for
    /// received envelopes, the recipient when re-reading our own stored
    /// copies.
    pub fn open_from(&self, peer: PeerId, payload: &SealedPayload) -> Result<String> {
        if let Some(key) = self.sessions.open_key(peer, payload.key_id)? {
            let plain = aead::open(
                &key,
                &payload.nonce,
                &payload.ciphertext,
                payload.key_id.as_bytes(),
            )?;
            return String::from_utf8(plain).map_err(|_| Error::Decryption);
        }

        let key = agreement::derive_from_ephemeral(
            self.sessions.identity(),
            &payload.eph_public,
            payload.key_id,
        )?;
        let plain = aead::open(
            &key,
            &payload.nonce,
            &payload.ciphertext,
            payload.key_id.as_bytes(),
        )?;
        self.sessions.adopt_inbound(peer, payload.key_id, key);
        String::from_utf8(plain).map_err(|_| Error::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::crypto::IdentityKeypair;
    use crate::keys::KeyDirectory;
    use crate::session::SessionPolicy;
    use crate::store::MemoryStore;

    struct Endpoint {
        id: PeerId,
        sessions: Arc<SessionKeyManager>,
        cipher: MessageCipher,
    }

    async fn endpoints(policy: SessionPolicy) -> (Endpoint, Endpoint) {
        let store = Arc::new(MemoryStore::new());
        let mut out = Vec::new();
        for _ in 0..2 {
            let id = PeerId::random();
            let identity = Arc::new(IdentityKeypair::generate());
            let directory = Arc::new(KeyDirectory::new(store.clone()));
            directory.publish(id, identity.public()).await.unwrap();
            let sessions = Arc::new(SessionKeyManager::new(identity, directory, policy));
            out.push(Endpoint {
                id,
                sessions: sessions.clone(),
                cipher: MessageCipher::new(sessions),
            });
        }
        let b = out.pop().unwrap();
        let a = out.pop().unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_first_contact_round_trip() {
        let (a, b) = endpoints(SessionPolicy::default()).await;

        let payload = a.cipher.encrypt_for(b.id, "hello over there").await.unwrap();
        // B has no session state yet; this exercises the stateless path.
        assert_eq!(b.cipher.open_from(a.id, &payload).unwrap(), "hello over there");
        // And now the adopted key answers directly.
        assert!(b.sessions.open_key(a.id, payload.key_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sender_reopens_own_copy() {
        let (a, b) = endpoints(SessionPolicy::default()).await;

        let payload = a.cipher.encrypt_for(b.id, "note to both").await.unwrap();
        assert_eq!(a.cipher.open_from(b.id, &payload).unwrap(), "note to both");
    }

    #[tokio::test]
    async fn test_tampered_payload_is_rejected() {
        let (a, b) = endpoints(SessionPolicy::default()).await;

        let mut payload = a.cipher.encrypt_for(b.id, "original").await.unwrap();
        payload.ciphertext[0] ^= 0x01;
        assert!(matches!(
            b.cipher.open_from(a.id, &payload),
            Err(Error::Decryption)
        ));
        // Nothing was adopted from the failed open.
        assert!(b.sessions.open_key(a.id, payload.key_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_key_refuses_rederivation() {
        let policy = SessionPolicy {
            lifetime: Duration::from_secs(3600),
            rotation_grace: Duration::from_millis(50),
            maintenance_interval: Duration::from_secs(3600),
        };
        let (a, b) = endpoints(policy).await;

        let first = a.cipher.encrypt_for(b.id, "one").await.unwrap();
        b.cipher.open_from(a.id, &first).unwrap();

        a.sessions.rotate(b.id).await.unwrap();
        let second = a.cipher.encrypt_for(b.id, "two").await.unwrap();
        b.cipher.open_from(a.id, &second).unwrap();

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(matches!(
            b.cipher.open_from(a.id, &first),
            Err(Error::SessionKeyExpired(id)) if id == first.key_id
        ));
    }
}
