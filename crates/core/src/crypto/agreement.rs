//! Ephemeral X25519 agreement and HKDF session key derivation.
//!
//! The initiating side mixes a one-shot ephemeral secret with the peer's
//! published identity key; the receiving side recomputes the same shared
//! secret from its identity secret and the ephemeral public carried on the
//! envelope. Both feed HKDF-SHA256 salted with the key id, so a key id
//! names exactly one symmetric key.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use uuid::Uuid;
use x25519_dalek::EphemeralSecret;
use x25519_dalek::PublicKey;
use x25519_dalek::SharedSecret;
use zeroize::Zeroizing;

use crate::crypto::IdentityKeypair;
use crate::crypto::IdentityPublic;
use crate::crypto::SessionKey;
use crate::error::Error;
use crate::error::Result;

const SESSION_KEY_INFO: &[u8] = b"backchannel-session-key-v1";

fn expand(shared: SharedSecret, key_id: Uuid) -> Result<SessionKey> {
    let hk = Hkdf::<Sha256>::new(Some(key_id.as_bytes()), shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(SESSION_KEY_INFO, okm.as_mut())
        .map_err(|_| Error::KeyDerivation)?;
    Ok(SessionKey::from_bytes(*okm))
}

/// Derive a fresh outbound session key for `peer`.
///
/// Returns the key together with the ephemeral public bytes the remote
/// side needs to recompute it.
pub fn derive_for_peer(peer: &IdentityPublic, key_id: Uuid) -> Result<(SessionKey, [u8; 32])> {
    let eph = EphemeralSecret::random_from_rng(OsRng);
    let eph_public = PublicKey::from(&eph).to_bytes();
    let shared = eph.diffie_hellman(&PublicKey::from(peer));
    Ok((expand(shared, key_id)?, eph_public))
}

/// Recompute the session key a remote sender derived towards us.
pub fn derive_from_ephemeral(
    identity: &IdentityKeypair,
    eph_public: &[u8; 32],
    key_id: Uuid,
) -> Result<SessionKey> {
    let shared = identity
        .secret()
        .diffie_hellman(&PublicKey::from(*eph_public));
    expand(shared, key_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let receiver = IdentityKeypair::generate();
        let key_id = Uuid::new_v4();

        let (sender_key, eph_public) = derive_for_peer(&receiver.public(), key_id).unwrap();
        let receiver_key = derive_from_ephemeral(&receiver, &eph_public, key_id).unwrap();

        assert_eq!(sender_key.as_bytes(), receiver_key.as_bytes());
    }

    #[test]
    fn test_key_id_changes_derived_key() {
        let receiver = IdentityKeypair::generate();
        let (_, eph_public) = derive_for_peer(&receiver.public(), Uuid::new_v4()).unwrap();

        let a = derive_from_ephemeral(&receiver, &eph_public, Uuid::new_v4()).unwrap();
        let b = derive_from_ephemeral(&receiver, &eph_public, Uuid::new_v4()).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
