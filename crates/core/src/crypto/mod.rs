//! Identity and session key primitives.
//!
//! Every account holds a long-lived X25519 keypair. The public half is
//! published through a [`KeyStore`](crate::store::KeyStore) so that anyone
//! can seal messages to it. Per-peer symmetric keys are short-lived: they
//! are derived in [`agreement`] from an ephemeral exchange and rotated on a
//! schedule, so compromise of a current key does not expose past traffic.
//!
//! Secret material lives in [`SessionKey`] and is wiped on drop. It must
//! never be written to long-term storage or appear in log output.

use std::fmt;

use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;
use x25519_dalek::PublicKey;
use x25519_dalek::StaticSecret;
use zeroize::Zeroize;
use zeroize::ZeroizeOnDrop;

use crate::error::Result;

pub mod aead;
pub mod agreement;

/// A 256-bit symmetric session key shared with one peer.
///
/// Zeroed on drop. Intentionally has no `Serialize` impl and an opaque
/// `Debug` so the material cannot leak through storage or tracing.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(..)")
    }
}

/// Published X25519 public key of an account.
#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPublic([u8; 32]);

impl IdentityPublic {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for IdentityPublic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublic({}..)", hex::encode(&self.0[..4]))
    }
}

impl From<PublicKey> for IdentityPublic {
    fn from(pk: PublicKey) -> Self {
        Self(pk.to_bytes())
    }
}

impl From<&IdentityPublic> for PublicKey {
    fn from(pk: &IdentityPublic) -> Self {
        PublicKey::from(pk.0)
    }
}

impl From<[u8; 32]> for IdentityPublic {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// Long-lived X25519 identity of the local account.
#[derive(Clone)]
pub struct IdentityKeypair {
    secret: StaticSecret,
    public: IdentityPublic,
}

impl IdentityKeypair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Restore a keypair from raw secret bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    /// Restore a keypair from a hex-encoded secret, as kept in config files.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())?;
        let bytes: [u8; 32] = bytes.as_slice().try_into()?;
        Ok(Self::from_secret_bytes(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = IdentityPublic::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    /// The shareable half of this identity.
    pub fn public(&self) -> IdentityPublic {
        self.public
    }

    /// Hex encoding of the secret, for writing identity files. The string
    /// unlocks the whole account; handle it like the file it goes into.
    pub fn dump_secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_hex_round_trip() {
        let kp = IdentityKeypair::generate();
        let restored = IdentityKeypair::from_secret_hex(&kp.dump_secret_hex()).unwrap();
        assert_eq!(kp.public(), restored.public());
    }

    #[test]
    fn test_keypair_rejects_short_secret() {
        assert!(IdentityKeypair::from_secret_hex("deadbeef").is_err());
    }

    #[test]
    fn test_session_key_debug_is_opaque() {
        let key = SessionKey::from_bytes([7u8; 32]);
        assert_eq!(format!("{key:?}"), "SessionKey(..)");
    }
}
