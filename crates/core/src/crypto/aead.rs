//! AES-256-GCM sealing of message payloads.

use aes_gcm::aead::Aead;
use aes_gcm::aead::KeyInit;
use aes_gcm::aead::Payload;
use aes_gcm::Aes256Gcm;
use aes_gcm::Nonce;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::SessionKey;
use crate::error::Error;
use crate::error::Result;

/// Length of the random nonce prepended to every sealed payload.
pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext` under `key`, binding `aad` into the auth tag.
pub fn seal(key: &SessionKey, plaintext: &[u8], aad: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| Error::Encryption)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload {
            msg: plaintext,
            aad,
        })
        .map_err(|_| Error::Encryption)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt and authenticate a sealed payload.
pub fn open(
    key: &SessionKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| Error::Decryption)?;

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload {
            msg: ciphertext,
            aad,
        })
        .map_err(|_| Error::Decryption)
}
