//! Message envelopes and their sealed payloads.
//!
//! An [`Envelope`] is what travels between peers and what the relay
//! stores: routing metadata in the clear, content sealed inside a
//! [`SealedPayload`]. Edits and deletions never mutate an envelope in
//! place; they produce a successor version under the same `message_id`.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::consts::ENCRYPTED_PLACEHOLDER;
use crate::crypto::aead::NONCE_LEN;
use crate::peer_id::PeerId;

/// Ciphertext plus everything the recipient needs to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// Id of the session key this payload was sealed under.
    pub key_id: Uuid,
    /// Sender-side ephemeral public bytes for stateless re-derivation.
    pub eph_public: [u8; 32],
    /// Random AES-GCM nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Sealed message content.
    pub ciphertext: Vec<u8>,
}

/// One stored or transmitted version of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Stable id shared by all versions of this message.
    pub message_id: Uuid,
    /// Author of the message.
    pub sender_id: PeerId,
    /// Addressed recipient of this copy.
    pub recipient_id: PeerId,
    /// Group conversation this copy belongs to, if any.
    pub group_id: Option<Uuid>,
    /// The sealed content.
    pub payload: SealedPayload,
    /// Creation time of the original version.
    pub created_at: DateTime<Utc>,
    /// Monotonic version counter, starting at 1.
    pub version: u32,
    /// Whether this version supersedes an earlier content.
    pub is_edited: bool,
    /// Whether the content has been retracted.
    pub is_deleted: bool,
    /// Whether the recipient's device has received it.
    pub is_delivered: bool,
    /// When the recipient read it, if they have.
    pub read_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// First version of a new message.
    pub fn new(
        sender_id: PeerId,
        recipient_id: PeerId,
        group_id: Option<Uuid>,
        payload: SealedPayload,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            group_id,
            payload,
            created_at: Utc::now(),
            version: 1,
            is_edited: false,
            is_deleted: false,
            is_delivered: false,
            read_at: None,
        }
    }

    /// Successor version carrying re-sealed replacement content.
    pub fn edited(&self, payload: SealedPayload) -> Self {
        Self {
            payload,
            version: self.version + 1,
            is_edited: true,
            ..self.clone()
        }
    }

    /// Successor version marking the message retracted.
    pub fn deleted(&self, payload: SealedPayload) -> Self {
        Self {
            payload,
            version: self.version + 1,
            is_deleted: true,
            ..self.clone()
        }
    }
}

/// A message as handed to the application, content opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedMessage {
    /// Stable message id.
    pub id: Uuid,
    /// Readable content, or a placeholder when decryption failed.
    pub content: String,
    /// Author of the message.
    pub sender_id: PeerId,
    /// Creation time of the original version.
    pub created_at: DateTime<Utc>,
    /// Whether the message travelled sealed. Always true for envelope
    /// sourced messages, placeholders included.
    pub is_encrypted: bool,
    /// Whether the content was edited after sending.
    pub is_edited: bool,
    /// Whether the message was retracted.
    pub is_deleted: bool,
    /// Whether delivery has been confirmed.
    pub is_delivered: bool,
}

impl DecryptedMessage {
    /// View of `envelope` with successfully opened `content`.
    pub fn from_envelope(envelope: &Envelope, content: String) -> Self {
        Self {
            id: envelope.message_id,
            content,
            sender_id: envelope.sender_id,
            created_at: envelope.created_at,
            is_encrypted: true,
            is_edited: envelope.is_edited,
            is_deleted: envelope.is_deleted,
            is_delivered: envelope.is_delivered,
        }
    }

    /// View of an envelope whose payload could not be opened.
    pub fn placeholder(envelope: &Envelope) -> Self {
        Self::from_envelope(envelope, ENCRYPTED_PLACEHOLDER.to_string())
    }
}

/// Plaintext send request from the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Content to seal and send.
    pub content: String,
    /// Peer the copy is addressed to.
    pub recipient_id: PeerId,
    /// Group conversation this copy belongs to, if any.
    pub group_id: Option<Uuid>,
}

/// Confirmation that a user read a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// The message that was read.
    pub message_id: Uuid,
    /// Who read it.
    pub user_id: PeerId,
    /// When they read it.
    pub read_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SealedPayload {
        SealedPayload {
            key_id: Uuid::new_v4(),
            eph_public: [1u8; 32],
            nonce: [2u8; NONCE_LEN],
            ciphertext: vec![3u8; 16],
        }
    }

    #[test]
    fn test_edited_keeps_identity_and_bumps_version() {
        let original = Envelope::new(PeerId::random(), PeerId::random(), None, payload());
        let edited = original.edited(payload());

        assert_eq!(edited.message_id, original.message_id);
        assert_eq!(edited.created_at, original.created_at);
        assert_eq!(edited.version, 2);
        assert!(edited.is_edited);
        assert!(!edited.is_deleted);
    }

    #[test]
    fn test_deleted_marks_retraction() {
        let original = Envelope::new(PeerId::random(), PeerId::random(), None, payload());
        let deleted = original.deleted(payload());

        assert_eq!(deleted.version, 2);
        assert!(deleted.is_deleted);
    }

    #[test]
    fn test_envelope_bincode_round_trip() {
        let envelope = Envelope::new(
            PeerId::random(),
            PeerId::random(),
            Some(Uuid::new_v4()),
            payload(),
        );
        let bytes = bincode::serialize(&envelope).unwrap();
        let decoded: Envelope = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }
}
