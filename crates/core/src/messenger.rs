//! Message orchestration.
//!
//! [Messenger] ties the layers together: it dials peers on demand, seals
//! content for the recipient, prefers the direct data channel and falls
//! back to the relay store, and turns inbound envelopes back into
//! [DecryptedMessage] views for subscribers.
//!
//! Direct delivery leaves no trace in the relay. Only messages that took
//! the fallback path are persisted, and only those can be fetched, edited
//! or retracted later.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::encryption::MessageCipher;
use crate::error::Error;
use crate::error::Result;
use crate::message::DecryptedMessage;
use crate::message::Envelope;
use crate::message::OutgoingMessage;
use crate::message::ReadReceipt;
use crate::peer_id::PeerId;
use crate::peers::PeerManager;
use crate::presence::PresenceService;
use crate::store::MessageStore;
use crate::store::StoreEvent;

const INBOUND_CHANNEL_CAPACITY: usize = 128;

/// How a message left the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Went over the open data channel of the recipient.
    Direct,
    /// Sealed into the relay store for later pickup.
    Relayed,
}

/// Send and receive pipeline of one local peer.
pub struct Messenger {
    local_id: PeerId,
    peers: Arc<PeerManager>,
    cipher: Arc<MessageCipher>,
    store: Arc<dyn MessageStore>,
    presence: Arc<PresenceService>,
    inbound_tx: broadcast::Sender<DecryptedMessage>,
}

impl Messenger {
    /// Creates new instance of [Messenger].
    pub fn new(
        peers: Arc<PeerManager>,
        cipher: Arc<MessageCipher>,
        store: Arc<dyn MessageStore>,
        presence: Arc<PresenceService>,
    ) -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);

        Self {
            local_id: peers.local_id(),
            peers,
            cipher,
            store,
            presence,
            inbound_tx,
        }
    }

    /// Get id of self.
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// The connection manager backing direct delivery.
    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.peers
    }

    /// The typing, read receipt and status side channel.
    pub fn presence(&self) -> &Arc<PresenceService> {
        &self.presence
    }

    /// Opened inbound messages, both direct and relayed.
    pub fn subscribe(&self) -> broadcast::Receiver<DecryptedMessage> {
        self.inbound_tx.subscribe()
    }

    /// Send a message, preferring the direct channel.
    ///
    /// A direct message dials the recipient first if no connection exists;
    /// dialing errors only demote the message to the relay path. The relay
    /// insert is the last line of delivery, so its errors do propagate.
    /// Group messages always go through the relay.
    pub async fn send_message(&self, outgoing: OutgoingMessage) -> Result<Delivery> {
        let recipient = outgoing.recipient_id;

        if outgoing.group_id.is_none() && !self.peers.is_connected(recipient) {
            if let Err(e) = self.peers.connect(recipient).await {
                tracing::debug!("Dialing {recipient} unavailable, using relay: {e}");
            }
        }

        let payload = self.cipher.encrypt_for(recipient, &outgoing.content).await?;
        let envelope = Envelope::new(self.local_id, recipient, outgoing.group_id, payload);

        if outgoing.group_id.is_none() {
            let frame = bincode::serialize(&envelope).map_err(Error::BincodeSerialize)?;
            if self.peers.send_direct(recipient, Bytes::from(frame)).await {
                return Ok(Delivery::Direct);
            }
        }

        self.store.insert(&envelope).await?;
        Ok(Delivery::Relayed)
    }

    /// Open the content of an envelope the local peer sent or received.
    pub fn decrypt_envelope(&self, envelope: &Envelope) -> Result<String> {
        let counterpart = if envelope.sender_id == self.local_id {
            envelope.recipient_id
        } else {
            envelope.sender_id
        };

        self.cipher.open_from(counterpart, &envelope.payload)
    }

    /// Envelope to view. Decryption failures degrade to the placeholder
    /// text so one bad envelope never poisons a batch.
    fn to_view(&self, envelope: &Envelope) -> DecryptedMessage {
        match self.decrypt_envelope(envelope) {
            Ok(content) => DecryptedMessage::from_envelope(envelope, content),
            Err(e) => {
                tracing::warn!("Failed on decrypt message {}: {e}", envelope.message_id);
                DecryptedMessage::placeholder(envelope)
            }
        }
    }

    /// The most recent `limit` relayed messages exchanged with `peer`,
    /// oldest first. Inbound messages not yet flagged as delivered are
    /// flagged as a side effect.
    pub async fn history(&self, peer: PeerId, limit: usize) -> Result<Vec<DecryptedMessage>> {
        let mut envelopes = self.store.between(self.local_id, peer, limit).await?;
        envelopes.reverse();

        self.flag_delivered(&envelopes).await;

        Ok(envelopes.iter().map(|env| self.to_view(env)).collect())
    }

    /// The most recent `limit` messages of a group that involve the local
    /// peer, oldest first.
    pub async fn group_history(
        &self,
        group_id: Uuid,
        limit: usize,
    ) -> Result<Vec<DecryptedMessage>> {
        let mut envelopes = self.store.for_group(group_id, self.local_id, limit).await?;
        envelopes.reverse();

        self.flag_delivered(&envelopes).await;

        Ok(envelopes.iter().map(|env| self.to_view(env)).collect())
    }

    async fn flag_delivered(&self, envelopes: &[Envelope]) {
        let undelivered: Vec<Uuid> = envelopes
            .iter()
            .filter(|env| env.recipient_id == self.local_id && !env.is_delivered)
            .map(|env| env.message_id)
            .collect();

        if undelivered.is_empty() {
            return;
        }

        if let Err(e) = self.store.mark_delivered(&undelivered).await {
            tracing::warn!("Failed on flag messages delivered: {e}");
        }
    }

    /// Replace the content of a relayed message with a re-sealed successor
    /// version. The envelope itself is never mutated in place.
    pub async fn edit_message(&self, message_id: Uuid, content: &str) -> Result<()> {
        let envelope = self.require_message(message_id).await?;

        let counterpart = if envelope.sender_id == self.local_id {
            envelope.recipient_id
        } else {
            envelope.sender_id
        };
        let payload = self.cipher.encrypt_for(counterpart, content).await?;

        self.store.append_version(&envelope.edited(payload)).await
    }

    /// Retract a relayed message by appending a version that is flagged
    /// deleted and carries sealed empty content.
    pub async fn delete_message(&self, message_id: Uuid) -> Result<()> {
        let envelope = self.require_message(message_id).await?;

        let counterpart = if envelope.sender_id == self.local_id {
            envelope.recipient_id
        } else {
            envelope.sender_id
        };
        let payload = self.cipher.encrypt_for(counterpart, "").await?;

        self.store.append_version(&envelope.deleted(payload)).await
    }

    async fn require_message(&self, message_id: Uuid) -> Result<Envelope> {
        self.store
            .by_id(message_id)
            .await?
            .ok_or_else(|| Error::StoreOperation(format!("no stored message {message_id}")))
    }

    /// Flag messages from `peer` as read and broadcast the receipts.
    /// Both steps are best effort.
    pub async fn mark_read(&self, peer: PeerId, message_ids: Vec<Uuid>) {
        if message_ids.is_empty() {
            return;
        }
        let read_at = Utc::now();

        if let Err(e) = self.store.mark_read(&message_ids, read_at).await {
            tracing::warn!("Failed on flag messages read: {e}");
        }

        let receipts = message_ids
            .into_iter()
            .map(|message_id| ReadReceipt {
                message_id,
                user_id: self.local_id,
                read_at,
            })
            .collect();
        if let Err(e) = self.presence.send_read_receipts(peer, receipts).await {
            tracing::warn!("Failed on broadcast read receipts: {e}");
        }
    }

    /// Apply one frame that arrived over a direct data channel.
    pub async fn handle_direct_frame(&self, peer: PeerId, frame: &[u8]) -> Result<()> {
        let envelope: Envelope =
            bincode::deserialize(frame).map_err(Error::BincodeDeserialize)?;

        if envelope.sender_id != peer {
            tracing::warn!(
                "Dropping direct frame from {peer} claiming sender {}",
                envelope.sender_id
            );
            return Ok(());
        }
        if envelope.group_id.is_none() && envelope.recipient_id != self.local_id {
            tracing::warn!("Dropping direct frame from {peer} not addressed to the local peer");
            return Ok(());
        }

        self.dispatch_envelope(&envelope, true);
        Ok(())
    }

    /// Keep applying store events addressed to the local peer until the
    /// store shuts down. Freshly relayed messages are flagged delivered,
    /// which surfaces an update on the sender's side as well.
    pub async fn listen(self: Arc<Self>) {
        let mut events = self.store.subscribe(self.local_id);

        loop {
            match events.recv().await {
                Ok(StoreEvent::Inserted(envelope)) => {
                    if envelope.recipient_id == self.local_id && !envelope.is_delivered {
                        if let Err(e) = self.store.mark_delivered(&[envelope.message_id]).await {
                            tracing::warn!("Failed on flag message delivered: {e}");
                        }
                    }
                    self.dispatch_envelope(&envelope, false);
                }
                Ok(StoreEvent::Updated(envelope)) => {
                    self.dispatch_envelope(&envelope, false);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Message listener lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn dispatch_envelope(&self, envelope: &Envelope, direct: bool) {
        let mut view = self.to_view(envelope);
        if direct {
            view.is_delivered = true;
        }

        self.inbound_tx.send(view).ok();
    }
}
