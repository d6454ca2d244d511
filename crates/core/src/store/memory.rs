//! In-memory store, the default for tests and single-process relays.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::crypto::IdentityPublic;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::peer_id::PeerId;
use crate::presence::PresenceEvent;
use crate::presence::UserStatus;
use crate::signaling::SignalRecord;
use crate::store::KeyStore;
use crate::store::MessageStore;
use crate::store::PresenceChannel;
use crate::store::SignalStore;
use crate::store::StoreEvent;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Backs every store trait with process-local collections.
///
/// Message versions are kept append-only per id; reads always see the
/// latest version.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: DashMap<Uuid, Vec<Envelope>>,
    message_subs: DashMap<PeerId, broadcast::Sender<StoreEvent>>,
    signals: RwLock<Vec<SignalRecord>>,
    signal_subs: DashMap<PeerId, broadcast::Sender<SignalRecord>>,
    keys: DashMap<PeerId, IdentityPublic>,
    presence_subs: DashMap<String, broadcast::Sender<PresenceEvent>>,
    statuses: DashMap<PeerId, (UserStatus, DateTime<Utc>)>,
}

impl MemoryStore {
    /// New empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_message(&self, peer: PeerId, event: StoreEvent) {
        if let Some(tx) = self.message_subs.get(&peer) {
            tx.send(event).ok();
        }
    }

    fn notify_update(&self, envelope: &Envelope) {
        self.notify_message(envelope.recipient_id, StoreEvent::Updated(envelope.clone()));
        if envelope.sender_id != envelope.recipient_id {
            self.notify_message(envelope.sender_id, StoreEvent::Updated(envelope.clone()));
        }
    }

    fn latest_versions(&self) -> Vec<Envelope> {
        self.messages
            .iter()
            .filter_map(|entry| entry.value().last().cloned())
            .collect()
    }

    fn newest_first(mut rows: Vec<Envelope>, limit: usize) -> Vec<Envelope> {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        rows
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, envelope: &Envelope) -> Result<()> {
        self.messages
            .insert(envelope.message_id, vec![envelope.clone()]);
        self.notify_message(envelope.recipient_id, StoreEvent::Inserted(envelope.clone()));
        Ok(())
    }

    async fn between(&self, a: PeerId, b: PeerId, limit: usize) -> Result<Vec<Envelope>> {
        let rows = self
            .latest_versions()
            .into_iter()
            .filter(|e| {
                e.group_id.is_none()
                    && ((e.sender_id == a && e.recipient_id == b)
                        || (e.sender_id == b && e.recipient_id == a))
            })
            .collect();
        Ok(Self::newest_first(rows, limit))
    }

    async fn for_group(
        &self,
        group_id: Uuid,
        member: PeerId,
        limit: usize,
    ) -> Result<Vec<Envelope>> {
        let rows = self
            .latest_versions()
            .into_iter()
            .filter(|e| {
                e.group_id == Some(group_id)
                    && (e.sender_id == member || e.recipient_id == member)
            })
            .collect();
        Ok(Self::newest_first(rows, limit))
    }

    async fn by_id(&self, message_id: Uuid) -> Result<Option<Envelope>> {
        Ok(self
            .messages
            .get(&message_id)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn append_version(&self, envelope: &Envelope) -> Result<()> {
        let mut versions = self
            .messages
            .get_mut(&envelope.message_id)
            .ok_or_else(|| Error::StoreOperation(format!(
                "no message {} to append to",
                envelope.message_id
            )))?;
        versions.push(envelope.clone());
        drop(versions);

        self.notify_update(envelope);
        Ok(())
    }

    async fn mark_delivered(&self, message_ids: &[Uuid]) -> Result<()> {
        for id in message_ids {
            let updated = self.messages.get_mut(id).and_then(|mut versions| {
                versions.last_mut().map(|latest| {
                    latest.is_delivered = true;
                    latest.clone()
                })
            });
            if let Some(envelope) = updated {
                self.notify_update(&envelope);
            }
        }
        Ok(())
    }

    async fn mark_read(&self, message_ids: &[Uuid], read_at: DateTime<Utc>) -> Result<()> {
        for id in message_ids {
            let updated = self.messages.get_mut(id).and_then(|mut versions| {
                versions.last_mut().map(|latest| {
                    latest.read_at = Some(read_at);
                    latest.clone()
                })
            });
            if let Some(envelope) = updated {
                self.notify_update(&envelope);
            }
        }
        Ok(())
    }

    fn subscribe(&self, recipient: PeerId) -> broadcast::Receiver<StoreEvent> {
        self.message_subs
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn insert(&self, record: &SignalRecord) -> Result<()> {
        self.signals
            .write()
            .map_err(|_| Error::StoreOperation("signal lock poisoned".to_string()))?
            .push(record.clone());
        if let Some(tx) = self.signal_subs.get(&record.receiver_id) {
            tx.send(record.clone()).ok();
        }
        Ok(())
    }

    async fn pending_for(&self, receiver: PeerId) -> Result<Vec<SignalRecord>> {
        let mut signals = self
            .signals
            .write()
            .map_err(|_| Error::StoreOperation("signal lock poisoned".to_string()))?;
        let (mine, rest) = signals
            .drain(..)
            .partition(|r| r.receiver_id == receiver);
        *signals = rest;
        Ok(mine)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut signals = self
            .signals
            .write()
            .map_err(|_| Error::StoreOperation("signal lock poisoned".to_string()))?;
        let before = signals.len();
        signals.retain(|r| r.created_at >= cutoff);
        Ok((before - signals.len()) as u64)
    }

    fn subscribe(&self, receiver: PeerId) -> broadcast::Receiver<SignalRecord> {
        self.signal_subs
            .entry(receiver)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn fetch(&self, peer: PeerId) -> Result<Option<IdentityPublic>> {
        Ok(self.keys.get(&peer).map(|k| *k.value()))
    }

    async fn publish(&self, peer: PeerId, key: IdentityPublic) -> Result<()> {
        self.keys.insert(peer, key);
        Ok(())
    }
}

#[async_trait]
impl PresenceChannel for MemoryStore {
    async fn broadcast(&self, channel: &str, event: &PresenceEvent) -> Result<()> {
        if let Some(tx) = self.presence_subs.get(channel) {
            tx.send(event.clone()).ok();
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<PresenceEvent> {
        self.presence_subs
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    async fn set_status(&self, user: PeerId, status: UserStatus) -> Result<()> {
        self.statuses.insert(user, (status, Utc::now()));
        Ok(())
    }

    async fn status_of(&self, user: PeerId) -> Result<Option<(UserStatus, DateTime<Utc>)>> {
        Ok(self.statuses.get(&user).map(|s| *s.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SealedPayload;

    fn envelope(sender: PeerId, recipient: PeerId, group: Option<Uuid>) -> Envelope {
        Envelope::new(sender, recipient, group, SealedPayload {
            key_id: Uuid::new_v4(),
            eph_public: [0u8; 32],
            nonce: [0u8; 12],
            ciphertext: vec![1, 2, 3],
        })
    }

    #[tokio::test]
    async fn test_between_returns_latest_versions_newest_first() {
        let store = MemoryStore::new();
        let (a, b) = (PeerId::random(), PeerId::random());

        let first = envelope(a, b, None);
        let second = envelope(b, a, None);
        MessageStore::insert(&store, &first).await.unwrap();
        MessageStore::insert(&store, &second).await.unwrap();
        store.append_version(&first.edited(first.payload.clone())).await.unwrap();

        let rows = store.between(a, b, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].message_id, first.message_id);
        assert_eq!(rows[1].version, 2);

        let limited = store.between(a, b, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message_id, second.message_id);
    }

    #[tokio::test]
    async fn test_group_rows_scoped_to_member() {
        let store = MemoryStore::new();
        let group = Uuid::new_v4();
        let (a, b, c) = (PeerId::random(), PeerId::random(), PeerId::random());

        MessageStore::insert(&store, &envelope(a, b, Some(group))).await.unwrap();
        MessageStore::insert(&store, &envelope(a, c, Some(group))).await.unwrap();
        MessageStore::insert(&store, &envelope(a, b, None)).await.unwrap();

        let rows = store.for_group(group, b, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recipient_id, b);
    }

    #[tokio::test]
    async fn test_insert_notifies_recipient_only() {
        let store = MemoryStore::new();
        let (a, b) = (PeerId::random(), PeerId::random());
        let mut b_events = MessageStore::subscribe(&store, b);
        let mut a_events = MessageStore::subscribe(&store, a);

        MessageStore::insert(&store, &envelope(a, b, None)).await.unwrap();

        assert!(matches!(
            b_events.try_recv().unwrap(),
            StoreEvent::Inserted(_)
        ));
        assert!(a_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_read_notifies_both_sides() {
        let store = MemoryStore::new();
        let (a, b) = (PeerId::random(), PeerId::random());
        let sent = envelope(a, b, None);
        MessageStore::insert(&store, &sent).await.unwrap();

        let mut a_events = MessageStore::subscribe(&store, a);
        store
            .mark_read(&[sent.message_id], Utc::now())
            .await
            .unwrap();

        match a_events.try_recv().unwrap() {
            StoreEvent::Updated(envelope) => assert!(envelope.read_at.is_some()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_signals_drain_oldest_first() {
        let store = MemoryStore::new();
        let (a, b) = (PeerId::random(), PeerId::random());

        let older = SignalRecord::new(a, b, crate::signaling::SignalPayload::Offer {
            sdp: "first".to_string(),
        });
        let newer = SignalRecord::new(a, b, crate::signaling::SignalPayload::Offer {
            sdp: "second".to_string(),
        });
        SignalStore::insert(&store, &older).await.unwrap();
        SignalStore::insert(&store, &newer).await.unwrap();

        let drained = store.pending_for(b).await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, older.id);

        assert!(store.pending_for(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_older_than_counts_purged() {
        let store = MemoryStore::new();
        let (a, b) = (PeerId::random(), PeerId::random());

        let mut stale = SignalRecord::new(a, b, crate::signaling::SignalPayload::Offer {
            sdp: "old".to_string(),
        });
        stale.created_at = Utc::now() - chrono::Duration::seconds(600);
        let fresh = SignalRecord::new(a, b, crate::signaling::SignalPayload::Offer {
            sdp: "new".to_string(),
        });
        SignalStore::insert(&store, &stale).await.unwrap();
        SignalStore::insert(&store, &fresh).await.unwrap();

        let purged = store
            .delete_older_than(Utc::now() - chrono::Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.pending_for(b).await.unwrap().len(), 1);
    }
}
