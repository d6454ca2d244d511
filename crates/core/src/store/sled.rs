#![warn(missing_docs)]

//! Persistent store for default, use `sled` as backend db.
//!
//! Rows live in one tree per concern: `messages` keyed by creation time
//! so range scans come back in order, `message_index` mapping a message
//! id to its time key, `signaling`, `identity_keys` and `user_presence`.
//! Only the latest version of a message is kept; a successor version
//! overwrites its predecessor in place. Change subscriptions are process
//! local, exactly as in [`MemoryStore`](crate::store::MemoryStore).

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

/// Time-ordered row key: big-endian creation millis, then the row id.
fn time_key(at: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&at.timestamp_millis().to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// SledStore struct
#[allow(dead_code)]
pub struct SledStore {
    db: sled::Db,
    messages: sled::Tree,
    message_index: sled::Tree,
    signals: sled::Tree,
    identity_keys: sled::Tree,
    user_presence: sled::Tree,
    message_subs: DashMap<PeerId, broadcast::Sender<StoreEvent>>,
    signal_subs: DashMap<PeerId, broadcast::Sender<SignalRecord>>,
    presence_subs: DashMap<String, broadcast::Sender<PresenceEvent>>,
    cap: u32,
    path: String,
}

impl SledStore {
    /// New SledStore
    /// * cap: cache capacity in bytes
    /// * path: db file location
    pub async fn new_with_cap_and_path<P>(cap: u32, path: P) -> Result<Self>
    where P: AsRef<std::path::Path> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .mode(sled::Mode::HighThroughput)
            .cache_capacity(cap as u64)
            .open()?;

        Ok(Self {
            messages: db.open_tree("messages")?,
            message_index: db.open_tree("message_index")?,
            signals: db.open_tree("signaling")?,
            identity_keys: db.open_tree("identity_keys")?,
            user_presence: db.open_tree("user_presence")?,
            db,
            message_subs: DashMap::new(),
            signal_subs: DashMap::new(),
            presence_subs: DashMap::new(),
            cap,
            path: path.as_ref().to_string_lossy().to_string(),
        })
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

    /// Load, mutate and write back the latest version of one message.
    fn update_latest<F>(&self, message_id: Uuid, apply: F) -> Result<Option<Envelope>>
    where F: FnOnce(&mut Envelope) {
        let Some(key) = self.message_index.get(message_id.as_bytes())? else {
            return Ok(None);
        };
        let Some(value) = self.messages.get(&key)? else {
            return Ok(None);
        };

        let mut envelope: Envelope =
            bincode::deserialize(&value).map_err(Error::BincodeDeserialize)?;
        apply(&mut envelope);

        let data = bincode::serialize(&envelope).map_err(Error::BincodeSerialize)?;
        self.messages.insert(key, data)?;
        Ok(Some(envelope))
    }

    fn newest_first_matching<F>(&self, limit: usize, matches: F) -> Vec<Envelope>
    where F: Fn(&Envelope) -> bool {
        self.messages
            .iter()
            .values()
            .rev()
            .flatten()
            .filter_map(|value| bincode::deserialize::<Envelope>(&value).ok())
            .filter(|envelope| matches(envelope))
            .take(limit)
            .collect()
    }
}

#[async_trait]
impl MessageStore for SledStore {
    async fn insert(&self, envelope: &Envelope) -> Result<()> {
        let key = time_key(envelope.created_at, envelope.message_id);
        let data = bincode::serialize(envelope).map_err(Error::BincodeSerialize)?;

        self.messages.insert(key, data)?;
        self.message_index
            .insert(envelope.message_id.as_bytes(), &key[..])?;

        self.notify_message(envelope.recipient_id, StoreEvent::Inserted(envelope.clone()));
        Ok(())
    }

    async fn between(&self, a: PeerId, b: PeerId, limit: usize) -> Result<Vec<Envelope>> {
        Ok(self.newest_first_matching(limit, |e| {
            e.group_id.is_none()
                && ((e.sender_id == a && e.recipient_id == b)
                    || (e.sender_id == b && e.recipient_id == a))
        }))
    }

    async fn for_group(
        &self,
        group_id: Uuid,
        member: PeerId,
        limit: usize,
    ) -> Result<Vec<Envelope>> {
        Ok(self.newest_first_matching(limit, |e| {
            e.group_id == Some(group_id) && (e.sender_id == member || e.recipient_id == member)
        }))
    }

    async fn by_id(&self, message_id: Uuid) -> Result<Option<Envelope>> {
        let Some(key) = self.message_index.get(message_id.as_bytes())? else {
            return Ok(None);
        };
        let Some(value) = self.messages.get(&key)? else {
            return Ok(None);
        };

        bincode::deserialize(&value)
            .map_err(Error::BincodeDeserialize)
            .map(Some)
    }

    async fn append_version(&self, envelope: &Envelope) -> Result<()> {
        let Some(key) = self.message_index.get(envelope.message_id.as_bytes())? else {
            return Err(Error::StoreOperation(format!(
                "no message {} to append to",
                envelope.message_id
            )));
        };

        let data = bincode::serialize(envelope).map_err(Error::BincodeSerialize)?;
        self.messages.insert(key, data)?;

        self.notify_update(envelope);
        Ok(())
    }

    async fn mark_delivered(&self, message_ids: &[Uuid]) -> Result<()> {
        for id in message_ids {
            if let Some(envelope) = self.update_latest(*id, |e| e.is_delivered = true)? {
                self.notify_update(&envelope);
            }
        }
        Ok(())
    }

    async fn mark_read(&self, message_ids: &[Uuid], read_at: DateTime<Utc>) -> Result<()> {
        for id in message_ids {
            if let Some(envelope) = self.update_latest(*id, |e| e.read_at = Some(read_at))? {
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
impl SignalStore for SledStore {
    async fn insert(&self, record: &SignalRecord) -> Result<()> {
        let key = time_key(record.created_at, record.id);
        let data = bincode::serialize(record).map_err(Error::BincodeSerialize)?;
        self.signals.insert(key, data)?;

        if let Some(tx) = self.signal_subs.get(&record.receiver_id) {
            tx.send(record.clone()).ok();
        }
        Ok(())
    }

    async fn pending_for(&self, receiver: PeerId) -> Result<Vec<SignalRecord>> {
        let mut keys = Vec::new();
        let mut drained = Vec::new();

        for row in self.signals.iter() {
            let (key, value) = row?;
            let Ok(record) = bincode::deserialize::<SignalRecord>(&value) else {
                continue;
            };
            if record.receiver_id == receiver {
                keys.push(key);
                drained.push(record);
            }
        }

        for key in keys {
            self.signals.remove(key)?;
        }
        Ok(drained)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let bound = time_key(cutoff, Uuid::nil());
        let keys: Vec<_> = self.signals.range(..bound).keys().flatten().collect();

        let mut purged = 0u64;
        for key in keys {
            self.signals.remove(key)?;
            purged += 1;
        }
        Ok(purged)
    }

    fn subscribe(&self, receiver: PeerId) -> broadcast::Receiver<SignalRecord> {
        self.signal_subs
            .entry(receiver)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[async_trait]
impl KeyStore for SledStore {
    async fn fetch(&self, peer: PeerId) -> Result<Option<IdentityPublic>> {
        let Some(value) = self.identity_keys.get(peer.as_uuid().as_bytes())? else {
            return Ok(None);
        };

        let bytes: [u8; 32] = value
            .as_ref()
            .try_into()
            .map_err(|_| Error::StoreOperation("malformed identity key row".to_string()))?;
        Ok(Some(IdentityPublic::from(bytes)))
    }

    async fn publish(&self, peer: PeerId, key: IdentityPublic) -> Result<()> {
        self.identity_keys
            .insert(peer.as_uuid().as_bytes(), &key.as_bytes()[..])?;
        Ok(())
    }
}

#[async_trait]
impl PresenceChannel for SledStore {
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
        let data =
            bincode::serialize(&(status, Utc::now())).map_err(Error::BincodeSerialize)?;
        self.user_presence
            .insert(user.as_uuid().as_bytes(), data)?;
        Ok(())
    }

    async fn status_of(&self, user: PeerId) -> Result<Option<(UserStatus, DateTime<Utc>)>> {
        let Some(value) = self.user_presence.get(user.as_uuid().as_bytes())? else {
            return Ok(None);
        };

        bincode::deserialize(&value)
            .map_err(Error::BincodeDeserialize)
            .map(Some)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("cap", &self.cap)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::SealedPayload;
    use crate::signaling::SignalPayload;

    fn envelope(sender: PeerId, recipient: PeerId, group: Option<Uuid>) -> Envelope {
        Envelope::new(sender, recipient, group, SealedPayload {
            key_id: Uuid::new_v4(),
            eph_public: [0u8; 32],
            nonce: [0u8; 12],
            ciphertext: vec![1, 2, 3],
        })
    }

    fn clear(store: &SledStore) {
        store.messages.clear().unwrap();
        store.message_index.clear().unwrap();
        store.signals.clear().unwrap();
        store.identity_keys.clear().unwrap();
        store.user_presence.clear().unwrap();
    }

    #[tokio::test]
    async fn test_sled_store_round_trip() {
        let store = SledStore::new_with_cap_and_path(4096, "tmp/test_store_db")
            .await
            .unwrap();
        clear(&store);

        let (a, b) = (PeerId::random(), PeerId::random());

        let mut first = envelope(a, b, None);
        first.created_at = Utc::now() - chrono::Duration::seconds(5);
        let second = envelope(b, a, None);
        MessageStore::insert(&store, &first).await.unwrap();
        MessageStore::insert(&store, &second).await.unwrap();

        let rows = store.between(a, b, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message_id, second.message_id);

        let limited = store.between(a, b, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message_id, second.message_id);

        store
            .append_version(&first.edited(first.payload.clone()))
            .await
            .unwrap();
        let latest = store.by_id(first.message_id).await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert!(latest.is_edited);
        assert_eq!(store.between(a, b, 10).await.unwrap().len(), 2);

        let mut a_events = MessageStore::subscribe(&store, a);
        store
            .mark_read(&[first.message_id], Utc::now())
            .await
            .unwrap();
        match a_events.try_recv().unwrap() {
            StoreEvent::Updated(updated) => assert!(updated.read_at.is_some()),
            other => panic!("unexpected event: {other:?}"),
        }

        store.db.flush_async().await.unwrap();
        drop(store)
    }

    #[tokio::test]
    async fn test_sled_signals_drain_and_purge() {
        let store = SledStore::new_with_cap_and_path(4096, "tmp/test_signal_db")
            .await
            .unwrap();
        clear(&store);

        let (a, b) = (PeerId::random(), PeerId::random());

        let mut stale = SignalRecord::new(a, b, SignalPayload::Offer {
            sdp: "old".to_string(),
        });
        stale.created_at = Utc::now() - chrono::Duration::seconds(600);
        let fresh = SignalRecord::new(a, b, SignalPayload::Offer {
            sdp: "new".to_string(),
        });
        SignalStore::insert(&store, &stale).await.unwrap();
        SignalStore::insert(&store, &fresh).await.unwrap();

        let purged = store
            .delete_older_than(Utc::now() - chrono::Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(purged, 1);

        let drained = store.pending_for(b).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, fresh.id);
        assert!(store.pending_for(b).await.unwrap().is_empty());

        drop(store)
    }

    #[tokio::test]
    async fn test_sled_keys_and_presence() {
        let store = SledStore::new_with_cap_and_path(4096, "tmp/test_key_db")
            .await
            .unwrap();
        clear(&store);

        let peer = PeerId::random();
        let keypair = crate::crypto::IdentityKeypair::generate();

        assert!(store.fetch(peer).await.unwrap().is_none());
        store.publish(peer, keypair.public()).await.unwrap();
        assert_eq!(store.fetch(peer).await.unwrap(), Some(keypair.public()));

        store.set_status(peer, UserStatus::Busy).await.unwrap();
        let (status, _) = store.status_of(peer).await.unwrap().unwrap();
        assert_eq!(status, UserStatus::Busy);

        drop(store)
    }
}
