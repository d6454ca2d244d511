//! Storage interfaces of the relay.
//!
//! The relay holds four kinds of state: sealed message envelopes,
//! pending connection signals, published identity keys, and presence.
//! Each is its own trait so deployments can mix backends. Two are
//! provided: [`MemoryStore`] for tests and single-process setups, and
//! [`SledStore`](crate::store::sled::SledStore) for persistence.
//!
//! Stores also act as the relay's notification bus. Subscribing yields a
//! broadcast receiver; an [`Inserted`](StoreEvent::Inserted) event reaches
//! the recipient's channel, an [`Updated`](StoreEvent::Updated) event
//! reaches both the sender's and the recipient's.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use crate::store::memory::MemoryStore;
pub use crate::store::sled::SledStore;

use crate::crypto::IdentityPublic;
use crate::error::Result;
use crate::message::Envelope;
use crate::peer_id::PeerId;
use crate::presence::PresenceEvent;
use crate::presence::UserStatus;
use crate::signaling::SignalRecord;

/// Change notification emitted by a [`MessageStore`].
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A new message was stored.
    Inserted(Envelope),
    /// An existing message gained a new version or delivery state.
    Updated(Envelope),
}

/// Persistence of sealed message envelopes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a new message and notify the recipient's subscribers.
    async fn insert(&self, envelope: &Envelope) -> Result<()>;

    /// Latest versions of direct messages between two peers, newest first.
    async fn between(&self, a: PeerId, b: PeerId, limit: usize) -> Result<Vec<Envelope>>;

    /// Latest versions of a group's messages that involve `member`,
    /// newest first.
    async fn for_group(&self, group_id: Uuid, member: PeerId, limit: usize)
        -> Result<Vec<Envelope>>;

    /// Latest version of one message.
    async fn by_id(&self, message_id: Uuid) -> Result<Option<Envelope>>;

    /// Store a successor version of an existing message and notify both
    /// sides.
    async fn append_version(&self, envelope: &Envelope) -> Result<()>;

    /// Flag messages as delivered.
    async fn mark_delivered(&self, message_ids: &[Uuid]) -> Result<()>;

    /// Flag messages as read at `read_at`.
    async fn mark_read(&self, message_ids: &[Uuid], read_at: DateTime<Utc>) -> Result<()>;

    /// Events for messages addressed to or updated for `recipient`.
    fn subscribe(&self, recipient: PeerId) -> broadcast::Receiver<StoreEvent>;
}

/// Persistence of pending connection signals.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Store a signal and notify the receiver's subscribers.
    async fn insert(&self, record: &SignalRecord) -> Result<()>;

    /// Drain signals addressed to `receiver`, oldest first.
    async fn pending_for(&self, receiver: PeerId) -> Result<Vec<SignalRecord>>;

    /// Purge signals created before `cutoff`. Returns how many were
    /// removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Live signals addressed to `receiver`.
    fn subscribe(&self, receiver: PeerId) -> broadcast::Receiver<SignalRecord>;
}

/// Directory of published identity keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Look up the published key of `peer`.
    async fn fetch(&self, peer: PeerId) -> Result<Option<IdentityPublic>>;

    /// Publish or replace the key of `peer`.
    async fn publish(&self, peer: PeerId, key: IdentityPublic) -> Result<()>;
}

/// Fan-out of typing, read receipt and status events.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Deliver `event` to every subscriber of `channel`.
    async fn broadcast(&self, channel: &str, event: &PresenceEvent) -> Result<()>;

    /// Live events on `channel`.
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<PresenceEvent>;

    /// Record the current status of `user`.
    async fn set_status(&self, user: PeerId, status: UserStatus) -> Result<()>;

    /// Last recorded status of `user` and when it was set.
    async fn status_of(&self, user: PeerId) -> Result<Option<(UserStatus, DateTime<Utc>)>>;
}
