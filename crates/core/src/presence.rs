//! Typing notifications, read receipts and user status.
//!
//! Presence never touches the message path. Events fan out through a
//! [`PresenceChannel`]: each pair of peers shares one channel for typing
//! and read receipts, and every user has a status channel of their own.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::consts::TYPING_THROTTLE_MS;
use crate::error::Result;
use crate::message::ReadReceipt;
use crate::peer_id::PeerId;
use crate::store::PresenceChannel;

/// Advertised availability of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Available.
    Online,
    /// Do not disturb.
    Busy,
    /// Stepped away, back soon.
    Brb,
}

/// Event fanned out over a presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// A peer is composing a message.
    Typing {
        /// Who is typing.
        sender_id: PeerId,
    },
    /// Messages were read by the other side.
    ReadReceipts {
        /// One receipt per read message.
        receipts: Vec<ReadReceipt>,
    },
    /// A user changed their advertised status.
    Status {
        /// Whose status changed.
        user_id: PeerId,
        /// The new status.
        status: UserStatus,
        /// When it was set.
        last_seen: DateTime<Utc>,
    },
}

/// Shared typing and receipt channel of a peer pair.
///
/// Both sides compute the same name regardless of argument order.
pub fn direct_channel_name(a: PeerId, b: PeerId) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("presence:{low}:{high}")
}

fn status_channel_name(user: PeerId) -> String {
    format!("status:{user}")
}

/// Local endpoint of the presence system.
///
/// Throttles outbound typing events so holding a key down does not flood
/// the channel.
pub struct PresenceService {
    local_id: PeerId,
    channel: Arc<dyn PresenceChannel>,
    last_typing: DashMap<PeerId, Instant>,
    throttle: Duration,
}

impl PresenceService {
    /// New service broadcasting as `local_id`.
    pub fn new(local_id: PeerId, channel: Arc<dyn PresenceChannel>) -> Self {
        Self::with_throttle(local_id, channel, Duration::from_millis(TYPING_THROTTLE_MS))
    }

    /// New service with a custom typing throttle window.
    pub fn with_throttle(
        local_id: PeerId,
        channel: Arc<dyn PresenceChannel>,
        throttle: Duration,
    ) -> Self {
        Self {
            local_id,
            channel,
            last_typing: DashMap::new(),
            throttle,
        }
    }

    /// Announce that the local user is typing to `peer`.
    ///
    /// Returns whether an event went out, or false when the previous one
    /// is still within the throttle window.
    pub async fn start_typing(&self, peer: PeerId) -> Result<bool> {
        if !self.typing_allowed(peer) {
            return Ok(false);
        }

        let event = PresenceEvent::Typing {
            sender_id: self.local_id,
        };
        self.channel
            .broadcast(&direct_channel_name(self.local_id, peer), &event)
            .await?;
        Ok(true)
    }

    fn typing_allowed(&self, peer: PeerId) -> bool {
        let now = Instant::now();
        match self.last_typing.entry(peer) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.throttle {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    /// Push read receipts to the pair channel shared with `peer`.
    pub async fn send_read_receipts(&self, peer: PeerId, receipts: Vec<ReadReceipt>) -> Result<()> {
        if receipts.is_empty() {
            return Ok(());
        }
        self.channel
            .broadcast(
                &direct_channel_name(self.local_id, peer),
                &PresenceEvent::ReadReceipts { receipts },
            )
            .await
    }

    /// Record and announce the local user's status.
    pub async fn set_status(&self, status: UserStatus) -> Result<()> {
        self.channel.set_status(self.local_id, status).await?;
        self.channel
            .broadcast(
                &status_channel_name(self.local_id),
                &PresenceEvent::Status {
                    user_id: self.local_id,
                    status,
                    last_seen: Utc::now(),
                },
            )
            .await
    }

    /// Typing and receipt events shared with `peer`.
    pub fn subscribe_with(&self, peer: PeerId) -> broadcast::Receiver<PresenceEvent> {
        self.channel
            .subscribe(&direct_channel_name(self.local_id, peer))
    }

    /// Status changes of `peer`.
    pub fn subscribe_status(&self, peer: PeerId) -> broadcast::Receiver<PresenceEvent> {
        self.channel.subscribe(&status_channel_name(peer))
    }

    /// Last recorded status of `peer`.
    pub async fn status_of(&self, peer: PeerId) -> Result<Option<(UserStatus, DateTime<Utc>)>> {
        self.channel.status_of(peer).await
    }
}
