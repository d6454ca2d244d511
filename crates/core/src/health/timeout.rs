//! Bounded pending time for connection attempts.

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::peer_id::PeerId;

#[derive(Debug)]
struct PendingTimeout {
    generation: u64,
    cancel: CancellationToken,
}

/// Arms at most one pending timeout per peer.
///
/// Arming again replaces the previous timeout; clearing is idempotent and
/// a no-op for peers with nothing pending.
#[derive(Debug, Default)]
pub struct TimeoutManager {
    pending: Arc<DashMap<PeerId, PendingTimeout>>,
    generation: AtomicU64,
}

impl TimeoutManager {
    /// New manager with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `duration` unless the timeout is cleared or
    /// replaced first.
    pub fn set<F, Fut>(&self, peer: PeerId, duration: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        if let Some(prev) = self.pending.insert(peer, PendingTimeout {
            generation,
            cancel: cancel.clone(),
        }) {
            prev.cancel.cancel();
        }

        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    // The generation check loses gracefully if a newer
                    // timeout replaced this one between sleep and fire.
                    if pending.remove_if(&peer, |_, p| p.generation == generation).is_some() {
                        callback().await;
                    }
                }
            }
        });
    }

    /// Cancel the pending timeout of `peer`, if any.
    pub fn clear(&self, peer: PeerId) {
        if let Some((_, pending)) = self.pending.remove(&peer) {
            pending.cancel.cancel();
        }
    }

    /// Cancel every pending timeout.
    pub fn clear_all(&self) {
        self.pending.retain(|_, pending| {
            pending.cancel.cancel();
            false
        });
    }

    /// Whether `peer` has a timeout armed.
    pub fn is_pending(&self, peer: PeerId) -> bool {
        self.pending.contains_key(&peer)
    }
}
