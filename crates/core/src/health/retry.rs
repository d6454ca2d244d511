//! Connection attempt budget with leaky-bucket decay.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::consts::DEFAULT_MAX_CONNECT_ATTEMPTS;
use crate::consts::DEFAULT_RETRY_DECAY_SECS;
use crate::peer_id::PeerId;

#[derive(Debug, Default)]
struct AttemptCounter {
    attempts: u32,
    // Bumped on every increment so a scheduled decay can tell whether
    // new attempts happened in the interim.
    serial: u64,
}

/// Counts failed connection attempts per peer.
///
/// One attempt leaks back after a quiet period, so transient failures do
/// not permanently exhaust the budget.
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_attempts: u32,
    decay: Duration,
    counters: Arc<DashMap<PeerId, AttemptCounter>>,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_CONNECT_ATTEMPTS,
            Duration::from_secs(DEFAULT_RETRY_DECAY_SECS),
        )
    }
}

impl RetryManager {
    /// New manager allowing `max_attempts` per peer with the given decay
    /// period.
    pub fn new(max_attempts: u32, decay: Duration) -> Self {
        Self {
            max_attempts,
            decay,
            counters: Arc::new(DashMap::new()),
        }
    }

    /// Record one attempt and return the new count.
    pub fn increment(&self, peer: PeerId) -> u32 {
        let mut counter = self.counters.entry(peer).or_default();
        counter.attempts += 1;
        counter.serial += 1;
        counter.attempts
    }

    /// Current attempt count of `peer`.
    pub fn attempts(&self, peer: PeerId) -> u32 {
        self.counters.get(&peer).map_or(0, |c| c.attempts)
    }

    /// Whether `peer` has exhausted its budget.
    pub fn has_reached_max(&self, peer: PeerId) -> bool {
        self.attempts(peer) >= self.max_attempts
    }

    /// Forget all attempts of `peer`.
    pub fn reset(&self, peer: PeerId) {
        self.counters.remove(&peer);
    }

    /// After the decay period, leak one attempt back unless new attempts
    /// were recorded in the interim.
    pub fn schedule_reset(&self, peer: PeerId) {
        let Some(serial) = self.counters.get(&peer).map(|c| c.serial) else {
            return;
        };
        let counters = self.counters.clone();
        let decay = self.decay;
        tokio::spawn(async move {
            tokio::time::sleep(decay).await;
            if let Some(mut counter) = counters.get_mut(&peer) {
                if counter.serial == serial && counter.attempts > 0 {
                    counter.attempts -= 1;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_manager() -> RetryManager {
        RetryManager::new(3, Duration::from_millis(30))
    }

    #[tokio::test]
    async fn test_attempts_decay_by_exactly_one() {
        let retry = fast_manager();
        let peer = PeerId::random();

        retry.increment(peer);
        retry.increment(peer);
        retry.schedule_reset(peer);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(retry.attempts(peer), 1);
    }

    #[tokio::test]
    async fn test_interim_attempt_cancels_decay() {
        let retry = fast_manager();
        let peer = PeerId::random();

        retry.increment(peer);
        retry.schedule_reset(peer);
        retry.increment(peer);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(retry.attempts(peer), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_and_reset() {
        let retry = fast_manager();
        let peer = PeerId::random();

        for _ in 0..3 {
            assert!(!retry.has_reached_max(peer));
            retry.increment(peer);
        }
        assert!(retry.has_reached_max(peer));

        retry.reset(peer);
        assert_eq!(retry.attempts(peer), 0);
        assert!(!retry.has_reached_max(peer));
    }

    #[tokio::test]
    async fn test_schedule_reset_without_attempts_is_a_noop() {
        let retry = fast_manager();
        let peer = PeerId::random();

        retry.schedule_reset(peer);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(retry.attempts(peer), 0);
    }
}
