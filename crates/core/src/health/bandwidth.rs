//! Multiplicative bandwidth adaptation from link quality samples.
//!
//! Each sample produces a composite adjustment factor in (0, 1] from
//! stepped latency, packet loss and bandwidth factors. New limits are the
//! previous limits scaled by that factor and clamped, never a reset to
//! defaults, so adaptation is smooth across samples.

use std::time::Instant;

use backchannel_transport::core::transport::ChannelBandwidth;
use backchannel_transport::core::transport::ConnectionInterface;
use dashmap::DashMap;

use crate::consts::DEFAULT_MAX_BITRATE_KBPS;
use crate::consts::DEFAULT_MIN_BITRATE_KBPS;
use crate::consts::DEFAULT_START_BITRATE_KBPS;
use crate::consts::MAX_BITRATE_KBPS;
use crate::consts::MIN_BITRATE_KBPS;
use crate::peer_id::PeerId;

/// One observation of link quality towards a peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySample {
    /// Estimated available bandwidth in kbps.
    pub bandwidth_kbps: u32,
    /// Round trip latency in milliseconds.
    pub latency_ms: u32,
    /// Packet loss in percent.
    pub packet_loss_pct: f64,
}

/// Weights and step thresholds of the adjustment computation.
///
/// Step tables map a metric to a factor: the first threshold the value
/// falls inside wins, values beyond the last threshold get `tail_factor`.
#[derive(Debug, Clone)]
pub struct BandwidthPolicy {
    /// Weight of the latency factor in the composite.
    pub latency_weight: f64,
    /// Weight of the packet loss factor in the composite.
    pub loss_weight: f64,
    /// Weight of the bandwidth factor in the composite.
    pub bandwidth_weight: f64,
    /// Latency thresholds in ms, factor applies below the threshold.
    pub latency_steps: [(u32, f64); 4],
    /// Loss thresholds in percent, factor applies below the threshold.
    pub loss_steps: [(f64, f64); 4],
    /// Bandwidth thresholds in kbps, factor applies above the threshold.
    pub bandwidth_steps: [(u32, f64); 4],
    /// Factor for values beyond the worst threshold.
    pub tail_factor: f64,
    /// Absolute lower clamp in kbps.
    pub floor_kbps: u32,
    /// Absolute upper clamp in kbps.
    pub ceiling_kbps: u32,
}

impl Default for BandwidthPolicy {
    fn default() -> Self {
        Self {
            latency_weight: 0.4,
            loss_weight: 0.4,
            bandwidth_weight: 0.2,
            latency_steps: [(100, 1.0), (200, 0.8), (300, 0.6), (500, 0.4)],
            loss_steps: [(1.0, 1.0), (3.0, 0.8), (5.0, 0.6), (10.0, 0.4)],
            bandwidth_steps: [(2000, 1.0), (1000, 0.8), (500, 0.6), (200, 0.4)],
            tail_factor: 0.2,
            floor_kbps: MIN_BITRATE_KBPS,
            ceiling_kbps: MAX_BITRATE_KBPS,
        }
    }
}

/// Current limits of one peer's data channel.
#[derive(Debug, Clone)]
pub struct BandwidthProfile {
    /// The peer these limits belong to.
    pub peer_id: PeerId,
    /// Limits to push onto the connection.
    pub limits: ChannelBandwidth,
    /// Composite factor of the most recent sample.
    pub last_adjustment: f64,
    /// When the profile last changed.
    pub updated_at: Instant,
}

/// Tracks and adapts per-peer bandwidth limits.
#[derive(Debug, Default)]
pub struct BandwidthManager {
    policy: BandwidthPolicy,
    profiles: DashMap<PeerId, BandwidthProfile>,
}

impl BandwidthManager {
    /// New manager with custom thresholds.
    pub fn new(policy: BandwidthPolicy) -> Self {
        Self {
            policy,
            profiles: DashMap::new(),
        }
    }

    fn default_profile(peer: PeerId) -> BandwidthProfile {
        BandwidthProfile {
            peer_id: peer,
            limits: ChannelBandwidth {
                min_kbps: DEFAULT_MIN_BITRATE_KBPS,
                max_kbps: DEFAULT_MAX_BITRATE_KBPS,
                start_kbps: DEFAULT_START_BITRATE_KBPS,
            },
            last_adjustment: 1.0,
            updated_at: Instant::now(),
        }
    }

    fn latency_factor(&self, latency_ms: u32) -> f64 {
        for (bound, factor) in self.policy.latency_steps {
            if latency_ms < bound {
                return factor;
            }
        }
        self.policy.tail_factor
    }

    fn loss_factor(&self, loss_pct: f64) -> f64 {
        for (bound, factor) in self.policy.loss_steps {
            if loss_pct < bound {
                return factor;
            }
        }
        self.policy.tail_factor
    }

    fn bandwidth_factor(&self, bandwidth_kbps: u32) -> f64 {
        for (bound, factor) in self.policy.bandwidth_steps {
            if bandwidth_kbps > bound {
                return factor;
            }
        }
        self.policy.tail_factor
    }

    fn clamp(&self, kbps: u32) -> u32 {
        kbps.clamp(self.policy.floor_kbps, self.policy.ceiling_kbps)
    }

    /// Current profile of `peer`, or the default one if no sample has
    /// been recorded yet.
    pub fn profile(&self, peer: PeerId) -> BandwidthProfile {
        self.profiles
            .get(&peer)
            .map(|p| p.clone())
            .unwrap_or_else(|| Self::default_profile(peer))
    }

    /// Fold `sample` into the profile of `peer` and return the new
    /// limits.
    pub fn adjust(&self, peer: PeerId, sample: QualitySample) -> ChannelBandwidth {
        let factor = self.policy.latency_weight * self.latency_factor(sample.latency_ms)
            + self.policy.loss_weight * self.loss_factor(sample.packet_loss_pct)
            + self.policy.bandwidth_weight * self.bandwidth_factor(sample.bandwidth_kbps);

        let mut profile = self
            .profiles
            .entry(peer)
            .or_insert_with(|| Self::default_profile(peer));

        let limits = &mut profile.limits;
        limits.min_kbps = self.clamp((limits.min_kbps as f64 * factor).round() as u32);
        limits.max_kbps = self.clamp((limits.max_kbps as f64 * factor).round() as u32);
        limits.start_kbps = ((limits.start_kbps as f64 * factor).round() as u32)
            .clamp(limits.min_kbps, limits.max_kbps);

        profile.last_adjustment = factor;
        profile.updated_at = Instant::now();
        profile.limits
    }

    /// Push the current limits of `peer` onto its connection.
    pub fn apply<C: ConnectionInterface>(&self, peer: PeerId, conn: &C) {
        let limits = self.profile(peer).limits;
        conn.apply_bandwidth(&limits);
        tracing::debug!(
            "Applied bandwidth limits {}/{}/{} kbps to peer {peer}",
            limits.min_kbps,
            limits.start_kbps,
            limits.max_kbps
        );
    }

    /// Drop the profile of `peer`, returning to defaults on next use.
    pub fn remove(&self, peer: PeerId) {
        self.profiles.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perfect() -> QualitySample {
        QualitySample {
            bandwidth_kbps: 2500,
            latency_ms: 50,
            packet_loss_pct: 0.5,
        }
    }

    fn terrible() -> QualitySample {
        QualitySample {
            bandwidth_kbps: 150,
            latency_ms: 600,
            packet_loss_pct: 12.0,
        }
    }

    #[test]
    fn test_perfect_quality_keeps_limits() {
        let manager = BandwidthManager::default();
        let peer = PeerId::random();

        let limits = manager.adjust(peer, perfect());
        assert_eq!(limits.min_kbps, DEFAULT_MIN_BITRATE_KBPS);
        assert_eq!(limits.max_kbps, DEFAULT_MAX_BITRATE_KBPS);
        assert_eq!(limits.start_kbps, DEFAULT_START_BITRATE_KBPS);
        assert_eq!(manager.profile(peer).last_adjustment, 1.0);
    }

    #[test]
    fn test_degraded_link_scales_multiplicatively_to_the_floor() {
        let manager = BandwidthManager::default();
        let peer = PeerId::random();

        let first = manager.adjust(peer, terrible());
        assert_eq!(first.max_kbps, 500);
        assert_eq!(first.min_kbps, 60);
        assert_eq!(first.start_kbps, 200);

        let second = manager.adjust(peer, terrible());
        assert_eq!(second.max_kbps, 100);
        assert_eq!(second.min_kbps, MIN_BITRATE_KBPS);
        assert_eq!(second.start_kbps, MIN_BITRATE_KBPS);
    }

    #[test]
    fn test_mixed_sample_blends_weighted_factors() {
        let manager = BandwidthManager::default();
        let peer = PeerId::random();

        // latency 0.8, loss 1.0, bandwidth 0.6 -> 0.32 + 0.4 + 0.12 = 0.84
        let limits = manager.adjust(peer, QualitySample {
            bandwidth_kbps: 800,
            latency_ms: 150,
            packet_loss_pct: 0.2,
        });
        assert_eq!(limits.max_kbps, 2100);
        assert_eq!(limits.min_kbps, 252);
        assert_eq!(limits.start_kbps, 840);
    }

    #[test]
    fn test_dominating_sample_never_yields_lower_limits() {
        let manager = BandwidthManager::default();
        let better_peer = PeerId::random();
        let worse_peer = PeerId::random();

        let better = manager.adjust(better_peer, QualitySample {
            bandwidth_kbps: 1200,
            latency_ms: 120,
            packet_loss_pct: 2.0,
        });
        let worse = manager.adjust(worse_peer, QualitySample {
            bandwidth_kbps: 400,
            latency_ms: 350,
            packet_loss_pct: 6.0,
        });

        assert!(better.min_kbps >= worse.min_kbps);
        assert!(better.max_kbps >= worse.max_kbps);
        assert!(better.start_kbps >= worse.start_kbps);
    }

    #[test]
    fn test_remove_returns_peer_to_defaults() {
        let manager = BandwidthManager::default();
        let peer = PeerId::random();

        manager.adjust(peer, terrible());
        manager.remove(peer);
        assert_eq!(
            manager.profile(peer).limits.max_kbps,
            DEFAULT_MAX_BITRATE_KBPS
        );
    }
}
