#![warn(missing_docs)]
//! This module provides [PeerManagerBuilder] and its interface for
//! [PeerManager]

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use crate::consts::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::consts::DEFAULT_MAX_CONNECT_ATTEMPTS;
use crate::consts::DEFAULT_RETRY_DECAY_SECS;
use crate::error::Result;
use crate::health::BandwidthManager;
use crate::health::BandwidthPolicy;
use crate::health::RetryManager;
use crate::peer_id::PeerId;
use crate::peers::callback::PeerCallback;
use crate::peers::callback::SharedPeerCallback;
use crate::peers::transport::PeerTransport;
use crate::peers::PeerManager;
use crate::store::SignalStore;

struct DefaultCallback;
impl PeerCallback for DefaultCallback {}

/// Creates a PeerManagerBuilder to configure a PeerManager.
pub struct PeerManagerBuilder {
    ice_servers: String,
    external_address: Option<String>,
    local_id: PeerId,
    signals: Arc<dyn SignalStore>,
    max_attempts: u32,
    retry_decay: Duration,
    connect_timeout: Duration,
    bandwidth_policy: BandwidthPolicy,
    callback: Option<SharedPeerCallback>,
}

impl PeerManagerBuilder {
    /// Creates new instance of [PeerManagerBuilder]
    pub fn new(ice_servers: &str, local_id: PeerId, signals: Arc<dyn SignalStore>) -> Self {
        PeerManagerBuilder {
            ice_servers: ice_servers.to_string(),
            external_address: None,
            local_id,
            signals,
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            retry_decay: Duration::from_secs(DEFAULT_RETRY_DECAY_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            bandwidth_policy: BandwidthPolicy::default(),
            callback: None,
        }
    }

    /// Sets up the external address for the transport.
    /// This will be used to configure the transport to listen for WebRTC
    /// connections in "HOST" mode.
    pub fn external_address(mut self, external_address: String) -> Self {
        self.external_address = Some(external_address);
        self
    }

    /// Sets up the connection attempt budget per peer.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets up the quiet period after which one recorded attempt decays.
    pub fn retry_decay(mut self, decay: Duration) -> Self {
        self.retry_decay = decay;
        self
    }

    /// Sets up how long a connection attempt may stay pending.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets up the bandwidth adaptation thresholds.
    pub fn bandwidth_policy(mut self, policy: BandwidthPolicy) -> Self {
        self.bandwidth_policy = policy;
        self
    }

    /// Bind callback for the manager.
    pub fn callback(mut self, callback: SharedPeerCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Try build for `PeerManager`.
    pub fn build(self) -> Result<PeerManager> {
        let retry = RetryManager::new(self.max_attempts, self.retry_decay);
        let bandwidth = BandwidthManager::new(self.bandwidth_policy);

        let transport = Arc::new(PeerTransport::new(
            self.local_id,
            &self.ice_servers,
            self.external_address,
            self.signals,
            retry,
            bandwidth,
            self.connect_timeout,
        )?);

        let callback = RwLock::new(
            self.callback
                .unwrap_or_else(|| Arc::new(DefaultCallback {})),
        );

        Ok(PeerManager {
            transport,
            callback,
        })
    }
}
