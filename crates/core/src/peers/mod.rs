#![warn(missing_docs)]
//! Peer connection management.
//!
//! [PeerManager] owns one WebRTC transport and drives every direct
//! connection through its lifecycle. Dialing goes through [PeerManager::connect],
//! which respects the per-peer attempt budget and arms a pending timeout.
//! Remote offers, answers and ICE candidates arrive as signal records and
//! are applied by [PeerManager::handle_signal]; [PeerManager::listen] wires
//! that to the signal store. Failures and timeouts count against the budget,
//! and once it is exhausted the manager refuses to dial until the budget
//! decays, so callers route traffic through the relay instead.

mod builder;
/// Callback interface for the peer manager
pub mod callback;
mod transport;

use std::sync::Arc;
use std::sync::RwLock;

use backchannel_transport::core::transport::ChannelBandwidth;
use backchannel_transport::core::transport::WebrtcConnectionState;
pub use builder::PeerManagerBuilder;
use bytes::Bytes;
use tokio::sync::broadcast;
pub use transport::PeerConnection;
pub use transport::PeerTransport;

use crate::error::Error;
use crate::error::Result;
use crate::health::QualitySample;
use crate::peer_id::PeerId;
use crate::peers::callback::InnerPeerCallback;
use crate::peers::callback::PeerEvent;
use crate::peers::callback::SharedPeerCallback;
use crate::signaling::SignalPayload;
use crate::signaling::SignalRecord;

/// The manager of direct peer connections.
/// Caller must keep its reference, or the connections will be released.
pub struct PeerManager {
    /// Connection management and signaling.
    pub(crate) transport: Arc<PeerTransport>,
    callback: RwLock<SharedPeerCallback>,
}

impl PeerManager {
    /// Get id of self.
    pub fn local_id(&self) -> PeerId {
        self.transport.local_id
    }

    fn callback(&self) -> Result<InnerPeerCallback> {
        let shared = self
            .callback
            .read()
            .map_err(|_| Error::CallbackSyncLockError)?
            .clone();

        Ok(InnerPeerCallback::new(self.transport.clone(), shared))
    }

    /// Set callback for the manager. Works for connections created afterwards.
    pub fn set_callback(&self, callback: SharedPeerCallback) -> Result<()> {
        let mut inner = self
            .callback
            .write()
            .map_err(|_| Error::CallbackSyncLockError)?;

        *inner = callback;

        Ok(())
    }

    /// Dial `peer`. Does nothing if an attempt or an open connection already
    /// exists. Once the attempt budget of the peer is exhausted this returns
    /// [Error::MaxRetriesExceeded] until the budget decays, and the caller is
    /// expected to fall back to the relay.
    pub async fn connect(&self, peer: PeerId) -> Result<()> {
        if peer == self.local_id() {
            return Err(Error::ShouldNotConnectSelf);
        }

        if self.transport.retry.has_reached_max(peer) {
            return Err(Error::MaxRetriesExceeded(peer));
        }

        if let Some(conn) = self.transport.get_connection(peer) {
            match conn.webrtc_connection_state() {
                WebrtcConnectionState::New
                | WebrtcConnectionState::Connecting
                | WebrtcConnectionState::Connected => return Ok(()),
                _ => {
                    // Stale record, replace it with a fresh attempt.
                    self.transport.close_connection(peer).await?;
                }
            }
        }

        let offer = self
            .transport
            .prepare_connection_offer(peer, self.callback()?)
            .await?;
        self.transport.send_signal(peer, offer).await?;
        self.arm_connect_timeout(peer)?;

        Ok(())
    }

    /// Arm the pending timeout for an attempt to `peer`. If the connection is
    /// not open when it fires, the attempt is counted and torn down.
    fn arm_connect_timeout(&self, peer: PeerId) -> Result<()> {
        let transport = self.transport.clone();
        let shared = self
            .callback
            .read()
            .map_err(|_| Error::CallbackSyncLockError)?
            .clone();

        self.transport
            .timeouts
            .set(peer, self.transport.connect_timeout, move || async move {
                let state = transport
                    .get_connection(peer)
                    .map(|conn| conn.webrtc_connection_state());
                if state == Some(WebrtcConnectionState::Connected) {
                    return;
                }

                tracing::warn!("{}", Error::ConnectionTimeout(peer));
                transport.retry.increment(peer);
                transport.retry.schedule_reset(peer);

                if let Err(e) = transport.close_connection(peer).await {
                    tracing::debug!("Failed on close timed out connection {peer}: {e:?}");
                }

                if transport.retry.has_reached_max(peer) {
                    shared
                        .on_event(&PeerEvent::ConnectionAbandoned { peer })
                        .await
                        .ok();
                }
            });

        Ok(())
    }

    /// Peer ids of all pooled connections, whatever their state.
    pub fn connection_ids(&self) -> Vec<PeerId> {
        self.transport.get_connection_ids()
    }

    /// Every pooled connection with its current lifecycle state.
    pub fn connections(&self) -> Vec<(PeerId, WebrtcConnectionState)> {
        self.transport
            .get_connections()
            .into_iter()
            .map(|(peer, conn)| (peer, conn.webrtc_connection_state()))
            .collect()
    }

    /// Whether the data channel of `peer` is currently open.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        let Some(conn) = self.transport.get_connection(peer) else {
            return false;
        };
        conn.webrtc_connection_state() == WebrtcConnectionState::Connected
    }

    /// Try to send a frame over the direct data channel of `peer`.
    /// Returns true only if the channel is open and the send succeeded.
    /// Every other condition returns false so the caller can fall back.
    pub async fn send_direct(&self, peer: PeerId, data: Bytes) -> bool {
        let Some(conn) = self.transport.get_connection(peer) else {
            return false;
        };

        if conn.webrtc_connection_state() != WebrtcConnectionState::Connected {
            return false;
        }

        match conn.send_data(data).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Direct send to peer {peer} failed: {e:?}");
                false
            }
        }
    }

    /// Apply one signal addressed to the local peer.
    pub async fn handle_signal(&self, record: &SignalRecord) -> Result<()> {
        if record.receiver_id != self.local_id() {
            tracing::debug!("Ignoring signal addressed to {}", record.receiver_id);
            return Ok(());
        }

        let peer = record.sender_id;
        match &record.payload {
            SignalPayload::Offer { sdp } => {
                let answer = match self
                    .transport
                    .answer_remote_connection(peer, self.callback()?, sdp)
                    .await
                {
                    Ok(answer) => answer,
                    Err(Error::AlreadyConnected) => {
                        tracing::debug!("Ignoring offer from already connected peer {peer}");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                self.transport.send_signal(peer, answer).await
            }
            SignalPayload::Answer { sdp } => {
                self.transport.accept_remote_connection(peer, sdp).await
            }
            SignalPayload::IceCandidate(candidate) => {
                self.transport
                    .add_remote_candidate(peer, candidate.clone())
                    .await
            }
        }
    }

    /// Drain signals that queued up while offline, then keep applying live
    /// ones until the signal store shuts down.
    pub async fn listen(self: Arc<Self>) {
        let mut live = self.transport.signals.subscribe(self.local_id());

        match self.transport.signals.pending_for(self.local_id()).await {
            Ok(pending) => {
                for record in pending {
                    if let Err(e) = self.handle_signal(&record).await {
                        tracing::warn!(
                            "Failed on handling pending signal from {}: {e}",
                            record.sender_id
                        );
                    }
                }
            }
            Err(e) => tracing::warn!("Failed on draining pending signals: {e}"),
        }

        loop {
            match live.recv().await {
                Ok(record) => {
                    if let Err(e) = self.handle_signal(&record).await {
                        tracing::warn!(
                            "Failed on handling signal from {}: {e}",
                            record.sender_id
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Signal listener lagged by {n} records");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Disconnect `peer`. Clears the pending timeout and the attempt budget,
    /// then closes the connection. The bandwidth profile is kept so a later
    /// reconnect starts from the learned limits.
    pub async fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.transport.timeouts.clear(peer);
        self.transport.retry.reset(peer);
        self.transport.close_connection(peer).await
    }

    /// Fold a quality sample into the bandwidth profile of `peer` and push
    /// the new limits onto its live connection, if any.
    pub fn record_quality(&self, peer: PeerId, sample: QualitySample) -> ChannelBandwidth {
        let limits = self.transport.bandwidth.adjust(peer, sample);

        if let Some(conn) = self.transport.get_connection(peer) {
            if conn.webrtc_connection_state() == WebrtcConnectionState::Connected {
                self.transport.bandwidth.apply(peer, &conn.connection);
            }
        }

        limits
    }
}
