//! Callback interface for the peer manager.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use backchannel_transport::core::callback::CallbackError;
use backchannel_transport::core::callback::TransportCallback;
use backchannel_transport::core::transport::IceCandidateInit;
use backchannel_transport::core::transport::WebrtcConnectionState;

use crate::peer_id::PeerId;
use crate::peers::transport::PeerTransport;
use crate::signaling::SignalPayload;

/// The [InnerPeerCallback] will accept a shared [PeerCallback] trait object.
pub type SharedPeerCallback = Arc<dyn PeerCallback + Send + Sync>;

/// Used to notify the application of events that occur around peer
/// connections.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PeerEvent {
    /// Indicates that the connection state of a peer has changed.
    ConnectionStateChange {
        /// The id of the remote peer.
        peer: PeerId,
        /// The final state of the connection.
        state: WebrtcConnectionState,
    },
    /// The peer exhausted its connection attempt budget and its connection
    /// was closed. Traffic towards it should use the relay until a later
    /// attempt succeeds.
    ConnectionAbandoned {
        /// The id of the remote peer.
        peer: PeerId,
    },
}

/// Any object that implements this trait can be used as a callback for the
/// peer manager.
#[async_trait]
pub trait PeerCallback {
    /// This method is invoked when a data channel frame arrives from a
    /// connected peer.
    async fn on_frame(&self, _peer: PeerId, _frame: &[u8]) -> Result<(), CallbackError> {
        Ok(())
    }

    /// This method is invoked after the manager finishes its own handling
    /// of a connection event.
    async fn on_event(&self, _event: &PeerEvent) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// [InnerPeerCallback] wraps a [SharedPeerCallback] with the connection
/// bookkeeping that must run before the application sees an event.
pub struct InnerPeerCallback {
    transport: Arc<PeerTransport>,
    callback: SharedPeerCallback,
}

impl InnerPeerCallback {
    /// Create a new [InnerPeerCallback] with the provided transport and
    /// callback.
    pub fn new(transport: Arc<PeerTransport>, callback: SharedPeerCallback) -> Self {
        Self {
            transport,
            callback,
        }
    }
}

#[async_trait]
impl TransportCallback for InnerPeerCallback {
    async fn on_message(&self, cid: &str, msg: &[u8]) -> Result<(), CallbackError> {
        let Ok(peer) = PeerId::from_str(cid) else {
            tracing::warn!("on_message parse peer id failed: {}", cid);
            return Ok(());
        };

        self.callback.on_frame(peer, msg).await
    }

    async fn on_peer_connection_state_change(
        &self,
        cid: &str,
        s: WebrtcConnectionState,
    ) -> Result<(), CallbackError> {
        let Ok(peer) = PeerId::from_str(cid) else {
            tracing::warn!("on_peer_connection_state_change parse peer id failed: {}", cid);
            return Ok(());
        };

        match s {
            WebrtcConnectionState::Connected => {
                self.transport.timeouts.clear(peer);
                self.transport.retry.reset(peer);
                if let Some(conn) = self.transport.get_connection(peer) {
                    self.transport.bandwidth.apply(peer, &conn.connection);
                }
            }
            WebrtcConnectionState::Failed => {
                self.transport.timeouts.clear(peer);
                self.transport.retry.increment(peer);
                self.transport.retry.schedule_reset(peer);
                if self.transport.retry.has_reached_max(peer) {
                    tracing::warn!(
                        "Abandoning connection to peer {peer} after exhausting attempts"
                    );
                    if let Err(e) = self.transport.close_connection(peer).await {
                        tracing::debug!("Failed on close abandoned connection {peer}: {e:?}");
                    }
                    self.callback
                        .on_event(&PeerEvent::ConnectionAbandoned { peer })
                        .await?;
                }
            }
            WebrtcConnectionState::Disconnected | WebrtcConnectionState::Closed => {
                self.transport.timeouts.clear(peer);
            }
            _ => {}
        };

        self.callback
            .on_event(&PeerEvent::ConnectionStateChange { peer, state: s })
            .await
    }

    async fn on_ice_candidate(
        &self,
        cid: &str,
        candidate: IceCandidateInit,
    ) -> Result<(), CallbackError> {
        let Ok(peer) = PeerId::from_str(cid) else {
            tracing::warn!("on_ice_candidate parse peer id failed: {}", cid);
            return Ok(());
        };

        self.transport
            .send_signal(peer, SignalPayload::IceCandidate(candidate))
            .await
            .map_err(|e| e.into())
    }
}
