use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use backchannel_transport::connection_ref::ConnectionRef;
#[cfg(feature = "dummy")]
pub use backchannel_transport::connections::DummyConnection as ConnectionOwner;
#[cfg(feature = "dummy")]
pub use backchannel_transport::connections::DummyTransport as Transport;
#[cfg(not(feature = "dummy"))]
use backchannel_transport::connections::WebrtcConnection as ConnectionOwner;
#[cfg(not(feature = "dummy"))]
use backchannel_transport::connections::WebrtcTransport as Transport;
use backchannel_transport::core::transport::ConnectionInterface;
use backchannel_transport::core::transport::IceCandidateInit;
use backchannel_transport::core::transport::TransportInterface;
use backchannel_transport::core::transport::TransportMessage;
use backchannel_transport::core::transport::WebrtcConnectionState;
use bytes::Bytes;

use crate::error::Error;
use crate::error::Result;
use crate::health::BandwidthManager;
use crate::health::RetryManager;
use crate::health::TimeoutManager;
use crate::peer_id::PeerId;
use crate::peers::callback::InnerPeerCallback;
use crate::signaling::SignalPayload;
use crate::signaling::SignalRecord;
use crate::store::SignalStore;

/// Connection pool plus the health managers consulted around every
/// connection attempt. Signaling material goes out through the relay's
/// [SignalStore].
pub struct PeerTransport {
    pub(crate) local_id: PeerId,
    transport: Transport,
    pub(crate) signals: Arc<dyn SignalStore>,
    pub(crate) retry: RetryManager,
    pub(crate) timeouts: TimeoutManager,
    pub(crate) bandwidth: BandwidthManager,
    pub(crate) connect_timeout: Duration,
}

/// One live connection of the pool.
#[derive(Clone)]
pub struct PeerConnection {
    peer: PeerId,
    /// The underlying pooled connection.
    pub connection: ConnectionRef<ConnectionOwner>,
}

impl PeerTransport {
    /// Create a new transport around a fresh connection pool.
    pub fn new(
        local_id: PeerId,
        ice_servers: &str,
        external_address: Option<String>,
        signals: Arc<dyn SignalStore>,
        retry: RetryManager,
        bandwidth: BandwidthManager,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            local_id,
            transport: Transport::new(ice_servers, external_address)?,
            signals,
            retry,
            timeouts: TimeoutManager::new(),
            bandwidth,
            connect_timeout,
        })
    }

    /// Create new connection that will be handled by the manager.
    pub async fn new_connection(&self, peer: PeerId, callback: InnerPeerCallback) -> Result<()> {
        if peer == self.local_id {
            return Ok(());
        }

        let cid = peer.to_string();
        self.transport
            .new_connection(&cid, Box::new(callback))
            .await
            .map_err(Error::Transport)
    }

    /// Get connection by peer id.
    pub fn get_connection(&self, peer: PeerId) -> Option<PeerConnection> {
        self.transport
            .connection(&peer.to_string())
            .map(|conn| PeerConnection {
                peer,
                connection: conn,
            })
            .ok()
    }

    /// Get all connections in transport.
    pub fn get_connections(&self) -> Vec<(PeerId, PeerConnection)> {
        self.transport
            .connections()
            .into_iter()
            .filter_map(|(k, v)| {
                PeerId::from_str(&k).ok().map(|peer| {
                    (peer, PeerConnection {
                        peer,
                        connection: v,
                    })
                })
            })
            .collect()
    }

    /// Get peer ids of all connections in transport.
    pub fn get_connection_ids(&self) -> Vec<PeerId> {
        self.transport
            .connection_ids()
            .into_iter()
            .filter_map(|k| PeerId::from_str(&k).ok())
            .collect()
    }

    /// Close the connection of `peer` and release it from the pool. The
    /// attempt budget of the peer is left untouched.
    pub async fn close_connection(&self, peer: PeerId) -> Result<()> {
        self.transport
            .close_connection(&peer.to_string())
            .await
            .map_err(|e| e.into())
    }

    /// Get connection by peer id and check if its data channel is open.
    /// This method will return None if the connection is not found.
    /// This method will wait_for_data_channel_open.
    /// If the channel does not open in time the connection is closed and
    /// None is returned.
    pub async fn get_and_check_connection(&self, peer: PeerId) -> Option<PeerConnection> {
        let Some(conn) = self.get_connection(peer) else {
            return None;
        };

        if let Err(e) = conn.connection.webrtc_wait_for_data_channel_open().await {
            tracing::warn!(
                "[get_and_check_connection] connection {peer} data channel not open, will be dropped, reason: {e:?}"
            );

            if let Err(e) = self.close_connection(peer).await {
                tracing::error!("Failed on close connection {peer}: {e:?}");
            }

            return None;
        };

        Some(conn)
    }

    /// Create new connection and its offer.
    pub async fn prepare_connection_offer(
        &self,
        peer: PeerId,
        callback: InnerPeerCallback,
    ) -> Result<SignalPayload> {
        if self.get_and_check_connection(peer).await.is_some() {
            return Err(Error::AlreadyConnected);
        };

        self.new_connection(peer, callback).await?;
        let conn = self
            .transport
            .connection(&peer.to_string())
            .map_err(Error::Transport)?;

        let sdp = conn.webrtc_create_offer().await.map_err(Error::Transport)?;

        Ok(SignalPayload::Offer { sdp })
    }

    /// Answer the offer of remote connection.
    pub async fn answer_remote_connection(
        &self,
        peer: PeerId,
        callback: InnerPeerCallback,
        sdp: &str,
    ) -> Result<SignalPayload> {
        if let Some(peer_conn) = self.get_connection(peer) {
            // Solve the scenario of creating offers simultaneously.
            //
            // When both sides create an offer at the same time and trigger
            // answering on the other side, each finds an existing New state
            // connection when answering, which would prevent creating the
            // connection that answers the offer.
            //
            // The party with the larger id should abandon its own offer and
            // instead answer the offer of the other party. The party with
            // the smaller id should refuse to answer and report an
            // Error::AlreadyConnected error.
            if peer_conn.connection.webrtc_connection_state() == WebrtcConnectionState::New {
                if self.local_id > peer {
                    // this connection will be replaced by the answering
                    // connection created below
                    self.close_connection(peer).await?;
                } else {
                    // ignore remote offer, and refuse to answer remote offer
                    return Err(Error::AlreadyConnected);
                }
            } else if self.get_and_check_connection(peer).await.is_some() {
                return Err(Error::AlreadyConnected);
            };
        };

        self.new_connection(peer, callback).await?;
        let conn = self
            .transport
            .connection(&peer.to_string())
            .map_err(Error::Transport)?;

        let answer = conn
            .webrtc_answer_offer(sdp.to_string())
            .await
            .map_err(Error::Transport)?;

        Ok(SignalPayload::Answer { sdp: answer })
    }

    /// Accept the answer of remote connection.
    pub async fn accept_remote_connection(&self, peer: PeerId, sdp: &str) -> Result<()> {
        let conn = self
            .transport
            .connection(&peer.to_string())
            .map_err(Error::Transport)?;
        conn.webrtc_accept_answer(sdp.to_string())
            .await
            .map_err(Error::Transport)?;

        Ok(())
    }

    /// Apply an ICE candidate relayed from `peer`. Candidates for unknown
    /// connections are dropped; stale ones are normal after a close.
    pub async fn add_remote_candidate(
        &self,
        peer: PeerId,
        candidate: IceCandidateInit,
    ) -> Result<()> {
        let Some(conn) = self.get_connection(peer) else {
            tracing::debug!("Dropping ICE candidate for unknown connection {peer}");
            return Ok(());
        };

        conn.connection
            .webrtc_add_ice_candidate(candidate)
            .await
            .map_err(Error::Transport)
    }

    /// Relay connection material to `receiver` through the signal store.
    pub async fn send_signal(&self, receiver: PeerId, payload: SignalPayload) -> Result<()> {
        let record = SignalRecord::new(self.local_id, receiver, payload);
        self.signals.insert(&record).await
    }
}

impl PeerConnection {
    /// Send a binary frame over the data channel.
    pub async fn send_data(&self, data: Bytes) -> Result<()> {
        self.connection
            .send_message(TransportMessage::Custom(data.to_vec()))
            .await
            .map_err(|e| e.into())
    }

    /// The current state of the underlying connection.
    pub fn webrtc_connection_state(&self) -> WebrtcConnectionState {
        self.connection.webrtc_connection_state()
    }

    /// The peer this connection belongs to.
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}
