//! Backend-agnostic connection and transport traits.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::connection_ref::ConnectionRef;
use crate::core::callback::BoxedTransportCallback;

/// The lifecycle states of a connection, mirroring the underlying
/// webrtc peer connection state.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WebrtcConnectionState {
    /// The state is unknown or not yet determined.
    #[default]
    Unspecified,
    /// The connection object was created but negotiation has not started.
    New,
    /// The handshake is in progress.
    Connecting,
    /// The connection is established and usable.
    Connected,
    /// The connection lost connectivity and may recover.
    Disconnected,
    /// The connection failed permanently.
    Failed,
    /// The connection was closed locally.
    Closed,
}

/// Messages sent over a data channel. Encoded with bincode on the wire.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub enum TransportMessage {
    /// An opaque payload chosen by the transport user.
    Custom(Vec<u8>),
}

/// A trickled ICE candidate, relayed out-of-band between peers while the
/// handshake is still in progress.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidateInit {
    /// The candidate-attribute line of the candidate.
    pub candidate: String,
    /// The media stream identification tag of the candidate.
    pub sdp_mid: Option<String>,
    /// The index of the media description the candidate belongs to.
    pub sdp_mline_index: Option<u16>,
}

/// Bitrate bounds applied to the outgoing channels of a connection.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBandwidth {
    /// Lower bitrate bound in kbps.
    pub min_kbps: u32,
    /// Upper bitrate bound in kbps.
    pub max_kbps: u32,
    /// Initial bitrate in kbps.
    pub start_kbps: u32,
}

/// The [ConnectionInterface] trait defines how to make a webrtc handshake
/// with a remote peer and exchange data channel messages afterwards.
///
/// The handshake flow between two peers is:
/// offer side `webrtc_create_offer` -> answer side `webrtc_answer_offer` ->
/// offer side `webrtc_accept_answer`, with ICE candidates trickling through
/// [TransportCallback::on_ice_candidate](crate::core::callback::TransportCallback::on_ice_candidate)
/// and [ConnectionInterface::webrtc_add_ice_candidate] in both directions.
#[async_trait]
pub trait ConnectionInterface: Send + Sync {
    /// The type of the SDP exchanged during the handshake.
    type Sdp: Serialize + DeserializeOwned + Send + Sync;
    /// The error type returned by this connection.
    type Error: std::fmt::Debug;

    /// Send a [TransportMessage] to the remote peer.
    async fn send_message(&self, msg: TransportMessage) -> Result<(), Self::Error>;

    /// The current state of this connection.
    fn webrtc_connection_state(&self) -> WebrtcConnectionState;

    /// Create the local offer and begin candidate gathering.
    async fn webrtc_create_offer(&self) -> Result<Self::Sdp, Self::Error>;

    /// Apply a remote offer and produce the local answer.
    async fn webrtc_answer_offer(&self, offer: Self::Sdp) -> Result<Self::Sdp, Self::Error>;

    /// Apply the remote answer, completing the handshake from the offer side.
    async fn webrtc_accept_answer(&self, answer: Self::Sdp) -> Result<(), Self::Error>;

    /// Apply an ICE candidate relayed from the remote peer.
    async fn webrtc_add_ice_candidate(&self, candidate: IceCandidateInit)
        -> Result<(), Self::Error>;

    /// Wait until every data channel of this connection is open.
    async fn webrtc_wait_for_data_channel_open(&self) -> Result<(), Self::Error>;

    /// Record new bitrate bounds for the outgoing channels.
    fn apply_bandwidth(&self, limits: &ChannelBandwidth);

    /// The bitrate bounds currently applied to this connection, if any.
    fn channel_bandwidth(&self) -> Option<ChannelBandwidth>;

    /// Close this connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// True when the connection state machine sits in
    /// [WebrtcConnectionState::Connected].
    fn is_connected(&self) -> bool {
        self.webrtc_connection_state() == WebrtcConnectionState::Connected
    }
}

/// The [TransportInterface] trait manages the connections of all known peers.
/// Implementations must guarantee that at most one live connection exists per
/// peer id at any time.
#[async_trait]
pub trait TransportInterface: Send + Sync {
    /// The connection type produced by this transport.
    type Connection: ConnectionInterface<Error = Self::Error>;
    /// The error type returned by this transport.
    type Error: std::fmt::Debug;

    /// Create a new connection for the peer, wiring `callback` to its events.
    /// Fails with a duplicate-connection error while a live connection for
    /// the same peer exists.
    async fn new_connection(
        &self,
        cid: &str,
        callback: BoxedTransportCallback,
    ) -> Result<(), Self::Error>;

    /// Close the connection of the peer and release it from the pool.
    async fn close_connection(&self, cid: &str) -> Result<(), Self::Error>;

    /// Get a weak reference to the connection of the peer.
    fn connection(&self, cid: &str) -> Result<ConnectionRef<Self::Connection>, Self::Error>;

    /// Get weak references to all pooled connections.
    fn connections(&self) -> Vec<(String, ConnectionRef<Self::Connection>)>;

    /// Get the ids of all pooled connections.
    fn connection_ids(&self) -> Vec<String>;
}
