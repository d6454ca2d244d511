//! Per-connection bridge between backend events and the user callback.

use bytes::Bytes;

use crate::core::callback::BoxedTransportCallback;
use crate::core::transport::IceCandidateInit;
use crate::core::transport::TransportMessage;
use crate::core::transport::WebrtcConnectionState;
use crate::notifier::Notifier;

/// [InnerTransportCallback] binds a [BoxedTransportCallback] to one
/// connection id and absorbs callback errors so backend event loops never
/// unwind.
pub struct InnerTransportCallback {
    /// Id of the connection this callback serves.
    pub cid: String,
    callback: BoxedTransportCallback,
    data_channel_state_notifier: Notifier,
}

impl InnerTransportCallback {
    /// Create a new [InnerTransportCallback].
    pub fn new(
        cid: &str,
        callback: BoxedTransportCallback,
        data_channel_state_notifier: Notifier,
    ) -> Self {
        Self {
            cid: cid.to_string(),
            callback,
            data_channel_state_notifier,
        }
    }

    /// Wake tasks blocked on the data channel opening.
    pub fn on_data_channel_open(&self) {
        self.data_channel_state_notifier.wake()
    }

    /// Wake tasks blocked on the data channel, which will then observe the
    /// closed state.
    pub fn on_data_channel_close(&self) {
        self.data_channel_state_notifier.wake()
    }

    /// Decode a binary frame from the data channel and dispatch it.
    pub async fn on_message(&self, msg: &Bytes) {
        match bincode::deserialize(msg) {
            Ok(m) => self.handle_message(&m).await,
            Err(e) => {
                tracing::error!("Dropping undecodable data channel frame: {e:?}");
            }
        };
    }

    /// Forward a connection state change to the user callback.
    pub async fn on_peer_connection_state_change(&self, s: WebrtcConnectionState) {
        if let Err(e) = self
            .callback
            .on_peer_connection_state_change(&self.cid, s)
            .await
        {
            tracing::error!("on_peer_connection_state_change callback errored: {e:?}");
        }
    }

    /// Forward a locally gathered ICE candidate to the user callback, which
    /// relays it to the remote peer.
    pub async fn on_ice_candidate(&self, candidate: IceCandidateInit) {
        if let Err(e) = self.callback.on_ice_candidate(&self.cid, candidate).await {
            tracing::error!("on_ice_candidate callback errored: {e:?}");
        }
    }

    async fn handle_message(&self, msg: &TransportMessage) {
        match msg {
            TransportMessage::Custom(bytes) => {
                if let Err(e) = self.callback.on_message(&self.cid, bytes).await {
                    tracing::error!("on_message callback errored: {e:?}")
                }
            }
        }
    }
}
