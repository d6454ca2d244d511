//! Callback traits for handling connection events.

use async_trait::async_trait;

use crate::core::transport::IceCandidateInit;
use crate::core::transport::WebrtcConnectionState;

/// Errors returned by user callbacks are opaque to the transport. They are
/// logged and never interrupt the connection.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Implemented by the transport user to handle the events of a connection.
/// All methods default to no-ops so implementors only override what they need.
#[async_trait]
pub trait TransportCallback: Send + Sync {
    /// Invoked on a binary message arrival over the data channel.
    async fn on_message(&self, _cid: &str, _msg: &[u8]) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Invoked when the state of the connection has changed.
    async fn on_peer_connection_state_change(
        &self,
        _cid: &str,
        _state: WebrtcConnectionState,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Invoked when the local agent discovers an ICE candidate that should be
    /// relayed to the remote peer.
    async fn on_ice_candidate(
        &self,
        _cid: &str,
        _candidate: IceCandidateInit,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Box this callback for handing to a transport.
    fn boxed(self) -> BoxedTransportCallback
    where Self: Sized + 'static {
        Box::new(self)
    }
}

/// Boxed [TransportCallback].
pub type BoxedTransportCallback = Box<dyn TransportCallback>;
