//! Weak handles to pooled connections.

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::transport::ChannelBandwidth;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::IceCandidateInit;
use crate::core::transport::TransportMessage;
use crate::core::transport::WebrtcConnectionState;
use crate::error::Error;
use crate::error::Result;

/// The [ConnectionRef] is a weak reference to a connection and implements the
/// [ConnectionInterface] trait by delegation. When the underlying connection
/// is released from the pool, its methods return [Error::ConnectionReleased].
pub struct ConnectionRef<C> {
    cid: String,
    conn: Weak<C>,
}

impl<C> Clone for ConnectionRef<C> {
    fn clone(&self) -> Self {
        Self {
            cid: self.cid.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl<C> ConnectionRef<C> {
    /// Create a new connection reference.
    pub fn new(cid: &str, conn: &Arc<C>) -> Self {
        Self {
            cid: cid.to_string(),
            conn: Arc::downgrade(conn),
        }
    }

    /// Upgrade to a strong reference, failing if the connection was released.
    pub fn upgrade(&self) -> Result<Arc<C>> {
        match self.conn.upgrade() {
            Some(conn) => Ok(conn),
            None => Err(Error::ConnectionReleased(self.cid.clone())),
        }
    }
}

#[async_trait]
impl<C, S> ConnectionInterface for ConnectionRef<C>
where
    C: ConnectionInterface<Error = Error, Sdp = S> + Send + Sync,
    for<'async_trait> S: Serialize + DeserializeOwned + Send + Sync + 'async_trait,
{
    type Sdp = C::Sdp;
    type Error = C::Error;

    async fn send_message(&self, msg: TransportMessage) -> Result<()> {
        self.upgrade()?.send_message(msg).await
    }

    fn webrtc_connection_state(&self) -> WebrtcConnectionState {
        self.upgrade()
            .map(|c| c.webrtc_connection_state())
            .unwrap_or(WebrtcConnectionState::Closed)
    }

    async fn webrtc_create_offer(&self) -> Result<Self::Sdp> {
        self.upgrade()?.webrtc_create_offer().await
    }

    async fn webrtc_answer_offer(&self, offer: Self::Sdp) -> Result<Self::Sdp> {
        self.upgrade()?.webrtc_answer_offer(offer).await
    }

    async fn webrtc_accept_answer(&self, answer: Self::Sdp) -> Result<()> {
        self.upgrade()?.webrtc_accept_answer(answer).await
    }

    async fn webrtc_add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        self.upgrade()?.webrtc_add_ice_candidate(candidate).await
    }

    async fn webrtc_wait_for_data_channel_open(&self) -> Result<()> {
        self.upgrade()?.webrtc_wait_for_data_channel_open().await
    }

    fn apply_bandwidth(&self, limits: &ChannelBandwidth) {
        if let Ok(conn) = self.upgrade() {
            conn.apply_bandwidth(limits);
        }
    }

    fn channel_bandwidth(&self) -> Option<ChannelBandwidth> {
        self.upgrade().ok().and_then(|c| c.channel_bandwidth())
    }

    async fn close(&self) -> Result<()> {
        self.upgrade()?.close().await
    }
}

#[cfg(test)]
#[cfg(feature = "dummy")]
mod tests {
    use super::*;
    use crate::core::callback::TransportCallback;
    use crate::core::transport::TransportInterface;
    use crate::connections::DummyTransport;

    struct TestCallback;
    impl TransportCallback for TestCallback {}

    #[tokio::test]
    async fn test_connection_ref_release() {
        let transport = DummyTransport::new("stun://stun.l.google.com:19302", None).unwrap();
        transport
            .new_connection("test", TestCallback.boxed())
            .await
            .unwrap();

        let conn_ref = transport.connection("test").unwrap();
        assert!(conn_ref.upgrade().is_ok());

        transport.close_connection("test").await.unwrap();
        assert!(matches!(
            conn_ref.upgrade(),
            Err(Error::ConnectionReleased(_))
        ));
        assert_eq!(
            conn_ref.webrtc_connection_state(),
            WebrtcConnectionState::Closed
        );
    }
}
