use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::callback::InnerTransportCallback;
use crate::connection_ref::ConnectionRef;
use crate::core::callback::BoxedTransportCallback;
use crate::core::pool::MessageSenderPool;
use crate::core::pool::RoundRobinPool;
use crate::core::pool::StatusPool;
use crate::core::transport::ChannelBandwidth;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::IceCandidateInit;
use crate::core::transport::TransportInterface;
use crate::core::transport::TransportMessage;
use crate::core::transport::WebrtcConnectionState;
use crate::error::Error;
use crate::error::Result;
use crate::ice_server::IceCredentialType;
use crate::ice_server::IceServer;
use crate::notifier::Notifier;
use crate::pool::Pool;

const WEBRTC_WAIT_FOR_DATA_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(8);
/// Data channels opened per connection.
const DATA_CHANNEL_POOL_SIZE: u8 = 4;

#[async_trait]
impl MessageSenderPool<Arc<RTCDataChannel>> for RoundRobinPool<Arc<RTCDataChannel>> {
    type Message = TransportMessage;
    async fn send(&self, msg: TransportMessage) -> Result<()> {
        let channel = self.select()?;
        let data = bincode::serialize(&msg).map(Bytes::from)?;
        if let Err(e) = channel.send(&data).await {
            tracing::error!("Data channel send of {} bytes failed: {e:?}", data.len());
            return Err(e.into());
        }
        Ok(())
    }
}

impl StatusPool<Arc<RTCDataChannel>> for RoundRobinPool<Arc<RTCDataChannel>> {
    fn all_ready(&self) -> Result<bool> {
        self.all(|c| c.ready_state() == RTCDataChannelState::Open)
    }
}

/// The native backend, backed by the webrtc-rs library.
pub struct WebrtcConnection {
    webrtc_conn: RTCPeerConnection,
    webrtc_data_channel: Arc<RoundRobinPool<Arc<RTCDataChannel>>>,
    webrtc_data_channel_state_notifier: Notifier,
    bandwidth: Mutex<Option<ChannelBandwidth>>,
}

/// [WebrtcTransport] creates, hands out, and closes [WebrtcConnection]s,
/// one per remote peer.
pub struct WebrtcTransport {
    ice_servers: Vec<IceServer>,
    external_address: Option<String>,
    pool: Pool<WebrtcConnection>,
}

impl WebrtcConnection {
    fn new(
        webrtc_conn: RTCPeerConnection,
        webrtc_data_channel: Arc<RoundRobinPool<Arc<RTCDataChannel>>>,
        webrtc_data_channel_state_notifier: Notifier,
    ) -> Self {
        Self {
            webrtc_conn,
            webrtc_data_channel,
            webrtc_data_channel_state_notifier,
            bandwidth: Mutex::new(None),
        }
    }

    /// Candidates trickle to the remote peer separately, so the local
    /// description is usable as soon as it is set.
    async fn local_sdp(&self) -> Result<String> {
        Ok(self
            .webrtc_conn
            .local_description()
            .await
            .ok_or(Error::LocalSdpGeneration(
                "no local description set".to_string(),
            ))?
            .sdp)
    }
}

impl WebrtcTransport {
    /// Create a new [WebrtcTransport] instance.
    pub fn new(ice_servers: &str, external_address: Option<String>) -> Result<Self> {
        let ice_servers = IceServer::vec_from_str(ice_servers)?;

        Ok(Self {
            ice_servers,
            external_address,
            pool: Pool::new(),
        })
    }
}

#[async_trait]
impl ConnectionInterface for WebrtcConnection {
    type Sdp = String;
    type Error = Error;

    async fn send_message(&self, msg: TransportMessage) -> Result<()> {
        self.webrtc_wait_for_data_channel_open().await?;
        self.webrtc_data_channel.send(msg).await
    }

    fn webrtc_connection_state(&self) -> WebrtcConnectionState {
        self.webrtc_conn.connection_state().into()
    }

    async fn webrtc_create_offer(&self) -> Result<Self::Sdp> {
        let offer = self.webrtc_conn.create_offer(None).await?;
        self.webrtc_conn.set_local_description(offer).await?;

        self.local_sdp().await
    }

    async fn webrtc_answer_offer(&self, offer: Self::Sdp) -> Result<Self::Sdp> {
        tracing::debug!("answering inbound offer: {offer:?}");
        let offer = RTCSessionDescription::offer(offer)?;
        self.webrtc_conn.set_remote_description(offer).await?;

        let answer = self.webrtc_conn.create_answer(None).await?;
        self.webrtc_conn.set_local_description(answer).await?;

        self.local_sdp().await
    }

    async fn webrtc_accept_answer(&self, answer: Self::Sdp) -> Result<()> {
        tracing::debug!("accepting remote answer: {answer:?}");
        let answer = RTCSessionDescription::answer(answer)?;
        self.webrtc_conn
            .set_remote_description(answer)
            .await
            .map_err(|e| e.into())
    }

    async fn webrtc_add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()> {
        tracing::debug!("adding remote ICE candidate: {candidate:?}");
        self.webrtc_conn
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| e.into())
    }

    async fn webrtc_wait_for_data_channel_open(&self) -> Result<()> {
        if matches!(
            self.webrtc_connection_state(),
            WebrtcConnectionState::Failed
                | WebrtcConnectionState::Closed
                | WebrtcConnectionState::Disconnected
        ) {
            return Err(Error::DataChannelOpen("connection is not usable".to_string()));
        }

        if self.webrtc_data_channel.all_ready()? {
            return Ok(());
        }

        self.webrtc_data_channel_state_notifier
            .set_timeout(WEBRTC_WAIT_FOR_DATA_CHANNEL_OPEN_TIMEOUT);
        self.webrtc_data_channel_state_notifier.clone().await;

        if self.webrtc_data_channel.all_ready()? {
            Ok(())
        } else {
            Err(Error::DataChannelOpen(format!(
                "DataChannel not open in {}s",
                WEBRTC_WAIT_FOR_DATA_CHANNEL_OPEN_TIMEOUT.as_secs()
            )))
        }
    }

    fn apply_bandwidth(&self, limits: &ChannelBandwidth) {
        let Ok(mut bandwidth) = self.bandwidth.lock() else {
            return;
        };
        tracing::debug!("apply_bandwidth, limits: {limits:?}");
        *bandwidth = Some(*limits);
    }

    fn channel_bandwidth(&self) -> Option<ChannelBandwidth> {
        self.bandwidth.lock().ok().and_then(|guard| *guard)
    }

    async fn close(&self) -> Result<()> {
        self.webrtc_conn.close().await.map_err(|e| e.into())
    }
}

#[async_trait]
impl TransportInterface for WebrtcTransport {
    type Connection = WebrtcConnection;
    type Error = Error;

    async fn new_connection(&self, cid: &str, callback: BoxedTransportCallback) -> Result<()> {
        if let Ok(existed_conn) = self.pool.connection(cid) {
            if matches!(
                existed_conn.webrtc_connection_state(),
                WebrtcConnectionState::New
                    | WebrtcConnectionState::Connecting
                    | WebrtcConnectionState::Connected
            ) {
                return Err(Error::ConnectionAlreadyExists(cid.to_string()));
            }
        }

        //
        // ICE configuration
        //
        let ice_servers = self.ice_servers.iter().cloned().map(|x| x.into()).collect();

        let webrtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let mut setting = webrtc::api::setting_engine::SettingEngine::default();
        if let Some(ref addr) = self.external_address {
            tracing::debug!("advertising external address {:?} as host candidate", addr);
            setting.set_nat_1to1_ips(vec![addr.to_string()], RTCIceCandidateType::Host);
        }
        setting.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

        let webrtc_api = webrtc::api::APIBuilder::new()
            .with_setting_engine(setting)
            .build();

        //
        // Peer connection
        //
        let webrtc_conn: RTCPeerConnection = webrtc_api.new_peer_connection(webrtc_config).await?;

        //
        // Event wiring
        //
        let webrtc_data_channel_state_notifier = Notifier::default();
        let inner_cb = Arc::new(InnerTransportCallback::new(
            cid,
            callback,
            webrtc_data_channel_state_notifier.clone(),
        ));

        // The pool elements are Arc-wrapped, so cloning shares the channels.
        let channel_pool = Arc::new(RoundRobinPool::default());
        let channel_pool_ref = channel_pool.clone();
        let data_channel_inner_cb = inner_cb.clone();
        webrtc_conn.on_data_channel(Box::new(move |d: Arc<RTCDataChannel>| {
            let d_label = d.label();
            let d_id = d.id();
            tracing::debug!("data channel announced: {d_label} {d_id}");

            let channel_pool = channel_pool_ref.clone();
            let on_open_inner_cb = data_channel_inner_cb.clone();
            d.on_open(Box::new(move || {
                Box::pin(async move {
                    // Open fires per channel; senders unblock only once the
                    // whole pool is open.
                    if let Ok(true) = channel_pool.all_ready() {
                        on_open_inner_cb.on_data_channel_open()
                    }
                })
            }));

            let on_close_inner_cb = data_channel_inner_cb.clone();
            d.on_close(Box::new(move || {
                on_close_inner_cb.on_data_channel_close();
                Box::pin(async move {})
            }));

            let on_message_inner_cb = data_channel_inner_cb.clone();
            d.on_message(Box::new(move |msg: DataChannelMessage| {
                tracing::debug!(
                    "inbound frame from {}: {:?}",
                    on_message_inner_cb.cid,
                    msg
                );

                let inner_cb = on_message_inner_cb.clone();

                Box::pin(async move {
                    inner_cb.on_message(&msg.data).await;
                })
            }));

            Box::pin(async move {})
        }));

        let peer_connection_state_change_inner_cb = inner_cb.clone();
        webrtc_conn.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("connection state changed: {s:?}");

            let inner_cb = peer_connection_state_change_inner_cb.clone();

            Box::pin(async move {
                inner_cb.on_peer_connection_state_change(s.into()).await;
            })
        }));

        let ice_candidate_inner_cb = inner_cb.clone();
        webrtc_conn.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let inner_cb = ice_candidate_inner_cb.clone();

            Box::pin(async move {
                let Some(c) = c else {
                    tracing::debug!("ICE gathering complete for {}", inner_cb.cid);
                    return;
                };

                match c.to_json() {
                    Ok(init) => {
                        inner_cb
                            .on_ice_candidate(IceCandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            })
                            .await
                    }
                    Err(e) => {
                        tracing::warn!("Failed to serialize ice candidate: {e:?}");
                    }
                }
            })
        }));

        //
        // Data channels
        //
        for i in 0..DATA_CHANNEL_POOL_SIZE {
            let ch = webrtc_conn
                .create_data_channel(&format!("backchannel_data_{}", i), None)
                .await?;
            channel_pool.push(ch)?;
        }

        //
        // Register with the pool
        //
        let conn = WebrtcConnection::new(
            webrtc_conn,
            channel_pool,
            webrtc_data_channel_state_notifier,
        );

        self.pool.safely_insert(cid, conn)?;
        Ok(())
    }

    async fn close_connection(&self, cid: &str) -> Result<()> {
        self.pool.safely_remove(cid).await
    }

    fn connection(&self, cid: &str) -> Result<ConnectionRef<Self::Connection>> {
        self.pool.connection(cid)
    }

    fn connections(&self) -> Vec<(String, ConnectionRef<Self::Connection>)> {
        self.pool.connections()
    }

    fn connection_ids(&self) -> Vec<String> {
        self.pool.connection_ids()
    }
}

impl From<IceCredentialType> for RTCIceCredentialType {
    fn from(s: IceCredentialType) -> Self {
        match s {
            IceCredentialType::Password => Self::Password,
            IceCredentialType::Oauth => Self::Oauth,
        }
    }
}

impl From<IceServer> for RTCIceServer {
    fn from(s: IceServer) -> Self {
        Self {
            urls: s.urls,
            username: s.username,
            credential: s.credential,
            credential_type: s.credential_type.into(),
        }
    }
}

impl From<RTCPeerConnectionState> for WebrtcConnectionState {
    fn from(s: RTCPeerConnectionState) -> Self {
        match s {
            RTCPeerConnectionState::Unspecified => Self::Unspecified,
            RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}
