#![warn(missing_docs)]

//! Processor of the backchannel node.
//!
//! [Processor] assembles the messaging core around one local account and
//! keeps it running: it answers incoming connection offers, applies relay
//! events, rotates session keys and purges stale signaling records.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backchannel_core::consts::SIGNAL_STALE_SECS;
use backchannel_core::crypto::IdentityKeypair;
use backchannel_core::crypto::IdentityPublic;
use backchannel_core::encryption::MessageCipher;
use backchannel_core::keys::KeyDirectory;
use backchannel_core::message::DecryptedMessage;
use backchannel_core::message::OutgoingMessage;
use backchannel_core::messenger::Delivery;
use backchannel_core::messenger::Messenger;
use backchannel_core::peer_id::PeerId;
use backchannel_core::peers::callback::PeerCallback;
use backchannel_core::peers::callback::PeerEvent;
use backchannel_core::peers::PeerManager;
use backchannel_core::peers::PeerManagerBuilder;
use backchannel_core::presence::PresenceService;
use backchannel_core::session::SessionKeyManager;
use backchannel_core::session::SessionPolicy;
use backchannel_core::store::KeyStore;
use backchannel_core::store::MemoryStore;
use backchannel_core::store::MessageStore;
use backchannel_core::store::PresenceChannel;
use backchannel_core::store::SignalStore;
use backchannel_transport::core::callback::CallbackError;
use backchannel_transport::core::transport::WebrtcConnectionState;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Error;
use crate::error::Result;

/// ProcessorConfig is usually serialized as yaml.
/// There is a `from_config` method in [ProcessorBuilder] used to initialize
/// the builder with one.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Stable id of the local account.
    peer_id: PeerId,
    /// ICE servers for webrtc
    ice_servers: String,
    /// External address for webrtc
    external_address: Option<String>,
    /// Long-lived identity of the local account.
    identity: IdentityKeypair,
    /// Interval of the maintenance task.
    maintenance_interval: Duration,
    /// Overrides the default outbound session key lifetime.
    session_lifetime: Option<Duration>,
    /// Overrides how long a rotated-out key still opens inbound envelopes.
    session_rotation_grace: Option<Duration>,
    /// Overrides the connection attempt budget per peer.
    max_connect_attempts: Option<u32>,
    /// Overrides how long a connection attempt may stay pending.
    connect_timeout: Option<Duration>,
}

impl ProcessorConfig {
    /// Creates a new `ProcessorConfig` instance without an external address.
    pub fn new(
        peer_id: PeerId,
        ice_servers: String,
        identity: IdentityKeypair,
        maintenance_interval: u64,
    ) -> Self {
        Self {
            peer_id,
            ice_servers,
            external_address: None,
            identity,
            maintenance_interval: Duration::from_secs(maintenance_interval),
            session_lifetime: None,
            session_rotation_grace: None,
            max_connect_attempts: None,
            connect_timeout: None,
        }
    }

    /// Creates a new `ProcessorConfig` instance with an external address.
    pub fn new_with_ext_addr(
        peer_id: PeerId,
        ice_servers: String,
        identity: IdentityKeypair,
        maintenance_interval: u64,
        external_address: String,
    ) -> Self {
        Self {
            external_address: Some(external_address),
            ..Self::new(peer_id, ice_servers, identity, maintenance_interval)
        }
    }

    /// Id of the local account.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Return associated [IdentityKeypair].
    pub fn identity(&self) -> &IdentityKeypair {
        &self.identity
    }
}

impl FromStr for ProcessorConfig {
    type Err = Error;
    /// Reveal config from serialized string.
    fn from_str(ser: &str) -> Result<Self> {
        serde_yaml::from_str::<ProcessorConfig>(ser).map_err(Error::SerdeYamlError)
    }
}

/// `ProcessorConfigSerialized` is a serialized version of `ProcessorConfig`.
/// Instead of holding an [IdentityKeypair] instance, it holds the hex encoded
/// identity secret.
#[derive(Serialize, Deserialize, Clone)]
pub struct ProcessorConfigSerialized {
    /// Stable id of the local account.
    peer_id: PeerId,
    /// A string representing ICE servers for WebRTC
    ice_servers: String,
    /// An optional string representing the external address for WebRTC
    external_address: Option<String>,
    /// Hex encoded identity secret.
    identity_secret: String,
    /// An unsigned integer representing the maintenance interval in seconds.
    maintenance_interval: u64,
    /// Outbound session key lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_lifetime: Option<u64>,
    /// Grace window of rotated-out keys in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    session_rotation_grace: Option<u64>,
    /// Connection attempt budget per peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_connect_attempts: Option<u32>,
    /// Seconds a connection attempt may stay pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    connect_timeout: Option<u64>,
}

impl ProcessorConfigSerialized {
    /// Creates a new `ProcessorConfigSerialized` instance without an external address.
    pub fn new(
        peer_id: PeerId,
        ice_servers: String,
        identity_secret: String,
        maintenance_interval: u64,
    ) -> Self {
        Self {
            peer_id,
            ice_servers,
            external_address: None,
            identity_secret,
            maintenance_interval,
            session_lifetime: None,
            session_rotation_grace: None,
            max_connect_attempts: None,
            connect_timeout: None,
        }
    }

    /// Set the external address.
    pub fn external_address(mut self, external_address: String) -> Self {
        self.external_address = Some(external_address);
        self
    }

    /// Override session key lifetime and rotation grace, in seconds.
    pub fn session_policy(mut self, lifetime: Option<u64>, rotation_grace: Option<u64>) -> Self {
        self.session_lifetime = lifetime;
        self.session_rotation_grace = rotation_grace;
        self
    }

    /// Override the connection attempt budget and pending timeout.
    pub fn connection_budget(mut self, max_attempts: Option<u32>, timeout: Option<u64>) -> Self {
        self.max_connect_attempts = max_attempts;
        self.connect_timeout = timeout;
        self
    }
}

impl TryFrom<ProcessorConfig> for ProcessorConfigSerialized {
    type Error = Error;
    fn try_from(ins: ProcessorConfig) -> Result<Self> {
        Ok(Self {
            peer_id: ins.peer_id,
            ice_servers: ins.ice_servers.clone(),
            external_address: ins.external_address.clone(),
            identity_secret: ins.identity.dump_secret_hex(),
            maintenance_interval: ins.maintenance_interval.as_secs(),
            session_lifetime: ins.session_lifetime.map(|d| d.as_secs()),
            session_rotation_grace: ins.session_rotation_grace.map(|d| d.as_secs()),
            max_connect_attempts: ins.max_connect_attempts,
            connect_timeout: ins.connect_timeout.map(|d| d.as_secs()),
        })
    }
}

impl TryFrom<ProcessorConfigSerialized> for ProcessorConfig {
    type Error = Error;
    fn try_from(ins: ProcessorConfigSerialized) -> Result<Self> {
        Ok(Self {
            peer_id: ins.peer_id,
            ice_servers: ins.ice_servers.clone(),
            external_address: ins.external_address.clone(),
            identity: IdentityKeypair::from_secret_hex(&ins.identity_secret)?,
            maintenance_interval: Duration::from_secs(ins.maintenance_interval),
            session_lifetime: ins.session_lifetime.map(Duration::from_secs),
            session_rotation_grace: ins.session_rotation_grace.map(Duration::from_secs),
            max_connect_attempts: ins.max_connect_attempts,
            connect_timeout: ins.connect_timeout.map(Duration::from_secs),
        })
    }
}

impl Serialize for ProcessorConfig {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> core::result::Result<S::Ok, S::Error> {
        let ins: ProcessorConfigSerialized = self
            .clone()
            .try_into()
            .map_err(|e: Error| serde::ser::Error::custom(e.to_string()))?;
        ProcessorConfigSerialized::serialize(&ins, serializer)
    }
}

impl<'de> serde::de::Deserialize<'de> for ProcessorConfig {
    fn deserialize<D>(deserializer: D) -> core::result::Result<Self, D::Error>
    where D: serde::Deserializer<'de> {
        match ProcessorConfigSerialized::deserialize(deserializer) {
            Ok(ins) => {
                let cfg: ProcessorConfig = ins
                    .try_into()
                    .map_err(|e: Error| serde::de::Error::custom(e.to_string()))?;
                Ok(cfg)
            }
            Err(e) => Err(e),
        }
    }
}

/// ProcessorBuilder is used to initialize a [Processor] instance.
pub struct ProcessorBuilder {
    config: ProcessorConfig,
    messages: Option<Arc<dyn MessageStore>>,
    signals: Option<Arc<dyn SignalStore>>,
    keys: Option<Arc<dyn KeyStore>>,
    presence: Option<Arc<dyn PresenceChannel>>,
}

/// Routes data channel frames into the messenger and logs connection
/// events.
struct MessengerRouter {
    messenger: Arc<Messenger>,
}

#[async_trait]
impl PeerCallback for MessengerRouter {
    async fn on_frame(
        &self,
        peer: PeerId,
        frame: &[u8],
    ) -> core::result::Result<(), CallbackError> {
        self.messenger
            .handle_direct_frame(peer, frame)
            .await
            .map_err(|e| e.into())
    }

    async fn on_event(&self, event: &PeerEvent) -> core::result::Result<(), CallbackError> {
        match event {
            PeerEvent::ConnectionStateChange { peer, state } => {
                tracing::debug!("Connection to peer {peer} changed state to {state:?}");
            }
            PeerEvent::ConnectionAbandoned { peer } => {
                tracing::info!(
                    "Attempt budget for peer {peer} is exhausted, traffic falls back to the relay"
                );
            }
            _ => {}
        }
        Ok(())
    }
}

impl ProcessorBuilder {
    /// initialize a [ProcessorBuilder] with a serialized [ProcessorConfig].
    pub fn from_serialized(config: &str) -> Result<Self> {
        let config =
            serde_yaml::from_str::<ProcessorConfig>(config).map_err(Error::SerdeYamlError)?;
        Self::from_config(&config)
    }

    /// initialize a [ProcessorBuilder] with a [ProcessorConfig].
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            messages: None,
            signals: None,
            keys: None,
            presence: None,
        })
    }

    /// Set the storage for the processor. One store backs messages,
    /// signaling, identity keys and presence alike.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where S: MessageStore + SignalStore + KeyStore + PresenceChannel + 'static {
        self.messages = Some(store.clone());
        self.signals = Some(store.clone());
        self.keys = Some(store.clone());
        self.presence = Some(store);
        self
    }

    /// Build the [Processor].
    pub fn build(self) -> Result<Processor> {
        let (messages, signals, keys, presence) =
            match (self.messages, self.signals, self.keys, self.presence) {
                (Some(messages), Some(signals), Some(keys), Some(presence)) => {
                    (messages, signals, keys, presence)
                }
                _ => {
                    let store = Arc::new(MemoryStore::new());
                    (
                        store.clone() as Arc<dyn MessageStore>,
                        store.clone() as Arc<dyn SignalStore>,
                        store.clone() as Arc<dyn KeyStore>,
                        store as Arc<dyn PresenceChannel>,
                    )
                }
            };

        let config = self.config;
        let mut policy = SessionPolicy {
            maintenance_interval: config.maintenance_interval,
            ..SessionPolicy::default()
        };
        if let Some(lifetime) = config.session_lifetime {
            policy.lifetime = lifetime;
        }
        if let Some(grace) = config.session_rotation_grace {
            policy.rotation_grace = grace;
        }

        let mut peers_builder =
            PeerManagerBuilder::new(&config.ice_servers, config.peer_id, signals.clone());
        if let Some(external_address) = config.external_address {
            peers_builder = peers_builder.external_address(external_address);
        }
        if let Some(max_attempts) = config.max_connect_attempts {
            peers_builder = peers_builder.max_attempts(max_attempts);
        }
        if let Some(timeout) = config.connect_timeout {
            peers_builder = peers_builder.connect_timeout(timeout);
        }
        let peers = Arc::new(peers_builder.build()?);

        let identity = Arc::new(config.identity);
        let identity_public = identity.public();
        let directory = Arc::new(KeyDirectory::new(keys.clone()));
        let sessions = Arc::new(SessionKeyManager::new(identity, directory, policy));
        let cipher = Arc::new(MessageCipher::new(sessions.clone()));
        let presence = Arc::new(PresenceService::new(config.peer_id, presence));

        let messenger = Arc::new(Messenger::new(peers.clone(), cipher, messages, presence));

        // The router needs the messenger, so the callback is bound after the
        // fact. No connection exists yet at this point.
        peers.set_callback(Arc::new(MessengerRouter {
            messenger: messenger.clone(),
        }))?;

        Ok(Processor {
            messenger,
            peers,
            sessions,
            keys,
            signals,
            identity_public,
            maintenance_interval: config.maintenance_interval,
        })
    }
}

/// Report of the running node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    /// Version of this build.
    pub version: String,
    /// Id of the local account.
    pub peer_id: PeerId,
    /// All pooled connections with their lifecycle state.
    pub connections: Vec<(PeerId, WebrtcConnectionState)>,
}

/// Processor for the backchannel node.
#[derive(Clone)]
pub struct Processor {
    /// Send and receive pipeline of the local account.
    pub messenger: Arc<Messenger>,
    /// Direct connection manager.
    pub peers: Arc<PeerManager>,
    /// Session key lifecycle of the local account.
    pub sessions: Arc<SessionKeyManager>,
    keys: Arc<dyn KeyStore>,
    signals: Arc<dyn SignalStore>,
    identity_public: IdentityPublic,
    maintenance_interval: Duration,
}

impl Processor {
    /// Get current peer id.
    pub fn local_id(&self) -> PeerId {
        self.messenger.local_id()
    }

    /// Publish the local identity key so other accounts can seal messages
    /// towards this one.
    pub async fn announce(&self) -> Result<()> {
        self.keys
            .publish(self.local_id(), self.identity_public)
            .await?;
        Ok(())
    }

    /// Run the node until `shutdown` fires: answer signaling addressed to
    /// the local peer, apply relay events, rotate expired session keys and
    /// purge stale signaling records.
    pub async fn listen(&self, shutdown: CancellationToken) {
        if let Err(e) = self.announce().await {
            tracing::error!("Failed on publishing the local identity key: {e}");
        }

        tokio::spawn(self.peers.clone().listen());
        tokio::spawn(self.messenger.clone().listen());

        let mut ticker = tokio::time::interval(self.maintenance_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.maintenance().await,
            }
        }
    }

    async fn maintenance(&self) {
        self.sessions.maintain().await;

        let cutoff = Utc::now() - chrono::Duration::seconds(SIGNAL_STALE_SECS as i64);
        match self.signals.delete_older_than(cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Purged {n} stale signaling records"),
            Err(e) => tracing::warn!("Failed on purging stale signaling records: {e}"),
        }
    }

    /// Dial a peer. Once its attempt budget is exhausted this keeps
    /// failing until the budget decays; sends fall back to the relay in
    /// the meantime.
    pub async fn connect(&self, peer: PeerId) -> Result<()> {
        self.peers.connect(peer).await?;
        Ok(())
    }

    /// Disconnect a peer.
    pub async fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.peers.disconnect(peer).await?;
        Ok(())
    }

    /// Send a message to a peer.
    pub async fn send_message(&self, recipient: PeerId, text: &str) -> Result<Delivery> {
        tracing::info!(
            "send_message, recipient: {}, message size: {:?}",
            recipient,
            text.len(),
        );

        let delivery = self
            .messenger
            .send_message(OutgoingMessage {
                content: text.to_string(),
                recipient_id: recipient,
                group_id: None,
            })
            .await?;
        Ok(delivery)
    }

    /// Send one sealed copy of `text` to every other member of a group
    /// conversation. Group copies always travel through the relay.
    pub async fn send_group_message(
        &self,
        group_id: Uuid,
        members: &[PeerId],
        text: &str,
    ) -> Result<()> {
        for member in members {
            if *member == self.local_id() {
                continue;
            }
            self.messenger
                .send_message(OutgoingMessage {
                    content: text.to_string(),
                    recipient_id: *member,
                    group_id: Some(group_id),
                })
                .await?;
        }
        Ok(())
    }

    /// The most recent `limit` relayed messages exchanged with `peer`,
    /// oldest first.
    pub async fn history(&self, peer: PeerId, limit: usize) -> Result<Vec<DecryptedMessage>> {
        let messages = self.messenger.history(peer, limit).await?;
        Ok(messages)
    }

    /// The most recent `limit` messages of a group conversation, oldest
    /// first.
    pub async fn group_history(
        &self,
        group_id: Uuid,
        limit: usize,
    ) -> Result<Vec<DecryptedMessage>> {
        let messages = self.messenger.group_history(group_id, limit).await?;
        Ok(messages)
    }

    /// Flag messages from `peer` as read and broadcast the receipts.
    pub async fn mark_read(&self, peer: PeerId, message_ids: Vec<Uuid>) {
        self.messenger.mark_read(peer, message_ids).await
    }

    /// get node info
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo {
            version: crate::util::build_version(),
            peer_id: self.local_id(),
            connections: self.peers.connections(),
        }
    }
}
