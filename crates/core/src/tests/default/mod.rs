use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backchannel_transport::core::callback::CallbackError;

use crate::crypto::IdentityKeypair;
use crate::encryption::MessageCipher;
use crate::keys::KeyDirectory;
use crate::message::DecryptedMessage;
use crate::messenger::Messenger;
use crate::peer_id::PeerId;
use crate::peers::callback::PeerCallback;
use crate::peers::callback::PeerEvent;
use crate::peers::PeerManager;
use crate::peers::PeerManagerBuilder;
use crate::presence::PresenceService;
use crate::session::SessionKeyManager;
use crate::session::SessionPolicy;
use crate::store::KeyStore;
use crate::store::MemoryStore;

mod test_connection;
mod test_messaging;

pub const STUN: &str = "stun://stun.l.google.com:19302";

pub struct Node {
    pub id: PeerId,
    pub messenger: Arc<Messenger>,
    pub peers: Arc<PeerManager>,
    pub sessions: Arc<SessionKeyManager>,
    pub inbound: tokio::sync::broadcast::Receiver<DecryptedMessage>,
    pub events: tokio::sync::mpsc::UnboundedReceiver<PeerEvent>,
}

pub struct NodeCallback {
    messenger: Arc<Messenger>,
    event_tx: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
}

impl Node {
    pub async fn recv_message(&mut self) -> DecryptedMessage {
        tokio::time::timeout(Duration::from_secs(5), self.inbound.recv())
            .await
            .expect("timed out waiting for an inbound message")
            .expect("inbound channel closed")
    }
}

#[async_trait]
impl PeerCallback for NodeCallback {
    async fn on_frame(&self, peer: PeerId, frame: &[u8]) -> Result<(), CallbackError> {
        self.messenger
            .handle_direct_frame(peer, frame)
            .await
            .map_err(|e| e.into())
    }

    async fn on_event(&self, event: &PeerEvent) -> Result<(), CallbackError> {
        self.event_tx.send(event.clone()).map_err(|e| e.into())
    }
}

/// Build one node on top of a store shared with its peers, publish its
/// identity key, and start its inbound listener.
pub async fn prepare_node(store: &Arc<MemoryStore>) -> Node {
    super::setup_tracing();

    let id = PeerId::random();
    let identity = Arc::new(IdentityKeypair::generate());
    store.publish(id, identity.public()).await.unwrap();

    let peers = Arc::new(
        PeerManagerBuilder::new(STUN, id, store.clone())
            .build()
            .unwrap(),
    );

    let directory = Arc::new(KeyDirectory::new(store.clone()));
    let sessions = Arc::new(SessionKeyManager::new(
        identity,
        directory,
        SessionPolicy::default(),
    ));
    let cipher = Arc::new(MessageCipher::new(sessions.clone()));
    let presence = Arc::new(PresenceService::new(id, store.clone()));
    let messenger = Arc::new(Messenger::new(
        peers.clone(),
        cipher,
        store.clone(),
        presence,
    ));

    let (event_tx, events) = tokio::sync::mpsc::unbounded_channel();
    let callback = NodeCallback {
        messenger: messenger.clone(),
        event_tx,
    };
    peers.set_callback(Arc::new(callback)).unwrap();

    let inbound = messenger.subscribe();
    tokio::spawn(messenger.clone().listen());
    // Let the listener task reach its subscription before anything sends.
    tokio::task::yield_now().await;

    println!("id: {id:?}");

    Node {
        id,
        messenger,
        peers,
        sessions,
        inbound,
        events,
    }
}

/// Drain and apply every pending signal of `manager`, returning how many
/// were handled.
pub async fn pump_signals(manager: &PeerManager) -> usize {
    let pending = manager
        .transport
        .signals
        .pending_for(manager.local_id())
        .await
        .unwrap();

    let handled = pending.len();
    for record in pending {
        manager.handle_signal(&record).await.unwrap();
    }
    handled
}

/// Keep pumping both sides until neither has signals left.
pub async fn pump_until_quiet(left: &PeerManager, right: &PeerManager) {
    loop {
        let handled = pump_signals(left).await + pump_signals(right).await;
        if handled == 0 {
            break;
        }
    }
}

/// Walk two managers through a full offer, answer, accept exchange over
/// their shared signal store.
pub async fn manually_establish_connection(left: &PeerManager, right: &PeerManager) {
    assert!(left.transport.get_connection(right.local_id()).is_none());
    assert!(right.transport.get_connection(left.local_id()).is_none());

    left.connect(right.local_id()).await.unwrap();
    assert_eq!(pump_signals(right).await, 1);
    assert_eq!(pump_signals(left).await, 1);

    assert!(left.transport.get_connection(right.local_id()).is_some());
    assert!(right.transport.get_connection(left.local_id()).is_some());
}
