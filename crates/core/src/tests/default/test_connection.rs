use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backchannel_transport::core::callback::CallbackError;
use backchannel_transport::core::transport::WebrtcConnectionState;

use crate::error::Error;
use crate::error::Result;
use crate::peer_id::PeerId;
use crate::peers::callback::PeerCallback;
use crate::peers::callback::PeerEvent;
use crate::peers::PeerManagerBuilder;
use crate::store::MemoryStore;
use crate::tests::default::manually_establish_connection;
use crate::tests::default::prepare_node;
use crate::tests::default::pump_until_quiet;
use crate::tests::default::Node;
use crate::tests::default::STUN;

fn state(node: &Node, peer: PeerId) -> Option<WebrtcConnectionState> {
    node.peers
        .transport
        .get_connection(peer)
        .map(|conn| conn.webrtc_connection_state())
}

#[tokio::test]
async fn test_handshake_on_both_sides() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let node2 = prepare_node(&store).await;

    assert!(node1.peers.transport.get_connection(node2.id).is_none());
    assert!(node2.peers.transport.get_connection(node1.id).is_none());

    // Offer to each other at the same time.
    // Node 1 -> Offer -> Node 2
    // Node 2 -> Offer -> Node 1
    node1.peers.connect(node2.id).await?;
    node2.peers.connect(node1.id).await?;

    assert_eq!(state(&node1, node2.id), Some(WebrtcConnectionState::New));
    assert_eq!(state(&node2, node1.id), Some(WebrtcConnectionState::New));

    // Whoever holds the higher id drops its own offer and answers the
    // remote one; the other side ignores the crossing offer and accepts
    // the answer.
    pump_until_quiet(&node1.peers, &node2.peers).await;

    assert_eq!(
        state(&node1, node2.id),
        Some(WebrtcConnectionState::Connected)
    );
    assert_eq!(
        state(&node2, node1.id),
        Some(WebrtcConnectionState::Connected)
    );

    Ok(())
}

#[tokio::test]
async fn test_connect_twice_keeps_single_connection() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let node2 = prepare_node(&store).await;

    manually_establish_connection(&node1.peers, &node2.peers).await;
    assert!(node1.peers.is_connected(node2.id));

    // Dialing a connected peer must not replace the connection or
    // enqueue another offer.
    node1.peers.connect(node2.id).await?;
    assert_eq!(
        state(&node1, node2.id),
        Some(WebrtcConnectionState::Connected)
    );
    assert!(node1
        .peers
        .transport
        .signals
        .pending_for(node2.id)
        .await?
        .is_empty());

    assert!(matches!(
        node1.peers.connect(node1.id).await,
        Err(Error::ShouldNotConnectSelf)
    ));

    Ok(())
}

struct EventProbe {
    event_tx: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
}

#[async_trait]
impl PeerCallback for EventProbe {
    async fn on_event(&self, event: &PeerEvent) -> std::result::Result<(), CallbackError> {
        self.event_tx.send(event.clone()).map_err(|e| e.into())
    }
}

#[tokio::test]
async fn test_attempts_exhaust_into_abandonment() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let local = PeerId::random();
    let ghost = PeerId::random();

    let (event_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let peers = Arc::new(
        PeerManagerBuilder::new(STUN, local, store.clone())
            .connect_timeout(Duration::from_millis(50))
            .max_attempts(2)
            .retry_decay(Duration::from_secs(600))
            .callback(Arc::new(EventProbe { event_tx }))
            .build()?,
    );

    // Nobody answers, so the pending timeout counts the attempt and
    // tears the connection down.
    peers.connect(ghost).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(peers.transport.retry.attempts(ghost), 1);
    assert!(peers.transport.get_connection(ghost).is_none());

    peers.connect(ghost).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(peers.transport.retry.attempts(ghost), 2);

    match peers.connect(ghost).await {
        Err(Error::MaxRetriesExceeded(peer)) => assert_eq!(peer, ghost),
        other => panic!("expected MaxRetriesExceeded, got {other:?}"),
    }

    let abandoned = loop {
        let event = events.recv().await.expect("events channel closed");
        if let PeerEvent::ConnectionAbandoned { peer } = event {
            break peer;
        }
    };
    assert_eq!(abandoned, ghost);

    Ok(())
}

#[tokio::test]
async fn test_disconnect_restores_dialing() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let local = PeerId::random();
    let ghost = PeerId::random();

    let peers = Arc::new(
        PeerManagerBuilder::new(STUN, local, store.clone())
            .connect_timeout(Duration::from_millis(50))
            .max_attempts(1)
            .retry_decay(Duration::from_secs(600))
            .build()?,
    );

    peers.connect(ghost).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(matches!(
        peers.connect(ghost).await,
        Err(Error::MaxRetriesExceeded(_))
    ));

    // Disconnect forgets the budget, so dialing works again.
    peers.disconnect(ghost).await.ok();
    assert_eq!(peers.transport.retry.attempts(ghost), 0);
    peers.connect(ghost).await?;
    assert_eq!(
        peers
            .transport
            .get_connection(ghost)
            .map(|conn| conn.webrtc_connection_state()),
        Some(WebrtcConnectionState::New)
    );

    Ok(())
}
