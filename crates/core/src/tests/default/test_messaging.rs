use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::message::OutgoingMessage;
use crate::messenger::Delivery;
use crate::presence::PresenceEvent;
use crate::store::MemoryStore;
use crate::store::MessageStore;
use crate::tests::default::manually_establish_connection;
use crate::tests::default::prepare_node;

fn outgoing(content: &str, recipient: crate::peer_id::PeerId) -> OutgoingMessage {
    OutgoingMessage {
        content: content.to_string(),
        recipient_id: recipient,
        group_id: None,
    }
}

#[tokio::test]
async fn test_direct_delivery_skips_the_relay() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let mut node2 = prepare_node(&store).await;

    manually_establish_connection(&node1.peers, &node2.peers).await;

    let delivery = node1
        .messenger
        .send_message(outgoing("hello over the channel", node2.id))
        .await?;
    assert_eq!(delivery, Delivery::Direct);

    let received = node2.recv_message().await;
    assert_eq!(received.content, "hello over the channel");
    assert_eq!(received.sender_id, node1.id);
    assert!(received.is_encrypted);
    assert!(received.is_delivered);

    // The relay never saw the message.
    assert!(store.between(node1.id, node2.id, 10).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_relay_fallback_and_delivery_receipt() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let mut node1 = prepare_node(&store).await;
    let mut node2 = prepare_node(&store).await;

    // No connection and nobody answers signals, so the send degrades to
    // the relay without an error.
    let delivery = node1
        .messenger
        .send_message(outgoing("catch you later", node2.id))
        .await?;
    assert_eq!(delivery, Delivery::Relayed);

    let rows = store.between(node1.id, node2.id, 10).await?;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].payload.ciphertext.is_empty());

    // The recipient's listener dispatches the stored copy, then flags it
    // delivered, which both sides observe as an update.
    let received = node2.recv_message().await;
    assert_eq!(received.content, "catch you later");
    assert!(!received.is_delivered);

    let receipt = node2.recv_message().await;
    assert_eq!(receipt.id, received.id);
    assert!(receipt.is_delivered);

    let sender_receipt = node1.recv_message().await;
    assert_eq!(sender_receipt.id, received.id);
    assert!(sender_receipt.is_delivered);
    assert_eq!(sender_receipt.content, "catch you later");

    Ok(())
}

#[tokio::test]
async fn test_history_limit_and_read_receipts() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let node2 = prepare_node(&store).await;

    for content in ["one", "two", "three"] {
        let delivery = node1
            .messenger
            .send_message(outgoing(content, node2.id))
            .await?;
        assert_eq!(delivery, Delivery::Relayed);
    }

    // Newest two, returned oldest first.
    let history = node2.messenger.history(node1.id, 2).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "two");
    assert_eq!(history[1].content, "three");

    let mut receipts = node1.messenger.presence().subscribe_with(node2.id);
    let read_ids: Vec<Uuid> = history.iter().map(|m| m.id).collect();
    node2.messenger.mark_read(node1.id, read_ids.clone()).await;

    match receipts.recv().await.unwrap() {
        PresenceEvent::ReadReceipts { receipts } => {
            assert_eq!(receipts.len(), 2);
            assert!(receipts.iter().all(|r| r.user_id == node2.id));
            assert!(receipts.iter().all(|r| read_ids.contains(&r.message_id)));
        }
        other => panic!("unexpected presence event: {other:?}"),
    }

    let row = store.by_id(read_ids[0]).await?.unwrap();
    assert!(row.read_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_edit_and_delete_append_versions() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let node2 = prepare_node(&store).await;

    node1
        .messenger
        .send_message(outgoing("first draft", node2.id))
        .await?;
    let message_id = store.between(node1.id, node2.id, 1).await?[0].message_id;

    node1.messenger.edit_message(message_id, "final wording").await?;
    let history = node2.messenger.history(node1.id, 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "final wording");
    assert!(history[0].is_edited);

    node1.messenger.delete_message(message_id).await?;
    let history = node2.messenger.history(node1.id, 10).await?;
    assert_eq!(history.len(), 1);
    assert!(history[0].is_deleted);
    assert_eq!(history[0].content, "");

    let row = store.by_id(message_id).await?.unwrap();
    assert_eq!(row.version, 3);

    Ok(())
}

#[tokio::test]
async fn test_rotation_keeps_messages_flowing() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let mut node2 = prepare_node(&store).await;

    manually_establish_connection(&node1.peers, &node2.peers).await;

    let delivery = node1
        .messenger
        .send_message(outgoing("sealed under the first key", node2.id))
        .await?;
    assert_eq!(delivery, Delivery::Direct);
    assert_eq!(node2.recv_message().await.content, "sealed under the first key");

    // Rotating mid-conversation must not interrupt delivery.
    let rotated = node1.sessions.rotate(node2.id).await?;
    let rotated_again = node1.sessions.rotate(node2.id).await?;
    assert_ne!(rotated, rotated_again);

    node1
        .messenger
        .send_message(outgoing("sealed under the new key", node2.id))
        .await?;
    let received = node2.recv_message().await;
    assert_eq!(received.content, "sealed under the new key");
    assert!(received.is_encrypted);

    Ok(())
}

#[tokio::test]
async fn test_group_messages_always_use_the_relay() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let node1 = prepare_node(&store).await;
    let node2 = prepare_node(&store).await;

    manually_establish_connection(&node1.peers, &node2.peers).await;

    let group = Uuid::new_v4();
    let delivery = node1
        .messenger
        .send_message(OutgoingMessage {
            content: "minutes attached".to_string(),
            recipient_id: node2.id,
            group_id: Some(group),
        })
        .await?;
    assert_eq!(delivery, Delivery::Relayed);

    let rows = node2.messenger.group_history(group, 10).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "minutes attached");

    // Group copies never show up in the direct history.
    assert!(node2.messenger.history(node1.id, 10).await?.is_empty());

    Ok(())
}
