use crate::init_tracing;
use crate::utils::{next_event, MockTransport, RecordingClientDelegate};
use meshcall_client::room::Room;
use meshcall_client::signaling::{ConnectionState, SignalingClient};
use meshcall_core::MessagePayload;
use tokio::sync::mpsc;

#[tokio::test]
async fn connect_join_leave_lifecycle() {
    init_tracing();

    let (transport, mut wire) = MockTransport::new();
    let delegate = RecordingClientDelegate::new();
    let (event_tx, _event_rx) = mpsc::channel(16);
    let mut client = SignalingClient::new(transport.clone(), delegate.clone(), event_tx);
    let mut room = Room::new(Some("token".to_owned()), "alice", "lobby");

    client.connect_to_room(&mut room).await.expect("connect");
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(room.is_joined(), "local join delivered on connect");
    assert_eq!(delegate.connect_count(), 1);

    // connecting again while connected is a no-op
    client
        .connect_to_room(&mut room)
        .await
        .expect("redundant connect");
    assert_eq!(transport.connect_count(), 1);

    client.disconnect(&mut room).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!room.is_joined());

    let leave = next_event(&mut wire).await;
    assert!(matches!(leave.payload, MessagePayload::RoomLeave));
    assert_eq!(leave.sender_id.as_str(), "alice");
    assert_eq!(leave.room, "lobby");

    // disconnecting twice fires the delegate once
    client.disconnect(&mut room).await;
    assert_eq!(delegate.disconnect_count(), 1);
}

#[tokio::test]
async fn unexpected_transport_close_leaves_the_room() {
    init_tracing();

    let (transport, _wire) = MockTransport::new();
    let delegate = RecordingClientDelegate::new();
    let (event_tx, _event_rx) = mpsc::channel(16);
    let mut client = SignalingClient::new(transport.clone(), delegate.clone(), event_tx);
    let mut room = Room::new(None, "alice", "lobby");

    client.connect_to_room(&mut room).await.expect("connect");
    client.handle_transport_closed(&mut room).await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!room.is_joined());
    assert_eq!(delegate.disconnect_count(), 1);
    assert_eq!(delegate.errors().await.len(), 1);
}
