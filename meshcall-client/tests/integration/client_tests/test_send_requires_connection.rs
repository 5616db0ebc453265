use crate::init_tracing;
use crate::utils::{next_event, MockTransport, RecordingClientDelegate};
use meshcall_client::room::Room;
use meshcall_client::signaling::SignalingClient;
use meshcall_core::{ConnectionId, Message, PeerId, SignalingError};
use tokio::sync::mpsc;

#[tokio::test]
async fn send_requires_a_connected_client_and_stamps_identity() {
    init_tracing();

    let (transport, mut wire) = MockTransport::new();
    let delegate = RecordingClientDelegate::new();
    let (event_tx, _event_rx) = mpsc::channel(16);
    let mut client = SignalingClient::new(transport.clone(), delegate, event_tx);
    let mut room = Room::new(None, "alice", "lobby");

    let message = Message::bye(PeerId::from("bob"), ConnectionId::from("c-1"), None);
    let result = client.send_message(message.clone(), &room).await;
    assert!(matches!(result, Err(SignalingError::InvalidState(_))));

    client.connect_to_room(&mut room).await.expect("connect");
    client.send_message(message, &room).await.expect("send");

    let sent = next_event(&mut wire).await;
    assert_eq!(sent.sender_id.as_str(), "alice");
    assert_eq!(sent.room, "lobby");
    assert_eq!(sent.target_id, Some(PeerId::from("bob")));
}
