use crate::init_tracing;
use crate::utils::{stamp, RecordingObserver, RoomEvent};
use meshcall_client::room::Room;
use meshcall_core::{ConnectionId, Message, MessagePayload, PeerId, SessionDescription};

fn offer_for(target: &str, sender: &str) -> Message {
    stamp(
        Message::offer(
            PeerId::from(target),
            ConnectionId::from("c-1"),
            SessionDescription::offer("v=0\r\n"),
        ),
        sender,
        "lobby",
    )
}

#[tokio::test]
async fn messages_for_other_peers_are_not_consumed() {
    init_tracing();

    let mut room = Room::new(None, "alice", "lobby");
    let observer = RecordingObserver::new();
    room.add_observer(observer.clone());

    assert!(!room.process_message(&offer_for("bob", "carol")).await);
    assert!(observer.take_events().await.is_empty());

    assert!(room.process_message(&offer_for("alice", "carol")).await);
    let events = observer.take_events().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        RoomEvent::Message(message) if matches!(message.payload, MessagePayload::Offer(_))
    ));
}

#[tokio::test]
async fn duplicate_joins_add_presence_once() {
    init_tracing();

    let mut room = Room::new(None, "alice", "lobby");
    let observer = RecordingObserver::new();
    room.add_observer(observer.clone());

    let join = stamp(Message::room_join(), "carol", "lobby");
    assert!(room.process_message(&join).await);
    assert!(room.process_message(&join).await);

    assert_eq!(
        observer.take_events().await,
        vec![RoomEvent::PeerAdded(PeerId::from("carol"))]
    );
    assert_eq!(room.peers().len(), 1);
}

#[tokio::test]
async fn local_join_and_leave_toggle_membership() {
    init_tracing();

    let mut room = Room::new(None, "alice", "lobby");
    let observer = RecordingObserver::new();
    room.add_observer(observer.clone());

    room.process_message(&stamp(Message::room_join(), "alice", "lobby"))
        .await;
    assert!(room.is_joined());

    room.process_message(&stamp(Message::room_join(), "bob", "lobby"))
        .await;
    room.process_message(&stamp(Message::room_leave(), "alice", "lobby"))
        .await;

    assert!(!room.is_joined());
    assert!(room.peers().is_empty(), "leaving clears presence");
    assert_eq!(
        observer.take_events().await,
        vec![
            RoomEvent::Joined("lobby".to_owned()),
            RoomEvent::PeerAdded(PeerId::from("bob")),
            RoomEvent::Left("lobby".to_owned()),
        ]
    );
}
