use crate::init_tracing;
use crate::utils::{users_update, RecordingObserver, RoomEvent};
use meshcall_client::room::Room;
use meshcall_core::PeerId;

#[tokio::test]
async fn users_update_fires_one_event_per_changed_peer() {
    init_tracing();

    let mut room = Room::new(None, "alice", "lobby");
    let observer = RecordingObserver::new();
    room.add_observer(observer.clone());

    room.process_message(&users_update("lobby", &["bob", "carol"]))
        .await;
    assert_eq!(
        observer.take_events().await,
        vec![
            RoomEvent::PeerAdded(PeerId::from("bob")),
            RoomEvent::PeerAdded(PeerId::from("carol")),
        ],
        "additions fire in payload order"
    );

    // bob left, dave arrived
    let roster = users_update("lobby", &["carol", "dave"]);
    room.process_message(&roster).await;
    assert_eq!(
        observer.take_events().await,
        vec![
            RoomEvent::PeerRemoved(PeerId::from("bob")),
            RoomEvent::PeerAdded(PeerId::from("dave")),
        ]
    );
    assert_eq!(room.peers().len(), 2);

    // replaying the same roster changes nothing
    room.process_message(&roster).await;
    assert!(observer.take_events().await.is_empty());
}

#[tokio::test]
async fn roster_never_contains_the_local_peer() {
    init_tracing();

    let mut room = Room::new(None, "alice", "lobby");
    room.process_message(&users_update("lobby", &["alice", "bob"]))
        .await;

    assert_eq!(room.peers().len(), 1);
    assert!(room.peers().contains_key(&PeerId::from("bob")));
    assert!(!room.peers().contains_key(&PeerId::from("alice")));
}
