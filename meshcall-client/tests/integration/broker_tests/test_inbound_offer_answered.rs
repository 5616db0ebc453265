use crate::broker_tests::{create_test_broker, wait_for_broker_event, wait_for_wire};
use crate::init_tracing;
use crate::utils::{next_event, sample_sdp, stamp, users_update, BrokerEvent};
use meshcall_client::engine::{EngineEvent, StreamHandle};
use meshcall_client::room::Room;
use meshcall_core::{
    ConnectionId, MediaConfiguration, Message, MessagePayload, PeerId, SessionDescription,
};

#[tokio::test]
async fn larger_local_id_waits_and_answers_the_inbound_offer() {
    init_tracing();

    let mut fixture = create_test_broker();
    let room = Room::new(None, "zed", "lobby");
    assert!(
        fixture
            .broker
            .connect_to_room(room, MediaConfiguration::default())
            .await
    );
    let _ = next_event(&mut fixture.events).await; // local stream
    crate::broker_tests::wait_until_connected(&fixture).await;

    // alice sorts first, so zed waits for her offer
    fixture
        .transport
        .inject(&users_update("lobby", &["alice", "zed"]))
        .await;

    let alice = PeerId::from("alice");
    let connection_id = ConnectionId::from("c-alice-1");
    fixture
        .transport
        .inject(&stamp(
            Message::offer(
                PeerId::from("zed"),
                connection_id.clone(),
                SessionDescription::offer(sample_sdp()),
            ),
            "alice",
            "lobby",
        ))
        .await;

    let answer = wait_for_wire(&mut fixture.wire, |m| {
        matches!(m.payload, MessagePayload::Answer(_))
    })
    .await;
    assert_eq!(answer.target_id, Some(alice.clone()));
    let MessagePayload::Answer(data) = answer.payload else {
        unreachable!();
    };
    assert_eq!(data.connection_id, connection_id);

    // zed never dialed first
    let sent = fixture.transport.sent_messages().await;
    assert!(!sent
        .iter()
        .any(|m| matches!(m.payload, MessagePayload::Offer(_))));

    // the engine reports a remote stream; the broker surfaces it once
    let events_tx = fixture.engine.events_for(&alice).await.expect("connection");
    let stream = StreamHandle::new("alice-media");
    events_tx
        .send(EngineEvent::StreamAdded {
            peer_id: alice.clone(),
            stream: stream.clone(),
        })
        .await
        .expect("engine event");
    wait_for_broker_event(&mut fixture.events, |e| {
        matches!(e, BrokerEvent::StreamAdded(_))
    })
    .await;
    assert_eq!(fixture.broker.remote_streams().len(), 1);

    // bye tears the peer down and releases the stream
    fixture
        .transport
        .inject(&stamp(
            Message::bye(
                PeerId::from("zed"),
                connection_id,
                Some("hangup".to_owned()),
            ),
            "alice",
            "lobby",
        ))
        .await;
    wait_for_broker_event(&mut fixture.events, |e| {
        matches!(e, BrokerEvent::StreamRemoved(_))
    })
    .await;
    assert!(fixture.broker.remote_streams().is_empty());
}
