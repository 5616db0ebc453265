use crate::broker_tests::{create_test_broker, wait_for_broker_event};
use crate::init_tracing;
use crate::utils::{next_event, BrokerEvent};
use meshcall_client::room::Room;
use meshcall_core::MediaConfiguration;

#[tokio::test]
async fn a_second_connect_is_rejected_until_disconnect() {
    init_tracing();

    let mut fixture = create_test_broker();

    assert!(
        fixture
            .broker
            .connect_to_room(Room::new(None, "alice", "lobby"), MediaConfiguration::default())
            .await
    );
    assert!(
        !fixture
            .broker
            .connect_to_room(Room::new(None, "alice", "other"), MediaConfiguration::default())
            .await,
        "a live call blocks new connects"
    );

    let _ = next_event(&mut fixture.events).await; // local stream
    fixture.broker.disconnect().await;
    wait_for_broker_event(&mut fixture.events, |e| matches!(e, BrokerEvent::Finished)).await;

    assert!(
        fixture
            .broker
            .connect_to_room(Room::new(None, "alice", "lobby"), MediaConfiguration::default())
            .await,
        "disconnect frees the broker for a new call"
    );
}
