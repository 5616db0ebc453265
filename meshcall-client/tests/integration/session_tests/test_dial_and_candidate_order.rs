use crate::init_tracing;
use crate::session_tests::create_test_session;
use crate::utils::{host_candidate, next_event, sample_sdp, EngineOp, SessionEvent};
use meshcall_client::media::ConnectionRole;
use meshcall_core::{PeerId, SessionDescription};

#[tokio::test]
async fn dialing_creates_offer_and_candidates_drain_after_answer() {
    init_tracing();

    let mut fixture = create_test_session();
    let bob = PeerId::from("bob");

    fixture.session.start_local_media().await.expect("media");
    fixture
        .session
        .connect_to_peer(bob.clone())
        .await
        .expect("dial");
    fixture.pump().await;

    let SessionEvent::Offer {
        peer_id,
        connection_id,
        description,
    } = next_event(&mut fixture.signals).await
    else {
        panic!("expected an offer signal");
    };
    assert_eq!(peer_id, bob);
    assert!(description.sdp.contains("b=AS:"), "bitrate caps applied");

    let handle = fixture.session.connection_for_peer(&bob).expect("handle");
    assert_eq!(handle.role(), ConnectionRole::Initiator);

    // candidates arriving before the answer are parked, not forwarded
    fixture
        .session
        .add_ice_candidate(host_candidate("x"), &bob, &connection_id)
        .await
        .expect("queue x");
    fixture
        .session
        .add_ice_candidate(host_candidate("y"), &bob, &connection_id)
        .await
        .expect("queue y");
    let ops = fixture.engine.ops_for(&bob).await;
    assert!(!ops.iter().any(|op| matches!(op, EngineOp::AddCandidate(_))));

    fixture
        .session
        .add_answer(
            SessionDescription::answer(sample_sdp()),
            &bob,
            &connection_id,
        )
        .await
        .expect("answer");

    let forwarded: Vec<String> = fixture
        .engine
        .ops_for(&bob)
        .await
        .into_iter()
        .filter_map(|op| match op {
            EngineOp::AddCandidate(candidate) => Some(candidate.candidate),
            _ => None,
        })
        .collect();
    assert_eq!(forwarded.len(), 2, "both candidates reach the engine");
    assert!(forwarded[0].starts_with("candidate:x"), "arrival order kept");
    assert!(forwarded[1].starts_with("candidate:y"));
}

#[tokio::test]
async fn dialing_the_same_peer_twice_is_rejected() {
    init_tracing();

    let mut fixture = create_test_session();
    let bob = PeerId::from("bob");

    fixture
        .session
        .connect_to_peer(bob.clone())
        .await
        .expect("dial");
    let result = fixture.session.connect_to_peer(bob).await;
    assert!(matches!(
        result,
        Err(meshcall_core::SignalingError::AlreadyConnecting(_))
    ));
}
