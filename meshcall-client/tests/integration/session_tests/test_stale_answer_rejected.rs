use crate::init_tracing;
use crate::session_tests::create_test_session;
use crate::utils::{host_candidate, next_event, sample_sdp, EngineOp, SessionEvent};
use meshcall_core::{ConnectionId, PeerId, SessionDescription, SignalingError};

#[tokio::test]
async fn mismatched_connection_id_rejects_answer_and_keeps_queue() {
    init_tracing();

    let mut fixture = create_test_session();
    let bob = PeerId::from("bob");

    fixture
        .session
        .connect_to_peer(bob.clone())
        .await
        .expect("dial");
    fixture.pump().await;
    let SessionEvent::Offer { connection_id, .. } = next_event(&mut fixture.signals).await else {
        panic!("expected an offer signal");
    };

    fixture
        .session
        .add_ice_candidate(host_candidate("x"), &bob, &connection_id)
        .await
        .expect("queue");

    let stale = ConnectionId::from("stale-connection");
    let result = fixture
        .session
        .add_answer(SessionDescription::answer(sample_sdp()), &bob, &stale)
        .await;
    assert!(matches!(
        result,
        Err(SignalingError::NegotiationMismatch { .. })
    ));

    // the live negotiation is untouched
    let handle = fixture.session.connection_for_peer(&bob).expect("handle");
    assert_eq!(handle.queued_candidate_count(), 1);
    assert!(!fixture
        .engine
        .ops_for(&bob)
        .await
        .iter()
        .any(|op| matches!(op, EngineOp::SetRemote(_))));
}

#[tokio::test]
async fn answer_from_an_unknown_peer_is_an_error() {
    init_tracing();

    let mut fixture = create_test_session();
    let result = fixture
        .session
        .add_answer(
            SessionDescription::answer(sample_sdp()),
            &PeerId::from("stranger"),
            &ConnectionId::from("c-1"),
        )
        .await;
    assert!(matches!(result, Err(SignalingError::UnknownPeer(_))));
}
