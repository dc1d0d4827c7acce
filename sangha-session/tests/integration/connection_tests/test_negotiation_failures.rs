use sangha_session::{IceCandidate, PeerConnectionState, PeerEvent};

use crate::integration::{create_peer_manager, init_tracing};
use crate::utils::{TransportCall, peer};

fn candidate() -> IceCandidate {
    IceCandidate {
        sdp_mid: Some("0".into()),
        sdp_m_line_index: 0,
        sdp_candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".into(),
    }
}

#[tokio::test]
async fn test_answer_and_candidate_for_unknown_peer_are_ignored() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle
        .on_answer(peer("ghost"), "v=0".into())
        .await
        .unwrap();
    pm.handle
        .on_candidate(peer("ghost"), candidate())
        .await
        .unwrap();

    assert_eq!(pm.handle.state(peer("ghost")).await.unwrap(), None);
    assert!(pm.factory.created().is_empty());

    // The manager keeps working afterwards.
    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    assert_eq!(pm.signaling.offers_to("b"), 1);
}

#[tokio::test]
async fn test_failed_offer_marks_peer_failed_and_allows_retry() {
    init_tracing();
    let mut pm = create_peer_manager("a");
    pm.factory.set_fail_negotiation(true);

    pm.handle.initiate(peer("b")).await.unwrap();

    assert_eq!(
        pm.handle.state(peer("b")).await.unwrap(),
        Some(PeerConnectionState::Failed)
    );
    assert!(pm.factory.latest("b").unwrap().is_closed());
    assert_eq!(pm.signaling.offers_to("b"), 0);

    let mut states = Vec::new();
    while let Ok(event) = pm.events.try_recv() {
        if let PeerEvent::StateChanged(_, state) = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![PeerConnectionState::Connecting, PeerConnectionState::Failed]
    );

    pm.factory.set_fail_negotiation(false);
    pm.handle.initiate(peer("b")).await.unwrap();

    assert_eq!(
        pm.handle.state(peer("b")).await.unwrap(),
        Some(PeerConnectionState::Connecting)
    );
    assert_eq!(pm.factory.peers_for("b").len(), 2);
    assert_eq!(pm.signaling.offers_to("b"), 1);
}

#[tokio::test]
async fn test_failed_answer_marks_peer_failed() {
    init_tracing();
    let pm = create_peer_manager("z");
    pm.factory.set_fail_negotiation(true);

    pm.handle
        .on_offer(peer("a"), "v=0 broken".into())
        .await
        .unwrap();

    assert_eq!(
        pm.handle.state(peer("a")).await.unwrap(),
        Some(PeerConnectionState::Failed)
    );
    assert_eq!(pm.signaling.answers_to("a"), 0);
}

#[tokio::test]
async fn test_signaling_failure_marks_peer_failed() {
    init_tracing();
    let pm = create_peer_manager("a");
    pm.signaling.go_offline();

    pm.handle.initiate(peer("b")).await.unwrap();

    assert_eq!(
        pm.handle.state(peer("b")).await.unwrap(),
        Some(PeerConnectionState::Failed)
    );
}

#[tokio::test]
async fn test_remote_candidate_reaches_connection() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.on_candidate(peer("b"), candidate()).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();

    let calls = pm.factory.latest("b").unwrap().calls();
    assert_eq!(calls.last(), Some(&TransportCall::AddCandidate(candidate())));
}
