use sangha_session::{PeerConnectionState, SignalMessage};

use crate::integration::{create_peer_manager, init_tracing};
use crate::utils::{TransportCall, peer};

#[tokio::test]
async fn test_smaller_id_keeps_its_offer() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle
        .on_offer(peer("b"), "v=0 remote".into())
        .await
        .unwrap();

    let state = pm.handle.state(peer("b")).await.unwrap();
    assert_eq!(state, Some(PeerConnectionState::Connecting));
    assert_eq!(pm.signaling.answers_to("b"), 0);

    let transports = pm.factory.peers_for("b");
    assert_eq!(transports.len(), 1);
    assert!(!transports[0].is_closed());
    assert_eq!(transports[0].calls(), vec![TransportCall::CreateOffer]);
}

#[tokio::test]
async fn test_larger_id_yields_to_remote_offer() {
    init_tracing();
    let pm = create_peer_manager("b");

    pm.handle.initiate(peer("a")).await.unwrap();
    pm.handle
        .on_offer(peer("a"), "v=0 remote".into())
        .await
        .unwrap();
    pm.handle.state(peer("a")).await.unwrap();

    let transports = pm.factory.peers_for("a");
    assert_eq!(transports.len(), 2);
    assert!(transports[0].is_closed());
    assert_eq!(
        transports[1].calls(),
        vec![TransportCall::AcceptOffer("v=0 remote".into())]
    );
    assert_eq!(pm.signaling.answers_to("a"), 1);
}

#[tokio::test]
async fn test_offer_after_completed_negotiation_reuses_connection() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle
        .on_answer(peer("b"), "v=0 answer".into())
        .await
        .unwrap();
    pm.handle
        .on_offer(peer("b"), "v=0 renegotiate".into())
        .await
        .unwrap();
    pm.handle.state(peer("b")).await.unwrap();

    let transports = pm.factory.peers_for("b");
    assert_eq!(transports.len(), 1);
    assert_eq!(
        transports[0].calls(),
        vec![
            TransportCall::CreateOffer,
            TransportCall::ApplyAnswer("v=0 answer".into()),
            TransportCall::AcceptOffer("v=0 renegotiate".into()),
        ]
    );
    assert_eq!(pm.signaling.answers_to("b"), 1);
}

#[tokio::test]
async fn test_offer_from_new_peer_is_answered() {
    init_tracing();
    let pm = create_peer_manager("z");

    pm.handle
        .on_offer(peer("a"), "v=0 remote".into())
        .await
        .unwrap();

    let state = pm.handle.state(peer("a")).await.unwrap();
    assert_eq!(state, Some(PeerConnectionState::Connecting));

    let answer = pm
        .signaling
        .signals()
        .into_iter()
        .find(|s| matches!(s, SignalMessage::Answer { .. }))
        .unwrap();
    let SignalMessage::Answer {
        from_peer_id,
        to_peer_id,
        sdp,
    } = answer
    else {
        unreachable!();
    };
    assert_eq!(from_peer_id, peer("z"));
    assert_eq!(to_peer_id, peer("a"));
    assert!(sdp.starts_with("v=0 answer"));
}
