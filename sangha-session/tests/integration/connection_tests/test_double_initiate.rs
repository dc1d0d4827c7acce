use sangha_session::{PeerConnectionState, PeerEvent};

use crate::integration::{create_peer_manager, init_tracing};
use crate::utils::{next_matching, peer};

#[tokio::test]
async fn test_double_initiate_sends_one_offer() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.initiate(peer("b")).await.unwrap();

    let state = pm.handle.state(peer("b")).await.unwrap();
    assert_eq!(state, Some(PeerConnectionState::Connecting));
    assert_eq!(pm.signaling.offers_to("b"), 1);
    assert_eq!(pm.factory.peers_for("b").len(), 1);
}

#[tokio::test]
async fn test_initiate_while_connected_is_noop() {
    init_tracing();
    let mut pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    let transport = pm.factory.latest("b").unwrap();
    transport.set_state(PeerConnectionState::Connected).await;
    let connected = next_matching(&mut pm.events, |e| {
        *e == PeerEvent::StateChanged(peer("b"), PeerConnectionState::Connected)
    })
    .await;
    assert!(connected.is_some());

    pm.handle.initiate(peer("b")).await.unwrap();

    let state = pm.handle.state(peer("b")).await.unwrap();
    assert_eq!(state, Some(PeerConnectionState::Connected));
    assert_eq!(pm.signaling.offers_to("b"), 1);
}

#[tokio::test]
async fn test_initiate_to_self_is_ignored() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle.initiate(peer("a")).await.unwrap();

    assert_eq!(pm.handle.state(peer("a")).await.unwrap(), None);
    assert!(pm.signaling.signals().is_empty());
    assert!(pm.factory.created().is_empty());
}
