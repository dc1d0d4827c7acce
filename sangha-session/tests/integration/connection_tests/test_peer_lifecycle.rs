use sangha_session::{
    DataChannelState, DataLink, IceCandidate, PeerConnectionState, PeerEvent, SignalMessage,
};

use crate::integration::{create_peer_manager, init_tracing};
use crate::utils::{eventually, next_matching, peer};

#[tokio::test]
async fn test_terminal_state_allows_fresh_initiate() {
    init_tracing();
    let mut pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    let first = pm.factory.latest("b").unwrap();
    first.set_state(PeerConnectionState::Failed).await;
    let failed = next_matching(&mut pm.events, |e| {
        *e == PeerEvent::StateChanged(peer("b"), PeerConnectionState::Failed)
    })
    .await;
    assert!(failed.is_some());

    assert_eq!(
        pm.handle.state(peer("b")).await.unwrap(),
        Some(PeerConnectionState::Failed)
    );
    assert!(first.is_closed());

    pm.handle.initiate(peer("b")).await.unwrap();
    assert_eq!(
        pm.handle.state(peer("b")).await.unwrap(),
        Some(PeerConnectionState::Connecting)
    );
    assert_eq!(pm.factory.peers_for("b").len(), 2);
    assert_eq!(pm.signaling.offers_to("b"), 2);
}

#[tokio::test]
async fn test_events_from_replaced_transport_are_ignored() {
    init_tracing();
    let mut pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    let first = pm.factory.latest("b").unwrap();
    first.set_state(PeerConnectionState::Disconnected).await;
    next_matching(&mut pm.events, |e| {
        *e == PeerEvent::StateChanged(peer("b"), PeerConnectionState::Disconnected)
    })
    .await
    .unwrap();

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    let second = pm.factory.latest("b").unwrap();

    // Late callbacks of the first connection, then a real one from the second.
    first.set_state(PeerConnectionState::Closed).await;
    let stale_link = first.open_channel().await;
    second.set_state(PeerConnectionState::Connected).await;

    let mut seen = Vec::new();
    let connected = next_matching(&mut pm.events, |e| {
        seen.push(e.clone());
        *e == PeerEvent::StateChanged(peer("b"), PeerConnectionState::Connected)
    })
    .await;
    assert!(connected.is_some());
    assert!(!seen.iter().any(|e| matches!(
        e,
        PeerEvent::StateChanged(_, PeerConnectionState::Closed)
            | PeerEvent::ChannelStateChanged(_, DataChannelState::Open)
    )));

    assert_eq!(
        pm.handle.state(peer("b")).await.unwrap(),
        Some(PeerConnectionState::Connected)
    );
    assert!(!pm.handle.data().contains(&peer("b")));
    assert!(eventually(|| stale_link.state() == DataChannelState::Closed).await);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    init_tracing();
    let mut pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    let transport = pm.factory.latest("b").unwrap();
    transport.open_channel().await;
    next_matching(&mut pm.events, |e| {
        *e == PeerEvent::ChannelStateChanged(peer("b"), DataChannelState::Open)
    })
    .await
    .unwrap();

    pm.handle.close(peer("b")).await.unwrap();
    pm.handle.close(peer("b")).await.unwrap();

    assert_eq!(pm.handle.state(peer("b")).await.unwrap(), None);
    assert!(transport.is_closed());
    assert!(!pm.handle.data().contains(&peer("b")));

    let mut closed_states = 0;
    let mut closed_channels = 0;
    while let Ok(event) = pm.events.try_recv() {
        match event {
            PeerEvent::StateChanged(_, PeerConnectionState::Closed) => closed_states += 1,
            PeerEvent::ChannelStateChanged(_, DataChannelState::Closed) => closed_channels += 1,
            _ => {}
        }
    }
    assert_eq!(closed_states, 1);
    assert_eq!(closed_channels, 1);
}

#[tokio::test]
async fn test_close_all_releases_every_peer() {
    init_tracing();
    let pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.initiate(peer("c")).await.unwrap();

    pm.handle.close_all().await.unwrap();

    for id in ["b", "c"] {
        assert!(pm.factory.latest(id).unwrap().is_closed());
        assert_eq!(pm.handle.state(peer(id)).await.unwrap(), None);
    }
    pm.handle.close_all().await.unwrap();
}

#[tokio::test]
async fn test_local_candidates_are_forwarded() {
    init_tracing();
    let mut pm = create_peer_manager("a");

    pm.handle.initiate(peer("b")).await.unwrap();
    pm.handle.state(peer("b")).await.unwrap();
    let transport = pm.factory.latest("b").unwrap();
    let candidate = IceCandidate {
        sdp_mid: Some("0".into()),
        sdp_m_line_index: 0,
        sdp_candidate: "candidate:2 1 udp 1686052607 203.0.113.7 40000 typ srflx".into(),
    };
    transport.gather_candidate(candidate.clone()).await;

    let sent = next_matching(&mut pm.signal_rx, |s| {
        matches!(s, SignalMessage::IceCandidate { .. })
    })
    .await
    .unwrap();
    assert_eq!(
        sent,
        SignalMessage::IceCandidate {
            from_peer_id: peer("a"),
            to_peer_id: peer("b"),
            candidate,
        }
    );
}
