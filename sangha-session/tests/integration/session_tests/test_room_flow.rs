use bytes::Bytes;
use sangha_session::{
    DataChannelState, PeerConnectionState, PeerMessage, SessionEvent, SignalMessage,
};

use crate::integration::{TestSession, init_tracing, start_session};
use crate::utils::{eventually, next_event, next_matching, peer, wait_for_roster};

async fn join(session: &TestSession, id: &str, nick: &str) {
    session
        .signaling
        .inject(&SignalMessage::UserJoined {
            peer_id: peer(id),
            user_nick_name: nick.into(),
        })
        .await;
}

#[tokio::test]
async fn test_user_joined_and_left_update_roster() {
    init_tracing();
    let mut session = start_session("m").await;
    let mut roster = session.handle.roster();

    join(&session, "z", "Zen").await;
    let users = wait_for_roster(&mut roster, |users| users.len() == 2).await;
    assert_eq!(users[0].nick_name, "m");
    assert_eq!(users[1].nick_name, "Zen");
    assert!(!users[1].is_ready);

    let offer = next_matching(&mut session.sent_rx, |s| {
        matches!(s.message, SignalMessage::Offer { .. })
    })
    .await;
    assert!(offer.is_some());

    session
        .signaling
        .inject(&SignalMessage::UserLeft { peer_id: peer("z") })
        .await;
    wait_for_roster(&mut roster, |users| users.len() == 1).await;

    let closed = next_event(&mut session.events, |e| {
        *e == SessionEvent::ConnectionStateChanged {
            peer_id: peer("z"),
            state: PeerConnectionState::Closed,
        }
    })
    .await;
    assert!(closed.is_some());
    assert!(session.factory.latest("z").unwrap().is_closed());
    assert_eq!(session.handle.connection_state(peer("z")).await.unwrap(), None);
}

#[tokio::test]
async fn test_joining_smaller_peer_waits_for_its_offer() {
    init_tracing();
    let session = start_session("m").await;
    let mut roster = session.handle.roster();

    join(&session, "a", "Asana").await;
    wait_for_roster(&mut roster, |users| users.len() == 2).await;

    assert_eq!(session.handle.connection_state(peer("a")).await.unwrap(), None);
    assert!(session.factory.created().is_empty());
}

#[tokio::test]
async fn test_remote_ready_flag_updates_roster() {
    init_tracing();
    let session = start_session("m").await;
    let mut roster = session.handle.roster();
    join(&session, "z", "Zen").await;

    session
        .signaling
        .inject(&SignalMessage::UserReady {
            peer_id: peer("z"),
            is_ready: true,
        })
        .await;

    let users = wait_for_roster(&mut roster, |users| {
        users.iter().any(|u| u.peer_id == peer("z") && u.is_ready)
    })
    .await;
    assert_eq!(users.len(), 2);
}

#[tokio::test]
async fn test_set_ready_announces_to_room() {
    init_tracing();
    let mut session = start_session("m").await;

    session.handle.set_ready(true).await.unwrap();

    let sent = next_matching(&mut session.sent_rx, |s| {
        matches!(s.message, SignalMessage::UserReady { .. })
    })
    .await
    .unwrap();
    assert_eq!(sent.destination, "/app/room/room-1");
    assert_eq!(
        sent.message,
        SignalMessage::UserReady {
            peer_id: peer("m"),
            is_ready: true,
        }
    );
    assert!(session.handle.roster_snapshot()[0].is_ready);
}

#[tokio::test]
async fn test_scores_and_round_flow() {
    init_tracing();
    let mut session = start_session("m").await;
    let mut roster = session.handle.roster();
    join(&session, "z", "Zen").await;

    let factory = session.factory.clone();
    assert!(eventually(|| factory.latest("z").is_some()).await);
    let transport = factory.latest("z").unwrap();
    let link = transport.open_channel().await;
    next_event(&mut session.events, |e| {
        matches!(e, SessionEvent::DataChannelStateChanged { state: DataChannelState::Open, .. })
    })
    .await
    .unwrap();

    let score = PeerMessage::ScoreUpdate {
        score: 87.6,
        time: 12.0,
    };
    transport.deliver(score.encode().unwrap()).await;
    let users = wait_for_roster(&mut roster, |users| {
        users.iter().any(|u| u.peer_id == peer("z") && u.total_score == 88)
    })
    .await;
    assert_eq!(users[1].round_score, 87.6);

    session.signaling.inject(&SignalMessage::RoundStart).await;
    assert!(next_event(&mut session.events, |e| *e == SessionEvent::RoundStarted)
        .await
        .is_some());
    let users = wait_for_roster(&mut roster, |users| users[1].round_score == 0.0).await;
    assert_eq!(users[1].total_score, 88);

    let sent = session.handle.send_score(90.0, 3.5).await.unwrap();
    assert_eq!(sent, 1);
    assert!(eventually(|| link.sent().len() == 1).await);
    assert_eq!(
        PeerMessage::decode(&link.sent()[0]).unwrap(),
        PeerMessage::ScoreUpdate {
            score: 90.0,
            time: 3.5
        }
    );
    assert_eq!(session.handle.roster_snapshot()[0].total_score, 90);

    session.signaling.inject(&SignalMessage::RoundEnd).await;
    assert!(next_event(&mut session.events, |e| *e == SessionEvent::RoundEnded)
        .await
        .is_some());
}

#[tokio::test]
async fn test_photo_request_only_for_local_peer() {
    init_tracing();
    let mut session = start_session("m").await;

    session
        .signaling
        .inject(&SignalMessage::RequestPhoto {
            to_peer_id: peer("z"),
        })
        .await;
    session.signaling.inject(&SignalMessage::RoundEnd).await;
    session
        .signaling
        .inject(&SignalMessage::RequestPhoto {
            to_peer_id: peer("m"),
        })
        .await;

    let first = next_event(&mut session.events, |e| {
        matches!(e, SessionEvent::PhotoRequested | SessionEvent::RoundEnded)
    })
    .await;
    assert_eq!(first, Some(SessionEvent::RoundEnded));
    let second = next_event(&mut session.events, |e| *e == SessionEvent::PhotoRequested).await;
    assert!(second.is_some());
}

#[tokio::test]
async fn test_connection_state_changes_are_observable() {
    init_tracing();
    let mut session = start_session("m").await;
    join(&session, "z", "Zen").await;

    let factory = session.factory.clone();
    assert!(eventually(|| factory.latest("z").is_some()).await);
    factory
        .latest("z")
        .unwrap()
        .set_state(PeerConnectionState::Connected)
        .await;

    let event = next_event(&mut session.events, |e| {
        *e == SessionEvent::ConnectionStateChanged {
            peer_id: peer("z"),
            state: PeerConnectionState::Connected,
        }
    })
    .await;
    assert!(event.is_some());
    assert_eq!(
        session.handle.connection_state(peer("z")).await.unwrap(),
        Some(PeerConnectionState::Connected)
    );
}

#[tokio::test]
async fn test_garbage_on_data_channel_is_dropped() {
    init_tracing();
    let session = start_session("m").await;
    let mut roster = session.handle.roster();
    join(&session, "z", "Zen").await;

    let factory = session.factory.clone();
    assert!(eventually(|| factory.latest("z").is_some()).await);
    let transport = factory.latest("z").unwrap();
    transport.deliver(Bytes::from_static(b"\xff\x00garbage")).await;
    transport
        .deliver(PeerMessage::ScoreUpdate { score: 10.0, time: 1.0 }.encode().unwrap())
        .await;

    wait_for_roster(&mut roster, |users| {
        users.iter().any(|u| u.peer_id == peer("z") && u.total_score == 10)
    })
    .await;
}
