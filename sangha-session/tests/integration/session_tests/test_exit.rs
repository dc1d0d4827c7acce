use sangha_session::{SessionError, SessionEvent, SignalMessage};
use std::time::Duration;

use crate::integration::{init_tracing, start_session};
use crate::utils::{eventually, next_event, peer, wait_for_roster};

#[tokio::test]
async fn test_exit_announces_and_tears_down() {
    init_tracing();
    let mut session = start_session("m").await;
    session
        .signaling
        .inject(&SignalMessage::UserJoined {
            peer_id: peer("z"),
            user_nick_name: "Zen".into(),
        })
        .await;
    let factory = session.factory.clone();
    assert!(eventually(|| factory.latest("z").is_some()).await);

    session.handle.exit().await;

    let left = session
        .signaling
        .sent()
        .into_iter()
        .find(|s| matches!(s.message, SignalMessage::UserLeft { .. }))
        .unwrap();
    assert_eq!(left.destination, "/app/room/room-1");
    assert_eq!(left.message, SignalMessage::UserLeft { peer_id: peer("m") });

    assert!(factory.latest("z").unwrap().is_closed());
    assert_eq!(session.signaling.disconnect_count(), 1);
    assert!(!session.signaling.is_connected());
    assert!(
        next_event(&mut session.events, |e| *e == SessionEvent::Stopped)
            .await
            .is_some()
    );

    assert_eq!(
        session.handle.set_ready(true).await,
        Err(SessionError::SessionClosed)
    );
    let handle = session.handle.clone();
    assert!(eventually(|| handle.is_closed()).await);

    // A second exit has nothing left to stop.
    session.handle.exit().await;
}

#[tokio::test]
async fn test_signaling_stream_can_be_reconnected() {
    init_tracing();
    let session = start_session("m").await;
    assert_eq!(session.signaling.connect_count(), 1);

    session.signaling.drop_stream();
    session.handle.reconnect_signaling().await.unwrap();
    assert_eq!(session.signaling.connect_count(), 2);

    session
        .signaling
        .inject(&SignalMessage::UserJoined {
            peer_id: peer("z"),
            user_nick_name: "Zen".into(),
        })
        .await;
    let mut roster = session.handle.roster();
    wait_for_roster(&mut roster, |users| users.len() == 2).await;
}

#[tokio::test]
async fn test_slow_reconnect_keeps_session_responsive() {
    init_tracing();
    let session = start_session("m").await;
    session.signaling.drop_stream();
    session.signaling.set_connect_delay(Duration::from_millis(500));

    let reconnect = tokio::spawn({
        let handle = session.handle.clone();
        async move { handle.reconnect_signaling().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let state = tokio::time::timeout(
        Duration::from_millis(200),
        session.handle.connection_state(peer("z")),
    )
    .await;
    assert_eq!(state, Ok(Ok(None)));
    assert!(!reconnect.is_finished());

    assert_eq!(reconnect.await.unwrap(), Ok(()));
    assert_eq!(session.signaling.connect_count(), 2);
}
