use sangha_session::{
    PeerId, SessionBuilder, SessionError, SessionEvent, SignalMessage, WatchIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::integration::{init_tracing, test_config};
use crate::utils::{MockSignalingChannel, MockTransportFactory, next_event, peer};

#[tokio::test]
async fn test_intents_wait_for_late_identity() {
    init_tracing();
    let (signaling, _sent_rx) = MockSignalingChannel::new();
    let (id_tx, id_rx) = watch::channel(None);

    let handle = SessionBuilder::new(test_config("me"))
        .identity(Arc::new(WatchIdentity(id_rx)))
        .signaling_channel(Arc::new(signaling.clone()))
        .transport_factory(Arc::new(MockTransportFactory::new()))
        .start()
        .unwrap();

    let ready = tokio::spawn({
        let handle = handle.clone();
        async move { handle.set_ready(true).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.local_id(), None);
    assert_eq!(signaling.connect_count(), 0);
    assert!(!ready.is_finished());

    id_tx.send_replace(Some(PeerId::from("me")));

    assert_eq!(ready.await.unwrap(), Ok(()));
    assert_eq!(handle.local_id(), Some(peer("me")));
    assert_eq!(
        signaling.sent()[0].message,
        SignalMessage::UserReady {
            peer_id: peer("me"),
            is_ready: true,
        }
    );
}

#[tokio::test]
async fn test_unresolved_identity_stops_session() {
    init_tracing();
    let (signaling, _sent_rx) = MockSignalingChannel::new();
    let (_id_tx, id_rx) = watch::channel(None);
    let mut config = test_config("me");
    config.identity_timeout_ms = 50;

    let handle = SessionBuilder::new(config)
        .identity(Arc::new(WatchIdentity(id_rx)))
        .signaling_channel(Arc::new(signaling.clone()))
        .transport_factory(Arc::new(MockTransportFactory::new()))
        .start()
        .unwrap();
    let mut events = handle.subscribe();

    let stopped = next_event(&mut events, |e| *e == SessionEvent::Stopped).await;
    assert!(stopped.is_some());
    assert_eq!(handle.set_ready(true).await, Err(SessionError::SessionClosed));
    assert_eq!(signaling.connect_count(), 0);
}
