//! WebSocket transport against a local gateway.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{collect_until, manager_config, memory_store, start_mock_gateway, wait_for_state};
use session_keeper::connection::{
    AuthState, CloseReason, ConnectionManager, ConnectionState, EventReceiver, EventSink,
    Identity, ReasonCode, Transport, TransportEvent, WsTransport,
};
use session_keeper::credentials::CREDS_KEY;

async fn next(events: &mut EventReceiver) -> (u64, TransportEvent) {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_open_reports_identity_and_events() {
    let gateway = start_mock_gateway().await;
    let transport = WsTransport::new(gateway.url());
    let (sink, mut events) = EventSink::channel(7);

    let handshake = transport.open(AuthState::Unregistered, sink).await.unwrap();
    assert_eq!(handshake.identity, Identity::Unknown);
    assert!(handshake.handle.is_open());
    assert_eq!(gateway.hellos(), vec![Vec::<u8>::new()]);

    assert!(gateway.authenticate(b"abc"));
    assert_eq!(
        next(&mut events).await,
        (7, TransportEvent::Authenticated(b"abc".to_vec()))
    );

    assert!(gateway.close_with_status(440));
    match next(&mut events).await {
        (7, TransportEvent::Disconnected(event)) => assert_eq!(event.reason, ReasonCode::Replaced),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_known_identity_and_local_close() {
    let gateway = start_mock_gateway().await;
    let transport = WsTransport::new(gateway.url());
    let (sink, mut events) = EventSink::channel(1);

    let handshake = transport
        .open(AuthState::Registered(b"me".to_vec()), sink)
        .await
        .unwrap();
    assert_eq!(handshake.identity, Identity::Known);
    assert_eq!(gateway.hellos(), vec![b"me".to_vec()]);

    let handle = handshake.handle.clone();
    transport.close(handshake.handle).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!handle.is_open());
    assert!(!handle.send(b"late".to_vec()));
    // A local close is not reported as a disconnect.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_unreachable_gateway_is_connection_lost() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = WsTransport::new(format!("ws://{addr}/session"));
    let (sink, _events) = EventSink::channel(1);
    let err = transport
        .open(AuthState::Unregistered, sink)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), ReasonCode::ConnectionLost);
}

#[tokio::test]
async fn test_manager_session_over_websocket() {
    let gateway = start_mock_gateway().await;
    let transport = Arc::new(WsTransport::new(gateway.url()));
    let store = memory_store();
    let manager = ConnectionManager::new(transport, store.clone(), manager_config(3, 100));
    let mut state = manager.watch_state();
    let mut changes = manager.subscribe();
    manager.start().unwrap();

    // Fresh install: the gateway does not know us yet.
    wait_for_state(&mut state, |s| *s == ConnectionState::Authenticating).await;
    assert!(gateway.authenticate(b"abc"));
    collect_until(&mut changes, |c| c.to == ConnectionState::Connected).await;
    assert_eq!(store.get(CREDS_KEY).await.unwrap(), Some(b"abc".to_vec()));
    assert!(manager.live_handle().is_some());

    // Server-requested restart reconnects with the stored identity after
    // the fixed restart delay.
    assert!(gateway.close_with_status(515));
    collect_until(&mut changes, |c| c.to == ConnectionState::Connected).await;
    assert_eq!(gateway.hellos(), vec![Vec::new(), b"abc".to_vec()]);
    assert_eq!(manager.health().total_failures, 1);

    assert!(gateway.close_with_status(401));
    let reason = tokio::time::timeout(Duration::from_secs(2), manager.wait_closed())
        .await
        .unwrap();
    assert_eq!(reason, CloseReason::LoggedOut);
    assert_eq!(store.get(CREDS_KEY).await.unwrap(), None);
    assert!(manager.live_handle().is_none());
}
