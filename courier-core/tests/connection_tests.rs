// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for the chat connection: correlation, frame handling, session
//! teardown and reconnection.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::fixtures::FakeApi;
use common::helpers::{connected, init_tracing, test_job_config, test_transport_config, wait_until};
use courier_core::conversation::Reconciler;
use courier_core::network::message::{CREATE_MESSAGE, LIST_PENDING_MESSAGES};
use courier_core::network::{
    AlwaysReachable, ChatConnection, MockTransport, PushHandler, ReachabilityFlag, SessionFlag,
    SessionGuard, WireMessage,
};
use courier_core::session::Deliverer;
use courier_core::{CancellationToken, CourierError, NetworkError, Storage};
use parking_lot::Mutex;
use serde_json::json;

#[derive(Default)]
struct RecordingPush {
    received: Mutex<Vec<WireMessage>>,
}

impl PushHandler for RecordingPush {
    fn on_push(&self, message: &WireMessage) {
        self.received.lock().push(message.clone());
    }
}

fn manual_connection(transport: &MockTransport, session: Arc<SessionFlag>) -> ChatConnection {
    init_tracing();
    let connection = ChatConnection::new(
        transport.clone(),
        test_transport_config(),
        Arc::new(AlwaysReachable),
        session,
    );
    connection.connect().unwrap();
    connection
}

fn push(action: &str, message_id: &str) -> WireMessage {
    let mut message = WireMessage::request(action, None);
    message.data = Some(json!({ "message_id": message_id, "user_id": "peer" }));
    message
}

// === Correlation ===

#[test]
fn test_concurrent_requests_get_their_own_replies() {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_responder(|request| {
        vec![WireMessage::reply_to(
            request,
            Some(json!({ "echo": request.id })),
        )]
    });
    let connection = connected(&transport);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let connection = connection.clone();
            thread::spawn(move || {
                let request = WireMessage::request(CREATE_MESSAGE, None);
                let reply = connection.send_and_wait(&request).unwrap();
                (request.id, reply)
            })
        })
        .collect();

    for handle in handles {
        let (id, reply) = handle.join().unwrap();
        assert_eq!(reply.id, id);
        assert_eq!(reply.data.unwrap()["echo"], json!(id));
    }
    assert!(wait_until(Duration::from_secs(1), || connection
        .pending_transactions()
        == 0));
    connection.shutdown();
}

#[test]
fn test_send_while_disconnected_returns_none() {
    init_tracing();
    let transport = MockTransport::new();
    let connection = ChatConnection::new(
        transport.clone(),
        test_transport_config(),
        Arc::new(AlwaysReachable),
        Arc::new(SessionFlag::new()),
    );

    let started = Instant::now();
    let reply = connection.send_and_wait(&WireMessage::request(CREATE_MESSAGE, None));

    assert!(reply.is_none());
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(transport.sent_messages().is_empty());
}

#[test]
fn test_state_queries_do_not_wait_for_socket_read() {
    init_tracing();
    let transport = MockTransport::new();
    let connection = connected(&transport);
    transport.set_receive_delay(Duration::from_millis(500));
    // Let the reader settle into a slow receive.
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert!(connection.is_connected());
    assert_eq!(connection.pending_transactions(), 1);
    assert!(started.elapsed() < Duration::from_millis(200));
    connection.shutdown();
}

#[test]
fn test_writes_are_not_starved_by_reader() {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_responder(|request| vec![WireMessage::reply_to(request, None)]);
    let connection = connected(&transport);
    transport.set_receive_delay(Duration::from_millis(150));
    thread::sleep(Duration::from_millis(20));

    for _ in 0..3 {
        let started = Instant::now();
        let reply = connection.send_and_wait_timeout(
            &WireMessage::request(CREATE_MESSAGE, None),
            Duration::from_secs(2),
        );
        assert!(reply.is_some());
        assert!(started.elapsed() < Duration::from_millis(600));
    }
    connection.shutdown();
}

#[test]
fn test_reply_with_unknown_id_is_ignored() {
    let transport = MockTransport::new();
    let connection = manual_connection(&transport, Arc::new(SessionFlag::new()));
    let handler = Arc::new(RecordingPush::default());
    connection.set_push_handler(handler.clone());

    let stray = WireMessage::request("SOMETHING", None);
    transport.queue_receive(&WireMessage::reply_to(&stray, None));

    assert!(connection.pump_once().unwrap());
    assert!(connection.is_connected());
    assert!(handler.received.lock().is_empty());
}

// === Frames ===

#[test]
fn test_corrupt_frame_is_dropped() {
    let transport = MockTransport::new();
    let connection = manual_connection(&transport, Arc::new(SessionFlag::new()));
    let handler = Arc::new(RecordingPush::default());
    connection.set_push_handler(handler.clone());

    transport.queue_frame(vec![0x1f, 0x8b, 0x08, 0x00, 0xde, 0xad, 0xbe, 0xef]);
    transport.queue_receive(&push(CREATE_MESSAGE, "m1"));

    assert!(connection.pump_once().unwrap());
    assert!(handler.received.lock().is_empty());
    assert!(connection.pump_once().unwrap());

    let received = handler.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].action, CREATE_MESSAGE);
    assert!(connection.is_connected());
}

#[test]
fn test_only_receive_actions_reach_push_handler() {
    let transport = MockTransport::new();
    let connection = manual_connection(&transport, Arc::new(SessionFlag::new()));
    let handler = Arc::new(RecordingPush::default());
    connection.set_push_handler(handler.clone());

    transport.queue_receive(&push(LIST_PENDING_MESSAGES, "m1"));
    transport.queue_receive(&push("ACKNOWLEDGE_MESSAGE_RECEIPT", "m2"));
    while connection.pump_once().unwrap() {}

    let received = handler.received.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].action, "ACKNOWLEDGE_MESSAGE_RECEIPT");
}

// === Session teardown ===

#[test]
fn test_auth_error_tears_down_session() {
    let transport = MockTransport::new();
    let session = Arc::new(SessionFlag::new());
    let connection = manual_connection(&transport, session.clone());

    let request = WireMessage::request(CREATE_MESSAGE, None);
    transport.queue_receive(&WireMessage::error_reply(&request, 401, "token expired"));
    assert!(connection.pump_once().unwrap());

    assert!(!connection.is_connected());
    assert!(connection.is_session_rejected());
    assert!(!session.is_token_valid());
    assert_eq!(session.invalidation_reason().as_deref(), Some("token expired"));
    assert!(matches!(
        connection.connect(),
        Err(NetworkError::AuthenticationFailed(_))
    ));
}

#[test]
fn test_rejected_handshake_invalidates_session() {
    init_tracing();
    let transport = MockTransport::new();
    let session = Arc::new(SessionFlag::new());
    let connection = ChatConnection::new(
        transport.clone(),
        test_transport_config(),
        Arc::new(AlwaysReachable),
        session.clone(),
    );
    transport.inject_error(NetworkError::AuthenticationFailed("bad token".into()));

    assert!(connection.connect().is_err());
    assert!(!session.is_token_valid());
    assert!(connection.connect().is_err());
    assert_eq!(transport.connect_attempts().len(), 1);
}

// === Reconnection ===

#[test]
fn test_lost_connection_releases_waiter_and_reconnects() {
    init_tracing();
    let transport = MockTransport::new();
    let connection = connected(&transport);

    let waiter = {
        let connection = connection.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let reply = connection.send_and_wait_timeout(
                &WireMessage::request(CREATE_MESSAGE, None),
                Duration::from_secs(10),
            );
            (reply, started.elapsed())
        })
    };
    assert!(wait_until(Duration::from_secs(1), || !transport
        .sent_with_action(CREATE_MESSAGE)
        .is_empty()));

    transport.simulate_disconnect();
    let (reply, waited) = waiter.join().unwrap();
    assert!(reply.is_none());
    assert!(waited < Duration::from_secs(5));

    assert!(wait_until(Duration::from_secs(2), || transport
        .connect_attempts()
        .len()
        >= 2
        && connection.is_connected()));
    assert_eq!(transport.sent_with_action(LIST_PENDING_MESSAGES).len(), 2);
    connection.shutdown();
}

#[test]
fn test_no_reconnect_after_explicit_disconnect() {
    init_tracing();
    let transport = MockTransport::new();
    let connection = connected(&transport);

    connection.disconnect();
    thread::sleep(Duration::from_millis(100));

    assert!(!connection.is_connected());
    assert_eq!(transport.connect_attempts().len(), 1);
    connection.shutdown();
}

// === Offline delivery ===

#[test]
fn test_offline_delivery_fails_fast() {
    init_tracing();
    let transport = MockTransport::new();
    let connection = Arc::new(ChatConnection::new(
        transport.clone(),
        test_transport_config(),
        Arc::new(ReachabilityFlag::new(false)),
        Arc::new(SessionFlag::new()),
    ));
    let storage = Arc::new(Storage::in_memory().unwrap());
    let reconciler = Arc::new(Reconciler::new(storage, Arc::new(FakeApi::new())));
    let deliverer = Deliverer::new(connection, reconciler, test_job_config());

    let started = Instant::now();
    let err = deliverer
        .deliver_no_throw(
            &WireMessage::request(CREATE_MESSAGE, None),
            &CancellationToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, CourierError::TransportUnavailable(_)));
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(transport.sent_messages().is_empty());
}
