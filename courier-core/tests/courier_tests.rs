// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end tests for the courier facade over a mock socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use common::fixtures::conversation_response;
use common::helpers::{
    reply_ok, save_contact, save_group, serve_keys, wait_until, App, ME, MY_SESSION,
};
use courier_core::network::message::{
    ACKNOWLEDGE_MESSAGE_RECEIPT, ACKNOWLEDGE_MESSAGE_RECEIPTS, CONSUME_SESSION_SIGNAL_KEYS,
    CREATE_MESSAGE, CREATE_SIGNAL_KEY_MESSAGES,
};
use courier_core::network::{MessageParam, WireMessage};
use courier_core::storage::{category, ConversationStatus, SenderKeyStatus};
use courier_core::{CourierError, JobState, MessageRecord, MessageStatus};
use serde_json::json;

fn sent_params(app: &App) -> Vec<MessageParam> {
    app.transport
        .sent_with_action(CREATE_MESSAGE)
        .into_iter()
        .map(|m| serde_json::from_value(m.params.unwrap()).unwrap())
        .collect()
}

fn status(app: &App, message_id: &str) -> Option<MessageStatus> {
    app.storage.message_status(message_id).unwrap()
}

// === Sending ===

#[test]
fn test_first_message_creates_conversation_then_sends() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Start);
    let message = MessageRecord::outgoing("c1", ME, category::PLAIN_TEXT, "hello");

    app.courier.send_message(&message).unwrap();
    app.settle();

    assert_eq!(app.api.create_calls(), 1);
    let conversation = app.storage.conversation("c1").unwrap().unwrap();
    assert_eq!(conversation.status, ConversationStatus::Success);

    let params = sent_params(&app);
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].message_id, message.message_id);
    assert_eq!(params[0].category, category::PLAIN_TEXT);
    assert_eq!(STANDARD.decode(&params[0].data).unwrap(), b"hello");
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sent));
}

#[test]
fn test_unconfirmed_conversation_fails_the_send() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Start);
    app.api.fail_create(true);
    let message = MessageRecord::outgoing("c1", ME, category::PLAIN_TEXT, "hello");

    app.courier.send_message(&message).unwrap();
    app.settle();

    assert_eq!(
        app.courier.engine().state(&message.message_id),
        Some(JobState::Failed)
    );
    assert!(sent_params(&app).is_empty());
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sending));
}

#[test]
fn test_already_sent_message_is_not_sent_again() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Success);
    let mut message = MessageRecord::outgoing("c1", ME, category::PLAIN_TEXT, "hello");
    message.status = MessageStatus::Delivered;

    app.courier.send_message(&message).unwrap();
    app.settle();

    assert!(sent_params(&app).is_empty());
    assert_eq!(
        app.courier.engine().state(&message.message_id),
        Some(JobState::Done)
    );
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Delivered));
}

#[test]
fn test_group_message_distributes_sender_key_first() {
    let app = App::start();
    let devices = [(ME, MY_SESSION), ("bob", "s1")];
    save_group(&app.storage, "g1", &devices);
    app.api
        .set_conversation(conversation_response("g1", "GROUP", &devices));
    serve_keys(&app.transport, |_| true, CREATE_MESSAGE, 0);
    let message = MessageRecord::outgoing("g1", ME, category::SIGNAL_TEXT, "secret");

    app.courier.send_message(&message).unwrap();
    app.settle();

    let actions: Vec<String> = app
        .transport
        .sent_messages()
        .into_iter()
        .map(|m| m.action)
        .filter(|a| {
            a == CONSUME_SESSION_SIGNAL_KEYS || a == CREATE_SIGNAL_KEY_MESSAGES || a == CREATE_MESSAGE
        })
        .collect();
    assert_eq!(
        actions,
        vec![CONSUME_SESSION_SIGNAL_KEYS, CREATE_SIGNAL_KEY_MESSAGES, CREATE_MESSAGE]
    );

    let params = sent_params(&app);
    assert!(params[0].conversation_checksum.is_some());
    assert_ne!(STANDARD.decode(&params[0].data).unwrap(), b"secret");
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sent));
    let bob = app
        .storage
        .participant_session("g1", "bob", "s1")
        .unwrap()
        .unwrap();
    assert_eq!(bob.sender_key_status, Some(SenderKeyStatus::Sent));
}

#[test]
fn test_group_send_survives_checksum_conflict() {
    let app = App::start();
    let devices = [(ME, MY_SESSION), ("bob", "s1")];
    save_group(&app.storage, "g1", &devices);
    app.api
        .set_conversation(conversation_response("g1", "GROUP", &devices));
    serve_keys(&app.transport, |_| true, CREATE_MESSAGE, 1);
    let message = MessageRecord::outgoing("g1", ME, category::SIGNAL_TEXT, "secret");

    app.courier.send_message(&message).unwrap();
    app.settle();

    assert_eq!(sent_params(&app).len(), 2);
    assert!(app.api.get_calls() >= 2);
    assert_eq!(
        app.courier.engine().state(&message.message_id),
        Some(JobState::Done)
    );
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sent));
}

#[test]
fn test_resend_targets_one_device() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Success);
    serve_keys(&app.transport, |_| true, CREATE_MESSAGE, 0);
    let mut message = MessageRecord::outgoing("c1", ME, category::SIGNAL_TEXT, "again");
    message.status = MessageStatus::Sent;
    app.storage.save_message(&message).unwrap();

    app.courier
        .resend_message(&message.message_id, "bob", Some("s1"))
        .unwrap();
    app.settle();

    let params = sent_params(&app);
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].recipient_id.as_deref(), Some("bob"));
    assert_eq!(params[0].session_id.as_deref(), Some("s1"));
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sent));
}

#[test]
fn test_resend_to_device_without_pre_key_is_skipped() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Success);
    serve_keys(&app.transport, |_| false, CREATE_MESSAGE, 0);
    let mut message = MessageRecord::outgoing("c1", ME, category::SIGNAL_TEXT, "again");
    message.status = MessageStatus::Sent;
    app.storage.save_message(&message).unwrap();

    app.courier
        .resend_message(&message.message_id, "bob", Some("s1"))
        .unwrap();
    app.settle();

    assert_eq!(app.transport.sent_with_action(CONSUME_SESSION_SIGNAL_KEYS).len(), 1);
    assert!(sent_params(&app).is_empty());
    let job_id = format!("{}:bob:s1", message.message_id);
    assert_eq!(app.courier.engine().state(&job_id), Some(JobState::Done));
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sent));
}

#[test]
fn test_resend_of_unknown_message_is_rejected() {
    let app = App::start();
    let err = app
        .courier
        .resend_message("missing", "bob", None)
        .unwrap_err();
    assert!(matches!(err, CourierError::ResourceNotFound(ref id) if id == "missing"));
}

// === Inbound ===

#[test]
fn test_receipt_push_upgrades_sent_message() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Success);
    let message = MessageRecord::outgoing("c1", ME, category::PLAIN_TEXT, "hello");
    app.courier.send_message(&message).unwrap();
    app.settle();

    let mut receipt = WireMessage::request(ACKNOWLEDGE_MESSAGE_RECEIPT, None);
    receipt.data = Some(json!({
        "message_id": message.message_id,
        "user_id": "bob",
        "status": "READ",
    }));
    app.transport.queue_receive(&receipt);

    assert!(wait_until(Duration::from_secs(2), || status(
        &app,
        &message.message_id
    ) == Some(MessageStatus::Read)));
}

#[test]
fn test_pending_acknowledgements_are_drained() {
    let app = App::start();
    app.storage.queue_ack("m1", "READ").unwrap();
    app.storage.queue_ack("m2", "READ").unwrap();

    app.courier.acknowledge_pending().unwrap();
    app.settle();

    let requests = app.transport.sent_with_action(ACKNOWLEDGE_MESSAGE_RECEIPTS);
    assert_eq!(requests.len(), 1);
    let messages = requests[0].params.as_ref().unwrap()["messages"]
        .as_array()
        .unwrap()
        .len();
    assert_eq!(messages, 2);
    assert!(app.storage.pending_acks(10).unwrap().is_empty());
}

#[test]
fn test_ack_queued_during_ack_round_trip_is_sent() {
    let app = App::start();
    app.storage.queue_ack("m1", "READ").unwrap();
    let storage = app.storage.clone();
    let courier = Arc::downgrade(&app.courier);
    let mut first = true;
    app.transport.set_responder(move |request| {
        if request.action == ACKNOWLEDGE_MESSAGE_RECEIPTS && std::mem::take(&mut first) {
            storage.queue_ack("m2", "READ").unwrap();
            if let Some(courier) = courier.upgrade() {
                courier.acknowledge_pending().unwrap();
            }
        }
        reply_ok(request)
    });

    app.courier.acknowledge_pending().unwrap();
    app.settle();

    let acked: Vec<String> = app
        .transport
        .sent_with_action(ACKNOWLEDGE_MESSAGE_RECEIPTS)
        .iter()
        .flat_map(|m| m.params.as_ref().unwrap()["messages"].as_array().unwrap().clone())
        .map(|m| m["message_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(acked, vec!["m1", "m2"]);
    assert!(app.storage.pending_acks(10).unwrap().is_empty());
}

// === Session teardown ===

#[test]
fn test_logout_cancels_everything() {
    let app = App::start();
    save_contact(&app.storage, "c1", "bob", ConversationStatus::Success);
    // The server never answers, so the send keeps retrying.
    app.transport.set_responder(|request| {
        if request.action == CREATE_MESSAGE {
            Vec::new()
        } else {
            reply_ok(request)
        }
    });
    let message = MessageRecord::outgoing("c1", ME, category::PLAIN_TEXT, "hello");
    app.courier.send_message(&message).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !app
        .transport
        .sent_with_action(CREATE_MESSAGE)
        .is_empty()));

    app.courier.logout();
    app.settle();

    assert_eq!(
        app.courier.engine().state(&message.message_id),
        Some(JobState::Cancelled)
    );
    assert!(app.storage.load_jobs().unwrap().is_empty());
    assert!(!app.courier.connection().is_connected());
    assert_eq!(status(&app, &message.message_id), Some(MessageStatus::Sending));
}
