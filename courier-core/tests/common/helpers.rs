// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Helpers
//!
//! Configuration tuned for fast tests and a wired delivery stack over a
//! mock socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use courier_core::config::{AttachmentConfig, ApiConfig, CourierConfig, JobConfig};
use courier_core::conversation::Reconciler;
use courier_core::crypto::{LocalSignalProtocol, SignalKey, SignalProtocol};
use courier_core::network::message::{
    codes, CONSUME_SESSION_SIGNAL_KEYS, LIST_PENDING_MESSAGES,
};
use courier_core::network::{
    AlwaysReachable, ChatConnection, MockTransport, SessionFlag, SessionParam, TransportConfig,
    WireMessage,
};
use courier_core::session::{Account, Deliverer, SessionManager};
use courier_core::storage::{
    Conversation, ConversationCategory, ConversationStatus, ParticipantSession, Storage,
};
use courier_core::Courier;
use serde_json::json;

use super::fixtures::{FakeApi, RecordingNotifier, RecordingSink};

pub const ME: &str = "me";
pub const MY_SESSION: &str = "my-session";

/// Routes `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn account() -> Account {
    Account::new(ME, MY_SESSION)
}

pub fn test_job_config() -> JobConfig {
    JobConfig {
        workers: 2,
        retry_delay_ms: 10,
        max_backoff_ms: 40,
        max_server_error_attempts: 3,
        max_conflict_retries: 3,
    }
}

pub fn test_transport_config() -> TransportConfig {
    let mut config = TransportConfig::new("ws://chat.test")
        .with_request_timeout_ms(300)
        .with_reconnect_interval_ms(20);
    config.poll_timeout_ms = 10;
    config
}

pub fn test_config() -> CourierConfig {
    CourierConfig {
        transport: test_transport_config(),
        jobs: test_job_config(),
        attachments: AttachmentConfig {
            progress_interval_ms: 0,
            ..AttachmentConfig::default()
        },
        api: ApiConfig::default(),
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Server behaviour accepting every request with an empty reply.
pub fn reply_ok(request: &WireMessage) -> Vec<WireMessage> {
    if request.action == LIST_PENDING_MESSAGES {
        return Vec::new();
    }
    vec![WireMessage::reply_to(request, None)]
}

/// Plays the chat server: pre-keys for users accepted by `has_key`, and a
/// checksum conflict for the first `conflicts` requests with action
/// `conflict_on`. Everything else succeeds.
pub fn serve_keys<F>(
    transport: &MockTransport,
    has_key: F,
    conflict_on: &'static str,
    conflicts: usize,
) where
    F: Fn(&str) -> bool + Send + 'static,
{
    let peer = LocalSignalProtocol::new();
    let remaining = AtomicUsize::new(conflicts);
    transport.set_responder(move |request| {
        let action = request.action.as_str();
        if action == LIST_PENDING_MESSAGES {
            return Vec::new();
        }
        if action == CONSUME_SESSION_SIGNAL_KEYS {
            let recipients: Vec<SessionParam> = request
                .params
                .as_ref()
                .and_then(|p| p.get("recipients"))
                .cloned()
                .map(|v| serde_json::from_value(v).unwrap())
                .unwrap_or_default();
            let keys: Vec<SignalKey> = recipients
                .iter()
                .filter(|r| has_key(&r.user_id))
                .map(|r| peer.signal_key(&r.user_id, r.session_id.as_deref()))
                .collect();
            return vec![WireMessage::reply_to(request, Some(json!(keys)))];
        }
        if action == conflict_on
            && remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return vec![WireMessage::error_reply(
                request,
                codes::CONVERSATION_CHECKSUM_INVALID,
                "checksum",
            )];
        }
        vec![WireMessage::reply_to(request, None)]
    });
}

/// Stores a confirmed group conversation with the given devices.
pub fn save_group(storage: &Storage, conversation_id: &str, sessions: &[(&str, &str)]) {
    storage
        .save_conversation(&Conversation {
            conversation_id: conversation_id.to_string(),
            owner_id: ME.to_string(),
            category: ConversationCategory::Group,
            name: Some("group".to_string()),
            status: ConversationStatus::Success,
        })
        .unwrap();
    let rows: Vec<ParticipantSession> = sessions
        .iter()
        .map(|(user_id, session_id)| ParticipantSession::new(conversation_id, user_id, session_id))
        .collect();
    storage.upsert_participant_sessions(&rows).unwrap();
}

/// Stores a one-to-one conversation with `peer`.
pub fn save_contact(
    storage: &Storage,
    conversation_id: &str,
    peer: &str,
    status: ConversationStatus,
) -> Conversation {
    let conversation = Conversation {
        conversation_id: conversation_id.to_string(),
        owner_id: peer.to_string(),
        category: ConversationCategory::Contact,
        name: None,
        status,
    };
    storage.save_conversation(&conversation).unwrap();
    conversation
}

/// Opens a connection over `transport` and starts its reader.
pub fn connected(transport: &MockTransport) -> Arc<ChatConnection> {
    let connection = Arc::new(ChatConnection::new(
        transport.clone(),
        test_transport_config(),
        Arc::new(AlwaysReachable),
        Arc::new(SessionFlag::new()),
    ));
    connection.connect().unwrap();
    connection.start();
    connection
}

/// The delivery stack below the job engine, wired over a mock socket.
pub struct Stack {
    pub storage: Arc<Storage>,
    pub transport: MockTransport,
    pub connection: Arc<ChatConnection>,
    pub api: Arc<FakeApi>,
    pub signal: Arc<LocalSignalProtocol>,
    pub reconciler: Arc<Reconciler>,
    pub deliverer: Arc<Deliverer>,
    pub sessions: SessionManager,
}

impl Stack {
    pub fn new() -> Self {
        init_tracing();
        let storage = Arc::new(Storage::in_memory().unwrap());
        let transport = MockTransport::new();
        let connection = connected(&transport);
        let api = Arc::new(FakeApi::new());
        let signal = Arc::new(LocalSignalProtocol::new());
        let reconciler = Arc::new(Reconciler::new(storage.clone(), api.clone()));
        let deliverer = Arc::new(Deliverer::new(
            connection.clone(),
            reconciler.clone(),
            test_job_config(),
        ));
        let protocol: Arc<dyn SignalProtocol> = signal.clone();
        let sessions = SessionManager::new(
            storage.clone(),
            protocol,
            deliverer.clone(),
            account(),
            test_job_config().max_conflict_retries,
        );
        Stack {
            storage,
            transport,
            connection,
            api,
            signal,
            reconciler,
            deliverer,
            sessions,
        }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.connection.shutdown();
    }
}

/// A started [`Courier`] over a mock socket, a fake REST API and an
/// in-memory upload store.
pub struct App {
    pub courier: Arc<Courier>,
    pub storage: Arc<Storage>,
    pub transport: MockTransport,
    pub api: Arc<FakeApi>,
    pub sink: Arc<RecordingSink>,
    pub notifier: Arc<RecordingNotifier>,
}

impl App {
    pub fn start() -> Self {
        init_tracing();
        let storage = Arc::new(Storage::in_memory().unwrap());
        let transport = MockTransport::new();
        transport.set_responder(reply_ok);
        let api = Arc::new(FakeApi::new());
        let sink = Arc::new(RecordingSink::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let courier = Courier::builder(test_config(), account())
            .storage(storage.clone())
            .transport(transport.clone())
            .api(api.clone())
            .upload_sink(sink.clone())
            .notifier(notifier.clone())
            .build()
            .unwrap();
        courier.start().unwrap();

        App {
            courier: Arc::new(courier),
            storage,
            transport,
            api,
            sink,
            notifier,
        }
    }

    /// Waits for every queued job to settle.
    pub fn settle(&self) {
        assert!(
            self.courier.engine().wait_idle(Duration::from_secs(60)),
            "jobs did not settle"
        );
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.courier.shutdown();
    }
}
