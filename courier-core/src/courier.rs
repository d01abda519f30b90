// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier Orchestrator
//!
//! Main entry point. Wires the chat connection, session manager,
//! reconciler, attachment uploader and job engine by explicit injection.
//!
//! # Example
//!
//! ```ignore
//! use courier_core::{Account, Courier, CourierConfig};
//!
//! let courier = Courier::builder(CourierConfig::from_env(), Account::new("me", "session"))
//!     .storage_path("courier.db")
//!     .build()?;
//! courier.start()?;
//!
//! let message = MessageRecord::outgoing("conversation", "me", "PLAIN_TEXT", "hello");
//! courier.send_message(&message)?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::attachment::{
    AttachmentUploader, HttpUploadSink, LogNotifier, UploadSink, UserNotifier,
};
use crate::config::CourierConfig;
use crate::conversation::{ConversationApi, HttpConversationApi, Reconciler};
use crate::crypto::{LocalSignalProtocol, SignalProtocol};
use crate::error::{CourierError, CourierResult};
use crate::inbound::InboundDispatcher;
use crate::job::{CourierJobRunner, Job, JobEngine};
use crate::network::{
    AlwaysReachable, ChatConnection, Reachability, SessionFlag, SessionGuard, Transport,
};
use crate::session::{Account, Deliverer, SessionManager};
use crate::storage::{MessageRecord, Storage};

/// Builder for [`Courier`]. Every collaborator has a production default.
pub struct CourierBuilder {
    config: CourierConfig,
    account: Account,
    storage: Option<Arc<Storage>>,
    storage_path: Option<PathBuf>,
    transport: Option<Box<dyn Transport>>,
    api: Option<Arc<dyn ConversationApi>>,
    signal: Option<Arc<dyn SignalProtocol>>,
    sink: Option<Arc<dyn UploadSink>>,
    notifier: Option<Arc<dyn UserNotifier>>,
    reachability: Option<Arc<dyn Reachability>>,
    session_guard: Option<Arc<dyn SessionGuard>>,
}

impl CourierBuilder {
    pub fn storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn storage_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.storage_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn transport<T: Transport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn api(mut self, api: Arc<dyn ConversationApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn signal(mut self, signal: Arc<dyn SignalProtocol>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn upload_sink(mut self, sink: Arc<dyn UploadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn reachability(mut self, reachability: Arc<dyn Reachability>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    pub fn session_guard(mut self, guard: Arc<dyn SessionGuard>) -> Self {
        self.session_guard = Some(guard);
        self
    }

    pub fn build(self) -> CourierResult<Courier> {
        let storage = match (self.storage, &self.storage_path) {
            (Some(storage), _) => storage,
            (None, Some(path)) => Arc::new(Storage::open(path)?),
            (None, None) => Arc::new(Storage::in_memory()?),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let api: Arc<dyn ConversationApi> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpConversationApi::new(&self.config.api)?),
        };
        let sink: Arc<dyn UploadSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(HttpUploadSink::new(&self.config.attachments)?),
        };
        let signal = self
            .signal
            .unwrap_or_else(|| Arc::new(LocalSignalProtocol::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let reachability = self
            .reachability
            .unwrap_or_else(|| Arc::new(AlwaysReachable));
        let session_guard = self
            .session_guard
            .unwrap_or_else(|| Arc::new(SessionFlag::new()));

        let config = self.config;
        let connection = Arc::new(ChatConnection::with_boxed(
            transport,
            config.transport.clone(),
            reachability,
            session_guard,
        ));
        let reconciler = Arc::new(Reconciler::new(storage.clone(), api.clone()));
        let deliverer = Arc::new(Deliverer::new(
            connection.clone(),
            reconciler.clone(),
            config.jobs.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            storage.clone(),
            signal,
            deliverer.clone(),
            self.account.clone(),
            config.jobs.max_conflict_retries,
        ));
        let uploader = Arc::new(AttachmentUploader::new(sink, config.attachments.clone()));
        let runner = Arc::new(CourierJobRunner::new(
            storage.clone(),
            sessions.clone(),
            reconciler.clone(),
            deliverer,
            api,
            uploader,
            notifier,
            config.attachments.clone(),
        ));
        let engine = Arc::new(JobEngine::new(
            runner,
            config.jobs.clone(),
            Some(storage.clone()),
        ));
        let dispatcher =
            InboundDispatcher::new(storage.clone(), &self.account.user_id).with_engine(&engine);
        connection.set_push_handler(Arc::new(dispatcher));

        Ok(Courier {
            config,
            account: self.account,
            storage,
            connection,
            sessions,
            reconciler,
            engine,
        })
    }
}

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
fn default_transport() -> CourierResult<Box<dyn Transport>> {
    Ok(Box::new(crate::network::WebSocketTransport::new()))
}

#[cfg(not(any(feature = "network-native-tls", feature = "network-rustls")))]
fn default_transport() -> CourierResult<Box<dyn Transport>> {
    Err(CourierError::TransportUnavailable(
        "no transport configured".into(),
    ))
}

/// The delivery core.
pub struct Courier {
    config: CourierConfig,
    account: Account,
    storage: Arc<Storage>,
    connection: Arc<ChatConnection>,
    sessions: Arc<SessionManager>,
    reconciler: Arc<Reconciler>,
    engine: Arc<JobEngine>,
}

impl Courier {
    pub fn builder(config: CourierConfig, account: Account) -> CourierBuilder {
        CourierBuilder {
            config,
            account,
            storage: None,
            storage_path: None,
            transport: None,
            api: None,
            signal: None,
            sink: None,
            notifier: None,
            reachability: None,
            session_guard: None,
        }
    }

    /// Connects, starts the socket reader and restores persisted jobs.
    pub fn start(&self) -> CourierResult<()> {
        self.connection.connect()?;
        self.connection.start();
        let restored = self.engine.restore()?;
        info!(user_id = %self.account.user_id, restored, "courier started");
        Ok(())
    }

    /// Stores an outgoing message and queues its delivery.
    pub fn send_message(&self, message: &MessageRecord) -> CourierResult<()> {
        self.storage.save_message(message)?;
        self.engine
            .submit(Job::send_message(&message.conversation_id, &message.message_id))
    }

    /// Queues a re-send of a stored message to one device.
    pub fn resend_message(
        &self,
        message_id: &str,
        recipient_id: &str,
        session_id: Option<&str>,
    ) -> CourierResult<()> {
        let message = self
            .storage
            .message(message_id)?
            .ok_or_else(|| CourierError::ResourceNotFound(message_id.to_string()))?;
        self.engine.submit(Job::resend_message(
            &message.conversation_id,
            message_id,
            recipient_id,
            session_id,
        ))
    }

    /// Queues our sender key for one device.
    pub fn send_sender_key(
        &self,
        conversation_id: &str,
        recipient_id: &str,
        session_id: Option<&str>,
        force: bool,
    ) -> CourierResult<()> {
        self.engine.submit(Job::send_sender_key(
            conversation_id,
            recipient_id,
            session_id,
            force,
        ))
    }

    /// Queues sender key distribution to every unconfirmed device.
    pub fn refresh_sender_keys(&self, conversation_id: &str) -> CourierResult<()> {
        self.engine.submit(Job::refresh_sender_keys(conversation_id))
    }

    /// Queues the upload of every pending attachment of a transcript.
    pub fn upload_transcript(&self, transcript_id: &str) -> CourierResult<usize> {
        let pending: Vec<_> = self
            .storage
            .transcripts(transcript_id)?
            .into_iter()
            .filter(|t| t.media_status == Some(crate::storage::MediaStatus::Pending))
            .collect();
        for t in &pending {
            self.engine
                .submit(Job::transcript_attachment(transcript_id, &t.message_id))?;
        }
        Ok(pending.len())
    }

    /// Queues delivery of pending receipt acknowledgements.
    pub fn acknowledge_pending(&self) -> CourierResult<()> {
        self.engine.submit(Job::ack_messages())
    }

    /// Cancels one job by id.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.engine.cancel(job_id)
    }

    /// Cancels the upload of one transcript attachment.
    pub fn cancel_transcript_attachment(&self, transcript_id: &str, message_id: &str) -> bool {
        self.engine
            .cancel(&Job::transcript_attachment(transcript_id, message_id).job_id)
    }

    /// Session teardown: cancels every job and closes the socket.
    pub fn logout(&self) {
        self.engine.cancel_all();
        self.connection.disconnect();
        info!(user_id = %self.account.user_id, "logged out");
    }

    /// Stops the socket reader and the workers. Persisted jobs survive.
    pub fn shutdown(&self) {
        self.connection.shutdown();
        self.engine.shutdown();
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn connection(&self) -> &Arc<ChatConnection> {
        &self.connection
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }
}
