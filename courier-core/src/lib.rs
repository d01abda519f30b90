// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier Core Library
//!
//! Encrypted message delivery core of a chat client: request/reply
//! correlation over one socket, a persistent job engine, per-device session
//! management and conversation reconciliation.
//! All digests and key derivation use the audited `ring` crate.

pub mod attachment;
pub mod config;
pub mod conversation;
pub mod courier;
pub mod crypto;
pub mod error;
pub mod inbound;
pub mod job;
pub mod network;
pub mod session;
pub mod storage;

pub use attachment::{AttachmentUploader, HttpUploadSink, UploadError, UploadSink, UserNotifier};
pub use config::{AttachmentConfig, ApiConfig, CourierConfig, JobConfig, TransportConfig};
pub use conversation::{ConversationApi, HttpConversationApi, Reconciler, SyncOutcome};
pub use courier::{Courier, CourierBuilder};
pub use crypto::{LocalSignalProtocol, SignalProtocol, SymmetricKey};
pub use error::{CourierError, CourierResult};
pub use inbound::InboundDispatcher;
pub use job::{CancellationToken, Job, JobEngine, JobKind, JobRunner, JobState};
pub use network::{ChatConnection, ConnectionState, MockTransport, NetworkError, Transport, WireMessage};
pub use session::{Account, Deliverer, MessageResult, SessionManager};
pub use storage::{MessageRecord, MessageStatus, Storage, StorageError};
