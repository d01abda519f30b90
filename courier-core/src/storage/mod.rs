// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! SQLite-backed rows the delivery core reads and writes: conversations,
//! participant sessions, message status, transcript attachments, persisted
//! jobs and the inbound queues. Every operation is atomic per call; nothing
//! is cached in memory between calls.

mod conversations;
mod error;
mod inbound;
mod jobs;
mod messages;
mod migration;
mod sessions;
mod transcripts;

pub use conversations::{Conversation, ConversationCategory, ConversationStatus, Participant};
pub use error::StorageError;
pub use inbound::{FloodMessage, PendingAck, STATUS_OFFSET};
pub use jobs::StoredJob;
pub use messages::{category, MessageRecord, MessageStatus};
pub use migration::LATEST_VERSION as SCHEMA_VERSION;
pub use sessions::{ParticipantSession, SenderKeyStatus};
pub use transcripts::{MediaStatus, TranscriptAttachment};

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

/// SQLite-based storage implementation.
///
/// The connection sits behind a mutex so job workers, the socket reader and
/// the facade can share one `Arc<Storage>`.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Creates an in-memory storage (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, StorageError> {
        migration::migrate(&mut conn)?;
        Ok(Storage {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        migration::schema_version(&self.conn())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Seconds since the unix epoch.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
