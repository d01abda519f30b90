// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Schema migrations.
//!
//! The schema version lives in SQLite's `user_version` pragma. Step `n` in
//! [`STEPS`] moves the schema from version `n` to `n + 1`; pending steps run
//! in one exclusive transaction, so a failing step leaves the database at
//! its previous version.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use super::StorageError;

/// `(name, sql)` per schema version, oldest first. Append only.
const STEPS: &[(&str, &str)] = &[
    ("baseline_schema", BASELINE),
    ("inbound_queues", INBOUND_QUEUES),
    ("persistent_jobs", PERSISTENT_JOBS),
];

/// Version the database reaches after [`migrate`].
pub const LATEST_VERSION: u32 = STEPS.len() as u32;

pub(crate) fn schema_version(conn: &Connection) -> Result<u32, StorageError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

pub(crate) fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    apply(conn, STEPS)
}

fn apply(conn: &mut Connection, steps: &[(&str, &str)]) -> Result<(), StorageError> {
    let from = schema_version(conn)?;
    let target = steps.len() as u32;
    if from > target {
        return Err(StorageError::Migration(format!(
            "database is at v{} but this build only knows v{}",
            from, target
        )));
    }
    if from == target {
        return Ok(());
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    for (index, (name, sql)) in steps.iter().enumerate().skip(from as usize) {
        let version = index as u32 + 1;
        tx.execute_batch(sql)
            .map_err(|e| StorageError::Migration(format!("v{} {}: {}", version, name, e)))?;
        debug!(version, name, "schema step applied");
    }
    tx.pragma_update(None, "user_version", target)?;
    tx.commit()?;

    info!(from, to = target, "schema migrated");
    Ok(())
}

const BASELINE: &str = "
CREATE TABLE conversations (
    conversation_id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    category TEXT NOT NULL,
    name TEXT,
    status INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE participants (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);

CREATE TABLE participant_sessions (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    sender_key_status INTEGER,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, user_id, session_id)
);

CREATE TABLE messages (
    message_id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    category TEXT NOT NULL,
    content TEXT,
    media_url TEXT,
    media_mime_type TEXT,
    media_size INTEGER,
    media_key BLOB,
    media_digest BLOB,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

CREATE TABLE transcript_messages (
    transcript_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    user_id TEXT,
    category TEXT NOT NULL,
    content TEXT,
    media_url TEXT,
    media_mime_type TEXT,
    media_size INTEGER,
    attachment_id TEXT,
    media_key BLOB,
    media_digest BLOB,
    media_status TEXT,
    media_created_at INTEGER,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (transcript_id, message_id)
);
";

const INBOUND_QUEUES: &str = "
CREATE TABLE flood_messages (
    message_id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE offsets (
    key TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL
);

CREATE TABLE pending_acks (
    message_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

const PERSISTENT_JOBS: &str = "
CREATE TABLE jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    group_name TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";
