// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Participant session storage operations.

use rusqlite::{params, Row};

use super::{now_secs, Storage, StorageError};

/// Whether a device has received our sender key for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderKeyStatus {
    Unknown,
    Sent,
}

impl SenderKeyStatus {
    fn to_db(self) -> i64 {
        match self {
            SenderKeyStatus::Unknown => 0,
            SenderKeyStatus::Sent => 1,
        }
    }

    fn from_db(value: i64) -> Self {
        if value == 1 {
            SenderKeyStatus::Sent
        } else {
            SenderKeyStatus::Unknown
        }
    }
}

/// One device of one participant in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantSession {
    pub conversation_id: String,
    pub user_id: String,
    pub session_id: String,
    /// `None` until a key distribution has been attempted.
    pub sender_key_status: Option<SenderKeyStatus>,
}

impl ParticipantSession {
    pub fn new(conversation_id: &str, user_id: &str, session_id: &str) -> Self {
        ParticipantSession {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            sender_key_status: None,
        }
    }

    pub fn with_status(mut self, status: SenderKeyStatus) -> Self {
        self.sender_key_status = Some(status);
        self
    }

    /// Identity of the row, ignoring the sender key status.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.conversation_id, &self.user_id, &self.session_id)
    }
}

const SESSION_COLUMNS: &str = "conversation_id, user_id, session_id, sender_key_status";

impl Storage {
    /// Lists every device session of a conversation.
    pub fn participant_sessions(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ParticipantSession>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM participant_sessions
             WHERE conversation_id = ?1 ORDER BY user_id, session_id"
        ))?;
        let rows = stmt.query_map(params![conversation_id], row_to_session)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Gets one device session.
    pub fn participant_session(
        &self,
        conversation_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ParticipantSession>, StorageError> {
        Ok(self
            .participant_sessions(conversation_id)?
            .into_iter()
            .find(|s| s.user_id == user_id && s.session_id == session_id))
    }

    /// Device sessions that have not confirmed our sender key, excluding
    /// our own device.
    pub fn unsent_participant_sessions(
        &self,
        conversation_id: &str,
        own_session_id: &str,
    ) -> Result<Vec<ParticipantSession>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM participant_sessions
             WHERE conversation_id = ?1 AND session_id != ?2
               AND (sender_key_status IS NULL OR sender_key_status != ?3)
             ORDER BY user_id, session_id"
        ))?;
        let rows = stmt.query_map(
            params![conversation_id, own_session_id, SenderKeyStatus::Sent.to_db()],
            row_to_session,
        )?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Inserts sessions, overwriting the sender key status of existing rows.
    pub fn upsert_participant_sessions(
        &self,
        sessions: &[ParticipantSession],
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO participant_sessions
                    (conversation_id, user_id, session_id, sender_key_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(conversation_id, user_id, session_id)
                 DO UPDATE SET sender_key_status = excluded.sender_key_status",
            )?;
            for s in sessions {
                stmt.execute(params![
                    s.conversation_id,
                    s.user_id,
                    s.session_id,
                    s.sender_key_status.map(SenderKeyStatus::to_db),
                    now_secs(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes `remove` and inserts `add` in one transaction.
    ///
    /// Rows in `add` that already exist are left untouched.
    pub fn apply_participant_session_diff(
        &self,
        remove: &[ParticipantSession],
        add: &[ParticipantSession],
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut delete = tx.prepare(
                "DELETE FROM participant_sessions
                 WHERE conversation_id = ?1 AND user_id = ?2 AND session_id = ?3",
            )?;
            for s in remove {
                delete.execute(params![s.conversation_id, s.user_id, s.session_id])?;
            }

            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO participant_sessions
                    (conversation_id, user_id, session_id, sender_key_status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in add {
                insert.execute(params![
                    s.conversation_id,
                    s.user_id,
                    s.session_id,
                    s.sender_key_status.map(SenderKeyStatus::to_db),
                    now_secs(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Replaces every session of a conversation.
    pub fn replace_participant_sessions(
        &self,
        conversation_id: &str,
        sessions: &[ParticipantSession],
    ) -> Result<(), StorageError> {
        let existing = self.participant_sessions(conversation_id)?;
        self.apply_participant_session_diff(&existing, sessions)
    }

    /// Deletes every session of a conversation.
    pub fn delete_participant_sessions(&self, conversation_id: &str) -> Result<usize, StorageError> {
        let rows = self.conn().execute(
            "DELETE FROM participant_sessions WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(rows)
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<ParticipantSession> {
    let status: Option<i64> = row.get(3)?;
    Ok(ParticipantSession {
        conversation_id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        sender_key_status: status.map(SenderKeyStatus::from_db),
    })
}
