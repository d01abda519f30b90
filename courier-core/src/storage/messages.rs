// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message storage operations and the monotonic delivery status.

use std::fmt;

use rusqlite::{params, OptionalExtension, Row};

use super::{now_secs, Storage, StorageError};

/// Message categories the delivery core distinguishes.
pub mod category {
    pub const PLAIN_TEXT: &str = "PLAIN_TEXT";
    pub const PLAIN_DATA: &str = "PLAIN_DATA";
    pub const PLAIN_JSON: &str = "PLAIN_JSON";
    pub const PLAIN_TRANSCRIPT: &str = "PLAIN_TRANSCRIPT";
    pub const SIGNAL_TEXT: &str = "SIGNAL_TEXT";
    pub const SIGNAL_DATA: &str = "SIGNAL_DATA";
    pub const SIGNAL_KEY: &str = "SIGNAL_KEY";
    pub const SIGNAL_TRANSCRIPT: &str = "SIGNAL_TRANSCRIPT";
    pub const ENCRYPTED_TEXT: &str = "ENCRYPTED_TEXT";
    pub const ENCRYPTED_DATA: &str = "ENCRYPTED_DATA";

    pub fn is_plain(category: &str) -> bool {
        category.starts_with("PLAIN_")
    }

    pub fn is_signal(category: &str) -> bool {
        category.starts_with("SIGNAL_")
    }

    pub fn is_encrypted(category: &str) -> bool {
        category.starts_with("ENCRYPTED_")
    }

    /// Categories whose payload references an uploaded attachment.
    pub fn is_attachment(category: &str) -> bool {
        ["_DATA", "_IMAGE", "_VIDEO", "_AUDIO"]
            .iter()
            .any(|suffix| category.ends_with(suffix))
    }
}

/// Delivery status, totally ordered: `Sending < Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::Sending,
        MessageStatus::Sent,
        MessageStatus::Delivered,
        MessageStatus::Read,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "SENDING",
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }

    /// Parses a wire status; unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENDING" => Some(MessageStatus::Sending),
            "SENT" => Some(MessageStatus::Sent),
            "DELIVERED" => Some(MessageStatus::Delivered),
            "READ" => Some(MessageStatus::Read),
            _ => None,
        }
    }

    pub fn rank(&self) -> i64 {
        *self as i64
    }

    /// Applies `target` on top of `self`: only a strict upgrade takes effect.
    pub fn upgrade(self, target: MessageStatus) -> MessageStatus {
        self.max(target)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub message_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub category: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub media_mime_type: Option<String>,
    pub media_size: Option<i64>,
    pub media_key: Option<Vec<u8>>,
    pub media_digest: Option<Vec<u8>>,
    pub status: MessageStatus,
    pub created_at: i64,
}

impl MessageRecord {
    /// A new outgoing message in `Sending` state.
    pub fn outgoing(conversation_id: &str, user_id: &str, category: &str, content: &str) -> Self {
        MessageRecord {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            category: category.to_string(),
            content: Some(content.to_string()),
            media_url: None,
            media_mime_type: None,
            media_size: None,
            media_key: None,
            media_digest: None,
            status: MessageStatus::Sending,
            created_at: now_secs(),
        }
    }
}

const MESSAGE_COLUMNS: &str = "message_id, conversation_id, user_id, category, content, media_url,
     media_mime_type, media_size, media_key, media_digest, status, created_at";

/// SQL rank of the stored status; unknown values rank above everything so
/// they are never overwritten.
const STATUS_RANK_SQL: &str = "CASE status
     WHEN 'SENDING' THEN 0 WHEN 'SENT' THEN 1 WHEN 'DELIVERED' THEN 2 WHEN 'READ' THEN 3
     ELSE 4 END";

impl Storage {
    /// Inserts or replaces a message.
    pub fn save_message(&self, message: &MessageRecord) -> Result<(), StorageError> {
        self.conn().execute(
            &format!("INSERT OR REPLACE INTO messages ({MESSAGE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"),
            params![
                message.message_id,
                message.conversation_id,
                message.user_id,
                message.category,
                message.content,
                message.media_url,
                message.media_mime_type,
                message.media_size,
                message.media_key,
                message.media_digest,
                message.status.as_str(),
                message.created_at,
            ],
        )?;
        Ok(())
    }

    /// Gets a message by id.
    pub fn message(&self, message_id: &str) -> Result<Option<MessageRecord>, StorageError> {
        let conn = self.conn();
        let result = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1"),
                params![message_id],
                row_to_message,
            )
            .optional()?;
        Ok(result)
    }

    /// Returns the stored status of a message.
    pub fn message_status(&self, message_id: &str) -> Result<Option<MessageStatus>, StorageError> {
        let conn = self.conn();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM messages WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(MessageStatus::parse))
    }

    /// Upgrades the status of a message.
    ///
    /// The write happens only if `status` ranks strictly above the stored
    /// status; returns whether a row changed.
    pub fn update_message_status(
        &self,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            &format!(
                "UPDATE messages SET status = ?1
                 WHERE message_id = ?2 AND ({STATUS_RANK_SQL}) < ?3"
            ),
            params![status.as_str(), message_id, status.rank()],
        )?;
        Ok(rows > 0)
    }

    /// Replaces the serialized content of a message.
    pub fn update_message_content(
        &self,
        message_id: &str,
        content: &str,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE messages SET content = ?1 WHERE message_id = ?2",
            params![content, message_id],
        )?;
        Ok(rows > 0)
    }

    /// Records the key and digest of an uploaded attachment.
    pub fn update_message_media(
        &self,
        message_id: &str,
        media_key: Option<&[u8]>,
        media_digest: Option<&[u8]>,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE messages SET media_key = ?1, media_digest = ?2 WHERE message_id = ?3",
            params![media_key, media_digest, message_id],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_message(row: &Row) -> rusqlite::Result<MessageRecord> {
    let status: String = row.get(10)?;
    Ok(MessageRecord {
        message_id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        category: row.get(3)?,
        content: row.get(4)?,
        media_url: row.get(5)?,
        media_mime_type: row.get(6)?,
        media_size: row.get(7)?,
        media_key: row.get(8)?,
        media_digest: row.get(9)?,
        status: MessageStatus::parse(&status).unwrap_or(MessageStatus::Read),
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        let storage = Storage::in_memory().unwrap();
        let message = MessageRecord::outgoing("c1", "me", category::PLAIN_TEXT, "hi");
        storage.save_message(&message).unwrap();

        assert!(storage
            .update_message_status(&message.message_id, MessageStatus::Delivered)
            .unwrap());
        assert!(!storage
            .update_message_status(&message.message_id, MessageStatus::Sent)
            .unwrap());
        assert!(!storage
            .update_message_status(&message.message_id, MessageStatus::Delivered)
            .unwrap());
        assert_eq!(
            storage.message_status(&message.message_id).unwrap(),
            Some(MessageStatus::Delivered)
        );
    }

    #[test]
    fn test_category_helpers() {
        assert!(category::is_plain(category::PLAIN_JSON));
        assert!(category::is_signal(category::SIGNAL_DATA));
        assert!(category::is_attachment(category::ENCRYPTED_DATA));
        assert!(!category::is_attachment(category::SIGNAL_TEXT));
    }
}
