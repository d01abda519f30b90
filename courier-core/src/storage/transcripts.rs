// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transcript attachment storage operations.
//!
//! A transcript is a forwarded bundle of messages. Attachments inside it are
//! re-hosted individually; the bundle is only sent once none is pending.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_secs, Storage, StorageError};

/// Upload state of a transcript attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    Pending,
    Done,
    Canceled,
}

impl MediaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaStatus::Pending => "PENDING",
            MediaStatus::Done => "DONE",
            MediaStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(MediaStatus::Pending),
            "DONE" => Some(MediaStatus::Done),
            "CANCELED" => Some(MediaStatus::Canceled),
            _ => None,
        }
    }
}

/// One message inside a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptAttachment {
    pub transcript_id: String,
    pub message_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub category: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_mime_type: Option<String>,
    #[serde(default)]
    pub media_size: Option<i64>,
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default, with = "b64_opt")]
    pub media_key: Option<Vec<u8>>,
    #[serde(default, with = "b64_opt")]
    pub media_digest: Option<Vec<u8>>,
    #[serde(default)]
    pub media_status: Option<MediaStatus>,
    /// When the referenced attachment was created on the server.
    #[serde(default)]
    pub media_created_at: Option<i64>,
}

const TRANSCRIPT_COLUMNS: &str = "transcript_id, message_id, user_id, category, content,
     media_url, media_mime_type, media_size, attachment_id, media_key, media_digest,
     media_status, media_created_at";

impl Storage {
    /// Inserts or replaces a transcript row.
    pub fn save_transcript(&self, t: &TranscriptAttachment) -> Result<(), StorageError> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO transcript_messages ({TRANSCRIPT_COLUMNS}, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                t.transcript_id,
                t.message_id,
                t.user_id,
                t.category,
                t.content,
                t.media_url,
                t.media_mime_type,
                t.media_size,
                t.attachment_id,
                t.media_key,
                t.media_digest,
                t.media_status.map(|s| s.as_str()),
                t.media_created_at,
                now_secs(),
            ],
        )?;
        Ok(())
    }

    /// Gets one transcript row.
    pub fn transcript(
        &self,
        transcript_id: &str,
        message_id: &str,
    ) -> Result<Option<TranscriptAttachment>, StorageError> {
        let conn = self.conn();
        let result = conn
            .query_row(
                &format!(
                    "SELECT {TRANSCRIPT_COLUMNS} FROM transcript_messages
                     WHERE transcript_id = ?1 AND message_id = ?2"
                ),
                params![transcript_id, message_id],
                row_to_transcript,
            )
            .optional()?;
        Ok(result)
    }

    /// Lists every row of a transcript in insertion order.
    pub fn transcripts(&self, transcript_id: &str) -> Result<Vec<TranscriptAttachment>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSCRIPT_COLUMNS} FROM transcript_messages
             WHERE transcript_id = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![transcript_id], row_to_transcript)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Marks a still pending transcript attachment `CANCELED`. A row that
    /// already reached `DONE` keeps it. Returns whether a row changed.
    pub fn cancel_transcript_attachment(
        &self,
        transcript_id: &str,
        message_id: &str,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE transcript_messages SET media_status = ?1
             WHERE transcript_id = ?2 AND message_id = ?3 AND media_status = ?4",
            params![
                MediaStatus::Canceled.as_str(),
                transcript_id,
                message_id,
                MediaStatus::Pending.as_str()
            ],
        )?;
        Ok(rows > 0)
    }

    /// Marks a transcript attachment `DONE` with its upload result.
    pub fn complete_transcript_attachment(
        &self,
        transcript_id: &str,
        message_id: &str,
        attachment_id: &str,
        media_key: Option<&[u8]>,
        media_digest: Option<&[u8]>,
        media_created_at: i64,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE transcript_messages
             SET attachment_id = ?1, media_key = ?2, media_digest = ?3,
                 media_status = ?4, media_created_at = ?5
             WHERE transcript_id = ?6 AND message_id = ?7",
            params![
                attachment_id,
                media_key,
                media_digest,
                MediaStatus::Done.as_str(),
                media_created_at,
                transcript_id,
                message_id,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Number of attachments in the transcript still waiting for upload.
    pub fn pending_transcript_attachments(&self, transcript_id: &str) -> Result<u32, StorageError> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM transcript_messages
             WHERE transcript_id = ?1 AND media_status = ?2",
            params![transcript_id, MediaStatus::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_transcript(row: &Row) -> rusqlite::Result<TranscriptAttachment> {
    let status: Option<String> = row.get(11)?;
    Ok(TranscriptAttachment {
        transcript_id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        category: row.get(3)?,
        content: row.get(4)?,
        media_url: row.get(5)?,
        media_mime_type: row.get(6)?,
        media_size: row.get(7)?,
        attachment_id: row.get(8)?,
        media_key: row.get(9)?,
        media_digest: row.get(10)?,
        media_status: status.as_deref().and_then(MediaStatus::parse),
        media_created_at: row.get(12)?,
    })
}

/// Base64 for optional byte fields in the serialized transcript list.
mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::category;

    fn attachment(transcript: &str, message: &str) -> TranscriptAttachment {
        TranscriptAttachment {
            transcript_id: transcript.into(),
            message_id: message.into(),
            user_id: None,
            category: category::SIGNAL_DATA.into(),
            content: None,
            media_url: Some("file:///tmp/a.bin".into()),
            media_mime_type: Some("application/octet-stream".into()),
            media_size: Some(3),
            attachment_id: None,
            media_key: None,
            media_digest: None,
            media_status: Some(MediaStatus::Pending),
            media_created_at: None,
        }
    }

    #[test]
    fn test_complete_clears_pending_count() {
        let storage = Storage::in_memory().unwrap();
        storage.save_transcript(&attachment("t1", "m1")).unwrap();
        storage.save_transcript(&attachment("t1", "m2")).unwrap();
        assert_eq!(storage.pending_transcript_attachments("t1").unwrap(), 2);

        storage
            .complete_transcript_attachment("t1", "m1", "att", Some(b"key"), Some(b"dig"), 10)
            .unwrap();
        assert_eq!(storage.pending_transcript_attachments("t1").unwrap(), 1);

        let done = storage.transcript("t1", "m1").unwrap().unwrap();
        assert_eq!(done.media_status, Some(MediaStatus::Done));
        assert_eq!(done.media_key.as_deref(), Some(&b"key"[..]));
    }

    #[test]
    fn test_cancel_leaves_done_row_alone() {
        let storage = Storage::in_memory().unwrap();
        storage.save_transcript(&attachment("t1", "m1")).unwrap();
        storage.save_transcript(&attachment("t1", "m2")).unwrap();
        storage
            .complete_transcript_attachment("t1", "m1", "att-1", None, None, 10)
            .unwrap();

        assert!(!storage.cancel_transcript_attachment("t1", "m1").unwrap());
        assert!(storage.cancel_transcript_attachment("t1", "m2").unwrap());

        let done = storage.transcript("t1", "m1").unwrap().unwrap();
        assert_eq!(done.media_status, Some(MediaStatus::Done));
        assert_eq!(done.attachment_id.as_deref(), Some("att-1"));
        let canceled = storage.transcript("t1", "m2").unwrap().unwrap();
        assert_eq!(canceled.media_status, Some(MediaStatus::Canceled));
    }

    #[test]
    fn test_transcript_list_serializes_keys_as_base64() {
        let mut t = attachment("t1", "m1");
        t.media_key = Some(vec![1, 2, 3]);
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["media_key"], "AQID");
        let back: TranscriptAttachment = serde_json::from_value(json).unwrap();
        assert_eq!(back.media_key, Some(vec![1, 2, 3]));
    }
}
