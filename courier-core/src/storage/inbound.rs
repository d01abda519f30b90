// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Inbound queues: flood messages awaiting decryption, pending receipt
//! acknowledgements, and sync offsets.

use rusqlite::{params, OptionalExtension};

use super::{now_secs, Storage, StorageError};

/// Offset key of the latest receipt status seen.
pub const STATUS_OFFSET: &str = "messages_status_offset";

/// A pushed message stored for later decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodMessage {
    pub message_id: String,
    /// The raw push payload as JSON.
    pub data: String,
    pub created_at: String,
}

/// A receipt acknowledgement not yet sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAck {
    pub message_id: String,
    pub status: String,
}

impl Storage {
    /// Queues a pushed message. Duplicate pushes are ignored.
    pub fn insert_flood_message(&self, message: &FloodMessage) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO flood_messages (message_id, data, created_at)
             VALUES (?1, ?2, ?3)",
            params![message.message_id, message.data, message.created_at],
        )?;
        Ok(rows > 0)
    }

    /// Lists queued flood messages, oldest first.
    pub fn flood_messages(&self, limit: usize) -> Result<Vec<FloodMessage>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT message_id, data, created_at FROM flood_messages
             ORDER BY created_at, rowid LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(FloodMessage {
                message_id: row.get(0)?,
                data: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Removes a flood message once processed.
    pub fn delete_flood_message(&self, message_id: &str) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "DELETE FROM flood_messages WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(rows > 0)
    }

    /// Records an offset value.
    pub fn set_offset(&self, key: &str, timestamp: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO offsets (key, timestamp) VALUES (?1, ?2)",
            params![key, timestamp],
        )?;
        Ok(())
    }

    pub fn offset(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn();
        let value = conn
            .query_row(
                "SELECT timestamp FROM offsets WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Queues a receipt acknowledgement.
    pub fn queue_ack(&self, message_id: &str, status: &str) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pending_acks (message_id, status, created_at)
             VALUES (?1, ?2, ?3)",
            params![message_id, status, now_secs()],
        )?;
        Ok(())
    }

    /// Oldest pending acknowledgements, at most `limit`.
    pub fn pending_acks(&self, limit: usize) -> Result<Vec<PendingAck>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT message_id, status FROM pending_acks
             ORDER BY created_at, rowid LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PendingAck {
                message_id: row.get(0)?,
                status: row.get(1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Removes acknowledgements the server accepted.
    pub fn delete_acks(&self, message_ids: &[String]) -> Result<usize, StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_acks WHERE message_id = ?1")?;
            for id in message_ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_queue_batches_and_drains() {
        let storage = Storage::in_memory().unwrap();
        for i in 0..5 {
            storage.queue_ack(&format!("m{i}"), "READ").unwrap();
        }

        let batch = storage.pending_acks(3).unwrap();
        assert_eq!(batch.len(), 3);
        let ids: Vec<String> = batch.into_iter().map(|a| a.message_id).collect();
        assert_eq!(storage.delete_acks(&ids).unwrap(), 3);
        assert_eq!(storage.pending_acks(100).unwrap().len(), 2);
    }

    #[test]
    fn test_flood_duplicates_ignored() {
        let storage = Storage::in_memory().unwrap();
        let message = FloodMessage {
            message_id: "m1".into(),
            data: "{}".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        assert!(storage.insert_flood_message(&message).unwrap());
        assert!(!storage.insert_flood_message(&message).unwrap());
        assert_eq!(storage.flood_messages(10).unwrap(), vec![message]);
    }
}
