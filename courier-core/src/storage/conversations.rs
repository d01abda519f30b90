// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conversation and participant storage operations.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{now_secs, Storage, StorageError};

/// Conversation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationCategory {
    Contact,
    Group,
}

impl ConversationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationCategory::Contact => "CONTACT",
            ConversationCategory::Group => "GROUP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONTACT" => Some(ConversationCategory::Contact),
            "GROUP" => Some(ConversationCategory::Group),
            _ => None,
        }
    }
}

/// Whether the server has confirmed the conversation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Start,
    Success,
}

impl ConversationStatus {
    fn to_db(self) -> i64 {
        match self {
            ConversationStatus::Start => 0,
            ConversationStatus::Success => 1,
        }
    }

    fn from_db(value: i64) -> Self {
        if value == 1 {
            ConversationStatus::Success
        } else {
            ConversationStatus::Start
        }
    }
}

/// A locally known conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub conversation_id: String,
    pub owner_id: String,
    pub category: ConversationCategory,
    pub name: Option<String>,
    pub status: ConversationStatus,
}

impl Conversation {
    pub fn is_group(&self) -> bool {
        self.category == ConversationCategory::Group
    }
}

/// A conversation member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub created_at: i64,
}

impl Storage {
    // === Conversations ===

    /// Inserts or replaces a conversation.
    pub fn save_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO conversations (conversation_id, owner_id, category, name, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(conversation_id) DO UPDATE SET
                owner_id = excluded.owner_id,
                category = excluded.category,
                name = excluded.name,
                status = excluded.status",
            params![
                conversation.conversation_id,
                conversation.owner_id,
                conversation.category.as_str(),
                conversation.name,
                conversation.status.to_db(),
                now_secs(),
            ],
        )?;
        Ok(())
    }

    /// Gets a conversation by id.
    pub fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, StorageError> {
        let conn = self.conn();
        let result = conn
            .query_row(
                "SELECT conversation_id, owner_id, category, name, status
                 FROM conversations WHERE conversation_id = ?1",
                params![conversation_id],
                row_to_conversation,
            )
            .optional()?;
        Ok(result)
    }

    /// Sets the confirmation status of a conversation.
    pub fn update_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> Result<bool, StorageError> {
        let rows = self.conn().execute(
            "UPDATE conversations SET status = ?1 WHERE conversation_id = ?2",
            params![status.to_db(), conversation_id],
        )?;
        Ok(rows > 0)
    }

    // === Participants ===

    /// Lists the participants of a conversation.
    pub fn participants(&self, conversation_id: &str) -> Result<Vec<Participant>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT conversation_id, user_id, role, created_at
             FROM participants WHERE conversation_id = ?1 ORDER BY created_at, user_id",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(Participant {
                conversation_id: row.get(0)?,
                user_id: row.get(1)?,
                role: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Replaces the participant list of a conversation.
    pub fn replace_participants(
        &self,
        conversation_id: &str,
        participants: &[Participant],
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM participants WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO participants (conversation_id, user_id, role, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for p in participants {
                stmt.execute(params![conversation_id, p.user_id, p.role, p.created_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    let category: String = row.get(2)?;
    Ok(Conversation {
        conversation_id: row.get(0)?,
        owner_id: row.get(1)?,
        category: ConversationCategory::parse(&category).unwrap_or(ConversationCategory::Contact),
        name: row.get(3)?,
        status: ConversationStatus::from_db(row.get(4)?),
    })
}
