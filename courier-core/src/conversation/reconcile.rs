// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conversation Reconciliation
//!
//! Brings local participants and device sessions in line with the server.
//! The session sync is diff-minimal: rows present on both sides keep their
//! sender key status.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::api::{ConversationApi, ConversationRequest, ParticipantRequest, ParticipantSessionResponse};
use crate::error::{CourierError, CourierResult};
use crate::job::CancellationToken;
use crate::storage::{
    Conversation, ConversationStatus, Participant, ParticipantSession, Storage, StorageError,
};

/// Rows changed by a session sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: usize,
    pub removed: usize,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Resynchronizes conversation state with the server.
pub struct Reconciler {
    storage: Arc<Storage>,
    api: Arc<dyn ConversationApi>,
}

impl Reconciler {
    pub fn new(storage: Arc<Storage>, api: Arc<dyn ConversationApi>) -> Self {
        Self { storage, api }
    }

    /// Replaces local participants and device sessions with the server's.
    ///
    /// Returns the session diff applied.
    pub fn sync_conversation(&self, conversation_id: &str) -> CourierResult<SyncOutcome> {
        let response = self.api.get_conversation(conversation_id)?;

        let participants: Vec<Participant> = response
            .participants
            .iter()
            .map(|p| Participant {
                conversation_id: conversation_id.to_string(),
                user_id: p.user_id.clone(),
                role: p.role.clone(),
                created_at: p.created_at,
            })
            .collect();
        if !same_participants(&self.storage.participants(conversation_id)?, &participants) {
            self.storage
                .replace_participants(conversation_id, &participants)?;
        }

        let outcome = match &response.participant_sessions {
            Some(sessions) => self.sync_participant_sessions(conversation_id, sessions)?,
            None => SyncOutcome::default(),
        };
        info!(
            conversation_id,
            participants = participants.len(),
            added = outcome.added,
            removed = outcome.removed,
            "conversation synced"
        );
        Ok(outcome)
    }

    /// Applies the symmetric difference between local and remote sessions.
    ///
    /// An empty remote list deletes every local session of the conversation.
    pub fn sync_participant_sessions(
        &self,
        conversation_id: &str,
        remote: &[ParticipantSessionResponse],
    ) -> Result<SyncOutcome, StorageError> {
        if remote.is_empty() {
            let removed = self.storage.delete_participant_sessions(conversation_id)?;
            return Ok(SyncOutcome { added: 0, removed });
        }

        let remote: Vec<ParticipantSession> = remote
            .iter()
            .map(|s| ParticipantSession::new(conversation_id, &s.user_id, &s.session_id))
            .collect();
        let local = self.storage.participant_sessions(conversation_id)?;

        let remote_keys: HashSet<_> = remote.iter().map(ParticipantSession::key).collect();
        let local_keys: HashSet<_> = local.iter().map(ParticipantSession::key).collect();

        let remove: Vec<ParticipantSession> = local
            .iter()
            .filter(|s| !remote_keys.contains(&s.key()))
            .cloned()
            .collect();
        let mut seen = HashSet::new();
        let add: Vec<ParticipantSession> = remote
            .iter()
            .filter(|s| !local_keys.contains(&s.key()) && seen.insert(s.key()))
            .cloned()
            .collect();

        let outcome = SyncOutcome {
            added: add.len(),
            removed: remove.len(),
        };
        if !outcome.is_noop() {
            self.storage.apply_participant_session_diff(&remove, &add)?;
        }
        Ok(outcome)
    }

    /// Confirms an unconfirmed conversation by creating it on the server.
    ///
    /// On success the conversation is marked `Success` and its device
    /// sessions are seeded from the response. Any failure is terminal.
    pub fn check_conversation_exist(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        if conversation.status == ConversationStatus::Success {
            return Ok(());
        }

        let request = ConversationRequest {
            conversation_id: conversation.conversation_id.clone(),
            category: conversation.category.as_str().to_string(),
            participants: vec![ParticipantRequest {
                user_id: conversation.owner_id.clone(),
                role: String::new(),
            }],
        };

        let response = match self.api.create_conversation(&request) {
            Ok(response) if !cancel.is_cancelled() => response,
            Ok(_) => return Err(CourierError::Cancelled),
            Err(e) => {
                warn!(conversation_id = %conversation.conversation_id, error = %e, "create conversation failed");
                return Err(CourierError::ConversationUnavailable(
                    conversation.conversation_id.clone(),
                ));
            }
        };

        self.storage.update_conversation_status(
            &conversation.conversation_id,
            ConversationStatus::Success,
        )?;
        if let Some(sessions) = &response.participant_sessions {
            let seeded: Vec<ParticipantSession> = sessions
                .iter()
                .map(|s| {
                    ParticipantSession::new(&conversation.conversation_id, &s.user_id, &s.session_id)
                })
                .collect();
            self.storage
                .replace_participant_sessions(&conversation.conversation_id, &seeded)?;
        }
        debug!(conversation_id = %conversation.conversation_id, "conversation confirmed");
        Ok(())
    }

    /// Group conversations are synced; others are confirmed if needed.
    pub fn check_conversation(
        &self,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        let Some(conversation) = self.storage.conversation(conversation_id)? else {
            return Ok(());
        };
        if conversation.is_group() {
            self.sync_conversation(conversation_id).map(|_| ())
        } else {
            self.check_conversation_exist(&conversation, cancel)
        }
    }
}

fn same_participants(local: &[Participant], remote: &[Participant]) -> bool {
    let key = |p: &Participant| (p.user_id.clone(), p.role.clone(), p.created_at);
    let mut local: Vec<_> = local.iter().map(key).collect();
    let mut remote: Vec<_> = remote.iter().map(key).collect();
    local.sort();
    remote.sort();
    local == remote
}
