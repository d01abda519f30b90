// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message send job.
//!
//! Confirms the conversation, makes sure every recipient device can decrypt,
//! encrypts, delivers and marks the message `SENT`. A message already at
//! `SENT` or beyond is not sent again when the job is resumed.

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info, warn};

use super::runner::{CourierJobRunner, JobContext};
use crate::crypto::device_id;
use crate::error::{CourierError, CourierResult};
use crate::network::message::{create_message, MessageParam};
use crate::storage::{category, MessageStatus};

impl CourierJobRunner {
    pub(super) fn send_message(
        &self,
        message_id: &str,
        recipient_id: Option<&str>,
        session_id: Option<&str>,
        ctx: &JobContext,
    ) -> CourierResult<()> {
        ctx.check()?;
        let cancel = ctx.cancel_token();
        let Some(message) = self.storage.message(message_id)? else {
            debug!(message_id, "message gone before sending");
            return Ok(());
        };
        if recipient_id.is_none() && message.status >= MessageStatus::Sent {
            debug!(message_id, status = %message.status, "message already sent");
            return Ok(());
        }

        let conversation_id = message.conversation_id.as_str();
        self.reconciler.check_conversation(conversation_id, cancel)?;

        let plaintext = message.content.as_deref().unwrap_or_default().as_bytes();
        let mut param = MessageParam {
            conversation_id: conversation_id.to_string(),
            recipient_id: recipient_id.map(str::to_string),
            message_id: message_id.to_string(),
            category: message.category.clone(),
            data: String::new(),
            status: MessageStatus::Sending.as_str().to_string(),
            session_id: session_id.map(str::to_string),
            conversation_checksum: None,
        };

        if !category::is_signal(&message.category) {
            param.data = STANDARD.encode(plaintext);
        } else if let Some(recipient) = recipient_id {
            match self.sessions.check_signal_session(recipient, session_id, cancel) {
                Ok(()) => {}
                Err(CourierError::CryptoSessionUnavailable { user_id, .. }) => {
                    warn!(message_id, recipient = %user_id, "recipient has no pre-key, skipping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            let ciphertext = self.sessions.signal().encrypt_session(
                recipient,
                device_id(session_id),
                plaintext,
            )?;
            param.data = STANDARD.encode(ciphertext);
        } else {
            self.sessions.check_session_sender_key(conversation_id, cancel)?;
            let ciphertext = self
                .sessions
                .signal()
                .encrypt_group(conversation_id, plaintext)?;
            param.data = STANDARD.encode(ciphertext);
            param.conversation_checksum = self.sessions.checksum(conversation_id)?;
        }

        ctx.check()?;
        self.deliverer.deliver(&create_message(&param)?, cancel)?;

        if recipient_id.is_none() {
            self.storage
                .update_message_status(message_id, MessageStatus::Sent)?;
        }
        info!(message_id, conversation_id, "message sent");
        Ok(())
    }
}
