// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sender key distribution job.

use tracing::{debug, warn};

use super::runner::{CourierJobRunner, JobContext};
use crate::error::CourierResult;

impl CourierJobRunner {
    pub(super) fn send_sender_key(
        &self,
        conversation_id: &str,
        recipient_id: Option<&str>,
        session_id: Option<&str>,
        force: bool,
        ctx: &JobContext,
    ) -> CourierResult<()> {
        ctx.check()?;
        let cancel = ctx.cancel_token();
        self.reconciler.check_conversation(conversation_id, cancel)?;

        let Some(recipient) = recipient_id else {
            return self.sessions.check_session_sender_key(conversation_id, cancel);
        };

        if self
            .sessions
            .send_sender_key(conversation_id, recipient, session_id, force, cancel)?
        {
            debug!(conversation_id, recipient, "sender key delivered");
        } else {
            // Status is already recorded as UNKNOWN; a later group send retries.
            warn!(conversation_id, recipient, "sender key not delivered");
        }
        Ok(())
    }
}
