// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Receipt acknowledgement job.

use tracing::debug;

use super::runner::{CourierJobRunner, JobContext};
use crate::error::CourierResult;
use crate::network::message::{acknowledge_receipts, AckMessage};

/// Acknowledgements per request.
pub const ACK_BATCH_SIZE: usize = 100;

impl CourierJobRunner {
    /// Sends queued acknowledgements until the table is empty. Each batch
    /// is deleted only after the server accepted it.
    pub(super) fn send_acks(&self, ctx: &JobContext) -> CourierResult<()> {
        loop {
            ctx.check()?;
            let pending = self.storage.pending_acks(ACK_BATCH_SIZE)?;
            if pending.is_empty() {
                return Ok(());
            }

            let acks: Vec<AckMessage> = pending
                .iter()
                .map(|a| AckMessage {
                    message_id: a.message_id.clone(),
                    status: a.status.clone(),
                })
                .collect();
            self.deliverer
                .deliver(&acknowledge_receipts(&acks)?, ctx.cancel_token())?;

            let ids: Vec<String> = pending.into_iter().map(|a| a.message_id).collect();
            let deleted = self.storage.delete_acks(&ids)?;
            debug!(deleted, "acknowledgements sent");
            if ids.len() < ACK_BATCH_SIZE {
                return Ok(());
            }
        }
    }
}
