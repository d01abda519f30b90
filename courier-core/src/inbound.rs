// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Inbound push dispatch.
//!
//! Receipts upgrade message status, echoes of our own messages do the same,
//! other chat messages are queued for decryption, and anything else is
//! acknowledged as read.

use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::error::CourierResult;
use crate::job::{Job, JobEngine};
use crate::network::message::{ACKNOWLEDGE_MESSAGE_RECEIPT, CREATE_CALL, CREATE_MESSAGE};
use crate::network::{PushData, PushHandler, WireMessage};
use crate::storage::{FloodMessage, MessageStatus, Storage, STATUS_OFFSET};

/// What the dispatcher did with a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    StatusUpdated,
    Flooded,
    AckQueued,
    Ignored,
}

/// [`PushHandler`] feeding storage and the acknowledgement job.
pub struct InboundDispatcher {
    storage: Arc<Storage>,
    account_id: String,
    engine: Option<Weak<JobEngine>>,
}

impl InboundDispatcher {
    pub fn new(storage: Arc<Storage>, account_id: &str) -> Self {
        InboundDispatcher {
            storage,
            account_id: account_id.to_string(),
            engine: None,
        }
    }

    /// Schedules the acknowledgement job on `engine` whenever an ack is
    /// queued.
    pub fn with_engine(mut self, engine: &Arc<JobEngine>) -> Self {
        self.engine = Some(Arc::downgrade(engine));
        self
    }

    /// Routes one push.
    pub fn dispatch(&self, message: &WireMessage) -> CourierResult<Dispatch> {
        let Some(data) = message.data.clone() else {
            return Ok(Dispatch::Ignored);
        };
        let push: PushData = serde_json::from_value(data)?;

        match message.action.as_str() {
            ACKNOWLEDGE_MESSAGE_RECEIPT => {
                self.upgrade_status(&push)?;
                if !push.updated_at.is_empty() {
                    self.storage.set_offset(STATUS_OFFSET, &push.updated_at)?;
                }
                Ok(Dispatch::StatusUpdated)
            }
            CREATE_MESSAGE | CREATE_CALL
                if push.user_id == self.account_id && push.category.is_empty() =>
            {
                self.upgrade_status(&push)?;
                Ok(Dispatch::StatusUpdated)
            }
            CREATE_MESSAGE | CREATE_CALL => {
                let raw = serde_json::to_string(&push)?;
                let inserted = self.storage.insert_flood_message(&FloodMessage {
                    message_id: push.message_id.clone(),
                    data: raw,
                    created_at: push.created_at.clone(),
                })?;
                if !inserted {
                    debug!(message_id = %push.message_id, "duplicate push ignored");
                }
                Ok(Dispatch::Flooded)
            }
            _ => {
                self.storage
                    .queue_ack(&push.message_id, MessageStatus::Read.as_str())?;
                self.schedule_acks();
                Ok(Dispatch::AckQueued)
            }
        }
    }

    fn upgrade_status(&self, push: &PushData) -> CourierResult<()> {
        let Some(status) = MessageStatus::parse(&push.status) else {
            debug!(message_id = %push.message_id, status = %push.status, "unknown receipt status");
            return Ok(());
        };
        self.storage
            .update_message_status(&push.message_id, status)?;
        Ok(())
    }

    fn schedule_acks(&self) {
        let Some(engine) = self.engine.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        if let Err(e) = engine.submit(Job::ack_messages()) {
            warn!(error = %e, "failed to schedule acknowledgements");
        }
    }
}

impl PushHandler for InboundDispatcher {
    fn on_push(&self, message: &WireMessage) {
        if let Err(e) = self.dispatch(message) {
            warn!(id = %message.id, action = %message.action, error = %e, "push dispatch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{category, MessageRecord};
    use serde_json::json;

    fn push(action: &str, data: serde_json::Value) -> WireMessage {
        let mut message = WireMessage::request(action, None);
        message.data = Some(data);
        message
    }

    fn setup() -> (Arc<Storage>, InboundDispatcher) {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let dispatcher = InboundDispatcher::new(storage.clone(), "me");
        (storage, dispatcher)
    }

    #[test]
    fn test_receipt_upgrades_and_records_offset() {
        let (storage, dispatcher) = setup();
        let mut record = MessageRecord::outgoing("c1", "me", category::PLAIN_TEXT, "hi");
        record.status = MessageStatus::Sent;
        storage.save_message(&record).unwrap();

        let result = dispatcher
            .dispatch(&push(
                ACKNOWLEDGE_MESSAGE_RECEIPT,
                json!({"message_id": record.message_id, "status": "READ", "updated_at": "2026-01-01T00:00:00Z"}),
            ))
            .unwrap();
        assert_eq!(result, Dispatch::StatusUpdated);
        assert_eq!(
            storage.message_status(&record.message_id).unwrap(),
            Some(MessageStatus::Read)
        );
        assert_eq!(
            storage.offset(STATUS_OFFSET).unwrap().as_deref(),
            Some("2026-01-01T00:00:00Z")
        );

        // A late DELIVERED receipt never downgrades.
        dispatcher
            .dispatch(&push(
                ACKNOWLEDGE_MESSAGE_RECEIPT,
                json!({"message_id": record.message_id, "status": "DELIVERED"}),
            ))
            .unwrap();
        assert_eq!(
            storage.message_status(&record.message_id).unwrap(),
            Some(MessageStatus::Read)
        );
    }

    #[test]
    fn test_foreign_message_is_flooded_once() {
        let (storage, dispatcher) = setup();
        let data = json!({"message_id": "m9", "user_id": "peer", "category": "SIGNAL_TEXT", "data": "xx"});
        assert_eq!(
            dispatcher.dispatch(&push(CREATE_MESSAGE, data.clone())).unwrap(),
            Dispatch::Flooded
        );
        dispatcher.dispatch(&push(CREATE_MESSAGE, data)).unwrap();
        assert_eq!(storage.flood_messages(10).unwrap().len(), 1);
    }

    #[test]
    fn test_other_push_queues_read_ack() {
        let (storage, dispatcher) = setup();
        let result = dispatcher
            .dispatch(&push("LIST_PENDING_MESSAGES", json!({"message_id": "m1"})))
            .unwrap();
        assert_eq!(result, Dispatch::AckQueued);
        let acks = storage.pending_acks(10).unwrap();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].status, "READ");
    }
}
