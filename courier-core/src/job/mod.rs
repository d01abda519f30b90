// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Job Engine
//!
//! Every outbound network action runs as a job: a persisted, deduplicated,
//! cancellable unit of work executed on a worker pool. Jobs sharing a group
//! run one at a time in submission order.

mod ack;
mod cancel;
mod engine;
mod runner;
mod send_message;
mod sender_key;
mod transcript;

use serde::{Deserialize, Serialize};

pub use cancel::CancellationToken;
pub use engine::{JobEngine, JobState};
pub use runner::{CourierJobRunner, JobContext, JobRunner};

/// Group serializing acknowledgement batches.
pub const ACK_GROUP: &str = "ack_messages";

/// What a job does. Stored as JSON for persistent jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Encrypts and delivers a stored message. With `recipient_id` the
    /// message is re-sent to that single device over its pairwise session.
    SendMessage {
        message_id: String,
        #[serde(default)]
        recipient_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Pushes our sender key to one device, or to every device that has not
    /// confirmed it when `recipient_id` is `None`.
    SendSenderKey {
        conversation_id: String,
        #[serde(default)]
        recipient_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        force: bool,
    },
    /// Re-hosts one attachment referenced by a transcript.
    TranscriptAttachment {
        transcript_id: String,
        message_id: String,
    },
    /// Drains queued receipt acknowledgements.
    AckMessages,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Stable across restarts; used for dedup and cancellation.
    pub job_id: String,
    pub group: String,
    pub persistent: bool,
    pub kind: JobKind,
}

impl Job {
    pub fn new(job_id: &str, group: &str, persistent: bool, kind: JobKind) -> Self {
        Job {
            job_id: job_id.to_string(),
            group: group.to_string(),
            persistent,
            kind,
        }
    }

    /// Sends a stored message; grouped by conversation.
    pub fn send_message(conversation_id: &str, message_id: &str) -> Self {
        Job::new(
            message_id,
            conversation_id,
            true,
            JobKind::SendMessage {
                message_id: message_id.to_string(),
                recipient_id: None,
                session_id: None,
            },
        )
    }

    /// Re-sends a stored message to one device.
    pub fn resend_message(
        conversation_id: &str,
        message_id: &str,
        recipient_id: &str,
        session_id: Option<&str>,
    ) -> Self {
        Job::new(
            &format!("{message_id}:{recipient_id}:{}", session_id.unwrap_or_default()),
            conversation_id,
            true,
            JobKind::SendMessage {
                message_id: message_id.to_string(),
                recipient_id: Some(recipient_id.to_string()),
                session_id: session_id.map(str::to_string),
            },
        )
    }

    /// Pushes our sender key to one device.
    pub fn send_sender_key(
        conversation_id: &str,
        recipient_id: &str,
        session_id: Option<&str>,
        force: bool,
    ) -> Self {
        Job::new(
            &format!(
                "sender_key:{conversation_id}:{recipient_id}:{}",
                session_id.unwrap_or_default()
            ),
            conversation_id,
            false,
            JobKind::SendSenderKey {
                conversation_id: conversation_id.to_string(),
                recipient_id: Some(recipient_id.to_string()),
                session_id: session_id.map(str::to_string),
                force,
            },
        )
    }

    /// Distributes our sender key to every unconfirmed device of a group.
    pub fn refresh_sender_keys(conversation_id: &str) -> Self {
        Job::new(
            &format!("sender_key:{conversation_id}"),
            conversation_id,
            false,
            JobKind::SendSenderKey {
                conversation_id: conversation_id.to_string(),
                recipient_id: None,
                session_id: None,
                force: false,
            },
        )
    }

    /// Uploads one transcript attachment. The id is the concatenation of the
    /// transcript and message ids, which is what cancellation looks up.
    pub fn transcript_attachment(transcript_id: &str, message_id: &str) -> Self {
        let job_id = format!("{transcript_id}{message_id}");
        Job::new(
            &job_id,
            &job_id,
            true,
            JobKind::TranscriptAttachment {
                transcript_id: transcript_id.to_string(),
                message_id: message_id.to_string(),
            },
        )
    }

    /// Sends every queued receipt acknowledgement.
    pub fn ack_messages() -> Self {
        Job::new(ACK_GROUP, ACK_GROUP, false, JobKind::AckMessages)
    }
}
