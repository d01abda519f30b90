// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Job execution seam.
//!
//! The engine knows nothing about messages or keys; it hands every job to a
//! [`JobRunner`]. [`CourierJobRunner`] is the production runner, holding the
//! collaborators each job needs.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::cancel::CancellationToken;
use super::{Job, JobKind};
use crate::attachment::{AttachmentUploader, UserNotice, UserNotifier};
use crate::config::AttachmentConfig;
use crate::conversation::{ConversationApi, Reconciler};
use crate::error::{CourierError, CourierResult};
use crate::session::{Deliverer, SessionManager};
use crate::storage::Storage;

/// Per-run state handed to a job.
pub struct JobContext {
    cancel: CancellationToken,
    attempt: u32,
    followups: Mutex<Vec<Job>>,
}

impl JobContext {
    pub fn new(cancel: CancellationToken, attempt: u32) -> Self {
        JobContext {
            cancel,
            attempt,
            followups: Mutex::new(Vec::new()),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `Err(Cancelled)` once the job was cancelled.
    pub fn check(&self) -> CourierResult<()> {
        self.cancel.check()
    }

    /// 1 for the first run, incremented on every retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Queues `job` for submission once this run returns successfully.
    pub fn submit(&self, job: Job) {
        self.followups.lock().push(job);
    }

    pub(crate) fn take_followups(&self) -> Vec<Job> {
        std::mem::take(&mut *self.followups.lock())
    }
}

/// Executes jobs on behalf of the engine.
pub trait JobRunner: Send + Sync {
    /// Runs one attempt. Errors are classified by the engine.
    fn run(&self, job: &Job, ctx: &JobContext) -> CourierResult<()>;

    /// Called once when a job ends cancelled.
    fn on_cancelled(&self, _job: &Job) {}

    /// Called once when a job fails with a non-retryable error.
    fn on_failed(&self, _job: &Job, _error: &CourierError) {}
}

/// Runs the delivery core's jobs.
pub struct CourierJobRunner {
    pub(super) storage: Arc<Storage>,
    pub(super) sessions: Arc<SessionManager>,
    pub(super) reconciler: Arc<Reconciler>,
    pub(super) deliverer: Arc<Deliverer>,
    pub(super) api: Arc<dyn ConversationApi>,
    pub(super) uploader: Arc<AttachmentUploader>,
    pub(super) notifier: Arc<dyn UserNotifier>,
    pub(super) attachments: AttachmentConfig,
}

impl CourierJobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<Storage>,
        sessions: Arc<SessionManager>,
        reconciler: Arc<Reconciler>,
        deliverer: Arc<Deliverer>,
        api: Arc<dyn ConversationApi>,
        uploader: Arc<AttachmentUploader>,
        notifier: Arc<dyn UserNotifier>,
        attachments: AttachmentConfig,
    ) -> Self {
        CourierJobRunner {
            storage,
            sessions,
            reconciler,
            deliverer,
            api,
            uploader,
            notifier,
            attachments,
        }
    }

    fn cancel_transcript(&self, transcript_id: &str, message_id: &str) {
        match self
            .storage
            .cancel_transcript_attachment(transcript_id, message_id)
        {
            Ok(true) => {}
            Ok(false) => debug!(transcript_id, message_id, "attachment no longer pending"),
            Err(e) => {
                warn!(transcript_id, message_id, error = %e, "could not mark attachment canceled")
            }
        }
    }
}

impl JobRunner for CourierJobRunner {
    fn run(&self, job: &Job, ctx: &JobContext) -> CourierResult<()> {
        match &job.kind {
            JobKind::SendMessage {
                message_id,
                recipient_id,
                session_id,
            } => self.send_message(message_id, recipient_id.as_deref(), session_id.as_deref(), ctx),
            JobKind::SendSenderKey {
                conversation_id,
                recipient_id,
                session_id,
                force,
            } => self.send_sender_key(
                conversation_id,
                recipient_id.as_deref(),
                session_id.as_deref(),
                *force,
                ctx,
            ),
            JobKind::TranscriptAttachment {
                transcript_id,
                message_id,
            } => self.upload_transcript_attachment(transcript_id, message_id, ctx),
            JobKind::AckMessages => self.send_acks(ctx),
        }
    }

    fn on_cancelled(&self, job: &Job) {
        if let JobKind::TranscriptAttachment {
            transcript_id,
            message_id,
        } = &job.kind
        {
            self.cancel_transcript(transcript_id, message_id);
        }
    }

    fn on_failed(&self, job: &Job, error: &CourierError) {
        match error {
            CourierError::ResourceNotFound(path) => {
                self.notifier.notify(UserNotice::FileNotFound(path.clone()))
            }
            CourierError::UploadTimeout => self.notifier.notify(UserNotice::UploadTimeout),
            _ => {}
        }
        if let JobKind::TranscriptAttachment {
            transcript_id,
            message_id,
        } = &job.kind
        {
            self.cancel_transcript(transcript_id, message_id);
        }
    }
}
