// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transcript attachment re-hosting.
//!
//! A forwarded transcript references attachments of other messages. Each
//! one is uploaded again (or reused when recent enough), and once no row of
//! the transcript is pending the parent message is sent.

use std::path::PathBuf;

use tracing::{debug, info};

use super::runner::{CourierJobRunner, JobContext};
use super::Job;
use crate::crypto::SymmetricKey;
use crate::error::{CourierError, CourierResult};
use crate::storage::{category, now_secs, MediaStatus, TranscriptAttachment};

impl CourierJobRunner {
    pub(super) fn upload_transcript_attachment(
        &self,
        transcript_id: &str,
        message_id: &str,
        ctx: &JobContext,
    ) -> CourierResult<()> {
        ctx.check()?;
        let Some(attachment) = self.storage.transcript(transcript_id, message_id)? else {
            debug!(transcript_id, message_id, "transcript attachment gone");
            return Ok(());
        };
        match attachment.media_status {
            Some(MediaStatus::Pending) => {}
            Some(MediaStatus::Done) => return self.submit_parent_if_complete(transcript_id, ctx),
            _ => return Ok(()),
        }

        let encrypted = needs_encryption(&attachment.category);
        if self.reuse_existing(&attachment, encrypted)? {
            info!(transcript_id, message_id, "reusing uploaded attachment");
            return self.submit_parent_if_complete(transcript_id, ctx);
        }

        let path = attachment
            .media_url
            .as_deref()
            .map(local_path)
            .ok_or_else(|| CourierError::ResourceNotFound(format!("{transcript_id}/{message_id}")))?;

        let slot = self.api.request_attachment()?;
        ctx.check()?;

        let key = encrypted.then(SymmetricKey::generate);
        let progress_id = message_id.to_string();
        let outcome = self.uploader.upload(
            &path,
            &slot.upload_url,
            key.as_ref(),
            ctx.cancel_token(),
            move |sent, total| debug!(message_id = %progress_id, sent, total, "upload progress"),
        )?;

        // A cancel that raced the last chunk still wins.
        ctx.check()?;
        self.storage.complete_transcript_attachment(
            transcript_id,
            message_id,
            &slot.attachment_id,
            key.as_ref().map(|k| k.as_bytes().as_slice()),
            outcome.digest.as_deref(),
            slot.created_at,
        )?;
        info!(transcript_id, message_id, bytes = outcome.uploaded_bytes, "transcript attachment uploaded");

        self.submit_parent_if_complete(transcript_id, ctx)
    }

    /// Marks the row `DONE` with its current values when the attachment was
    /// uploaded recently and carries everything a receiver needs.
    fn reuse_existing(
        &self,
        attachment: &TranscriptAttachment,
        encrypted: bool,
    ) -> CourierResult<bool> {
        let (Some(attachment_id), Some(created_at)) =
            (&attachment.attachment_id, attachment.media_created_at)
        else {
            return Ok(false);
        };
        if now_secs() - created_at >= self.attachments.reuse_window_secs {
            return Ok(false);
        }
        let has_keys = attachment.media_key.is_some() && attachment.media_digest.is_some();
        if encrypted && !has_keys {
            return Ok(false);
        }

        self.storage.complete_transcript_attachment(
            &attachment.transcript_id,
            &attachment.message_id,
            attachment_id,
            attachment.media_key.as_deref(),
            attachment.media_digest.as_deref(),
            created_at,
        )?;
        Ok(true)
    }

    /// Re-serializes the transcript into its parent message and queues the
    /// send once no attachment is pending.
    fn submit_parent_if_complete(&self, transcript_id: &str, ctx: &JobContext) -> CourierResult<()> {
        if self.storage.pending_transcript_attachments(transcript_id)? > 0 {
            return Ok(());
        }
        let Some(parent) = self.storage.message(transcript_id)? else {
            return Ok(());
        };

        let rows = self.storage.transcripts(transcript_id)?;
        let content = serde_json::to_string(&rows)?;
        self.storage.update_message_content(transcript_id, &content)?;
        ctx.submit(Job::send_message(&parent.conversation_id, transcript_id));
        debug!(transcript_id, "transcript complete, parent queued");
        Ok(())
    }
}

fn needs_encryption(category: &str) -> bool {
    category::is_signal(category) || category::is_encrypted(category)
}

fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}
