// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Attachment Pipeline
//!
//! Streams local files to the attachment store, optionally through the
//! chunked encryption transform, with throttled progress and cooperative
//! cancellation.

pub mod cipher;
mod upload;

use thiserror::Error;
use tracing::warn;

pub use cipher::{ciphertext_length, decrypt_attachment, DigestHandle, EncryptingReader};
pub use upload::{AttachmentUploader, HttpUploadSink, ProgressFn, UploadOutcome, UploadSink};

/// Attachment upload errors.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("upload timed out")]
    Timeout,

    #[error("upload cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected with status {0}")]
    Status(u16),

    #[error("attachment crypto error: {0}")]
    Crypto(String),
}

/// Failures the user must be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    FileNotFound(String),
    UploadTimeout,
}

/// Surfaces terminal attachment failures to the user.
pub trait UserNotifier: Send + Sync {
    fn notify(&self, notice: UserNotice);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, notice: UserNotice) {
        warn!(?notice, "attachment failure");
    }
}
