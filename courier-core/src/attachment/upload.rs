// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Streaming attachment upload.
//!
//! The file is read, optionally encrypted, and handed to the sink as one
//! sized body. The body reader reports progress at a throttled cadence and
//! aborts the stream once the job is cancelled.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::{Body, Client};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use super::cipher::{ciphertext_length, DigestHandle, EncryptingReader};
use super::UploadError;
use crate::config::AttachmentConfig;
use crate::crypto::SymmetricKey;
use crate::job::CancellationToken;

/// Progress callback: `(bytes_sent, total_bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Destination of an upload body.
pub trait UploadSink: Send + Sync {
    /// Streams `body` to `url`. `content_length` is exact.
    fn put(
        &self,
        url: &str,
        body: Box<dyn Read + Send>,
        content_length: u64,
    ) -> Result<(), UploadError>;
}

/// Uploads with an HTTP `PUT` to a pre-signed URL.
pub struct HttpUploadSink {
    client: Client,
}

impl HttpUploadSink {
    pub fn new(config: &AttachmentConfig) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.upload_timeout_ms))
            .build()?;
        Ok(Self { client })
    }
}

impl UploadSink for HttpUploadSink {
    fn put(
        &self,
        url: &str,
        body: Box<dyn Read + Send>,
        content_length: u64,
    ) -> Result<(), UploadError> {
        let response = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header("x-amz-acl", "public-read")
            .body(Body::sized(body, content_length))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::Timeout
                } else {
                    UploadError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Bytes put on the wire.
    pub uploaded_bytes: u64,
    /// SHA-256 of the ciphertext; `None` for plain media.
    pub digest: Option<Vec<u8>>,
}

/// Counts bytes, throttles progress reports and honours cancellation.
struct ProgressReader<R> {
    inner: R,
    sent: u64,
    total: u64,
    interval: Duration,
    last_report: Option<Instant>,
    progress: ProgressFn,
    cancel: CancellationToken,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "upload cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.sent += n as u64;

        let done = self.sent >= self.total;
        let due = self
            .last_report
            .map_or(true, |at| at.elapsed() >= self.interval);
        if n > 0 && (due || done) {
            (self.progress)(self.sent, self.total);
            self.last_report = Some(Instant::now());
        }
        Ok(n)
    }
}

/// Streams local files to the attachment store.
pub struct AttachmentUploader {
    sink: Arc<dyn UploadSink>,
    config: AttachmentConfig,
}

impl AttachmentUploader {
    pub fn new(sink: Arc<dyn UploadSink>, config: AttachmentConfig) -> Self {
        Self { sink, config }
    }

    /// Uploads `path` to `url`, encrypting with `key` when given.
    ///
    /// Fails with `Cancelled` when `cancel` fires before or during the
    /// stream, even if the sink swallowed the aborted read.
    pub fn upload<F>(
        &self,
        path: &Path,
        url: &str,
        key: Option<&SymmetricKey>,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<UploadOutcome, UploadError>
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => UploadError::FileNotFound(path.display().to_string()),
            _ => UploadError::Io(e),
        })?;
        let plain_len = file.metadata()?.len();

        let (reader, total, digest): (Box<dyn Read + Send>, u64, Option<DigestHandle>) = match key
        {
            Some(key) => {
                let (reader, digest) = EncryptingReader::new(file, key, plain_len);
                (Box::new(reader), ciphertext_length(plain_len), Some(digest))
            }
            None => (Box::new(file), plain_len, None),
        };

        let body = ProgressReader {
            inner: reader,
            sent: 0,
            total,
            interval: Duration::from_millis(self.config.progress_interval_ms),
            last_report: None,
            progress: Arc::new(progress),
            cancel: cancel.clone(),
        };

        debug!(path = %path.display(), total, encrypted = key.is_some(), "upload started");
        let result = self.sink.put(url, Box::new(body), total);

        if cancel.is_cancelled() {
            info!(path = %path.display(), "upload cancelled");
            return Err(UploadError::Cancelled);
        }
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "upload failed");
            return Err(e);
        }

        let digest = match digest {
            Some(handle) => Some(handle.get().ok_or_else(|| {
                UploadError::Crypto("sink stopped before the end of the stream".into())
            })?),
            None => None,
        };
        Ok(UploadOutcome {
            uploaded_bytes: total,
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Collect {
        body: Mutex<Vec<u8>>,
        length: AtomicU64,
    }

    impl UploadSink for Collect {
        fn put(
            &self,
            _url: &str,
            mut body: Box<dyn Read + Send>,
            content_length: u64,
        ) -> Result<(), UploadError> {
            self.length.store(content_length, Ordering::SeqCst);
            body.read_to_end(&mut self.body.lock())?;
            Ok(())
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let uploader = AttachmentUploader::new(Arc::new(Collect::default()), Default::default());
        let err = uploader
            .upload(
                Path::new("/nonexistent/file.bin"),
                "http://upload",
                None,
                &CancellationToken::new(),
                |_, _| {},
            )
            .unwrap_err();
        assert!(matches!(err, UploadError::FileNotFound(_)));
    }

    #[test]
    fn test_plain_upload_has_no_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"plain media").unwrap();

        let sink = Arc::new(Collect::default());
        let uploader = AttachmentUploader::new(sink.clone(), Default::default());
        let last = Arc::new(AtomicU64::new(0));
        let seen = last.clone();
        let outcome = uploader
            .upload(
                file.path(),
                "http://upload",
                None,
                &CancellationToken::new(),
                move |sent, _| seen.store(sent, Ordering::SeqCst),
            )
            .unwrap();

        assert_eq!(outcome.digest, None);
        assert_eq!(sink.body.lock().as_slice(), b"plain media");
        assert_eq!(last.load(Ordering::SeqCst), 11);
    }
}
