// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration for the delivery core

use std::time::Duration;

pub use crate::network::TransportConfig;

/// Job engine tuning.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Worker threads executing jobs.
    pub workers: usize,
    /// Base delay before a failed job runs again.
    pub retry_delay_ms: u64,
    /// Ceiling of the exponential backoff for server errors.
    pub max_backoff_ms: u64,
    /// Attempts allowed for a job failing with a generic server error.
    pub max_server_error_attempts: u32,
    /// Reconciliation rounds a sender key fan-out may go through.
    pub max_conflict_retries: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_delay_ms: 1_000,
            max_backoff_ms: 60_000,
            max_server_error_attempts: 10,
            max_conflict_retries: 3,
        }
    }
}

impl JobConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Delay before attempt `attempt + 1` after a generic server error.
    pub fn server_error_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.retry_delay_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }
}

/// Attachment upload settings.
#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    /// Minimum interval between progress callbacks.
    pub progress_interval_ms: u64,
    /// HTTP timeout of a whole upload.
    pub upload_timeout_ms: u64,
    /// Age under which an already uploaded attachment is reused.
    pub reuse_window_secs: i64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: 200,
            upload_timeout_ms: 5 * 60 * 1000,
            reuse_window_secs: 24 * 60 * 60,
        }
    }
}

/// REST collaborator settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            timeout_ms: 15_000,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default)]
pub struct CourierConfig {
    pub transport: TransportConfig,
    pub jobs: JobConfig,
    pub attachments: AttachmentConfig,
    pub api: ApiConfig,
}

impl CourierConfig {
    /// Defaults overridden by `COURIER_*` environment variables.
    ///
    /// Unparsable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CourierConfig::default();

        if let Some(url) = lookup("COURIER_SERVER_URL") {
            config.transport.server_url = url;
        }
        if let Some(url) = lookup("COURIER_FALLBACK_URL") {
            config.transport.fallback_url = Some(url);
        }
        if let Some(token) = lookup("COURIER_AUTH_TOKEN") {
            config.transport.auth_token = Some(token.clone());
            config.api.auth_token = Some(token);
        }
        if let Some(url) = lookup("COURIER_API_URL") {
            config.api.base_url = url;
        }

        let number = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring non-numeric config value");
                    None
                }
            }
        };

        if let Some(v) = number("COURIER_REQUEST_TIMEOUT_MS") {
            config.transport.request_timeout_ms = v;
        }
        if let Some(v) = number("COURIER_RECONNECT_INTERVAL_MS") {
            config.transport.reconnect_interval_ms = v;
        }
        if let Some(v) = number("COURIER_CONNECT_TIMEOUT_MS") {
            config.transport.connect_timeout_ms = v;
        }
        if let Some(v) = number("COURIER_WORKERS") {
            config.jobs.workers = (v as usize).max(1);
        }
        if let Some(v) = number("COURIER_RETRY_DELAY_MS") {
            config.jobs.retry_delay_ms = v;
        }
        if let Some(v) = number("COURIER_MAX_SERVER_ERROR_ATTEMPTS") {
            config.jobs.max_server_error_attempts = v as u32;
        }
        if let Some(v) = number("COURIER_UPLOAD_TIMEOUT_MS") {
            config.attachments.upload_timeout_ms = v;
        }
        if let Some(v) = number("COURIER_API_TIMEOUT_MS") {
            config.api.timeout_ms = v;
        }

        config
    }
}
