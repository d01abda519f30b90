// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier Error Types
//!
//! Unified error type for the delivery core. Module errors convert into it,
//! landing in the variant that decides how the job engine reacts.

use thiserror::Error;

use crate::attachment::UploadError;
use crate::conversation::ApiError;
use crate::crypto::CryptoError;
use crate::network::message::codes;
use crate::network::NetworkError;
use crate::storage::StorageError;

/// Unified error type for courier operations.
#[derive(Error, Debug)]
pub enum CourierError {
    /// No connection, or no reply within the request timeout.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The server answered `FORBIDDEN`. Nothing more to do.
    #[error("refused by server")]
    ServerRefused,

    /// The server rejected our credentials.
    #[error("session rejected: {0}")]
    ServerAuthInvalid(String),

    /// Local participant state disagrees with the server.
    #[error("conversation checksum conflict in {0}")]
    ConsistencyConflict(String),

    /// The server returned no pre-key for the device.
    #[error("no session material for {user_id}")]
    CryptoSessionUnavailable {
        user_id: String,
        session_id: Option<String>,
    },

    /// A local file to upload is missing.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("upload timed out")]
    UploadTimeout,

    /// The job was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Any other server error reply.
    #[error("server error {code}: {description}")]
    Server { code: i32, description: String },

    /// The conversation could not be confirmed on the server.
    #[error("conversation unavailable: {0}")]
    ConversationUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for courier operations.
pub type CourierResult<T> = Result<T, CourierError>;

impl CourierError {
    /// Builds the error for a server error reply.
    pub fn from_server(code: i32, description: &str, conversation_id: Option<&str>) -> Self {
        match code {
            codes::FORBIDDEN => CourierError::ServerRefused,
            codes::AUTHENTICATION => CourierError::ServerAuthInvalid(description.to_string()),
            codes::CONVERSATION_CHECKSUM_INVALID => {
                CourierError::ConsistencyConflict(conversation_id.unwrap_or_default().to_string())
            }
            _ => CourierError::Server {
                code,
                description: description.to_string(),
            },
        }
    }

    /// Whether the job engine should run the job again.
    ///
    /// Transport failures and checksum conflicts always retry; other server
    /// errors retry up to the configured attempt cap.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CourierError::TransportUnavailable(_)
                | CourierError::ConsistencyConflict(_)
                | CourierError::Server { .. }
        )
    }

    /// Whether the outcome counts as success for the job.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, CourierError::ServerRefused)
    }
}

impl From<NetworkError> for CourierError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::AuthenticationFailed(reason) => CourierError::ServerAuthInvalid(reason),
            other => CourierError::TransportUnavailable(other.to_string()),
        }
    }
}

impl From<ApiError> for CourierError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Server { code, description } => {
                CourierError::from_server(code, &description, None)
            }
            ApiError::Status(401) => CourierError::ServerAuthInvalid("HTTP 401".into()),
            ApiError::Status(403) => CourierError::ServerRefused,
            ApiError::Serialization(e) => CourierError::Serialization(e),
            other => CourierError::TransportUnavailable(other.to_string()),
        }
    }
}

impl From<UploadError> for CourierError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::FileNotFound(path) => CourierError::ResourceNotFound(path),
            UploadError::Timeout => CourierError::UploadTimeout,
            UploadError::Cancelled => CourierError::Cancelled,
            other => CourierError::TransportUnavailable(other.to_string()),
        }
    }
}
