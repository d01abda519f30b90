// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network error types.

use thiserror::Error;

/// Errors raised by transports and the connection layer.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl NetworkError {
    /// True for failures that suggest the current host is unreachable, in
    /// which case the next connect attempt switches to the fallback host.
    pub fn is_host_failure(&self) -> bool {
        matches!(self, NetworkError::ConnectionFailed(_) | NetworkError::Timeout)
    }
}
