// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport Trait
//!
//! Platform-agnostic abstraction for the duplex chat socket.

use super::error::NetworkError;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, NetworkError>;

/// Connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected to any server.
    Disconnected,
    /// Connection in progress.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Connection lost, the reconnect loop is polling.
    Reconnecting { attempt: u32 },
}

/// Configuration for the chat socket.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Primary server URL.
    pub server_url: String,
    /// Alternate host tried after a host-level connect failure.
    pub fallback_url: Option<String>,
    /// Bearer token presented during the WebSocket handshake.
    pub auth_token: Option<String>,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket read poll in milliseconds. Bounds how long a write waits
    /// behind an idle read.
    pub poll_timeout_ms: u64,
    /// How long `send_and_wait` waits for the correlated reply.
    pub request_timeout_ms: u64,
    /// Fixed polling interval of the reconnect loop.
    pub reconnect_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            server_url: String::new(),
            fallback_url: None,
            auth_token: None,
            connect_timeout_ms: 10_000,
            poll_timeout_ms: 20,
            request_timeout_ms: 5_000,
            reconnect_interval_ms: 2_000,
        }
    }
}

impl TransportConfig {
    /// Creates a config for the given primary server.
    pub fn new(server_url: &str) -> Self {
        TransportConfig {
            server_url: server_url.to_string(),
            ..Default::default()
        }
    }

    /// Sets the alternate host.
    pub fn with_fallback(mut self, fallback_url: &str) -> Self {
        self.fallback_url = Some(fallback_url.to_string());
        self
    }

    /// Sets the handshake bearer token.
    pub fn with_auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_string());
        self
    }

    /// Overrides the request timeout.
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Overrides the reconnect polling interval.
    pub fn with_reconnect_interval_ms(mut self, interval_ms: u64) -> Self {
        self.reconnect_interval_ms = interval_ms;
        self
    }
}

/// Transport trait for the chat socket.
///
/// Frames are opaque byte blobs here; compression and JSON live in
/// [`super::protocol`].
///
/// # Synchronous Interface
///
/// This trait uses synchronous methods. `receive` must return `Ok(None)`
/// after at most the configured poll timeout so the connection can
/// interleave sends with reads.
pub trait Transport: Send {
    /// Connects to `url`.
    fn connect(&mut self, url: &str, config: &TransportConfig) -> TransportResult<()>;

    /// Disconnects. Safe to call even if not connected.
    fn disconnect(&mut self) -> TransportResult<()>;

    /// Returns the current connection state.
    fn state(&self) -> ConnectionState;

    /// Writes one frame.
    fn send(&mut self, frame: &[u8]) -> TransportResult<()>;

    /// Reads the next frame, `Ok(None)` when nothing arrived within the poll.
    fn receive(&mut self) -> TransportResult<Option<Vec<u8>>>;
}
