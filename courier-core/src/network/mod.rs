// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network + Transport Layer
//!
//! One duplex chat socket carries every request and push.
//!
//! # Architecture
//!
//! - **Transport trait**: Platform-agnostic socket I/O
//! - **Message types**: The JSON wire envelope and request builders
//! - **Protocol layer**: Gzip framing
//! - **Chat connection**: Request/reply correlation, reconnect, auth teardown
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use courier_core::network::{AlwaysReachable, ChatConnection, MockTransport, SessionFlag};
//!
//! let conn = Arc::new(ChatConnection::new(
//!     MockTransport::new(),
//!     TransportConfig::new("wss://chat.example.com"),
//!     Arc::new(AlwaysReachable),
//!     Arc::new(SessionFlag::new()),
//! ));
//! conn.connect()?;
//! conn.start();
//! let reply = conn.send_and_wait(&list_pending_messages());
//! ```

pub mod connection;
pub mod error;
pub mod message;
pub mod mock;
pub mod protocol;
pub mod transport;

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
pub mod websocket;

pub use connection::{
    AlwaysReachable, ChatConnection, PushHandler, Reachability, ReachabilityFlag, SessionFlag,
    SessionGuard,
};
pub use error::NetworkError;
pub use message::{
    AckMessage, MessageParam, PushData, ServerError, SessionParam, SignalKeyMessage, WireMessage,
};
pub use mock::MockTransport;
pub use protocol::{decode_frame, encode_frame, MAX_FRAME_SIZE};
pub use transport::{ConnectionState, Transport, TransportConfig, TransportResult};

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
pub use websocket::WebSocketTransport;
