// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock Transport
//!
//! In-memory transport for tests. Clones share state, so a test can keep a
//! handle after moving the transport into a connection.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::error::NetworkError;
use super::message::WireMessage;
use super::protocol::{decode_frame, encode_frame};
use super::transport::{ConnectionState, Transport, TransportConfig, TransportResult};

type Responder = Box<dyn FnMut(&WireMessage) -> Vec<WireMessage> + Send>;

struct MockState {
    state: ConnectionState,
    sent: Vec<WireMessage>,
    inbox: VecDeque<Vec<u8>>,
    responder: Option<Responder>,
    injected_error: Option<NetworkError>,
    reachable: bool,
    connect_attempts: Vec<String>,
    fail_sends: bool,
    receive_delay: Duration,
}

/// Scriptable in-memory transport.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a disconnected mock with no responder.
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockState {
                state: ConnectionState::Disconnected,
                sent: Vec::new(),
                inbox: VecDeque::new(),
                responder: None,
                injected_error: None,
                reachable: true,
                connect_attempts: Vec::new(),
                fail_sends: false,
                receive_delay: Duration::ZERO,
            })),
        }
    }

    /// Installs the function that plays the server: every sent message is
    /// passed to it and the returned messages are queued for receive.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&WireMessage) -> Vec<WireMessage> + Send + 'static,
    {
        self.inner.lock().responder = Some(Box::new(responder));
    }

    /// Queues a message for the next receive.
    pub fn queue_receive(&self, message: &WireMessage) {
        if let Ok(frame) = encode_frame(message) {
            self.inner.lock().inbox.push_back(frame);
        }
    }

    /// Queues a raw frame, e.g. a corrupt one.
    pub fn queue_frame(&self, frame: Vec<u8>) {
        self.inner.lock().inbox.push_back(frame);
    }

    /// Makes the next connect fail with `error`.
    pub fn inject_error(&self, error: NetworkError) {
        self.inner.lock().injected_error = Some(error);
    }

    /// While unreachable every connect fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Makes every send fail while set.
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }

    /// Makes a receive with nothing queued block for `delay`, like a socket
    /// read waiting out its timeout.
    pub fn set_receive_delay(&self, delay: Duration) {
        self.inner.lock().receive_delay = delay;
    }

    /// Drops the connection as if the server went away.
    pub fn simulate_disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        inner.inbox.clear();
    }

    /// Forces the state without side effects.
    pub fn set_state(&self, state: ConnectionState) {
        self.inner.lock().state = state;
    }

    /// Returns all messages sent so far.
    pub fn sent_messages(&self) -> Vec<WireMessage> {
        self.inner.lock().sent.clone()
    }

    /// Returns sent messages with the given action.
    pub fn sent_with_action(&self, action: &str) -> Vec<WireMessage> {
        self.inner
            .lock()
            .sent
            .iter()
            .filter(|m| m.action == action)
            .cloned()
            .collect()
    }

    /// URLs passed to connect, in order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.inner.lock().connect_attempts.clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().inbox.is_empty()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, url: &str, _config: &TransportConfig) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        inner.connect_attempts.push(url.to_string());
        if let Some(error) = inner.injected_error.take() {
            return Err(error);
        }
        if !inner.reachable {
            return Err(NetworkError::ConnectionFailed("unreachable".into()));
        }
        inner.state = ConnectionState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        inner.inbox.clear();
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        self.inner.lock().state.clone()
    }

    fn send(&mut self, frame: &[u8]) -> TransportResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return Err(NetworkError::NotConnected);
        }
        if inner.fail_sends {
            return Err(NetworkError::SendFailed("injected send failure".into()));
        }

        let message = decode_frame(frame)?;
        inner.sent.push(message.clone());

        let replies = match inner.responder.as_mut() {
            Some(responder) => responder(&message),
            None => Vec::new(),
        };
        for reply in replies {
            inner.inbox.push_back(encode_frame(&reply)?);
        }
        Ok(())
    }

    fn receive(&mut self) -> TransportResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            return Err(NetworkError::ConnectionClosed);
        }
        if inner.inbox.is_empty() && !inner.receive_delay.is_zero() {
            let delay = inner.receive_delay;
            drop(inner);
            thread::sleep(delay);
            inner = self.inner.lock();
        }
        Ok(inner.inbox.pop_front())
    }
}
