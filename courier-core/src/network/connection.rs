// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Connection
//!
//! Owns the single duplex socket and correlates replies with requests.
//!
//! - `send_and_wait` registers a transaction keyed by the request id before
//!   the frame is written, then blocks the calling thread until the reply
//!   arrives or the request timeout elapses.
//! - A reader thread pumps frames: replies resolve their transaction, pushes
//!   go to the [`PushHandler`].
//! - Losing the socket starts a fixed-interval reconnect loop gated on
//!   network reachability and a valid session token.
//! - An `AUTHENTICATION` error from the server tears the connection down for
//!   good and reports the session as invalid.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use super::error::NetworkError;
use super::message::{codes, list_pending_messages, WireMessage, ERROR_ACTION};
use super::protocol::{decode_frame, encode_frame};
use super::transport::{ConnectionState, Transport, TransportConfig, TransportResult};

/// Receives server pushes (messages and receipts that answer no request).
pub trait PushHandler: Send + Sync {
    fn on_push(&self, message: &WireMessage);
}

/// Reports whether the device currently has network connectivity.
pub trait Reachability: Send + Sync {
    fn is_network_available(&self) -> bool;
}

/// Session token validity and the process-level "session is dead" signal.
pub trait SessionGuard: Send + Sync {
    fn is_token_valid(&self) -> bool;

    /// Called once when the server rejects our credentials.
    fn on_session_invalid(&self, reason: &str);
}

/// Reachability that is always online.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    fn is_network_available(&self) -> bool {
        true
    }
}

/// A switchable reachability flag.
#[derive(Debug)]
pub struct ReachabilityFlag(AtomicBool);

impl ReachabilityFlag {
    pub fn new(available: bool) -> Self {
        ReachabilityFlag(AtomicBool::new(available))
    }

    pub fn set(&self, available: bool) {
        self.0.store(available, Ordering::SeqCst);
    }
}

impl Reachability for ReachabilityFlag {
    fn is_network_available(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Session guard backed by a flag; invalidation clears it.
#[derive(Debug)]
pub struct SessionFlag {
    valid: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl SessionFlag {
    pub fn new() -> Self {
        SessionFlag {
            valid: AtomicBool::new(true),
            reason: Mutex::new(None),
        }
    }

    /// Why the session was invalidated, if it was.
    pub fn invalidation_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl Default for SessionFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGuard for SessionFlag {
    fn is_token_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn on_session_invalid(&self, reason: &str) {
        self.valid.store(false, Ordering::SeqCst);
        *self.reason.lock() = Some(reason.to_string());
    }
}

/// A request awaiting its reply.
enum Pending {
    /// A blocked `send_and_wait` caller.
    Waiter(SyncSender<WireMessage>),
    /// The background pending-messages request, re-sent on error.
    ListPending,
}

/// Bookkeeping of the connection. Never held across socket I/O.
struct Link {
    state: ConnectionState,
    transactions: HashMap<String, Pending>,
    use_fallback: bool,
    reconnect_wanted: bool,
    auth_failed: bool,
}

/// The single chat socket with request/reply correlation.
///
/// Lock order is `socket` before `link`.
pub struct ChatConnection {
    socket: Mutex<Box<dyn Transport>>,
    link: Mutex<Link>,
    /// Writers waiting for the socket; the reader yields to them.
    writers: AtomicUsize,
    config: TransportConfig,
    reachability: Arc<dyn Reachability>,
    session: Arc<dyn SessionGuard>,
    push: RwLock<Option<Arc<dyn PushHandler>>>,
    shutdown: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ChatConnection {
    /// Creates a disconnected connection.
    pub fn new<T: Transport + 'static>(
        transport: T,
        config: TransportConfig,
        reachability: Arc<dyn Reachability>,
        session: Arc<dyn SessionGuard>,
    ) -> Self {
        Self::with_boxed(Box::new(transport), config, reachability, session)
    }

    /// Same as [`Self::new`] for an already boxed transport.
    pub fn with_boxed(
        transport: Box<dyn Transport>,
        config: TransportConfig,
        reachability: Arc<dyn Reachability>,
        session: Arc<dyn SessionGuard>,
    ) -> Self {
        ChatConnection {
            socket: Mutex::new(transport),
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                transactions: HashMap::new(),
                use_fallback: false,
                reconnect_wanted: false,
                auth_failed: false,
            }),
            writers: AtomicUsize::new(0),
            config,
            reachability,
            session,
            push: RwLock::new(None),
            shutdown: AtomicBool::new(false),
            reader: Mutex::new(None),
        }
    }

    /// Installs the push handler.
    pub fn set_push_handler(&self, handler: Arc<dyn PushHandler>) {
        *self.push.write() = Some(handler);
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.link.lock().state.clone()
    }

    /// Returns true if connected and ready.
    pub fn is_connected(&self) -> bool {
        self.link.lock().state == ConnectionState::Connected
    }

    /// True once the server rejected our credentials.
    pub fn is_session_rejected(&self) -> bool {
        self.link.lock().auth_failed
    }

    /// Network reachability as seen by this connection.
    pub fn is_network_available(&self) -> bool {
        self.reachability.is_network_available()
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_transactions(&self) -> usize {
        self.link.lock().transactions.len()
    }

    /// Connects to the server. Idempotent while connected.
    pub fn connect(&self) -> TransportResult<()> {
        let mut socket = self.write_lock();
        let url = {
            let mut link = self.link.lock();
            if link.auth_failed {
                return Err(NetworkError::AuthenticationFailed(
                    "session was rejected by the server".into(),
                ));
            }
            if link.state == ConnectionState::Connected
                && socket.state() == ConnectionState::Connected
            {
                return Ok(());
            }
            link.state = ConnectionState::Connecting;
            self.active_url(link.use_fallback).to_string()
        };

        let connected = socket.connect(&url, &self.config);
        let mut link = self.link.lock();
        let error = match connected {
            Ok(()) => {
                link.state = ConnectionState::Connected;
                link.reconnect_wanted = false;
                info!(url = %url, "chat socket connected");
                Self::send_list_pending(&mut **socket, &mut link);
                return Ok(());
            }
            Err(e) => e,
        };

        link.state = ConnectionState::Disconnected;
        if error.is_host_failure() && self.config.fallback_url.is_some() {
            link.use_fallback = !link.use_fallback;
        }
        warn!(url = %url, error = %error, "chat socket connect failed");
        if let NetworkError::AuthenticationFailed(reason) = &error {
            link.auth_failed = true;
            link.reconnect_wanted = false;
            drop(link);
            drop(socket);
            self.session.on_session_invalid(reason);
        }
        Err(error)
    }

    /// Closes the socket and abandons every pending transaction.
    ///
    /// An explicit disconnect does not trigger the reconnect loop.
    pub fn disconnect(&self) {
        let mut socket = self.write_lock();
        let _ = socket.disconnect();
        let mut link = self.link.lock();
        link.state = ConnectionState::Disconnected;
        link.transactions.clear();
        link.reconnect_wanted = false;
        debug!("chat socket disconnected");
    }

    /// Sends `message` and blocks until the correlated reply arrives.
    ///
    /// Returns `None` when not connected, when the write fails, when the
    /// connection drops while waiting, or when no reply arrives within the
    /// request timeout. Callers decide whether that is retryable.
    pub fn send_and_wait(&self, message: &WireMessage) -> Option<WireMessage> {
        self.send_and_wait_timeout(message, Duration::from_millis(self.config.request_timeout_ms))
    }

    /// [`Self::send_and_wait`] with an explicit timeout.
    pub fn send_and_wait_timeout(
        &self,
        message: &WireMessage,
        timeout: Duration,
    ) -> Option<WireMessage> {
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                error!(id = %message.id, error = %e, "failed to encode request");
                return None;
            }
        };

        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut link = self.link.lock();
            if link.state != ConnectionState::Connected {
                warn!(id = %message.id, action = %message.action, "chat socket not connected");
                return None;
            }
            // Register before writing so an early reply cannot be missed.
            link.transactions
                .insert(message.id.clone(), Pending::Waiter(tx));
        }

        if let Err(e) = self.write(&frame) {
            self.link.lock().transactions.remove(&message.id);
            warn!(id = %message.id, error = %e, "failed to write request");
            return None;
        }

        match rx.recv_timeout(timeout) {
            Ok(reply) => Some(reply),
            Err(RecvTimeoutError::Timeout) => {
                self.link.lock().transactions.remove(&message.id);
                debug!(id = %message.id, action = %message.action, "request timed out");
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(id = %message.id, "connection dropped while waiting for reply");
                None
            }
        }
    }

    /// Reads and dispatches at most one frame.
    ///
    /// Returns `Ok(true)` if a frame was handled. The reader thread calls
    /// this in a loop; tests may drive it directly. Yields without reading
    /// while a writer is waiting for the socket.
    pub fn pump_once(&self) -> TransportResult<bool> {
        if self.writers.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
            return Ok(false);
        }

        let mut socket = self.socket.lock();
        if self.link.lock().state != ConnectionState::Connected {
            return Err(NetworkError::NotConnected);
        }
        let received = socket.receive();
        let received = match received {
            Ok(frame) => frame,
            Err(e) => {
                Self::mark_lost(&mut **socket, &mut self.link.lock());
                warn!(error = %e, "chat socket lost");
                return Err(e);
            }
        };
        // Hand the socket straight to a writer queued behind this read.
        MutexGuard::unlock_fair(socket);

        match received {
            Some(frame) => {
                self.handle_frame(&frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Starts the reader thread. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            return;
        }
        self.shutdown.store(false, Ordering::SeqCst);
        let connection = Arc::clone(self);
        match thread::Builder::new()
            .name("chat-reader".into())
            .spawn(move || connection.run_reader())
        {
            Ok(handle) => *reader = Some(handle),
            Err(e) => error!(error = %e, "failed to spawn chat reader"),
        }
    }

    /// Stops the reader thread and disconnects.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.disconnect();
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run_reader(&self) {
        let mut attempt: u32 = 0;
        while !self.shutdown.load(Ordering::SeqCst) {
            let (connected, reconnect_wanted) = {
                let link = self.link.lock();
                (
                    link.state == ConnectionState::Connected,
                    link.reconnect_wanted,
                )
            };

            if connected {
                attempt = 0;
                match self.pump_once() {
                    Ok(true) => {}
                    Ok(false) => thread::sleep(Duration::from_millis(1)),
                    Err(_) => {}
                }
                continue;
            }

            if !reconnect_wanted {
                self.sleep_unless_shutdown(Duration::from_millis(self.config.poll_timeout_ms));
                continue;
            }

            attempt += 1;
            self.link.lock().state = ConnectionState::Reconnecting { attempt };
            self.sleep_unless_shutdown(Duration::from_millis(self.config.reconnect_interval_ms));
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !self.reachability.is_network_available() || !self.session.is_token_valid() {
                debug!(attempt, "reconnect skipped, offline or token invalid");
                continue;
            }
            if self.connect().is_ok() {
                info!(attempt, "chat socket reconnected");
            }
        }
    }

    fn sleep_unless_shutdown(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.shutdown.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }

    /// Takes the socket ahead of the reader.
    fn write_lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.writers.fetch_add(1, Ordering::SeqCst);
        let socket = self.socket.lock();
        self.writers.fetch_sub(1, Ordering::SeqCst);
        socket
    }

    fn write(&self, frame: &[u8]) -> TransportResult<()> {
        let mut socket = self.write_lock();
        let written = socket.send(frame);
        if let Err(NetworkError::ConnectionClosed | NetworkError::NotConnected) = &written {
            Self::mark_lost(&mut **socket, &mut self.link.lock());
        }
        written
    }

    fn handle_frame(&self, frame: &[u8]) {
        let message = match decode_frame(frame) {
            Ok(message) => message,
            Err(NetworkError::Compression(e)) => {
                warn!(error = %e, "dropping frame that failed to decompress");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        let pending = self.link.lock().transactions.remove(&message.id);
        match pending {
            Some(Pending::Waiter(tx)) => {
                let _ = tx.try_send(message.clone());
            }
            Some(Pending::ListPending) if message.error.is_some() => {
                let mut socket = self.write_lock();
                let mut link = self.link.lock();
                if link.state == ConnectionState::Connected {
                    Self::send_list_pending(&mut **socket, &mut link);
                }
            }
            Some(Pending::ListPending) | None => {}
        }

        match &message.error {
            None => {
                if message.data.is_some() && message.is_receive_action() {
                    let handler = self.push.read().clone();
                    if let Some(handler) = handler {
                        handler.on_push(&message);
                    }
                }
            }
            Some(err) if message.action == ERROR_ACTION && err.code == codes::AUTHENTICATION => {
                self.tear_down_session(&err.description);
            }
            Some(_) => {}
        }
    }

    fn tear_down_session(&self, description: &str) {
        {
            let mut socket = self.write_lock();
            let _ = socket.disconnect();
            let mut link = self.link.lock();
            link.auth_failed = true;
            link.reconnect_wanted = false;
            link.state = ConnectionState::Disconnected;
            link.transactions.clear();
        }
        error!(description, "server rejected session, tearing down chat socket");
        self.session.on_session_invalid(description);
    }

    /// Drops a socket that failed under us. An explicit disconnect that got
    /// there first stays explicit.
    fn mark_lost(socket: &mut dyn Transport, link: &mut Link) {
        if link.state != ConnectionState::Connected {
            return;
        }
        let _ = socket.disconnect();
        link.state = ConnectionState::Disconnected;
        link.transactions.clear();
        link.reconnect_wanted = !link.auth_failed;
    }

    fn send_list_pending(socket: &mut dyn Transport, link: &mut Link) {
        let request = list_pending_messages();
        let frame = match encode_frame(&request) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode pending-messages request");
                return;
            }
        };
        link.transactions
            .insert(request.id.clone(), Pending::ListPending);
        if let Err(e) = socket.send(&frame) {
            link.transactions.remove(&request.id);
            warn!(error = %e, "failed to request pending messages");
        }
    }

    fn active_url(&self, use_fallback: bool) -> &str {
        match (&self.config.fallback_url, use_fallback) {
            (Some(fallback), true) => fallback,
            _ => &self.config.server_url,
        }
    }
}

impl Drop for ChatConnection {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
