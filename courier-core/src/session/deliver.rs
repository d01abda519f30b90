// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Delivery over the chat connection with the server-error policy applied.
//!
//! - `FORBIDDEN` is success: the server will never accept the request.
//! - `CONVERSATION_CHECKSUM_INVALID` reconciles the conversation, then the
//!   caller retries.
//! - `AUTHENTICATION` is fatal.
//! - Other server errors are retried with capped exponential backoff, up to
//!   a maximum number of attempts.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::JobConfig;
use crate::conversation::Reconciler;
use crate::error::{CourierError, CourierResult};
use crate::job::CancellationToken;
use crate::network::message::codes;
use crate::network::{ChatConnection, WireMessage};

/// Outcome of [`Deliverer::deliver_no_throw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageResult {
    pub success: bool,
    /// A checksum conflict was reconciled; the caller should rebuild and
    /// resend.
    pub retry: bool,
}

impl MessageResult {
    const SENT: MessageResult = MessageResult {
        success: true,
        retry: false,
    };
    const RECONCILED: MessageResult = MessageResult {
        success: false,
        retry: true,
    };
}

/// Sends requests and interprets the replies.
pub struct Deliverer {
    connection: Arc<ChatConnection>,
    reconciler: Arc<Reconciler>,
    config: JobConfig,
}

impl Deliverer {
    pub fn new(
        connection: Arc<ChatConnection>,
        reconciler: Arc<Reconciler>,
        config: JobConfig,
    ) -> Self {
        Self {
            connection,
            reconciler,
            config,
        }
    }

    pub fn connection(&self) -> &Arc<ChatConnection> {
        &self.connection
    }

    /// One delivery attempt; every failure is an error for the job engine.
    pub fn deliver(&self, message: &WireMessage, cancel: &CancellationToken) -> CourierResult<()> {
        cancel.check()?;
        let Some(reply) = self.connection.send_and_wait(message) else {
            return Err(CourierError::TransportUnavailable(format!(
                "no reply to {}",
                message.action
            )));
        };

        match &reply.error {
            None => Ok(()),
            Some(err) if err.code == codes::FORBIDDEN => {
                debug!(id = %message.id, "request forbidden, treating as done");
                Ok(())
            }
            Some(err) => {
                if err.code == codes::CONVERSATION_CHECKSUM_INVALID {
                    self.reconcile(message);
                }
                Err(CourierError::from_server(
                    err.code,
                    &err.description,
                    message.conversation_id(),
                ))
            }
        }
    }

    /// Delivers `message`, retrying transient failures in place.
    ///
    /// A missing reply while the device is offline or the socket is down
    /// fails fast with `TransportUnavailable`; while online the request is
    /// re-sent after the retry delay.
    pub fn deliver_no_throw(
        &self,
        message: &WireMessage,
        cancel: &CancellationToken,
    ) -> CourierResult<MessageResult> {
        let mut server_errors = 0u32;
        loop {
            cancel.check()?;
            let Some(reply) = self.connection.send_and_wait(message) else {
                self.fail_if_offline(message)?;
                cancel.sleep(self.config.retry_delay())?;
                continue;
            };

            let Some(err) = &reply.error else {
                return Ok(MessageResult::SENT);
            };
            match err.code {
                codes::CONVERSATION_CHECKSUM_INVALID => {
                    self.reconcile(message);
                    return Ok(MessageResult::RECONCILED);
                }
                codes::FORBIDDEN => return Ok(MessageResult::SENT),
                codes::AUTHENTICATION => {
                    return Err(CourierError::ServerAuthInvalid(err.description.clone()))
                }
                code => {
                    server_errors += 1;
                    self.backoff_server_error(message, code, &err.description, server_errors, cancel)?;
                }
            }
        }
    }

    /// Requests pre-key material. `Ok(None)` when the server refuses.
    pub fn signal_keys_channel(
        &self,
        message: &WireMessage,
        cancel: &CancellationToken,
    ) -> CourierResult<Option<Value>> {
        let mut server_errors = 0u32;
        loop {
            cancel.check()?;
            let Some(reply) = self.connection.send_and_wait(message) else {
                self.fail_if_offline(message)?;
                cancel.sleep(self.config.retry_delay())?;
                continue;
            };

            let Some(err) = &reply.error else {
                return Ok(reply.data);
            };
            match err.code {
                codes::FORBIDDEN => return Ok(None),
                codes::AUTHENTICATION => {
                    return Err(CourierError::ServerAuthInvalid(err.description.clone()))
                }
                code => {
                    server_errors += 1;
                    self.backoff_server_error(message, code, &err.description, server_errors, cancel)?;
                }
            }
        }
    }

    fn fail_if_offline(&self, message: &WireMessage) -> CourierResult<()> {
        if self.connection.is_network_available() && self.connection.is_connected() {
            return Ok(());
        }
        warn!(id = %message.id, action = %message.action, "no reply while offline");
        Err(CourierError::TransportUnavailable(
            "device offline or socket down".into(),
        ))
    }

    fn backoff_server_error(
        &self,
        message: &WireMessage,
        code: i32,
        description: &str,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        if attempt >= self.config.max_server_error_attempts {
            warn!(id = %message.id, code, attempt, "giving up after repeated server errors");
            return Err(CourierError::Server {
                code,
                description: description.to_string(),
            });
        }
        let delay = self.config.server_error_backoff(attempt);
        debug!(id = %message.id, code, attempt, delay_ms = delay.as_millis() as u64, "server error, retrying");
        cancel.sleep(delay)
    }

    fn reconcile(&self, message: &WireMessage) {
        let Some(conversation_id) = message.conversation_id() else {
            return;
        };
        if let Err(e) = self.reconciler.sync_conversation(conversation_id) {
            warn!(conversation_id, error = %e, "reconciliation failed");
        }
    }
}
