// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cryptographic Session Manager
//!
//! Guarantees a recipient device holds usable key material before anything
//! is encrypted for it. Pre-keys are fetched from the server through
//! `CONSUME_SESSION_SIGNAL_KEYS`; sender keys go out as
//! `CREATE_SIGNAL_KEY_MESSAGES` control messages. Every distribution attempt
//! records the device's `SenderKeyStatus`.

use std::collections::HashSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::deliver::Deliverer;
use super::Account;
use crate::crypto::{
    conversation_checksum, create_pre_key_bundle, device_id, SignalKey, SignalProtocol,
};
use crate::error::{CourierError, CourierResult};
use crate::job::CancellationToken;
use crate::network::message::{
    consume_session_signal_keys, create_message, create_signal_key_messages, MessageParam,
    SessionParam, SignalKeyMessage,
};
use crate::storage::{category, MessageStatus, ParticipantSession, SenderKeyStatus, Storage};

/// Ensures per-device sessions and distributes sender keys.
pub struct SessionManager {
    storage: Arc<Storage>,
    signal: Arc<dyn SignalProtocol>,
    deliverer: Arc<Deliverer>,
    account: Account,
    max_conflict_retries: u32,
}

impl SessionManager {
    pub fn new(
        storage: Arc<Storage>,
        signal: Arc<dyn SignalProtocol>,
        deliverer: Arc<Deliverer>,
        account: Account,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            storage,
            signal,
            deliverer,
            account,
            max_conflict_retries,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn signal(&self) -> &Arc<dyn SignalProtocol> {
        &self.signal
    }

    pub fn deliverer(&self) -> &Arc<Deliverer> {
        &self.deliverer
    }

    /// Makes sure a session with the device exists.
    ///
    /// Fails with [`CourierError::CryptoSessionUnavailable`] when the server
    /// has no pre-key for it; nothing may be sent to that device then.
    pub fn check_signal_session(
        &self,
        recipient_id: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        let device = device_id(session_id);
        if self.signal.has_session(recipient_id, device) {
            return Ok(());
        }

        let keys = self.consume_keys(&[SessionParam::new(recipient_id, session_id)], cancel)?;
        let Some(key) = keys.first() else {
            debug!(recipient_id, "no pre-key available");
            return Err(CourierError::CryptoSessionUnavailable {
                user_id: recipient_id.to_string(),
                session_id: session_id.map(str::to_string),
            });
        };
        let bundle = create_pre_key_bundle(key)?;
        self.signal.process_session(recipient_id, &bundle, Some(device))?;
        debug!(recipient_id, device, "signal session established");
        Ok(())
    }

    /// Sends our sender key for `conversation_id` to one device.
    ///
    /// With `force` the key exchange runs even if a session exists. Records
    /// `Sent` on success and `Unknown` when the server has no pre-key.
    pub fn send_sender_key(
        &self,
        conversation_id: &str,
        recipient_id: &str,
        session_id: Option<&str>,
        force: bool,
        cancel: &CancellationToken,
    ) -> CourierResult<bool> {
        let device = device_id(session_id);
        let session_id = session_id.filter(|s| !s.is_empty());
        let mut force = force;

        for _ in 0..=self.max_conflict_retries {
            cancel.check()?;
            if force || !self.signal.has_session(recipient_id, device) {
                let keys =
                    self.consume_keys(&[SessionParam::new(recipient_id, session_id)], cancel)?;
                let Some(key) = keys.first() else {
                    if let Some(session_id) = session_id {
                        self.record_status(
                            conversation_id,
                            &[(recipient_id, session_id)],
                            SenderKeyStatus::Unknown,
                        )?;
                    }
                    return Ok(false);
                };
                let bundle = create_pre_key_bundle(key)?;
                self.signal
                    .process_session(recipient_id, &bundle, Some(device))?;
                force = false;
            }

            let ciphertext = match self
                .signal
                .encrypt_sender_key(conversation_id, recipient_id, device)
            {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    warn!(conversation_id, recipient_id, error = %e, "sender key encryption failed");
                    return Ok(false);
                }
            };

            let key_message = SignalKeyMessage::new(recipient_id, &ciphertext, session_id);
            let checksum = self.checksum(conversation_id)?;
            let request =
                create_signal_key_messages(conversation_id, &[key_message], checksum.as_deref());
            let result = self.deliverer.deliver_no_throw(&request, cancel)?;
            if result.retry {
                continue;
            }
            if result.success {
                if let Some(session_id) = session_id {
                    self.record_status(
                        conversation_id,
                        &[(recipient_id, session_id)],
                        SenderKeyStatus::Sent,
                    )?;
                }
            }
            return Ok(result.success);
        }

        Err(CourierError::ConsistencyConflict(conversation_id.to_string()))
    }

    /// Distributes our sender key to every device of a group conversation
    /// that has not confirmed it.
    ///
    /// Devices without a session are batched into a single pre-key request.
    /// All produced ciphertexts go out in one control message. A checksum
    /// conflict reconciles and starts over, at most `max_conflict_retries`
    /// times.
    pub fn check_session_sender_key(
        &self,
        conversation_id: &str,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        for round in 0..=self.max_conflict_retries {
            cancel.check()?;
            let pending = self
                .storage
                .unsent_participant_sessions(conversation_id, &self.account.session_id)?;
            if pending.is_empty() {
                return Ok(());
            }

            let mut missing: Vec<SessionParam> = Vec::new();
            let mut key_messages: Vec<SignalKeyMessage> = Vec::new();
            for p in &pending {
                let device = device_id(Some(&p.session_id));
                if !self.signal.has_session(&p.user_id, device) {
                    missing.push(SessionParam::new(&p.user_id, Some(&p.session_id)));
                    continue;
                }
                match self
                    .signal
                    .encrypt_sender_key(conversation_id, &p.user_id, device)
                {
                    Ok(ciphertext) => key_messages.push(SignalKeyMessage::new(
                        &p.user_id,
                        &ciphertext,
                        Some(&p.session_id),
                    )),
                    Err(_) => missing.push(SessionParam::new(&p.user_id, Some(&p.session_id))),
                }
            }

            if !missing.is_empty() {
                key_messages.extend(self.establish_batch(conversation_id, &missing, cancel)?);
            }
            if key_messages.is_empty() {
                return Ok(());
            }

            let checksum = self.checksum(conversation_id)?;
            let request =
                create_signal_key_messages(conversation_id, &key_messages, checksum.as_deref());
            let result = self.deliverer.deliver_no_throw(&request, cancel)?;
            if result.retry {
                debug!(conversation_id, round, "sender key fan-out reconciled, retrying");
                continue;
            }
            if result.success {
                let sent: Vec<(&str, &str)> = key_messages
                    .iter()
                    .filter_map(|m| Some((m.recipient_id.as_str(), m.session_id.as_deref()?)))
                    .collect();
                self.record_status(conversation_id, &sent, SenderKeyStatus::Sent)?;
                info!(conversation_id, devices = sent.len(), "sender key distributed");
            }
            return Ok(());
        }

        Err(CourierError::ConsistencyConflict(conversation_id.to_string()))
    }

    /// Tells a peer we could not decrypt its message.
    pub fn send_no_key_message(
        &self,
        conversation_id: &str,
        recipient_id: &str,
        cancel: &CancellationToken,
    ) -> CourierResult<()> {
        let plain = serde_json::to_vec(&serde_json::json!({ "action": "NO_KEY" }))?;
        let param = MessageParam {
            conversation_id: conversation_id.to_string(),
            recipient_id: Some(recipient_id.to_string()),
            message_id: uuid::Uuid::new_v4().to_string(),
            category: category::PLAIN_JSON.to_string(),
            data: STANDARD.encode(plain),
            status: MessageStatus::Sending.as_str().to_string(),
            session_id: None,
            conversation_checksum: None,
        };
        self.deliverer
            .deliver_no_throw(&create_message(&param)?, cancel)?;
        Ok(())
    }

    /// Checksum of the conversation's device sessions, `None` when unknown.
    pub fn checksum(&self, conversation_id: &str) -> CourierResult<Option<String>> {
        let sessions = self.storage.participant_sessions(conversation_id)?;
        if sessions.is_empty() {
            return Ok(None);
        }
        Ok(Some(conversation_checksum(
            sessions.iter().map(|s| s.session_id.as_str()),
        )))
    }

    /// Fetches pre-keys for `missing`, establishes sessions and encrypts the
    /// sender key for every device that got one. Devices left without a
    /// key are recorded as `Unknown`.
    fn establish_batch(
        &self,
        conversation_id: &str,
        missing: &[SessionParam],
        cancel: &CancellationToken,
    ) -> CourierResult<Vec<SignalKeyMessage>> {
        let request = consume_session_signal_keys(missing);
        let Some(data) = self.deliverer.signal_keys_channel(&request, cancel)? else {
            return Ok(Vec::new());
        };
        let keys = parse_keys(data)?;
        if keys.is_empty() {
            warn!(conversation_id, requested = missing.len(), "no group signal keys from server");
        }

        let mut messages = Vec::new();
        let mut established: HashSet<SessionParam> = HashSet::new();
        for key in &keys {
            let device = device_id(key.session_id.as_deref());
            let encrypted = create_pre_key_bundle(key)
                .and_then(|bundle| self.signal.process_session(&key.user_id, &bundle, Some(device)))
                .and_then(|_| {
                    self.signal
                        .encrypt_sender_key(conversation_id, &key.user_id, device)
                });
            match encrypted {
                Ok(ciphertext) => {
                    messages.push(SignalKeyMessage::new(
                        &key.user_id,
                        &ciphertext,
                        key.session_id.as_deref(),
                    ));
                    established.insert(SessionParam::new(&key.user_id, key.session_id.as_deref()));
                }
                Err(e) => warn!(user_id = %key.user_id, error = %e, "skipping unusable pre-key"),
            }
        }

        let no_key: Vec<(&str, &str)> = missing
            .iter()
            .filter(|p| !established.contains(*p))
            .filter_map(|p| Some((p.user_id.as_str(), p.session_id.as_deref()?)))
            .collect();
        if !no_key.is_empty() {
            self.record_status(conversation_id, &no_key, SenderKeyStatus::Unknown)?;
        }
        Ok(messages)
    }

    fn consume_keys(
        &self,
        sessions: &[SessionParam],
        cancel: &CancellationToken,
    ) -> CourierResult<Vec<SignalKey>> {
        let request = consume_session_signal_keys(sessions);
        match self.deliverer.signal_keys_channel(&request, cancel)? {
            Some(data) => parse_keys(data),
            None => Ok(Vec::new()),
        }
    }

    fn record_status(
        &self,
        conversation_id: &str,
        devices: &[(&str, &str)],
        status: SenderKeyStatus,
    ) -> CourierResult<()> {
        let rows: Vec<ParticipantSession> = devices
            .iter()
            .map(|(user_id, session_id)| {
                ParticipantSession::new(conversation_id, user_id, session_id).with_status(status)
            })
            .collect();
        self.storage.upsert_participant_sessions(&rows)?;
        Ok(())
    }
}

fn parse_keys(data: Value) -> CourierResult<Vec<SignalKey>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(data)?)
}
