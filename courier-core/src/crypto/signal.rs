// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signal Session Capability
//!
//! The delivery core treats per-device encryption as an opaque capability
//! ([`SignalProtocol`]): it only asks whether a session exists, establishes
//! one from a server-issued pre-key bundle, and encrypts sender keys and
//! payloads.
//!
//! [`LocalSignalProtocol`] is a compact reference implementation:
//! - Sessions are keyed by `(user_id, device_id)`; the session key is
//!   HKDF-SHA256 over `DH(ephemeral, pre_key) || DH(ephemeral, identity)`.
//! - The initiator attaches its ephemeral key and the pre-key id to every
//!   message until the peer answers, so the responder can derive the same key.
//! - Group payloads are encrypted under a per-conversation sender key that is
//!   distributed to each device over its pairwise session.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use ring::hkdf;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

use super::encryption::{decrypt, encrypt, EncryptionError, SymmetricKey};

/// Device number derived from a session id.
pub type DeviceId = u32;

/// Device used when a peer has no session id.
pub const DEFAULT_DEVICE_ID: DeviceId = 1;

const SESSION_INFO: &[u8] = b"courier-session-v1";

/// Crypto error types.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("No session with {user_id}:{device_id}")]
    NoSession { user_id: String, device_id: DeviceId },

    #[error("No sender key for conversation {0}")]
    NoSenderKey(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Unknown pre-key {0}")]
    UnknownPreKey(u32),

    #[error("Malformed cipher message: {0}")]
    Malformed(String),

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error(transparent)]
    Encryption(#[from] EncryptionError),
}

/// Maps a session id to its device id.
///
/// The 128 bits of the UUID are folded into 32; an absent or unparsable
/// session id maps to [`DEFAULT_DEVICE_ID`].
pub fn device_id(session_id: Option<&str>) -> DeviceId {
    let Some(uuid) = session_id
        .filter(|s| !s.is_empty())
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return DEFAULT_DEVICE_ID;
    };
    let (most, least) = uuid.as_u64_pair();
    let folded = most ^ least;
    ((folded >> 32) as u32) ^ (folded as u32)
}

/// A one-time pre-key as published by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKey {
    pub key_id: u32,
    /// Base64 X25519 public key.
    pub pub_key: String,
}

/// Pre-key material for one device, as returned by
/// `CONSUME_SESSION_SIGNAL_KEYS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalKey {
    pub user_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Base64 X25519 identity key.
    pub identity_key: String,
    pub pre_key: OneTimePreKey,
}

/// Decoded pre-key bundle ready for session establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub user_id: String,
    pub device_id: DeviceId,
    pub identity_key: [u8; 32],
    pub pre_key_id: u32,
    pub pre_key: [u8; 32],
}

/// Decodes a server key into a bundle.
pub fn create_pre_key_bundle(key: &SignalKey) -> Result<PreKeyBundle, CryptoError> {
    Ok(PreKeyBundle {
        user_id: key.user_id.clone(),
        device_id: device_id(key.session_id.as_deref()),
        identity_key: decode_key(&key.identity_key)?,
        pre_key_id: key.pre_key.key_id,
        pre_key: decode_key(&key.pre_key.pub_key)?,
    })
}

fn decode_key(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("expected 32 bytes".into()))
}

/// Opaque per-device encryption capability.
pub trait SignalProtocol: Send + Sync {
    fn has_session(&self, user_id: &str, device_id: DeviceId) -> bool;

    /// Establishes a session from a pre-key bundle. `device_id` overrides
    /// the device derived from the bundle.
    fn process_session(
        &self,
        user_id: &str,
        bundle: &PreKeyBundle,
        device_id: Option<DeviceId>,
    ) -> Result<(), CryptoError>;

    /// Encrypts our sender key for `conversation_id` to one device.
    fn encrypt_sender_key(
        &self,
        conversation_id: &str,
        user_id: &str,
        device_id: DeviceId,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Stores a sender key received from a peer device.
    fn process_sender_key(
        &self,
        conversation_id: &str,
        sender_id: &str,
        device_id: DeviceId,
        ciphertext: &[u8],
    ) -> Result<(), CryptoError>;

    fn encrypt_session(
        &self,
        user_id: &str,
        device_id: DeviceId,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_session(
        &self,
        user_id: &str,
        device_id: DeviceId,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn encrypt_group(&self, conversation_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt_group(
        &self,
        conversation_id: &str,
        sender_id: &str,
        device_id: DeviceId,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Serialize, Deserialize)]
struct CipherMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ephemeral_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_key_id: Option<u32>,
    body: String,
}

#[derive(Serialize, Deserialize)]
struct SenderKeyDistribution {
    conversation_id: String,
    key: String,
}

struct PairwiseSession {
    key: SymmetricKey,
    /// `(ephemeral public key, pre-key id)` sent until the peer replies.
    header: Option<([u8; 32], u32)>,
}

#[derive(Default)]
struct ProtocolState {
    pre_keys: HashMap<u32, StaticSecret>,
    next_pre_key_id: u32,
    sessions: HashMap<(String, DeviceId), PairwiseSession>,
    own_sender_keys: HashMap<String, SymmetricKey>,
    peer_sender_keys: HashMap<(String, String, DeviceId), SymmetricKey>,
}

/// Reference X25519 implementation of [`SignalProtocol`].
pub struct LocalSignalProtocol {
    identity: StaticSecret,
    state: Mutex<ProtocolState>,
}

impl LocalSignalProtocol {
    /// Creates a protocol instance with a fresh identity key.
    pub fn new() -> Self {
        LocalSignalProtocol {
            identity: StaticSecret::random_from_rng(OsRng),
            state: Mutex::new(ProtocolState {
                next_pre_key_id: 1,
                ..ProtocolState::default()
            }),
        }
    }

    pub fn identity_public_key(&self) -> [u8; 32] {
        PublicKey::from(&self.identity).to_bytes()
    }

    /// Generates a one-time pre-key and returns it in server form.
    pub fn signal_key(&self, user_id: &str, session_id: Option<&str>) -> SignalKey {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let mut state = self.state.lock();
        let key_id = state.next_pre_key_id;
        state.next_pre_key_id = state.next_pre_key_id.wrapping_add(1);
        state.pre_keys.insert(key_id, secret);

        SignalKey {
            user_id: user_id.to_string(),
            session_id: session_id.map(str::to_string),
            identity_key: STANDARD.encode(self.identity_public_key()),
            pre_key: OneTimePreKey {
                key_id,
                pub_key: STANDARD.encode(public.as_bytes()),
            },
        }
    }

    fn own_sender_key(state: &mut ProtocolState, conversation_id: &str) -> SymmetricKey {
        state
            .own_sender_keys
            .entry(conversation_id.to_string())
            .or_insert_with(SymmetricKey::generate)
            .clone()
    }
}

impl Default for LocalSignalProtocol {
    fn default() -> Self {
        Self::new()
    }
}

fn derive_session_key(first: &[u8; 32], second: &[u8; 32]) -> Result<SymmetricKey, CryptoError> {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(first);
    ikm[32..].copy_from_slice(second);

    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(&ikm);
    let info = [SESSION_INFO];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| CryptoError::KeyDerivation)?;
    let mut out = [0u8; 32];
    okm.fill(&mut out).map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SymmetricKey::from_bytes(out))
}

impl SignalProtocol for LocalSignalProtocol {
    fn has_session(&self, user_id: &str, device_id: DeviceId) -> bool {
        self.state
            .lock()
            .sessions
            .contains_key(&(user_id.to_string(), device_id))
    }

    fn process_session(
        &self,
        user_id: &str,
        bundle: &PreKeyBundle,
        device_id: Option<DeviceId>,
    ) -> Result<(), CryptoError> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let dh_pre = ephemeral.diffie_hellman(&PublicKey::from(bundle.pre_key));
        let dh_identity = ephemeral.diffie_hellman(&PublicKey::from(bundle.identity_key));
        let key = derive_session_key(dh_pre.as_bytes(), dh_identity.as_bytes())?;

        let device = device_id.unwrap_or(bundle.device_id);
        self.state.lock().sessions.insert(
            (user_id.to_string(), device),
            PairwiseSession {
                key,
                header: Some((PublicKey::from(&ephemeral).to_bytes(), bundle.pre_key_id)),
            },
        );
        Ok(())
    }

    fn encrypt_sender_key(
        &self,
        conversation_id: &str,
        user_id: &str,
        device_id: DeviceId,
    ) -> Result<Vec<u8>, CryptoError> {
        let sender_key = {
            let mut state = self.state.lock();
            Self::own_sender_key(&mut state, conversation_id)
        };
        let distribution = SenderKeyDistribution {
            conversation_id: conversation_id.to_string(),
            key: STANDARD.encode(sender_key.as_bytes()),
        };
        let plaintext = serde_json::to_vec(&distribution)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        self.encrypt_session(user_id, device_id, &plaintext)
    }

    fn process_sender_key(
        &self,
        conversation_id: &str,
        sender_id: &str,
        device_id: DeviceId,
        ciphertext: &[u8],
    ) -> Result<(), CryptoError> {
        let plaintext = self.decrypt_session(sender_id, device_id, ciphertext)?;
        let distribution: SenderKeyDistribution = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        if distribution.conversation_id != conversation_id {
            return Err(CryptoError::Malformed("sender key for another conversation".into()));
        }
        let key = SymmetricKey::from_bytes(decode_key(&distribution.key)?);
        self.state.lock().peer_sender_keys.insert(
            (conversation_id.to_string(), sender_id.to_string(), device_id),
            key,
        );
        Ok(())
    }

    fn encrypt_session(
        &self,
        user_id: &str,
        device_id: DeviceId,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let state = self.state.lock();
        let session = state
            .sessions
            .get(&(user_id.to_string(), device_id))
            .ok_or_else(|| CryptoError::NoSession {
                user_id: user_id.to_string(),
                device_id,
            })?;

        let message = CipherMessage {
            ephemeral_key: session.header.map(|(eph, _)| STANDARD.encode(eph)),
            pre_key_id: session.header.map(|(_, id)| id),
            body: STANDARD.encode(encrypt(&session.key, plaintext)?),
        };
        serde_json::to_vec(&message).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    fn decrypt_session(
        &self,
        user_id: &str,
        device_id: DeviceId,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let message: CipherMessage = serde_json::from_slice(ciphertext)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        let body = STANDARD
            .decode(&message.body)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;

        let mut state = self.state.lock();
        let peer = (user_id.to_string(), device_id);

        if let (Some(eph), Some(pre_key_id)) = (&message.ephemeral_key, message.pre_key_id) {
            let ephemeral = PublicKey::from(decode_key(eph)?);
            let pre_key = state
                .pre_keys
                .get(&pre_key_id)
                .ok_or(CryptoError::UnknownPreKey(pre_key_id))?;
            let dh_pre = pre_key.diffie_hellman(&ephemeral);
            let dh_identity = self.identity.diffie_hellman(&ephemeral);
            let key = derive_session_key(dh_pre.as_bytes(), dh_identity.as_bytes())?;
            let plaintext = decrypt(&key, &body)?;
            state
                .sessions
                .insert(peer, PairwiseSession { key, header: None });
            return Ok(plaintext);
        }

        let session = state.sessions.get_mut(&peer).ok_or(CryptoError::NoSession {
            user_id: user_id.to_string(),
            device_id,
        })?;
        let plaintext = decrypt(&session.key, &body)?;
        // The peer answered over the established session.
        session.header = None;
        Ok(plaintext)
    }

    fn encrypt_group(&self, conversation_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = {
            let mut state = self.state.lock();
            Self::own_sender_key(&mut state, conversation_id)
        };
        Ok(encrypt(&key, plaintext)?)
    }

    fn decrypt_group(
        &self,
        conversation_id: &str,
        sender_id: &str,
        device_id: DeviceId,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let state = self.state.lock();
        let key = state
            .peer_sender_keys
            .get(&(conversation_id.to_string(), sender_id.to_string(), device_id))
            .ok_or_else(|| CryptoError::NoSenderKey(conversation_id.to_string()))?;
        Ok(decrypt(key, ciphertext)?)
    }
}
