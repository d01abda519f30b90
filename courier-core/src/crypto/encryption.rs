// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message body sealing.
//!
//! A sealed body is `version (1) || nonce (24) || ciphertext || tag (16)`,
//! encrypted in place with XChaCha20-Poly1305. Signal sessions and sender
//! keys both seal through here; attachments use the chunked stream in
//! `attachment::cipher` instead.

use chacha20poly1305::aead::{AeadCore, AeadInPlace, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("sealing failed")]
    SealFailed,
    #[error("authentication failed")]
    OpenFailed,
    #[error("sealed body is {0} bytes, shorter than the envelope")]
    Truncated(usize),
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
}

const ENVELOPE_VERSION: u8 = 0x01;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// Bytes a sealed body adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = HEADER_LEN + TAG_LEN;

/// 256-bit key for sessions, sender keys and attachments.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        SymmetricKey(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SymmetricKey(bytes)
    }

    /// Key stored as a blob, e.g. a transcript row's `media_key`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(SymmetricKey)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn aead(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(self.0.as_ref().into())
    }
}

/// Seals `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut sealed = Vec::with_capacity(plaintext.len() + SEAL_OVERHEAD);
    sealed.push(ENVELOPE_VERSION);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(plaintext);

    let tag = key
        .aead()
        .encrypt_in_place_detached(&nonce, &[], &mut sealed[HEADER_LEN..])
        .map_err(|_| EncryptionError::SealFailed)?;
    sealed.extend_from_slice(&tag);
    Ok(sealed)
}

/// Opens a body produced by [`encrypt`].
pub fn decrypt(key: &SymmetricKey, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(EncryptionError::Truncated(sealed.len()));
    }
    if sealed[0] != ENVELOPE_VERSION {
        return Err(EncryptionError::UnsupportedVersion(sealed[0]));
    }

    let nonce = XNonce::from_slice(&sealed[1..HEADER_LEN]);
    let mut body = sealed[HEADER_LEN..].to_vec();
    key.aead()
        .decrypt_in_place(nonce, &[], &mut body)
        .map_err(|_| EncryptionError::OpenFailed)?;
    Ok(body)
}
