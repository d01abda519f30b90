// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod encryption;
pub mod signal;

pub use encryption::{decrypt, encrypt, EncryptionError, SymmetricKey};
pub use signal::{
    create_pre_key_bundle, device_id, CryptoError, DeviceId, LocalSignalProtocol, OneTimePreKey,
    PreKeyBundle, SignalKey, SignalProtocol, DEFAULT_DEVICE_ID,
};

use ring::digest::{digest, SHA256};

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest(&SHA256, data).as_ref())
}

/// Checksum the server compares against its view of a conversation:
/// SHA-256 hex of the sorted, concatenated session ids.
pub fn conversation_checksum<I, S>(session_ids: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut ids: Vec<String> = session_ids
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    ids.sort();
    sha256_hex(ids.concat().as_bytes())
}
