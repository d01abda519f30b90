// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Frame Encoding
//!
//! A frame is the gzip-compressed JSON encoding of a [`WireMessage`].

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::error::NetworkError;
use super::message::WireMessage;

/// Upper bound on a decompressed frame.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Encodes a message into a compressed frame.
pub fn encode_frame(message: &WireMessage) -> Result<Vec<u8>, NetworkError> {
    let json = serde_json::to_vec(message)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| NetworkError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| NetworkError::Compression(e.to_string()))
}

/// Decompresses a frame and parses the message inside.
///
/// Returns [`NetworkError::Compression`] when the frame is not valid gzip so
/// callers can drop it with a warning.
pub fn decode_frame(frame: &[u8]) -> Result<WireMessage, NetworkError> {
    let mut json = Vec::new();
    GzDecoder::new(frame)
        .take(MAX_FRAME_SIZE as u64 + 1)
        .read_to_end(&mut json)
        .map_err(|e| NetworkError::Compression(e.to_string()))?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::InvalidMessage(format!(
            "Frame exceeds {} bytes",
            MAX_FRAME_SIZE
        )));
    }

    Ok(serde_json::from_slice(&json)?)
}
