// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Streaming attachment encryption.
//!
//! Layout: `nonce_prefix (19 bytes) || chunk_0 || ... || chunk_n`, where each
//! chunk is up to 64 KiB of plaintext sealed with XChaCha20-Poly1305 in the
//! STREAM construction (32-bit big-endian counter, last-chunk flag). An
//! empty file still produces one sealed, empty last chunk.
//!
//! The ciphertext length is known from the plaintext length alone, so the
//! upload can announce an exact `Content-Length` before streaming.

use std::io::{self, Read};
use std::sync::Arc;

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::aead::KeyInit;
use chacha20poly1305::XChaCha20Poly1305;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::digest::{Context, SHA256};

use super::UploadError;
use crate::crypto::SymmetricKey;

/// Length of the STREAM nonce prefix for XChaCha20 (24 - 5 bytes).
pub const NONCE_PREFIX_LEN: usize = 19;
/// Plaintext bytes per sealed chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Poly1305 tag per chunk.
pub const TAG_LEN: usize = 16;

/// Exact encrypted size for `plaintext_len` bytes.
pub fn ciphertext_length(plaintext_len: u64) -> u64 {
    let chunks = plaintext_len.div_ceil(CHUNK_SIZE as u64).max(1);
    NONCE_PREFIX_LEN as u64 + plaintext_len + chunks * TAG_LEN as u64
}

/// Shared slot receiving the SHA-256 of the ciphertext once the stream ends.
#[derive(Debug, Clone, Default)]
pub struct DigestHandle(Arc<Mutex<Option<Vec<u8>>>>);

impl DigestHandle {
    /// The digest, available after the last byte was read.
    pub fn get(&self) -> Option<Vec<u8>> {
        self.0.lock().clone()
    }
}

/// Encrypts a plaintext reader on the fly.
pub struct EncryptingReader<R> {
    inner: R,
    encryptor: Option<EncryptorBE32<XChaCha20Poly1305>>,
    remaining: u64,
    buffer: Vec<u8>,
    pos: usize,
    digest: Option<Context>,
    slot: DigestHandle,
}

impl<R: Read> EncryptingReader<R> {
    /// Wraps `inner`, which must yield exactly `plaintext_len` bytes.
    pub fn new(inner: R, key: &SymmetricKey, plaintext_len: u64) -> (Self, DigestHandle) {
        let mut prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut prefix);

        let aead = XChaCha20Poly1305::new(key.as_bytes().into());
        let encryptor = EncryptorBE32::from_aead(aead, GenericArray::from_slice(&prefix));

        let mut digest = Context::new(&SHA256);
        digest.update(&prefix);

        let slot = DigestHandle::default();
        let reader = EncryptingReader {
            inner,
            encryptor: Some(encryptor),
            remaining: plaintext_len,
            buffer: prefix.to_vec(),
            pos: 0,
            digest: Some(digest),
            slot: slot.clone(),
        };
        (reader, slot)
    }

    fn refill(&mut self) -> io::Result<()> {
        let Some(mut encryptor) = self.encryptor.take() else {
            return Ok(());
        };

        let take = self.remaining.min(CHUNK_SIZE as u64) as usize;
        let mut chunk = vec![0u8; take];
        self.inner.read_exact(&mut chunk)?;
        self.remaining -= take as u64;

        let sealed = if self.remaining == 0 {
            encryptor.encrypt_last(chunk.as_slice())
        } else {
            let sealed = encryptor.encrypt_next(chunk.as_slice());
            self.encryptor = Some(encryptor);
            sealed
        }
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "attachment encryption failed"))?;

        if let Some(digest) = self.digest.as_mut() {
            digest.update(&sealed);
        }
        self.buffer = sealed;
        self.pos = 0;
        Ok(())
    }

    fn finish_digest(&mut self) {
        if let Some(digest) = self.digest.take() {
            *self.slot.0.lock() = Some(digest.finish().as_ref().to_vec());
        }
    }
}

impl<R: Read> Read for EncryptingReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buffer.len() {
            if self.encryptor.is_none() {
                self.finish_digest();
                return Ok(0);
            }
            self.refill()?;
        }
        let n = (self.buffer.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        if self.pos >= self.buffer.len() && self.encryptor.is_none() {
            self.finish_digest();
        }
        Ok(n)
    }
}

/// Decrypts a complete encrypted attachment.
pub fn decrypt_attachment(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, UploadError> {
    if data.len() < NONCE_PREFIX_LEN + TAG_LEN {
        return Err(UploadError::Crypto("attachment too short".into()));
    }
    let (prefix, body) = data.split_at(NONCE_PREFIX_LEN);
    let aead = XChaCha20Poly1305::new(key.as_bytes().into());
    let mut decryptor = DecryptorBE32::from_aead(aead, GenericArray::from_slice(prefix));

    let sealed_chunk = CHUNK_SIZE + TAG_LEN;
    let mut plaintext = Vec::with_capacity(body.len());
    let mut rest = body;
    while rest.len() > sealed_chunk {
        let (chunk, tail) = rest.split_at(sealed_chunk);
        let opened = decryptor
            .decrypt_next(chunk)
            .map_err(|_| UploadError::Crypto("chunk authentication failed".into()))?;
        plaintext.extend_from_slice(&opened);
        rest = tail;
    }
    let last = decryptor
        .decrypt_last(rest)
        .map_err(|_| UploadError::Crypto("final chunk authentication failed".into()))?;
    plaintext.extend_from_slice(&last);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_all(data: &[u8], key: &SymmetricKey) -> (Vec<u8>, DigestHandle) {
        let (mut reader, digest) = EncryptingReader::new(data, key, data.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        (out, digest)
    }

    #[test]
    fn test_length_matches_formula() {
        let key = SymmetricKey::generate();
        for len in [0usize, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE] {
            let data = vec![0xA5u8; len];
            let (out, _) = encrypt_all(&data, &key);
            assert_eq!(out.len() as u64, ciphertext_length(len as u64), "len {len}");
        }
    }

    #[test]
    fn test_decrypt_restores_plaintext_across_chunks() {
        let key = SymmetricKey::generate();
        let data: Vec<u8> = (0..(2 * CHUNK_SIZE + 17)).map(|i| i as u8).collect();
        let (out, _) = encrypt_all(&data, &key);
        assert_eq!(decrypt_attachment(&key, &out).unwrap(), data);
    }

    #[test]
    fn test_digest_covers_ciphertext() {
        let key = SymmetricKey::generate();
        let (out, digest) = encrypt_all(b"attachment", &key);
        let expected = ring::digest::digest(&SHA256, &out);
        assert_eq!(digest.get().unwrap(), expected.as_ref());
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let key = SymmetricKey::generate();
        let data = vec![1u8; CHUNK_SIZE + 10];
        let (out, _) = encrypt_all(&data, &key);
        // Dropping the final chunk makes the first one look like the last.
        assert!(decrypt_attachment(&key, &out[..NONCE_PREFIX_LEN + CHUNK_SIZE + TAG_LEN]).is_err());
    }
}
