//! Stream encryption for backup objects.
//!
//! Plaintext is split into 64 KiB frames, each sealed with AES-256-GCM under a
//! fresh random nonce. Layout:
//!
//! ```text
//! "M4E1" | frame* ;  frame = nonce (12) | ciphertext length (u32 BE) | ciphertext
//! ```
//!
//! Each frame's associated data is its index (u64 BE) followed by a flag byte
//! set only on the last frame, so reordering, dropping or truncating frames
//! fails authentication.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Leading bytes of every encrypted object.
pub const MAGIC: &[u8; 4] = b"M4E1";
/// Plaintext bytes per frame.
pub const FRAME_SIZE: usize = 64 * 1024;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const LEN_PREFIX: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("{0}")]
    InvalidKey(String),
    #[error("AES-GCM sealing failed")]
    Seal,
    #[error("Frame {0} failed authentication")]
    Open(u64),
    #[error("Not an encrypted backup object")]
    BadMagic,
    #[error("Truncated frame at byte {0}")]
    Truncated(usize),
}

/// Encrypts serialized windows with a user's key.
#[derive(Clone)]
pub struct StreamEncryptor {
    cipher: Aes256Gcm,
}

impl fmt::Debug for StreamEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamEncryptor(<key>)")
    }
}

fn frame_aad(index: u64, last: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8] = u8::from(last);
    aad
}

impl StreamEncryptor {
    /// Build an encryptor from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("key is not base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Build an encryptor from raw key bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(bytes)
            .map_err(|_| CryptoError::InvalidKey("unusable key length".to_string()))?;
        Ok(Self { cipher })
    }

    /// A fresh random key, base64-encoded.
    pub fn generate_key() -> String {
        let key: [u8; KEY_LEN] = rand::random();
        STANDARD.encode(key)
    }

    /// Encrypt `plaintext` into the framed format. Empty input yields a
    /// single empty final frame.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let frames = plaintext.len().div_ceil(FRAME_SIZE).max(1);
        let mut out = Vec::with_capacity(
            MAGIC.len() + plaintext.len() + frames * (NONCE_LEN + LEN_PREFIX + 16),
        );
        out.extend_from_slice(MAGIC);

        for index in 0..frames {
            let start = index * FRAME_SIZE;
            let end = (start + FRAME_SIZE).min(plaintext.len());
            let chunk = &plaintext[start.min(end)..end];
            let aad = frame_aad(index as u64, index + 1 == frames);

            let nonce: [u8; NONCE_LEN] = rand::random();
            let sealed = self
                .cipher
                .encrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: chunk,
                        aad: &aad,
                    },
                )
                .map_err(|_| CryptoError::Seal)?;

            out.extend_from_slice(&nonce);
            out.extend_from_slice(&(sealed.len() as u32).to_be_bytes());
            out.extend_from_slice(&sealed);
        }

        Ok(out)
    }

    /// Decrypt an object produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let body = data.strip_prefix(MAGIC.as_slice()).ok_or(CryptoError::BadMagic)?;
        let mut plaintext = Vec::with_capacity(body.len());
        let mut pos = 0;
        let mut index = 0u64;

        while pos < body.len() {
            let header_end = pos + NONCE_LEN + LEN_PREFIX;
            let header = body
                .get(pos..header_end)
                .ok_or(CryptoError::Truncated(MAGIC.len() + pos))?;
            let (nonce, len) = header.split_at(NONCE_LEN);
            let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
            let sealed = body
                .get(header_end..header_end + len)
                .ok_or(CryptoError::Truncated(MAGIC.len() + header_end))?;

            let next = header_end + len;
            let aad = frame_aad(index, next == body.len());
            let opened = self
                .cipher
                .decrypt(
                    Nonce::from_slice(nonce),
                    Payload {
                        msg: sealed,
                        aad: &aad,
                    },
                )
                .map_err(|_| CryptoError::Open(index))?;
            plaintext.extend_from_slice(&opened);

            pos = next;
            index += 1;
        }

        if index == 0 {
            return Err(CryptoError::Truncated(MAGIC.len()));
        }
        Ok(plaintext)
    }
}
