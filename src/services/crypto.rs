//! Encryption-at-rest codec for provider tokens.
//!
//! AES-256-GCM with a fresh random 12-byte nonce per call. The envelope is
//! `v1.<nonce-b64>.<ciphertext+tag-b64>` (URL-safe base64, no padding), so
//! every encryption of the same plaintext yields a different value and the
//! format is self-describing.
//!
//! Without a configured key the codec passes values through unchanged, and
//! `decrypt` accepts legacy plaintext transparently: anything that does not
//! parse as a well-formed envelope is returned as-is. A well-formed envelope
//! that fails authentication is a hard error.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

use crate::services::ServiceError;

const ENVELOPE_VERSION: &str = "v1";
/// Nonce size for AES-256-GCM (12 bytes).
const NONCE_SIZE: usize = 12;
/// AES-256 key size (32 bytes).
const KEY_SIZE: usize = 32;
/// GCM tag size (16 bytes).
const TAG_SIZE: usize = 16;

/// Symmetric codec for values persisted in TEXT columns.
#[derive(Clone)]
pub struct TokenCipher {
    key: Option<[u8; KEY_SIZE]>,
}

impl TokenCipher {
    /// Build a cipher from a hex-encoded 32-byte key.
    pub fn new(hex_key: &str) -> Result<Self, ServiceError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| ServiceError::Crypto(format!("Invalid encryption key hex: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            ServiceError::Crypto(format!(
                "Encryption key must be {} bytes ({} hex characters)",
                KEY_SIZE,
                KEY_SIZE * 2
            ))
        })?;
        Ok(Self { key: Some(key) })
    }

    /// Build a pass-through codec (no key configured). Stored values stay in
    /// clear text; the caller is responsible for warning loudly about it.
    pub fn passthrough() -> Self {
        Self { key: None }
    }

    pub fn is_passthrough(&self) -> bool {
        self.key.is_none()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, ServiceError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| ServiceError::Crypto(format!("Key init failed: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ServiceError::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(format!(
            "{}.{}.{}",
            ENVELOPE_VERSION,
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(&ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, ServiceError> {
        let Some((nonce_bytes, ciphertext)) = parse_envelope(stored) else {
            // Legacy plaintext carve-out: values written before a key was
            // configured come back unchanged.
            return Ok(stored.to_string());
        };

        let Some(key) = &self.key else {
            return Ok(stored.to_string());
        };

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| ServiceError::Crypto(format!("Key init failed: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| ServiceError::Crypto("Token decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| ServiceError::Crypto(format!("UTF-8 decode failed: {}", e)))
    }
}

/// Sniff a stored value. Returns the nonce and ciphertext only when the value
/// has exactly three delimited segments with the expected version tag and
/// segment lengths; anything else is treated as legacy plaintext.
fn parse_envelope(stored: &str) -> Option<([u8; NONCE_SIZE], Vec<u8>)> {
    let mut parts = stored.split('.');
    let version = parts.next()?;
    let nonce_b64 = parts.next()?;
    let ct_b64 = parts.next()?;
    if parts.next().is_some() || version != ENVELOPE_VERSION {
        return None;
    }

    let nonce: [u8; NONCE_SIZE] = URL_SAFE_NO_PAD.decode(nonce_b64).ok()?.try_into().ok()?;
    let ciphertext = URL_SAFE_NO_PAD.decode(ct_b64).ok()?;
    if ciphertext.len() < TAG_SIZE {
        return None;
    }
    Some((nonce, ciphertext))
}
