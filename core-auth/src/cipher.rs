//! Token encryption at rest using AES-256-GCM.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::TokenCipher;
use std::fmt;

use crate::error::{AuthError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// [`TokenCipher`] backed by AES-256-GCM.
///
/// Each ciphertext is `base64(nonce || ciphertext || tag)` with a fresh
/// random 96-bit nonce, so encrypting the same token twice yields different
/// strings.
#[derive(Clone)]
pub struct AesGcmTokenCipher {
    cipher: Aes256Gcm,
}

impl AesGcmTokenCipher {
    /// Create a cipher from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(AuthError::Config(format!(
                "Invalid key length {}. Expected {} bytes for AES-256.",
                key.len(),
                KEY_LEN
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Create a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::Config(format!("Invalid base64 key: {}", e)))?;
        Self::new(&bytes)
    }

    /// Generate a random key, returned base64-encoded for the host's secret store.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        STANDARD.encode(key)
    }
}

impl TokenCipher for AesGcmTokenCipher {
    fn encrypt(&self, plaintext: &str) -> BridgeResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| BridgeError::CipherError(format!("Encryption failed: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> BridgeResult<String> {
        let data = STANDARD
            .decode(ciphertext)
            .map_err(|e| BridgeError::CipherError(format!("Invalid ciphertext encoding: {}", e)))?;

        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(BridgeError::CipherError(
                "Invalid ciphertext: too short".to_string(),
            ));
        }

        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| BridgeError::CipherError(format!("Decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| BridgeError::CipherError(format!("Decrypted token is not UTF-8: {}", e)))
    }
}

impl fmt::Debug for AesGcmTokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmTokenCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
