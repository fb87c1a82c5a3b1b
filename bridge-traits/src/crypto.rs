//! Token-at-rest encryption contract.

use crate::error::Result;

/// Opaque encrypt/decrypt pair used to protect tokens stored inside sessions.
///
/// Ciphertexts are strings so they can live in any serialized session format.
/// `decrypt(encrypt(x)) == x` must hold for every key the implementation
/// accepts; any tampering or key mismatch is an error, never garbage output.
pub trait TokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}
