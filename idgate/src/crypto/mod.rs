//! Sealing provider access tokens at rest
//!
//! Tokens are encrypted with AES-256-GCM. The stored form is
//! `base64(nonce || ciphertext)` with a fresh 96-bit nonce per seal.

use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Token cipher errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Configured key is not base64 encoded 32 bytes
    #[error("encryption key must be base64 encoded 32 bytes: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("encryption error")]
    Encrypt,

    /// Ciphertext is malformed or was sealed with another key
    #[error("decryption error")]
    Decrypt,
}

/// AES-256-GCM cipher for provider tokens
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Arc<Aes256Gcm>,
}

impl TokenCipher {
    /// Create a cipher from a base64-encoded 32-byte key
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the key does not decode to 32 bytes
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CryptoError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64.trim().as_bytes())
            .map_err(|err| CryptoError::InvalidKey(err.to_string()))?;
        if key_bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} decoded bytes, got {}",
                key_bytes.len()
            )));
        }
        Self::from_bytes(&key_bytes)
    }

    /// Derive a key from a passphrase with SHA-256
    ///
    /// Used when no dedicated encryption key is configured.
    #[must_use]
    pub fn derive_from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Arc::new(Aes256Gcm::new(&digest)),
        }
    }

    fn from_bytes(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|err| CryptoError::InvalidKey(err.to_string()))?;
        Ok(Self {
            cipher: Arc::new(cipher),
        })
    }

    /// Seal a plaintext token
    ///
    /// # Errors
    ///
    /// Returns `Encrypt` if the AEAD operation fails
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Open a sealed token
    ///
    /// # Errors
    ///
    /// Returns `Decrypt` if the value is malformed, was tampered with or was
    /// sealed under a different key
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(sealed.as_bytes())
            .map_err(|_| CryptoError::Decrypt)?;
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce_bytes, cipher_bytes) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), cipher_bytes)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}
