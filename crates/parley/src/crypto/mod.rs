//! Message content encryption.
//!
//! Chat messages are encrypted before they reach the database and decrypted
//! after retrieval. The live fan-out path never goes through this module;
//! it forwards the in-memory plaintext it received.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};

/// Length of the AES-GCM nonce prepended to every ciphertext.
const NONCE_LEN: usize = 12;

/// Symmetric encrypt/decrypt capability applied to message bodies at rest.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM cipher keyed from a configured secret.
///
/// Each encryption uses a fresh random 96-bit nonce, prepended to the
/// ciphertext so decryption needs no external state.
pub struct MessageCipher {
    key: [u8; 32],
}

impl MessageCipher {
    /// Derive the 256-bit key from an arbitrary secret string.
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

impl Cipher for MessageCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|err| anyhow!("encrypting message body: {err}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return Err(anyhow!("ciphertext shorter than its nonce"));
        }

        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|err| anyhow!("decrypting message body: {err}"))
    }
}
