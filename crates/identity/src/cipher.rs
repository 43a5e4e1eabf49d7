//! Symmetric body encryption with ChaCha20-Poly1305.
//!
//! Wire format: `[nonce (12 bytes)] || [ciphertext || tag (16 bytes)]`.

use crate::error::{IdentityError, IdentityResult};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand_core::{OsRng, RngCore};

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// AEAD cipher bound to one master-key generation.
pub struct BodyCipher {
    cipher: ChaCha20Poly1305,
}

impl BodyCipher {
    /// Create a cipher from a 32-byte symmetric key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a fresh random 32-byte key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt with a fresh random nonce, prepended to the output.
    pub fn encrypt(&self, plaintext: &[u8]) -> IdentityResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| IdentityError::Crypto(format!("encryption failed: {e}")))?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data carrying its nonce in the first 12 bytes.
    pub fn decrypt(&self, data: &[u8]) -> IdentityResult<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            return Err(IdentityError::Crypto(
                "data too short to contain nonce".to_string(),
            ));
        }
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|e| IdentityError::Crypto(format!("decryption failed: {e}")))
    }
}
