//! Per-recipient sealing of the pool master key.
//!
//! The access document grants the current master key to each active peer as
//! a sealed entry: X25519 with an ephemeral key against the recipient's
//! exchange key, HKDF-SHA256 to derive the wrapping key, ChaCha20-Poly1305
//! to wrap the master key itself.

use crate::cipher::BodyCipher;
use crate::error::{IdentityError, IdentityResult};
use crate::key::{Keychain, PeerId};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as ExchangeKey, StaticSecret};

const HKDF_INFO: &[u8] = b"rockpool-key-exchange-v1";

/// One sealed copy of the master key, addressed to a single peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedKey {
    /// Peer the key is sealed to.
    pub recipient: PeerId,
    /// Ephemeral X25519 public key used for this recipient.
    #[serde(with = "rockpool_core::b64")]
    pub ephemeral_pk: Vec<u8>,
    /// Wrapped master key, nonce prepended.
    #[serde(with = "rockpool_core::b64")]
    pub encrypted_key: Vec<u8>,
}

impl SealedKey {
    /// Seal a 32-byte master key for one recipient.
    pub fn seal(master_key: &[u8; 32], recipient: &PeerId) -> IdentityResult<Self> {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let ephemeral = StaticSecret::from(seed);
        let ephemeral_pk = ExchangeKey::from(&ephemeral);

        let shared = ephemeral.diffie_hellman(&recipient.exchange_key());
        let wrapping = derive_key(shared.as_bytes());

        let encrypted_key = BodyCipher::new(&wrapping).encrypt(master_key)?;

        Ok(Self {
            recipient: recipient.clone(),
            ephemeral_pk: ephemeral_pk.as_bytes().to_vec(),
            encrypted_key,
        })
    }

    /// Recover the master key with the recipient's keychain.
    pub fn unseal(&self, keychain: &Keychain) -> IdentityResult<[u8; 32]> {
        if self.recipient != keychain.peer_id() {
            return Err(IdentityError::NotAddressed);
        }

        let ephemeral_bytes: [u8; 32] = self
            .ephemeral_pk
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::Crypto("invalid ephemeral key length".to_string()))?;
        let ephemeral_pk = ExchangeKey::from(ephemeral_bytes);

        let shared = keychain.exchange_secret().diffie_hellman(&ephemeral_pk);
        let wrapping = derive_key(shared.as_bytes());

        let key = BodyCipher::new(&wrapping).decrypt(&self.encrypted_key)?;
        key.as_slice()
            .try_into()
            .map_err(|_| IdentityError::Crypto("unsealed key has wrong length".to_string()))
    }
}

fn derive_key(shared_secret: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut out)
        .expect("32-byte HKDF expand cannot fail");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal_roundtrip() {
        let recipient = Keychain::generate("bob");
        let master_key = BodyCipher::generate_key();

        let sealed = SealedKey::seal(&master_key, &recipient.peer_id()).unwrap();
        assert_eq!(sealed.unseal(&recipient).unwrap(), master_key);
    }

    #[test]
    fn test_unseal_wrong_recipient_fails() {
        let bob = Keychain::generate("bob");
        let eve = Keychain::generate("eve");
        let master_key = BodyCipher::generate_key();

        let sealed = SealedKey::seal(&master_key, &bob.peer_id()).unwrap();
        assert!(matches!(
            sealed.unseal(&eve),
            Err(IdentityError::NotAddressed)
        ));
    }

    #[test]
    fn test_sealed_key_serialization() {
        let bob = Keychain::generate("bob");
        let master_key = BodyCipher::generate_key();

        let sealed = SealedKey::seal(&master_key, &bob.peer_id()).unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        let back: SealedKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back.unseal(&bob).unwrap(), master_key);
    }
}
