//! Peer identities and head signing.

use crate::error::{IdentityError, IdentityResult};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey as ExchangeKey, StaticSecret};

/// Public identifier of a peer: its Ed25519 verifying key followed by its
/// X25519 public key, base64-encoded.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerId {
    sign: [u8; 32],
    exchange: [u8; 32],
}

impl PeerId {
    /// Parse from the base64 string form.
    pub fn from_base64(s: &str) -> IdentityResult<Self> {
        let bytes = rockpool_core::b64::decode(s)
            .map_err(|e| IdentityError::InvalidPeerId(format!("invalid base64: {e}")))?;
        if bytes.len() != 64 {
            return Err(IdentityError::InvalidPeerId(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut sign = [0u8; 32];
        let mut exchange = [0u8; 32];
        sign.copy_from_slice(&bytes[..32]);
        exchange.copy_from_slice(&bytes[32..]);

        // Reject ids whose signing half is not a valid curve point up front.
        VerifyingKey::from_bytes(&sign)
            .map_err(|e| IdentityError::InvalidPeerId(format!("invalid signing key: {e}")))?;

        Ok(Self { sign, exchange })
    }

    /// Encode as the base64 string form.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&self.sign);
        bytes.extend_from_slice(&self.exchange);
        rockpool_core::b64::encode(&bytes)
    }

    /// The Ed25519 verifying key.
    pub fn verifying_key(&self) -> IdentityResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.sign)
            .map_err(|e| IdentityError::InvalidPeerId(format!("invalid signing key: {e}")))
    }

    /// The X25519 public key sealed master keys are addressed to.
    pub fn exchange_key(&self) -> ExchangeKey {
        ExchangeKey::from(self.exchange)
    }

    /// Verify an Ed25519 signature made by this peer.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> IdentityResult<()> {
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| IdentityError::InvalidSignature(format!(
                "expected 64 bytes, got {}",
                signature.len()
            )))?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        self.verifying_key()?
            .verify(message, &signature)
            .map_err(|_| IdentityError::VerificationFailed)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = self.to_base64();
        write!(f, "PeerId({}...)", &b64[..8])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> IdentityResult<Self> {
        Self::from_base64(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Public identity of a peer: its id plus a locally trusted nickname.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: PeerId,
    pub nick: String,
}

/// A peer's own keys: the signing and key-exchange secrets behind a
/// [`PeerId`].
pub struct Keychain {
    nick: String,
    signing: SigningKey,
    exchange: StaticSecret,
}

impl Keychain {
    /// Generate a fresh keychain.
    pub fn generate(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            signing: SigningKey::generate(&mut OsRng),
            exchange: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// The public peer id.
    pub fn peer_id(&self) -> PeerId {
        PeerId {
            sign: self.signing.verifying_key().to_bytes(),
            exchange: ExchangeKey::from(&self.exchange).to_bytes(),
        }
    }

    /// The public identity.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.peer_id(),
            nick: self.nick.clone(),
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Sign a message with the Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }

    pub(crate) fn exchange_secret(&self) -> &StaticSecret {
        &self.exchange
    }

    /// Encode the secret material as base64: signing secret followed by
    /// exchange secret, 64 bytes total.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.signing.as_bytes());
        bytes.extend_from_slice(self.exchange.as_bytes());
        rockpool_core::b64::encode(&bytes)
    }

    /// Decode from the base64 secret form.
    pub fn from_base64(nick: impl Into<String>, s: &str) -> IdentityResult<Self> {
        let bytes = rockpool_core::b64::decode(s)
            .map_err(|e| IdentityError::InvalidPeerId(format!("invalid base64: {e}")))?;
        if bytes.len() != 64 {
            return Err(IdentityError::InvalidPeerId(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let signing_bytes: [u8; 32] = bytes[..32].try_into().expect("checked length");
        let exchange_bytes: [u8; 32] = bytes[32..].try_into().expect("checked length");
        Ok(Self {
            nick: nick.into(),
            signing: SigningKey::from_bytes(&signing_bytes),
            exchange: StaticSecret::from(exchange_bytes),
        })
    }
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("nick", &self.nick)
            .field("id", &self.peer_id())
            .finish()
    }
}
