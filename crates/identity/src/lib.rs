//! Identities, signatures and encryption for rockpool.
//!
//! A peer is identified by the pair of its Ed25519 verifying key (head
//! signatures) and its X25519 public key (sealed master keys). Bodies are
//! encrypted with ChaCha20-Poly1305 under the pool's symmetric master key.

pub mod cipher;
pub mod error;
pub mod key;
pub mod seal;

pub use cipher::BodyCipher;
pub use error::{IdentityError, IdentityResult};
pub use key::{Identity, Keychain, PeerId};
pub use seal::SealedKey;
