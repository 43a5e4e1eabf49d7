//! Invite tokens.
//!
//! A token is the base64 of a JSON document carrying the pool config, the
//! hosting peer's id and, optionally, the current master key sealed to the
//! invitee. Adding a pool from a token defines the config locally and
//! seeds trust in the host, so the first access document it signed is
//! accepted.

use crate::access::INCOGNITO_NICK;
use crate::error::{PoolError, PoolResult};
use crate::pool::Pool;
use rockpool_core::{AccessRecord, AccessState, KeyId, PoolConfig};
use rockpool_identity::{Keychain, PeerId, SealedKey};
use rockpool_index::models::IdentityRow;
use rockpool_index::{AccessRepo as _, IdentityRepo as _, KeyRepo as _, LocalIndex};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// Decoded invite token.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Pool config the invitee will define locally.
    pub config: PoolConfig,
    /// Peer id of the inviting host.
    pub host_id: String,
    /// Key generation of the sealed key, when one is included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<KeyId>,
    /// Current master key sealed to the invitee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_key: Option<SealedKey>,
}

impl Token {
    /// Encode as a base64 string.
    pub fn encode(&self) -> PoolResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(rockpool_core::b64::encode(&json))
    }

    /// Decode and validate a token string. Any defect, including an empty
    /// pool name or an empty transport list, is `InvalidToken`.
    pub fn decode(token: &str) -> PoolResult<Self> {
        let bytes = rockpool_core::b64::decode(token)
            .map_err(|e| PoolError::InvalidToken(format!("invalid base64: {e}")))?;
        let decoded: Token = serde_json::from_slice(&bytes)
            .map_err(|e| PoolError::InvalidToken(format!("malformed token: {e}")))?;
        decoded
            .config
            .validate()
            .map_err(|e| PoolError::InvalidToken(e.to_string()))?;
        PeerId::from_base64(&decoded.host_id)
            .map_err(|e| PoolError::InvalidToken(format!("invalid host id: {e}")))?;
        Ok(decoded)
    }
}

/// Define a pool from an invite token. Stores the config, trusts the host
/// and absorbs the sealed master key when the token carries one. Returns
/// the pool name, ready for [`Pool::open`].
pub async fn add_pool(
    index: &dyn LocalIndex,
    keychain: &Keychain,
    token: &str,
) -> PoolResult<String> {
    let token = Token::decode(token)?;
    let name = token.config.name.clone();

    crate::define(index, &token.config).await?;

    // The host introduced this pool; its signature on the access document
    // is trusted from the start.
    if index.get_identity(&token.host_id).await?.is_none() {
        index
            .set_identity(&IdentityRow {
                peer_id: token.host_id.clone(),
                nick: INCOGNITO_NICK.to_string(),
                added_on: OffsetDateTime::now_utc(),
            })
            .await?;
    }
    index
        .set_access(
            &name,
            &AccessRecord {
                id: token.host_id.clone(),
                state: AccessState::Active,
                mod_time: OffsetDateTime::now_utc(),
            },
        )
        .await?;

    if let (Some(key_id), Some(sealed)) = (token.key_id, &token.sealed_key) {
        match sealed.unseal(keychain) {
            Ok(key) => index.set_key(&name, key_id, &key).await?,
            Err(e) => warn!(pool = %name, error = %e, "token sealed key not for us"),
        }
    }

    Ok(name)
}

impl Pool {
    /// Mint an invite token for this pool, carrying the public transports
    /// only. When a recipient is given, the current master key travels
    /// sealed to it, so the invitee can read before the next access export
    /// reaches it.
    pub async fn invite(&self, recipient: Option<&PeerId>) -> PoolResult<String> {
        let config = PoolConfig {
            name: self.name.clone(),
            public: self.config.public.clone(),
            private: Vec::new(),
        };
        if config.public.is_empty() {
            return Err(PoolError::InvalidConfig(format!(
                "pool '{}' has no public transports to share",
                self.name
            )));
        }

        let mut token = Token {
            config,
            host_id: self.keychain.peer_id().to_base64(),
            key_id: None,
            sealed_key: None,
        };
        if let Some(recipient) = recipient {
            let master = self.master.read().await.clone();
            token.key_id = Some(master.id);
            token.sealed_key = Some(SealedKey::seal(&master.key, recipient)?);
        }
        token.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rockpool_core::ExchangeConfig;

    fn valid_token() -> Token {
        Token {
            config: PoolConfig {
                name: "team".to_string(),
                public: vec![ExchangeConfig::Memory { id: "x".to_string() }],
                private: vec![],
            },
            host_id: Keychain::generate("host").peer_id().to_base64(),
            key_id: None,
            sealed_key: None,
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let token = valid_token();
        let encoded = token.encode().unwrap();
        let decoded = Token::decode(&encoded).unwrap();
        assert_eq!(decoded.config, token.config);
        assert_eq!(decoded.host_id, token.host_id);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Token::decode(""),
            Err(PoolError::InvalidToken(_))
        ));
        assert!(matches!(
            Token::decode("not!!base64"),
            Err(PoolError::InvalidToken(_))
        ));
        let not_json = rockpool_core::b64::encode(b"plain text");
        assert!(matches!(
            Token::decode(&not_json),
            Err(PoolError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_name() {
        let mut token = valid_token();
        token.config.name = String::new();
        let encoded = token.encode().unwrap();
        assert!(matches!(
            Token::decode(&encoded),
            Err(PoolError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_transports() {
        let mut token = valid_token();
        token.config.public.clear();
        let encoded = token.encode().unwrap();
        assert!(matches!(
            Token::decode(&encoded),
            Err(PoolError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_host_id() {
        let mut token = valid_token();
        token.host_id = "nonsense".to_string();
        let encoded = token.encode().unwrap();
        assert!(matches!(
            Token::decode(&encoded),
            Err(PoolError::InvalidToken(_))
        ));
    }
}
