//! Access ledger records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Membership state of a peer in a pool.
///
/// Only `Active` peers' signatures are accepted for new entries. Revoking a
/// peer keeps its prior entries readable but rejects anything it signs
/// afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessState {
    Active,
    Revoked,
    Pending,
}

impl AccessState {
    /// Parse from the stored string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "pending" => Ok(Self::Pending),
            _ => Err(crate::Error::InvalidConfig(format!(
                "unknown access state: {s}"
            ))),
        }
    }

    /// Get the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Pending => "pending",
        }
    }
}

/// One row of the access ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRecord {
    /// Peer id the record applies to.
    pub id: String,
    /// Membership state.
    pub state: AccessState,
    /// When the state was set; the larger mod time wins on merge.
    #[serde(with = "time::serde::rfc3339")]
    pub mod_time: OffsetDateTime,
}

impl AccessRecord {
    /// Merge rule for concurrent updates: keep the record with the larger
    /// mod time.
    pub fn supersedes(&self, other: &AccessRecord) -> bool {
        self.mod_time > other.mod_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_state_roundtrip() {
        for state in [AccessState::Active, AccessState::Revoked, AccessState::Pending] {
            assert_eq!(AccessState::parse(state.as_str()).unwrap(), state);
        }
        assert!(AccessState::parse("banned").is_err());
    }

    #[test]
    fn test_supersedes() {
        let older = AccessRecord {
            id: "a".to_string(),
            state: AccessState::Active,
            mod_time: datetime!(2024-01-01 0:00 UTC),
        };
        let newer = AccessRecord {
            id: "a".to_string(),
            state: AccessState::Revoked,
            mod_time: datetime!(2024-02-01 0:00 UTC),
        };
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
    }
}
