//! Pool and exchange configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Transport backend configuration, tagged by scheme.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExchangeConfig {
    /// Shared filesystem (local disk, NFS/SMB mount).
    File {
        /// Root directory of the exchange.
        path: PathBuf,
    },
    /// In-process shared memory. Exchangers created with the same id share
    /// one store; used for tests and embedding.
    Memory {
        /// Registry key of the shared store.
        id: String,
    },
}

/// Persisted description of a pool: its name plus the transports it
/// replicates through. `public` transports go into invite tokens verbatim;
/// `private` ones stay on this host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub name: String,
    #[serde(default)]
    pub public: Vec<ExchangeConfig>,
    #[serde(default)]
    pub private: Vec<ExchangeConfig>,
}

impl PoolConfig {
    /// All transports, public first. The first reachable one becomes the
    /// primary exchange.
    pub fn exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.public.iter().chain(self.private.iter())
    }

    /// Validate the invariants every config must hold: a non-empty name and
    /// at least one transport.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(crate::Error::InvalidConfig("missing pool name".to_string()));
        }
        if self.public.is_empty() && self.private.is_empty() {
            return Err(crate::Error::InvalidConfig(format!(
                "pool '{}' has no transports",
                self.name
            )));
        }
        Ok(())
    }
}

const SEVEN_DAYS: Duration = Duration::days(7);

/// Per-pool tunables, passed explicitly to create/open.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOptions {
    /// Retention horizon. Clamped to at least 7 days.
    #[serde(default = "default_life_span_days")]
    pub life_span_days: u32,
    /// Minimum interval between cross-exchange replica passes, in seconds.
    #[serde(default = "default_replica_period_secs")]
    pub replica_period_secs: u64,
    /// Body cache budget in megabytes.
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: usize,
    /// Application (library) hint; not used by the core.
    #[serde(default = "default_hash_chain_max_length")]
    pub hash_chain_max_length: u32,
    /// Skip the already-exists check on create.
    #[serde(default)]
    pub force_creation: bool,
}

fn default_life_span_days() -> u32 {
    30
}

fn default_replica_period_secs() -> u64 {
    3600
}

fn default_cache_size_mb() -> usize {
    16
}

fn default_hash_chain_max_length() -> u32 {
    32
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            life_span_days: default_life_span_days(),
            replica_period_secs: default_replica_period_secs(),
            cache_size_mb: default_cache_size_mb(),
            hash_chain_max_length: default_hash_chain_max_length(),
            force_creation: false,
        }
    }
}

impl PoolOptions {
    /// Retention horizon as a duration, never below 7 days.
    pub fn life_span(&self) -> Duration {
        Duration::days(self.life_span_days as i64).max(SEVEN_DAYS)
    }

    /// Replica pass interval as a duration.
    pub fn replica_period(&self) -> Duration {
        Duration::seconds(self.replica_period_secs.min(i64::MAX as u64) as i64)
    }

    /// Body cache budget in bytes.
    pub fn cache_budget(&self) -> usize {
        self.cache_size_mb.saturating_mul(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_name_and_transports() {
        let mut config = PoolConfig {
            name: String::new(),
            public: vec![ExchangeConfig::Memory { id: "x".to_string() }],
            private: vec![],
        };
        assert!(config.validate().is_err());

        config.name = "team".to_string();
        assert!(config.validate().is_ok());

        config.public.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_life_span_clamps_to_seven_days() {
        let options = PoolOptions {
            life_span_days: 1,
            ..Default::default()
        };
        assert_eq!(options.life_span(), Duration::days(7));

        let options = PoolOptions::default();
        assert_eq!(options.life_span(), Duration::days(30));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = PoolConfig {
            name: "team".to_string(),
            public: vec![ExchangeConfig::File {
                path: PathBuf::from("/mnt/share"),
            }],
            private: vec![ExchangeConfig::Memory { id: "local".to_string() }],
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
