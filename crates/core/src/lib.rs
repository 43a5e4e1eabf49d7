//! Core domain types and shared logic for the rockpool replication substrate.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Time-sortable entry identifiers and the key-generation scheme
//! - Feed heads and their wire serialization
//! - Access ledger records and states
//! - Pool and exchange configuration
//! - Content hashing

pub mod access;
pub mod b64;
pub mod config;
pub mod entry;
pub mod error;
pub mod hash;

pub use access::{AccessRecord, AccessState};
pub use config::{ExchangeConfig, PoolConfig, PoolOptions};
pub use entry::{EntryId, EntryIdSource, Head, KeyId};
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};

/// Maximum length of an application path in a head.
pub const MAX_NAME_LEN: usize = 1024;

/// Maximum size of the application-opaque metadata blob in a head.
pub const MAX_META_LEN: usize = 4096;

/// Name of the signed access document on every exchange.
pub const ACCESS_FILE: &str = ".access";

/// Directory holding feed entries under each pool prefix.
pub const FEEDS_DIR: &str = "feeds";

/// The slot new entries are written to. Sync and housekeeping must
/// enumerate all slots present, not just this one.
pub const WRITE_SLOT: &str = "0";
