//! SQLite-backed local index for rockpool pools.
//!
//! The index is the authoritative read path for applications: heads,
//! master keys, the access ledger, identities, pool configs and
//! per-exchange sync cursors. Exchanges are only consulted during sync,
//! send, receive and housekeeping.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{IndexError, IndexResult};
pub use models::{CursorRow, IdentityRow, KeyRow};
pub use repos::{AccessRepo, CursorRepo, HeadRepo, IdentityRepo, KeyRepo, PoolRepo};
pub use store::{LocalIndex, SqliteIndex};
