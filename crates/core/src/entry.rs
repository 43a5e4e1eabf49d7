//! Feed entry identifiers and heads.
//!
//! An `EntryId` is a 64-bit snowflake: 41 bits of milliseconds since the
//! pool epoch, 10 bits of machine id, 12 bits of sequence. Ids sort by
//! creation time and the timestamp can be recovered, which is what retention
//! and replication rely on.

use crate::hash::ContentHash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use time::OffsetDateTime;
use time::macros::datetime;

/// Epoch the entry-id timestamp counts from.
pub const SNOWFLAKE_EPOCH: OffsetDateTime = datetime!(2022-01-01 0:00 UTC);

const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_SHIFT: u32 = MACHINE_BITS + SEQUENCE_BITS;
const MACHINE_MASK: u64 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Time-sortable 64-bit identifier of a feed entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    /// Wrap a raw id value.
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    /// Get the raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Build an id from its parts. `machine` and `seq` are masked to their
    /// bit widths.
    pub fn from_parts(at: OffsetDateTime, machine: u16, seq: u16) -> Self {
        let ms = millis_since_epoch(at);
        Self(ms << TIMESTAMP_SHIFT | (machine as u64 & MACHINE_MASK) << SEQUENCE_BITS
            | seq as u64 & SEQUENCE_MASK)
    }

    /// Generate a new id from the process-wide source.
    pub fn generate() -> Self {
        global_source().next()
    }

    /// Recover the creation timestamp.
    pub fn timestamp(&self) -> OffsetDateTime {
        let ms = self.0 >> TIMESTAMP_SHIFT;
        SNOWFLAKE_EPOCH + time::Duration::milliseconds(ms as i64)
    }

    /// Threshold id for a wall-clock horizon: every id created before
    /// `horizon` compares less than the result. Low bits are zeroed so the
    /// same threshold serves exchange pruning and index pruning.
    pub fn horizon(at: OffsetDateTime) -> Self {
        Self(millis_since_epoch(at) << TIMESTAMP_SHIFT)
    }

    /// Parse the id out of a feed filename stem.
    pub fn parse(s: &str) -> crate::Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid entry id '{s}': {e}")))
    }
}

fn millis_since_epoch(at: OffsetDateTime) -> u64 {
    let ms = (at - SNOWFLAKE_EPOCH).whole_milliseconds();
    ms.clamp(0, i64::MAX as i128) as u64
}

// Ids travel as decimal strings so 64-bit values survive JSON consumers.
impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

/// Identifier of a master-key generation. Uses the same time-sortable
/// scheme as [`EntryId`]; the current key is the one with the largest id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId(u64);

impl KeyId {
    pub fn from_u64(v: u64) -> Self {
        Self(v)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Generate a fresh key id from the process-wide source.
    pub fn generate() -> Self {
        Self(EntryId::generate().as_u64())
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generator of strictly monotonic entry ids for one process.
///
/// Sequence rollover within a millisecond advances the logical clock, and a
/// wall clock that steps backwards never produces a smaller id.
pub struct EntryIdSource {
    machine: u16,
    state: Mutex<(u64, u64)>, // (last ms, last seq)
}

impl EntryIdSource {
    /// Create a source with the given machine id (masked to 10 bits).
    pub fn new(machine: u16) -> Self {
        Self {
            machine: (machine as u64 & MACHINE_MASK) as u16,
            state: Mutex::new((0, 0)),
        }
    }

    /// Create a source with a random machine id.
    pub fn random() -> Self {
        use rand_core::{OsRng, RngCore};
        Self::new((OsRng.next_u32() & MACHINE_MASK as u32) as u16)
    }

    /// Produce the next id.
    pub fn next(&self) -> EntryId {
        let now = millis_since_epoch(OffsetDateTime::now_utc());
        let mut state = self.state.lock().expect("id source poisoned");
        let (last_ms, last_seq) = *state;

        let mut ms = now.max(last_ms);
        let mut seq = 0u64;
        if ms == last_ms {
            seq = last_seq + 1;
            if seq > SEQUENCE_MASK {
                ms += 1;
                seq = 0;
            }
        }
        *state = (ms, seq);

        EntryId(ms << TIMESTAMP_SHIFT | (self.machine as u64) << SEQUENCE_BITS | seq)
    }
}

fn global_source() -> &'static EntryIdSource {
    static SOURCE: OnceLock<EntryIdSource> = OnceLock::new();
    SOURCE.get_or_init(EntryIdSource::random)
}

/// Metadata record of one feed entry, persisted both on the exchange
/// (`<pool>/feeds/<slot>/<id>.head`) and in the local index.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Head {
    /// Entry identifier, unique within the pool.
    pub id: EntryId,
    /// Application path, e.g. `chat/417.chat`.
    pub name: String,
    /// Plaintext body length in bytes.
    pub size: i64,
    /// SHA-256 of the plaintext body.
    pub hash: ContentHash,
    /// Author-declared write time.
    #[serde(with = "time::serde::rfc3339")]
    pub mod_time: OffsetDateTime,
    /// Peer id of the author.
    pub author_id: String,
    /// Ed25519 signature over [`Head::signing_payload`].
    #[serde(with = "crate::b64")]
    pub signature: Vec<u8>,
    /// Application-opaque metadata blob.
    #[serde(with = "crate::b64")]
    pub meta: Vec<u8>,
    /// Master-key generation the body is encrypted with.
    pub key_id: KeyId,
    /// Monotonic insertion rank in the local index. Local only.
    #[serde(skip)]
    pub offset: i64,
}

impl Head {
    /// The bytes covered by the head signature: body hash, name, author and
    /// meta. Covering name and meta prevents swapping them under a valid
    /// body signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(32 + self.name.len() + self.author_id.len() + self.meta.len());
        payload.extend_from_slice(self.hash.as_bytes());
        payload.extend_from_slice(self.name.as_bytes());
        payload.extend_from_slice(self.author_id.as_bytes());
        payload.extend_from_slice(&self.meta);
        payload
    }

    /// Check the application-facing size bounds.
    pub fn validate_bounds(name: &str, meta: &[u8]) -> crate::Result<()> {
        if name.is_empty() || name.len() > crate::MAX_NAME_LEN {
            return Err(crate::Error::NameTooLong {
                len: name.len(),
                max: crate::MAX_NAME_LEN,
            });
        }
        if meta.len() > crate::MAX_META_LEN {
            return Err(crate::Error::MetaTooLarge {
                len: meta.len(),
                max: crate::MAX_META_LEN,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let source = EntryIdSource::new(7);
        let mut last = source.next();
        for _ in 0..5000 {
            let id = source.next();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn test_timestamp_recovery() {
        let at = datetime!(2024-06-01 12:30 UTC);
        let id = EntryId::from_parts(at, 3, 0);
        assert_eq!(id.timestamp(), at);
    }

    #[test]
    fn test_horizon_orders_against_ids() {
        let old = EntryId::from_parts(datetime!(2024-01-01 0:00 UTC), 1023, 4095);
        let new = EntryId::from_parts(datetime!(2024-03-01 0:00 UTC), 0, 0);
        let horizon = EntryId::horizon(datetime!(2024-02-01 0:00 UTC));
        assert!(old < horizon);
        assert!(new > horizon);
    }

    #[test]
    fn test_head_json_field_names() {
        let head = Head {
            id: EntryId::from_u64(123456789),
            name: "chat/1.chat".to_string(),
            size: 2,
            hash: ContentHash::compute(b"hi"),
            mod_time: datetime!(2024-06-01 12:00 UTC),
            author_id: "author".to_string(),
            signature: vec![1, 2, 3],
            meta: vec![],
            key_id: KeyId::from_u64(42),
            offset: 9,
        };
        let json: serde_json::Value = serde_json::to_value(&head).unwrap();
        assert_eq!(json["id"], "123456789");
        assert_eq!(json["keyId"], "42");
        assert_eq!(json["modTime"], "2024-06-01T12:00:00Z");
        assert!(json["hash"].is_string());
        assert!(json.get("offset").is_none());

        let back: Head = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, head.id);
        assert_eq!(back.offset, 0);
    }

    #[test]
    fn test_validate_bounds() {
        assert!(Head::validate_bounds("ok", &[]).is_ok());
        assert!(Head::validate_bounds("", &[]).is_err());
        let long = "x".repeat(crate::MAX_NAME_LEN + 1);
        assert!(Head::validate_bounds(&long, &[]).is_err());
        assert!(Head::validate_bounds("ok", &vec![0; crate::MAX_META_LEN + 1]).is_err());
    }
}
