//! Bounded in-memory cache of decrypted bodies.
//!
//! Keyed by body path, evicted LRU by last access. Only complete bodies are
//! installed, so range reads can always be served from a hit.

use bytes::Bytes;
use rockpool_exchange::ByteRange;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct CacheEntry {
    data: Bytes,
    last_access: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    total: usize,
}

/// LRU body cache with a byte budget.
pub struct BodyCache {
    inner: Mutex<CacheInner>,
    budget: usize,
}

impl BodyCache {
    /// Create a cache with the given budget in bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                total: 0,
            }),
            budget,
        }
    }

    /// Look up a body, optionally slicing a byte range out of it.
    pub fn get(&self, path: &str, range: Option<ByteRange>) -> Option<Bytes> {
        let mut inner = self.inner.lock().expect("body cache poisoned");
        let entry = inner.entries.get_mut(path)?;
        entry.last_access = Instant::now();
        let data = entry.data.clone();
        Some(slice_range(data, range))
    }

    /// Install a complete body, evicting least-recently-used entries until
    /// the budget holds. Bodies larger than the whole budget are not cached.
    pub fn insert(&self, path: &str, data: Bytes) {
        if data.len() > self.budget {
            return;
        }
        let mut inner = self.inner.lock().expect("body cache poisoned");
        if let Some(old) = inner.entries.remove(path) {
            inner.total -= old.data.len();
        }
        inner.total += data.len();
        inner.entries.insert(
            path.to_string(),
            CacheEntry {
                data,
                last_access: Instant::now(),
            },
        );

        while inner.total > self.budget {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    if let Some(evicted) = inner.entries.remove(&key) {
                        inner.total -= evicted.data.len();
                    }
                }
                None => break,
            }
        }
    }

    /// Number of cached bodies.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("body cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn slice_range(data: Bytes, range: Option<ByteRange>) -> Bytes {
    match range {
        None => data,
        Some(range) => {
            let start = (range.start as usize).min(data.len());
            let end = (range.end as usize).min(data.len());
            data.slice(start..end.max(start))
        }
    }
}
