//! In-process shared-memory exchange backend.
//!
//! Exchangers created with the same registry id share one store, so several
//! pool instances in one process observe each other's writes. Used by tests
//! and embedders.

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{ByteRange, Exchanger, FileInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use time::OffsetDateTime;

struct MemObject {
    data: Bytes,
    mod_time: OffsetDateTime,
}

struct MemStore {
    files: RwLock<BTreeMap<String, MemObject>>,
    version: AtomicU64,
}

impl MemStore {
    fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(1),
        }
    }

    fn bump(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<MemStore>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MemStore>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Exchange backed by a process-wide in-memory store.
pub struct MemoryExchange {
    store: Arc<MemStore>,
    id: String,
    seen: Mutex<HashMap<String, u64>>,
}

impl MemoryExchange {
    /// Connect to (or create) the shared store registered under `id`.
    pub fn new(id: &str) -> Self {
        let store = registry()
            .lock()
            .expect("memory registry poisoned")
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemStore::new()))
            .clone();
        Self {
            store,
            id: format!("memory://{id}"),
            seen: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Exchanger for MemoryExchange {
    async fn read_dir(&self, path: &str, offset: usize) -> ExchangeResult<Vec<FileInfo>> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };

        let files = self.store.files.read().expect("memory store poisoned");
        let mut entries: BTreeMap<String, FileInfo> = BTreeMap::new();
        for (key, object) in files.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            match rest.split_once('/') {
                Some((dir, _)) => {
                    entries.entry(dir.to_string()).or_insert_with(|| FileInfo {
                        name: dir.to_string(),
                        size: 0,
                        mod_time: None,
                        is_dir: true,
                    });
                }
                None => {
                    entries.insert(
                        rest.to_string(),
                        FileInfo {
                            name: rest.to_string(),
                            size: object.data.len() as u64,
                            mod_time: Some(object.mod_time),
                            is_dir: false,
                        },
                    );
                }
            }
        }
        Ok(entries.into_values().skip(offset).collect())
    }

    async fn read(&self, path: &str, range: Option<ByteRange>) -> ExchangeResult<Bytes> {
        let files = self.store.files.read().expect("memory store poisoned");
        let object = files
            .get(path)
            .ok_or_else(|| ExchangeError::NotFound(path.to_string()))?;

        match range {
            None => Ok(object.data.clone()),
            Some(range) => {
                if range.end < range.start {
                    return Err(ExchangeError::InvalidRange(format!(
                        "end ({}) < start ({})",
                        range.end, range.start
                    )));
                }
                let start = (range.start as usize).min(object.data.len());
                let end = (range.end as usize).min(object.data.len());
                Ok(object.data.slice(start..end))
            }
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> ExchangeResult<u64> {
        let size = data.len() as u64;
        let mut files = self.store.files.write().expect("memory store poisoned");
        files.insert(
            path.to_string(),
            MemObject {
                data,
                mod_time: OffsetDateTime::now_utc(),
            },
        );
        drop(files);
        self.store.bump();
        Ok(size)
    }

    async fn stat(&self, path: &str) -> ExchangeResult<FileInfo> {
        let files = self.store.files.read().expect("memory store poisoned");
        if let Some(object) = files.get(path) {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            return Ok(FileInfo {
                name,
                size: object.data.len() as u64,
                mod_time: Some(object.mod_time),
                is_dir: false,
            });
        }
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));
        if files.range(dir_prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&dir_prefix)) {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            return Ok(FileInfo {
                name,
                size: 0,
                mod_time: None,
                is_dir: true,
            });
        }
        Err(ExchangeError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> ExchangeResult<()> {
        let mut files = self.store.files.write().expect("memory store poisoned");
        if files.remove(path).is_some() {
            drop(files);
            self.store.bump();
            return Ok(());
        }
        let dir_prefix = format!("{}/", path.trim_end_matches('/'));
        let keys: Vec<String> = files
            .range(dir_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&dir_prefix))
            .map(|(k, _)| k.clone())
            .collect();
        if keys.is_empty() {
            return Err(ExchangeError::NotFound(path.to_string()));
        }
        for key in keys {
            files.remove(&key);
        }
        drop(files);
        self.store.bump();
        Ok(())
    }

    async fn touched(&self, prefix: &str) -> bool {
        let current = self.store.version.load(Ordering::SeqCst);
        let mut seen = self.seen.lock().expect("touched state poisoned");
        match seen.insert(prefix.to_string(), current) {
            Some(previous) => previous != current,
            None => true,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_id(tag: &str) -> String {
        format!("{tag}-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let exchange = MemoryExchange::new(&unique_id("roundtrip"));
        exchange.write("pool/obj", Bytes::from("data")).await.unwrap();
        assert_eq!(exchange.read("pool/obj", None).await.unwrap(), Bytes::from("data"));
    }

    #[tokio::test]
    async fn test_same_id_shares_state() {
        let id = unique_id("shared");
        let a = MemoryExchange::new(&id);
        let b = MemoryExchange::new(&id);

        a.write("pool/obj", Bytes::from("from-a")).await.unwrap();
        assert_eq!(b.read("pool/obj", None).await.unwrap(), Bytes::from("from-a"));
    }

    #[tokio::test]
    async fn test_read_dir_synthesizes_directories() {
        let exchange = MemoryExchange::new(&unique_id("dirs"));
        exchange.write("pool/feeds/0/1.head", Bytes::from("x")).await.unwrap();
        exchange.write("pool/feeds/0/1.body", Bytes::from("y")).await.unwrap();
        exchange.write("pool/.access", Bytes::from("z")).await.unwrap();

        let slots = exchange.read_dir("pool/feeds", 0).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_dir);
        assert_eq!(slots[0].name, "0");

        let entries = exchange.read_dir("pool/feeds/0", 0).await.unwrap();
        let names: Vec<_> = entries.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["1.body", "1.head"]);
    }

    #[tokio::test]
    async fn test_delete_directory() {
        let exchange = MemoryExchange::new(&unique_id("del"));
        exchange.write("pool/feeds/0/1.head", Bytes::from("x")).await.unwrap();
        exchange.delete("pool").await.unwrap();
        assert!(exchange.stat("pool/feeds/0/1.head").await.is_err());
        assert!(exchange.delete("pool").await.is_err());
    }

    #[tokio::test]
    async fn test_touched_per_instance() {
        let id = unique_id("touched");
        let a = MemoryExchange::new(&id);
        let b = MemoryExchange::new(&id);

        assert!(a.touched("pool/").await);
        assert!(!a.touched("pool/").await);

        b.write("pool/obj", Bytes::from("x")).await.unwrap();
        assert!(a.touched("pool/").await);
        assert!(!a.touched("pool/").await);
    }
}
