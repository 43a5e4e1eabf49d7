//! Shared-filesystem exchange backend.

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{ByteRange, Exchanger, FileInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Exchange rooted at a directory on a local or mounted filesystem.
pub struct FilesystemExchange {
    root: PathBuf,
    id: String,
    // Last observed (max mtime, file count) per touched() prefix.
    seen: Mutex<HashMap<String, (Option<SystemTime>, usize)>>,
}

impl FilesystemExchange {
    /// Create an exchange rooted at `root`, creating the directory if
    /// needed.
    pub async fn new(root: impl AsRef<Path>) -> ExchangeResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        let id = format!("file://{}", root.display());
        Ok(Self {
            root,
            id,
            seen: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a key to a path under the root. Keys come from remote
    /// listings, so path traversal is rejected outright.
    fn key_path(&self, key: &str) -> ExchangeResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(ExchangeError::InvalidPath(format!(
                "path traversal not allowed: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(ExchangeError::InvalidPath(format!(
                        "unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    async fn ensure_parent(&self, path: &Path) -> ExchangeResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    // (max mtime, file count) of everything under the prefix directory.
    async fn scan_state(&self, prefix: &str) -> ExchangeResult<(Option<SystemTime>, usize)> {
        let base = self.key_path(prefix.trim_end_matches('/'))?;
        let mut max_mtime: Option<SystemTime> = None;
        let mut count = 0usize;

        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ExchangeError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    count += 1;
                    if let Ok(meta) = entry.metadata().await
                        && let Ok(mtime) = meta.modified()
                    {
                        max_mtime = Some(max_mtime.map_or(mtime, |m| m.max(mtime)));
                    }
                }
            }
        }
        Ok((max_mtime, count))
    }
}

#[async_trait]
impl Exchanger for FilesystemExchange {
    #[instrument(skip(self), fields(exchange = "file"))]
    async fn read_dir(&self, path: &str, offset: usize) -> ExchangeResult<Vec<FileInfo>> {
        let dir = self.key_path(path)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ExchangeError::Io(e)),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            // Symlinks are skipped so a listing never leads outside the root.
            if !file_type.is_file() && !file_type.is_dir() {
                continue;
            }
            let meta = entry.metadata().await?;
            infos.push(FileInfo {
                name: entry.file_name().to_string_lossy().to_string(),
                size: if file_type.is_dir() { 0 } else { meta.len() },
                mod_time: meta.modified().ok().map(OffsetDateTimeExt::into_odt),
                is_dir: file_type.is_dir(),
            });
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos.split_off(offset.min(infos.len())))
    }

    #[instrument(skip(self), fields(exchange = "file"))]
    async fn read(&self, path: &str, range: Option<ByteRange>) -> ExchangeResult<Bytes> {
        let file_path = self.key_path(path)?;
        let data = fs::read(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExchangeError::NotFound(path.to_string())
            } else {
                ExchangeError::Io(e)
            }
        })?;

        match range {
            None => Ok(Bytes::from(data)),
            Some(range) => {
                if range.end < range.start {
                    return Err(ExchangeError::InvalidRange(format!(
                        "end ({}) < start ({})",
                        range.end, range.start
                    )));
                }
                let start = (range.start as usize).min(data.len());
                let end = (range.end as usize).min(data.len());
                Ok(Bytes::from(data[start..end].to_vec()))
            }
        }
    }

    #[instrument(skip(self, data), fields(exchange = "file", size = data.len()))]
    async fn write(&self, path: &str, data: Bytes) -> ExchangeResult<u64> {
        let file_path = self.key_path(path)?;
        self.ensure_parent(&file_path).await?;

        // Temp file plus rename keeps concurrent readers from ever seeing a
        // partial object.
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        let temp_path = file_path.with_file_name(
            file_path
                .file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        );
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &file_path).await?;
        Ok(data.len() as u64)
    }

    #[instrument(skip(self), fields(exchange = "file"))]
    async fn stat(&self, path: &str) -> ExchangeResult<FileInfo> {
        let file_path = self.key_path(path)?;
        let meta = fs::metadata(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExchangeError::NotFound(path.to_string())
            } else {
                ExchangeError::Io(e)
            }
        })?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(FileInfo {
            name,
            size: if meta.is_dir() { 0 } else { meta.len() },
            mod_time: meta.modified().ok().map(OffsetDateTimeExt::into_odt),
            is_dir: meta.is_dir(),
        })
    }

    #[instrument(skip(self), fields(exchange = "file"))]
    async fn delete(&self, path: &str) -> ExchangeResult<()> {
        let file_path = self.key_path(path)?;
        let meta = fs::metadata(&file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExchangeError::NotFound(path.to_string())
            } else {
                ExchangeError::Io(e)
            }
        })?;
        if meta.is_dir() {
            fs::remove_dir_all(&file_path).await?;
        } else {
            fs::remove_file(&file_path).await?;
        }
        Ok(())
    }

    async fn touched(&self, prefix: &str) -> bool {
        let current = match self.scan_state(prefix).await {
            Ok(state) => state,
            // Unsure means possibly changed.
            Err(_) => return true,
        };
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

// std::time::SystemTime -> time::OffsetDateTime without pulling a
// conversion dependency into the trait surface.
trait OffsetDateTimeExt {
    fn into_odt(self) -> time::OffsetDateTime;
}

impl OffsetDateTimeExt for SystemTime {
    fn into_odt(self) -> time::OffsetDateTime {
        time::OffsetDateTime::from(self)
    }
}
