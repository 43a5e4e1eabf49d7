//! Retention purge and cross-exchange replication.
//!
//! A worker per pool sleeps a random 0-600 s at startup so peers sharing
//! an exchange do not sweep in lockstep, then runs once an hour until the
//! pool is closed. An in-flight pass completes after a stop signal; no new
//! pass begins.

use crate::error::PoolResult;
use crate::pool::Pool;
use rockpool_core::{ACCESS_FILE, EntryId};
use rockpool_index::models::CursorRow;
use rockpool_index::{CursorRepo as _, HeadRepo as _};
use rand_core::{OsRng, RngCore};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, warn};

const TICK: Duration = Duration::from_secs(3600);
const MAX_STARTUP_JITTER_SECS: u32 = 600;

/// Spawn the housekeeping worker for a freshly built pool.
pub(crate) fn spawn(pool: &Arc<Pool>) {
    let mut stop_rx = pool.stop_tx.subscribe();
    let worker_pool = Arc::clone(pool);

    let handle = tokio::spawn(async move {
        let jitter = Duration::from_secs((OsRng.next_u32() % MAX_STARTUP_JITTER_SECS) as u64);
        tokio::select! {
            _ = tokio::time::sleep(jitter) => {}
            _ = stop_rx.changed() => return,
        }

        loop {
            if let Err(e) = worker_pool.housekeeping().await {
                warn!(pool = %worker_pool.name(), error = %e, "housekeeping pass failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(TICK) => {}
                _ = stop_rx.changed() => return,
            }
        }
    });

    *pool.worker.lock().expect("worker handle poisoned") = Some(handle);
}

impl Pool {
    /// One retention pass: delete head/body pairs older than the life-span
    /// horizon from every exchange, then purge the local index below the
    /// same threshold. Normally driven by the worker; safe to call
    /// directly, and overlapping passes on one pool exclude each other.
    pub async fn housekeeping(&self) -> PoolResult<()> {
        let _guard = self.housekeeping_lock.lock().await;

        let threshold =
            EntryId::horizon(OffsetDateTime::now_utc() - self.options.life_span());
        let feeds = self.feeds_prefix();

        for exchanger in &self.exchangers {
            let slots = match exchanger.read_dir(&feeds, 0).await {
                Ok(slots) => slots,
                Err(e) => {
                    warn!(pool = %self.name, exchange = exchanger.id(), error = %e, "cannot list slots");
                    continue;
                }
            };
            let mut deleted = 0usize;
            for slot in slots.iter().filter(|s| s.is_dir) {
                let dir = format!("{feeds}/{}", slot.name);
                let files = match exchanger.read_dir(&dir, 0).await {
                    Ok(files) => files,
                    Err(e) => {
                        warn!(pool = %self.name, slot = %slot.name, error = %e, "cannot list slot");
                        continue;
                    }
                };
                for file in files {
                    if file.is_dir {
                        continue;
                    }
                    let Some((stem, ext)) = file.name.rsplit_once('.') else {
                        continue;
                    };
                    if ext != "head" && ext != "body" {
                        continue;
                    }
                    let Ok(id) = EntryId::parse(stem) else {
                        continue;
                    };
                    if id < threshold {
                        match exchanger.delete(&format!("{dir}/{}", file.name)).await {
                            Ok(()) => deleted += 1,
                            Err(e) => {
                                warn!(pool = %self.name, entry = %id, error = %e, "cannot delete expired entry")
                            }
                        }
                    }
                }
            }

            // Deletions shrink the listings the sync cursor counts into.
            // Rewind it; already-indexed heads are skipped cheaply.
            if deleted > 0
                && let Ok(Some(cursor)) = self.index.get_cursor(&self.name, exchanger.id()).await
                && let Err(e) = self
                    .index
                    .set_cursor(&CursorRow {
                        slot: String::new(),
                        list_offset: 0,
                        ..cursor
                    })
                    .await
            {
                warn!(pool = %self.name, exchange = exchanger.id(), error = %e, "cannot rewind sync cursor");
            }
        }

        let removed = self.index.del_heads_before(&self.name, threshold).await?;
        if removed > 0 {
            debug!(pool = %self.name, removed, "purged expired heads from index");
        }
        Ok(())
    }

    /// One replica pass: copy every head/body present on the primary but
    /// missing on a secondary, refresh stale access documents, and pull
    /// secondary-only entries through the normal verified sync path.
    /// Driven by the sync cadence once per replica period.
    pub async fn replicate(&self) -> PoolResult<()> {
        let feeds = self.feeds_prefix();
        let slots = self.primary.read_dir(&feeds, 0).await?;
        let access_path = format!("{}/{ACCESS_FILE}", self.name);

        for secondary in self
            .exchangers
            .iter()
            .filter(|e| e.id() != self.primary.id())
        {
            for slot in slots.iter().filter(|s| s.is_dir) {
                let dir = format!("{feeds}/{}", slot.name);
                let files = match self.primary.read_dir(&dir, 0).await {
                    Ok(files) => files,
                    Err(e) => {
                        warn!(pool = %self.name, slot = %slot.name, error = %e, "cannot list slot");
                        continue;
                    }
                };
                for file in files.iter().filter(|f| !f.is_dir) {
                    let path = format!("{dir}/{}", file.name);
                    match secondary.stat(&path).await {
                        Ok(_) => continue,
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            warn!(exchange = secondary.id(), error = %e, "cannot stat replica");
                            continue;
                        }
                    }
                    match self.primary.read(&path, None).await {
                        Ok(data) => {
                            if let Err(e) = secondary.write(&path, data).await {
                                warn!(exchange = secondary.id(), path = %path, error = %e, "replica write failed");
                            }
                        }
                        Err(e) => {
                            warn!(path = %path, error = %e, "replica read failed")
                        }
                    }
                }
            }

            // The access document follows the primary when it is newer.
            if let Ok(primary_info) = self.primary.stat(&access_path).await {
                let stale = match secondary.stat(&access_path).await {
                    Ok(info) => match (primary_info.mod_time, info.mod_time) {
                        (Some(primary_mtime), Some(secondary_mtime)) => {
                            primary_mtime > secondary_mtime
                        }
                        _ => false,
                    },
                    Err(e) if e.is_not_found() => true,
                    Err(_) => false,
                };
                if stale
                    && let Ok(data) = self.primary.read(&access_path, None).await
                    && let Err(e) = secondary.write(&access_path, data).await
                {
                    warn!(exchange = secondary.id(), error = %e, "access replica failed");
                }
            }

            // Entries only a secondary has seen enter through the same
            // verified ingest path as any other sync.
            if let Err(e) = self.sync_exchange(secondary).await {
                warn!(exchange = secondary.id(), error = %e, "secondary sync failed");
            }
        }
        Ok(())
    }
}
