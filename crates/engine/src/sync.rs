//! Pull-based reconciliation against an exchange.
//!
//! Sync enumerates head files past the per-exchange cursor, slot by slot,
//! downloads and verifies each new head, gates it on the access ledger and
//! inserts it into the local index with the next monotonic offset. A
//! rejected head is logged and skipped; the pass continues.

use crate::error::{PoolError, PoolResult};
use crate::pool::Pool;
use rockpool_core::{EntryId, Head};
use rockpool_exchange::Exchanger;
use rockpool_index::models::CursorRow;
use rockpool_index::{CursorRepo as _, HeadRepo as _};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

impl Pool {
    /// One sync pass against the primary exchange. Returns immediately
    /// when the cheap liveness probe reports the pool prefix unchanged.
    /// Idempotent: a second call with no writes in between indexes
    /// nothing new.
    pub async fn sync(&self) -> PoolResult<()> {
        if !self.primary.touched(&format!("{}/", self.name)).await {
            return Ok(());
        }

        // A newer access document is merged and, when it changed anything
        // locally, re-exported so peers converge on the merged ledger.
        // Only a still-active member may overwrite the document.
        match self.import_access_from(self.primary.as_ref()).await {
            Ok(true) if self.is_self_active().await? => {
                if let Err(e) = self.export_access().await {
                    warn!(pool = %self.name, error = %e, "cannot re-export access document");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(pool = %self.name, error = %e, "cannot merge access document"),
        }

        self.sync_exchange(&self.primary).await?;

        let now = OffsetDateTime::now_utc();
        let due = {
            let last = self.last_replica.lock().await;
            now - *last > self.options.replica_period()
        };
        if due {
            if let Err(e) = self.replicate().await {
                warn!(pool = %self.name, error = %e, "replica pass failed");
            }
            *self.last_replica.lock().await = now;
        }
        Ok(())
    }

    /// Enumerate and ingest new heads from one exchange, advancing its
    /// cursor slot by slot.
    pub(crate) async fn sync_exchange(&self, exchanger: &Arc<dyn Exchanger>) -> PoolResult<()> {
        let cursor = self.index.get_cursor(&self.name, exchanger.id()).await?;
        let (last_slot, last_offset, access_mtime) = match &cursor {
            Some(c) => (c.slot.clone(), c.list_offset, c.access_mtime),
            None => (String::new(), 0, None),
        };

        let threshold =
            EntryId::horizon(OffsetDateTime::now_utc() - self.options.life_span());
        let feeds = self.feeds_prefix();

        // Listings are name-sorted; slots at or past the cursor slot are
        // visited in order.
        let slots: Vec<String> = exchanger
            .read_dir(&feeds, 0)
            .await?
            .into_iter()
            .filter(|f| f.is_dir)
            .map(|f| f.name)
            .filter(|s| last_slot.is_empty() || *s >= last_slot)
            .collect();

        for slot in slots {
            let offset = if slot == last_slot {
                last_offset.max(0) as usize
            } else {
                0
            };
            let dir = format!("{feeds}/{slot}");
            let files = match exchanger.read_dir(&dir, offset).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(pool = %self.name, slot = %slot, error = %e, "cannot list slot");
                    continue;
                }
            };
            let listed = files.len();

            for file in files {
                if file.is_dir {
                    continue;
                }
                let Some(stem) = file.name.strip_suffix(".head") else {
                    continue;
                };
                let Ok(id) = EntryId::parse(stem) else {
                    continue;
                };
                // Entries past the retention horizon are housekeeping's
                // business, not sync's.
                if id < threshold {
                    continue;
                }
                if self.index.get_head(&self.name, id).await?.is_some() {
                    continue;
                }

                let path = format!("{dir}/{}", file.name);
                match self.ingest_head(exchanger, &path, id).await {
                    Ok(head) => {
                        debug!(pool = %self.name, entry = %id, offset = head.offset, "indexed head")
                    }
                    Err(e) => {
                        warn!(pool = %self.name, entry = %id, error = %e, "rejected head")
                    }
                }
            }

            self.index
                .set_cursor(&CursorRow {
                    pool: self.name.clone(),
                    exchange: exchanger.id().to_string(),
                    slot,
                    list_offset: (offset + listed) as i64,
                    access_mtime,
                })
                .await?;
        }
        Ok(())
    }

    /// Download, verify and index one head.
    async fn ingest_head(
        &self,
        exchanger: &Arc<dyn Exchanger>,
        path: &str,
        id: EntryId,
    ) -> PoolResult<Head> {
        let mut head = self.read_head(exchanger.as_ref(), path).await?;
        if head.id != id {
            return Err(PoolError::InvalidSignature(format!(
                "head file {path} names entry {}",
                head.id
            )));
        }
        Head::validate_bounds(&head.name, &head.meta)?;
        self.check_author(&head).await?;

        head.offset = self.index.put_head(&self.name, &head).await?;
        Ok(head)
    }
}
