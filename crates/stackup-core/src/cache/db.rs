//! Durable action cache using redb.
//!
//! # Table design
//!
//! A single `COMPLETED` table maps the canonical JSON encoding of an
//! `ActionId` to a small JSON record (display form + completion time).
//! Presence of a key is the only thing that matters to `run_once`; the value
//! exists for operators listing the cache.
//!
//! redb holds an exclusive lock on the file while the `ActionCache` is open,
//! so a second provisioning run against the same volume fails at `open`.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProvisionError, Result};

use super::identity::ActionId;

// ---------------------------------------------------------------------------
// Table definition
// ---------------------------------------------------------------------------

/// Key: canonical `ActionId` bytes
/// Value: JSON-encoded `CacheEntry`
const COMPLETED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("completed_actions");

fn store_err(e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::CacheStore(e.to_string())
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Display form of the identity, secrets redacted.
    pub action: String,
    pub completed_at: DateTime<Utc>,
}

/// What `run_once` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOnce {
    Executed,
    Skipped,
}

// ---------------------------------------------------------------------------
// ActionCache
// ---------------------------------------------------------------------------

pub struct ActionCache {
    db: Database,
}

impl ActionCache {
    /// Open or create the cache at `path`.
    ///
    /// Creates the parent directory and the `COMPLETED` table if needed. Any
    /// failure here is fatal to provisioning.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(|e| {
            ProvisionError::CacheStore(format!("cannot open {}: {e}", path.display()))
        })?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(COMPLETED).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    pub fn has(&self, id: &ActionId) -> Result<bool> {
        let key = id.to_key()?;
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(COMPLETED).map_err(store_err)?;
        let found = table.get(key.as_slice()).map_err(store_err)?.is_some();
        Ok(found)
    }

    /// Record `id` as completed. An existing record is left untouched.
    ///
    /// Returns true if a new record was written.
    pub fn mark_done(&self, id: &ActionId) -> Result<bool> {
        let key = id.to_key()?;
        let entry = CacheEntry {
            action: id.to_string(),
            completed_at: Utc::now(),
        };
        let value = serde_json::to_vec(&entry)?;

        let wt = self.db.begin_write().map_err(store_err)?;
        let inserted = {
            let mut table = wt.open_table(COMPLETED).map_err(store_err)?;
            if table.get(key.as_slice()).map_err(store_err)?.is_some() {
                false
            } else {
                table
                    .insert(key.as_slice(), value.as_slice())
                    .map_err(store_err)?;
                true
            }
        };
        wt.commit().map_err(store_err)?;
        Ok(inserted)
    }

    /// Run `action` unless `id` has already completed.
    ///
    /// The identity is recorded only when `action` returns `Ok`; an error is
    /// propagated unchanged and the next run will try again.
    pub fn run_once<F>(&self, id: &ActionId, action: F) -> Result<RunOnce>
    where
        F: FnOnce() -> Result<()>,
    {
        if self.has(id)? {
            info!(action = %id, "already done, skipping");
            return Ok(RunOnce::Skipped);
        }
        info!(action = %id, "running");
        action()?;
        self.mark_done(id)?;
        Ok(RunOnce::Executed)
    }

    /// All completed actions, oldest first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(COMPLETED).map_err(store_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let record: CacheEntry = serde_json::from_slice(v.value())?;
            result.push(record);
        }
        result.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
