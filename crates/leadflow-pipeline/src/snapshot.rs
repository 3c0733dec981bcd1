//! Snapshot save/restore of the in-memory store and roster.
//!
//! The CLI keeps its whole state in one JSON file: it loads a
//! [`StoreSnapshot`] into a [`MemoryStore`]/[`MemoryRoster`] pair, runs one
//! operation and writes the snapshot back.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leadflow_types::{Representative, Result};

use crate::roster::MemoryRoster;
use crate::store::{LeadRecord, MemoryStore, SCHEMA_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub records: Vec<LeadRecord>,
    pub representatives: Vec<Representative>,
}

impl StoreSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            saved_at: now,
            records: Vec::new(),
            representatives: Vec::new(),
        }
    }

    /// Copy the current contents of `store` and `roster`.
    pub async fn capture(store: &MemoryStore, roster: &MemoryRoster, now: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            saved_at: now,
            records: store.records().await,
            representatives: roster.all().await,
        }
    }

    pub fn restore(self) -> (MemoryStore, MemoryRoster) {
        (
            MemoryStore::with_records(self.records),
            MemoryRoster::new(self.representatives),
        )
    }
}

/// Write `snapshot` to `path`, creating parent directories as needed.
pub async fn save_snapshot(snapshot: &StoreSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(path, json).await?;
    tracing::debug!(path = %path.display(), records = snapshot.records.len(), "Snapshot saved");
    Ok(())
}

/// Read a snapshot. Returns `Ok(None)` when the file does not exist yet.
pub async fn load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(path).await?;
    let snapshot: StoreSnapshot = serde_json::from_str(&json)?;
    if snapshot.version != SCHEMA_VERSION {
        return Err(leadflow_types::LeadflowError::Validation(format!(
            "snapshot {} has unsupported version {} (expected {})",
            path.display(),
            snapshot.version,
            SCHEMA_VERSION
        )));
    }
    Ok(Some(snapshot))
}
