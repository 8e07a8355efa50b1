//! Single-process quota store.
//!
//! Each user gets an async mutex held for the whole read-mutate-persist
//! sequence. With a data directory, every user is one JSON file written via
//! temp file and rename; memory is only updated after the write lands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use watchtime_models::QuotaRecord;

use super::{QuotaStore, RecordMutation};
use crate::error::StoreResult;

/// On-disk shape of one user's file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    record: Option<QuotaRecord>,
    #[serde(default)]
    migrated: bool,
}

#[derive(Default)]
struct Slot {
    loaded: bool,
    entry: StoredEntry,
}

/// Local quota store with per-user locking and optional file durability.
pub struct LocalQuotaStore {
    dir: Option<PathBuf>,
    slots: StdMutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl LocalQuotaStore {
    /// Store that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Store backed by JSON files in `dir`, created if missing.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "Opened local watch-time store");
        Ok(Self {
            dir: Some(dir),
            slots: StdMutex::new(HashMap::new()),
        })
    }

    /// Whether the user's record has been copied to the remote backend.
    pub async fn is_migrated(&self, user_id: &str) -> StoreResult<bool> {
        let slot = self.slot(user_id);
        let mut slot = slot.lock().await;
        self.load(user_id, &mut slot).await?;
        Ok(slot.entry.migrated)
    }

    pub async fn set_migrated(&self, user_id: &str, migrated: bool) -> StoreResult<()> {
        let slot = self.slot(user_id);
        let mut slot = slot.lock().await;
        self.load(user_id, &mut slot).await?;
        if slot.entry.migrated == migrated {
            return Ok(());
        }

        let entry = StoredEntry {
            record: slot.entry.record.clone(),
            migrated,
        };
        self.persist(user_id, &entry).await?;
        slot.entry = entry;
        Ok(())
    }

    fn slot(&self, user_id: &str) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(user_id.to_string()).or_default())
    }

    fn file_path(&self, user_id: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", urlencoding::encode(user_id))))
    }

    async fn load(&self, user_id: &str, slot: &mut Slot) -> StoreResult<()> {
        if slot.loaded {
            return Ok(());
        }

        if let Some(path) = self.file_path(user_id) {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    slot.entry = serde_json::from_slice(&bytes)?;
                    debug!(user_id = %user_id, "Loaded watch-time record from disk");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        slot.loaded = true;
        Ok(())
    }

    async fn persist(&self, user_id: &str, entry: &StoredEntry) -> StoreResult<()> {
        let Some(path) = self.file_path(user_id) else {
            return Ok(());
        };

        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for LocalQuotaStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<QuotaRecord>> {
        let slot = self.slot(user_id);
        let mut slot = slot.lock().await;
        self.load(user_id, &mut slot).await?;
        Ok(slot.entry.record.clone())
    }

    async fn update(&self, user_id: &str, mutation: &mut RecordMutation<'_>) -> StoreResult<bool> {
        let slot = self.slot(user_id);
        let mut slot = slot.lock().await;
        self.load(user_id, &mut slot).await?;

        let Some(next) = mutation(slot.entry.record.as_ref()) else {
            return Ok(false);
        };

        let entry = StoredEntry {
            record: Some(next),
            migrated: slot.entry.migrated,
        };
        self.persist(user_id, &entry).await?;
        slot.entry = entry;
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
