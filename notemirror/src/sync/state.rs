use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const STATE_FILE_NAME: &str = ".notemirror-state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error persisting sync state: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode sync state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Persisted bookkeeping for one remote entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub name: String,
    pub size: u64,
    /// Opaque; only ever compared for equality.
    pub modified_time: String,
    pub folder_path: String,
    pub relative_path: String,
    pub weak_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub last_synced: String,
}

/// Remote identifier -> record. Ordered so the file diffs cleanly between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncState {
    records: BTreeMap<String, SyncRecord>,
}

impl SyncState {
    pub fn get(&self, id: &str) -> Option<&SyncRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SyncRecord> {
        self.records.get_mut(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, record: SyncRecord) -> Option<SyncRecord> {
        self.records.insert(id.into(), record)
    }

    pub fn remove(&mut self, id: &str) -> Option<SyncRecord> {
        self.records.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SyncRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_mirror_root(mirror_root: &Path) -> Self {
        Self::new(mirror_root.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing file is a first run, an unreadable one a full resync.
    pub async fn load(&self) -> SyncState {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no sync state yet, starting empty");
                return SyncState::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "sync state unreadable, resyncing everything");
                return SyncState::default();
            }
        };
        match serde_json::from_slice::<SyncState>(&raw) {
            Ok(state) => {
                debug!(records = state.len(), "sync state loaded");
                state
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "sync state corrupt, resyncing everything");
                SyncState::default()
            }
        }
    }

    /// Writes a sibling temp file, fsyncs it, then renames it over the state file.
    pub async fn save(&self, state: &SyncState) -> Result<(), StateError> {
        let encoded = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = temp_path(&self.path);
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&encoded).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        if let Err(err) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}
