use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use futures_util::{StreamExt, stream};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::clock::now_rfc3339;
use super::detect::{ChangeReason, decide};
use super::fingerprint::weak_fingerprint;
use super::folders::FolderResolver;
use super::invalidate::{InvalidateError, Invalidator};
use super::mirror::{MirrorError, MirrorWriter};
use super::paths::{PathError, join_relative, local_path_for, sanitize_component, with_id_suffix};
use super::quarantine::{Quarantine, QuarantineError};
use super::reconcile::{Reconciler, retire_source, stale_ids};
use super::remote::{RemoteEntry, RemoteError, RemoteSource};
use super::state::{StateError, StateStore, SyncRecord, SyncState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("listing remote entries failed: {0}")]
    Enumeration(#[source] RemoteError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("invalidation error: {0}")]
    Invalidate(#[from] InvalidateError),
    #[error("quarantine error: {0}")]
    Quarantine(#[from] QuarantineError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("clock formatting failed: {0}")]
    Clock(#[from] time::error::Format),
}

impl EngineError {
    /// Fatal errors end the run; everything else only costs one entry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Enumeration(_) | EngineError::State(_))
    }
}

#[derive(Debug, Clone)]
pub struct MirrorLayout {
    pub mirror_root: PathBuf,
    pub quarantine_root: PathBuf,
    pub derived_roots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub retired: usize,
    pub bytes: u64,
    pub dry_run: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            return write!(
                f,
                "dry run: listed {}, would download {}, up to date {}, failed {}, would retire {}",
                self.listed, self.downloaded, self.skipped, self.failed, self.retired
            );
        }
        write!(
            f,
            "listed {}, downloaded {} ({}), skipped {}, failed {}, retired {}",
            self.listed,
            self.downloaded,
            format_size(self.bytes),
            self.skipped,
            self.failed,
            self.retired
        )
    }
}

/// 1253656 -> "1.20MB"
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if value < 1024.0 {
            return format!("{value:.2}{unit}B");
        }
        value /= 1024.0;
    }
    format!("{value:.2}YB")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Downloaded { bytes: u64 },
    Planned,
    Skipped,
}

/// Lookup tables shared by every entry of one run. Dropped when the run ends.
struct RunContext {
    folders: FolderResolver,
    // Single writer: every save happens while holding this lock.
    state: Mutex<SyncState>,
    // Mirror-relative path -> id of the entry that took it this run.
    claims: std::sync::Mutex<HashMap<String, String>>,
}

impl RunContext {
    fn new(state: SyncState) -> Self {
        Self {
            folders: FolderResolver::new(),
            state: Mutex::new(state),
            claims: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Picks the local path for entry `id` and returns it with the entry's
    /// prior record. `base` is used unless another entry holds it, either
    /// through a stored record or a claim made earlier in this run; then the
    /// id-suffixed alternate is used. An entry already living at its
    /// alternate stays there.
    async fn assign_path(&self, id: &str, base: String) -> (String, Option<SyncRecord>) {
        let state = self.state.lock().await;
        let prior = state.get(id).cloned();
        let alternate = with_id_suffix(&base, id);
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);

        let held_by_other = |path: &str| {
            claims.get(path).is_some_and(|owner| owner != id)
                || state
                    .iter()
                    .any(|(other, record)| other != id && record.relative_path == path)
        };
        let keeps_alternate = prior
            .as_ref()
            .is_some_and(|record| record.relative_path == alternate);
        let relative = if !keeps_alternate && !held_by_other(base.as_str()) {
            base
        } else {
            alternate
        };
        claims.insert(relative.clone(), id.to_string());
        (relative, prior)
    }
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteSource>,
    store: StateStore,
    writer: MirrorWriter,
    invalidator: Invalidator,
    quarantine: Quarantine,
    mirror_root: PathBuf,
    concurrency: usize,
    dry_run: bool,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteSource>, layout: MirrorLayout) -> Self {
        Self {
            remote,
            store: StateStore::in_mirror_root(&layout.mirror_root),
            writer: MirrorWriter::new(&layout.mirror_root),
            invalidator: Invalidator::new(layout.derived_roots),
            quarantine: Quarantine::new(layout.quarantine_root),
            mirror_root: layout.mirror_root,
            concurrency: 1,
            dry_run: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state_store(&self) -> &StateStore {
        &self.store
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    /// One full pass: enumerate every page, process each entry, then retire
    /// whatever the complete listing no longer contains.
    pub async fn run(&self) -> Result<RunSummary, EngineError> {
        if !self.dry_run {
            self.writer.clear_staging().await?;
        }
        let ctx = RunContext::new(self.store.load().await);
        let ctx = &ctx;
        let mut observed: HashSet<String> = HashSet::new();
        let mut summary = RunSummary {
            dry_run: self.dry_run,
            ..RunSummary::default()
        };
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .remote
                .list_page(page_token.as_deref())
                .await
                .map_err(EngineError::Enumeration)?;
            summary.listed += page.entries.len();
            observed.extend(page.entries.iter().map(|entry| entry.id.clone()));

            let results: Vec<_> = stream::iter(&page.entries)
                .map(|entry| async move { (entry, self.process_entry(ctx, entry).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let mut fatal = None;
            for (entry, result) in results {
                match result {
                    Ok(EntryOutcome::Downloaded { bytes }) => {
                        summary.downloaded += 1;
                        summary.bytes += bytes;
                    }
                    Ok(EntryOutcome::Planned) => summary.downloaded += 1,
                    Ok(EntryOutcome::Skipped) => summary.skipped += 1,
                    Err(err) if err.is_fatal() => {
                        fatal.get_or_insert(err);
                    }
                    Err(err) => {
                        warn!(id = %entry.id, name = %entry.name, error = %err, "entry failed, skipping");
                        summary.failed += 1;
                    }
                }
            }
            if let Some(err) = fatal {
                return Err(err);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        // Every entry has settled; only now is the listing known to be complete.
        let mut state = std::mem::take(&mut *ctx.state.lock().await);
        if self.dry_run {
            summary.retired = stale_ids(&state, &observed).len();
            return Ok(summary);
        }
        let reconciler = Reconciler {
            mirror_root: &self.mirror_root,
            quarantine: &self.quarantine,
            invalidator: &self.invalidator,
            store: &self.store,
        };
        let outcome = reconciler.reconcile(&mut state, &observed).await?;
        summary.retired = outcome.retired;
        summary.failed += outcome.failed;
        Ok(summary)
    }

    async fn process_entry(
        &self,
        ctx: &RunContext,
        entry: &RemoteEntry,
    ) -> Result<EntryOutcome, EngineError> {
        let folder_path = ctx
            .folders
            .resolve(self.remote.as_ref(), &entry.parents)
            .await;
        let base = join_relative(&folder_path, &sanitize_component(&entry.name));
        let (relative, prior) = ctx.assign_path(&entry.id, base.clone()).await;
        if relative != base {
            debug!(id = %entry.id, path = %relative, "name collides with another entry, using id suffix");
        }
        let target = local_path_for(&self.mirror_root, &relative)?;
        let local_exists = is_file(&target).await?;

        let decision = decide(entry, prior.as_ref(), local_exists.then_some(target.as_path())).await?;

        if !decision.download {
            debug!(id = %entry.id, path = %relative, "up to date");
            if self.dry_run {
                return Ok(EntryOutcome::Skipped);
            }
            let superseded = {
                let mut state = ctx.state.lock().await;
                let superseded = superseded_path(&state, &entry.id, prior.as_ref(), &relative);
                if let Some(record) = state.get_mut(&entry.id) {
                    record.name = entry.name.clone();
                    record.folder_path = folder_path;
                    record.relative_path = relative.clone();
                    record.last_synced = now_rfc3339()?;
                }
                self.store.save(&state).await?;
                superseded
            };
            self.retire_superseded(&entry.id, superseded).await;
            return Ok(EntryOutcome::Skipped);
        }

        info!(id = %entry.id, path = %relative, reason = %decision.reason, "downloading");
        if self.dry_run {
            return Ok(EntryOutcome::Planned);
        }

        self.invalidator.invalidate(&relative).await?;
        // A drifted or unrecorded local file would be lost to the overwrite.
        if matches!(
            decision.reason,
            ChangeReason::LocalDrift | ChangeReason::Unseen
        ) {
            self.quarantine.preserve(&target).await?;
        }
        let source = self.remote.open_content(&entry.id, entry.size).await?;
        let placed = self
            .writer
            .place(source, &relative, entry.size, entry.md5_checksum.as_deref())
            .await?;

        let record = SyncRecord {
            name: entry.name.clone(),
            size: entry.size,
            modified_time: entry.modified_time.clone(),
            folder_path,
            relative_path: relative.clone(),
            weak_fingerprint: weak_fingerprint(&entry.id, &entry.modified_time, entry.size),
            content_hash: Some(placed.content_hash),
            last_synced: now_rfc3339()?,
        };
        let superseded = {
            let mut state = ctx.state.lock().await;
            let superseded = superseded_path(&state, &entry.id, prior.as_ref(), &relative);
            state.insert(entry.id.clone(), record);
            self.store.save(&state).await?;
            superseded
        };
        self.retire_superseded(&entry.id, superseded).await;

        Ok(EntryOutcome::Downloaded {
            bytes: placed.bytes,
        })
    }

    // The entry moved remotely; its old local copy goes to quarantine.
    async fn retire_superseded(&self, id: &str, old_relative: Option<String>) {
        let Some(old) = old_relative else {
            return;
        };
        match retire_source(&self.mirror_root, &self.quarantine, &self.invalidator, &old).await {
            Ok(true) => info!(id, path = %old, "retired previous location"),
            Ok(false) => {}
            Err(err) => warn!(id, path = %old, error = %err, "could not retire previous location"),
        }
    }
}

/// The record's old path when the entry now lives elsewhere and no other
/// record claims the old path.
fn superseded_path(
    state: &SyncState,
    id: &str,
    prior: Option<&SyncRecord>,
    relative: &str,
) -> Option<String> {
    let old = &prior?.relative_path;
    if old == relative {
        return None;
    }
    let claimed = state
        .iter()
        .any(|(other, record)| other != id && record.relative_path == *old);
    (!claimed).then(|| old.clone())
}

async fn is_file(path: &Path) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
