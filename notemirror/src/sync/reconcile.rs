use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::invalidate::{InvalidateError, Invalidator};
use super::paths::local_path_for;
use super::quarantine::{Quarantine, QuarantineError};
use super::state::{StateError, StateStore, SyncState};

#[derive(Debug, Error)]
pub enum RetireError {
    #[error("invalidation failed: {0}")]
    Invalidate(#[from] InvalidateError),
    #[error("quarantine failed: {0}")]
    Quarantine(#[from] QuarantineError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub retired: usize,
    /// Entries whose file could not be quarantined; their records stay so the
    /// next run tries again.
    pub failed: usize,
}

/// Identifiers known to `state` but absent from a complete listing.
pub fn stale_ids(state: &SyncState, observed: &HashSet<String>) -> Vec<String> {
    state
        .ids()
        .filter(|id| !observed.contains(*id))
        .map(str::to_string)
        .collect()
}

/// Purges derived artifacts for `relative` and moves its source file (if any)
/// into quarantine. Returns whether a file was moved.
pub async fn retire_source(
    mirror_root: &Path,
    quarantine: &Quarantine,
    invalidator: &Invalidator,
    relative: &str,
) -> Result<bool, RetireError> {
    // A path that cannot map into the mirror never had a file written for it.
    let Ok(local) = local_path_for(mirror_root, relative) else {
        return Ok(false);
    };
    invalidator.invalidate(relative).await?;
    match tokio::fs::metadata(&local).await {
        Ok(meta) if meta.is_file() => {
            quarantine.retire(&local).await?;
            Ok(true)
        }
        Ok(_) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub struct Reconciler<'a> {
    pub mirror_root: &'a Path,
    pub quarantine: &'a Quarantine,
    pub invalidator: &'a Invalidator,
    pub store: &'a StateStore,
}

impl Reconciler<'_> {
    /// Retires every record whose identifier was not observed. `observed`
    /// must come from a listing that ran to completion: anything missing from
    /// it is treated as deleted remotely.
    pub async fn reconcile(
        &self,
        state: &mut SyncState,
        observed: &HashSet<String>,
    ) -> Result<ReconcileOutcome, StateError> {
        let mut outcome = ReconcileOutcome::default();
        for id in stale_ids(state, observed) {
            let Some(relative) = state.get(&id).map(|r| r.relative_path.clone()) else {
                continue;
            };
            let shared = state
                .iter()
                .any(|(other, record)| other != id.as_str() && record.relative_path == relative);
            if shared {
                // The file now belongs to a live record; only the stale record goes.
                debug!(id = %id, path = %relative, "path owned by another record, leaving file");
            } else if let Err(err) =
                retire_source(self.mirror_root, self.quarantine, self.invalidator, &relative).await
            {
                warn!(id = %id, path = %relative, error = %err, "could not retire entry, keeping its record");
                outcome.failed += 1;
                continue;
            }
            state.remove(&id);
            self.store.save(state).await?;
            info!(id = %id, path = %relative, "retired entry no longer present remotely");
            outcome.retired += 1;
        }
        Ok(outcome)
    }
}
