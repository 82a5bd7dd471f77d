use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::warn;

use super::paths::{join_relative, sanitize_component};
use super::remote::RemoteSource;

/// Parent chains longer than this are treated like cycles.
pub const MAX_FOLDER_DEPTH: usize = 64;

/// Run-scoped folder id -> slash-delimited path cache. Build a fresh one per
/// run; the remote hierarchy may change between runs.
///
/// Concurrent resolution of the same id may compute it twice; both writes
/// store the same value, so the cache never holds a torn entry.
#[derive(Debug, Default)]
pub struct FolderResolver {
    cache: Mutex<HashMap<String, String>>,
}

impl FolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves an entry's parent list to its folder path. Only the first
    /// parent is honoured. Lookup failures, cycles and over-deep chains fall
    /// back to the mirror root ("").
    pub async fn resolve(&self, remote: &dyn RemoteSource, parents: &[String]) -> String {
        let Some(start) = parents.first() else {
            return String::new();
        };
        if let Some(hit) = self.cached(start) {
            return hit;
        }

        // Walk upward collecting (id, name) until the root or a cached ancestor.
        let mut chain: Vec<(String, String)> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = start.clone();
        let base = loop {
            if let Some(hit) = self.cached(&current) {
                break hit;
            }
            if !visited.insert(current.clone()) {
                warn!(folder = %current, start = %start, "cyclic parent chain, placing at mirror root");
                return self.fail_closed(visited);
            }
            if visited.len() > MAX_FOLDER_DEPTH {
                warn!(start = %start, depth = visited.len(), "parent chain too deep, placing at mirror root");
                return self.fail_closed(visited);
            }
            match remote.lookup_folder(&current).await {
                Ok(info) => {
                    chain.push((current.clone(), sanitize_component(&info.name)));
                    match info.parents.into_iter().next() {
                        Some(parent) => current = parent,
                        None => break String::new(),
                    }
                }
                Err(err) => {
                    warn!(folder = %current, error = %err, "folder lookup failed, placing at mirror root");
                    return self.fail_closed(visited);
                }
            }
        };

        let mut path = base;
        let mut cache = self.lock();
        for (id, name) in chain.into_iter().rev() {
            path = join_relative(&path, &name);
            cache.insert(id, path.clone());
        }
        path
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, id: &str) -> Option<String> {
        self.lock().get(id).cloned()
    }

    // Degrade consistently for the rest of the run.
    fn fail_closed(&self, visited: HashSet<String>) -> String {
        let mut cache = self.lock();
        for id in visited {
            cache.insert(id, String::new());
        }
        String::new()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
