use std::fmt;
use std::io;
use std::path::Path;

use super::fingerprint::hash_file;
use super::remote::RemoteEntry;
use super::state::SyncRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeReason {
    MissingLocally,
    Unseen,
    RemoteModified,
    LocalDrift,
    UpToDate,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::MissingLocally => "missing locally",
            ChangeReason::Unseen => "unseen",
            ChangeReason::RemoteModified => "remote modified",
            ChangeReason::LocalDrift => "local drift",
            ChangeReason::UpToDate => "up to date",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub download: bool,
    pub reason: ChangeReason,
}

impl Decision {
    fn fetch(reason: ChangeReason) -> Self {
        Self {
            download: true,
            reason,
        }
    }

    fn skip() -> Self {
        Self {
            download: false,
            reason: ChangeReason::UpToDate,
        }
    }
}

/// Decides whether `remote` needs a (re)download. `local` is the resolved
/// mirror path when a file exists there. First matching rule wins; the
/// content hash is only recomputed when one is already on record.
pub async fn decide(
    remote: &RemoteEntry,
    prior: Option<&SyncRecord>,
    local: Option<&Path>,
) -> io::Result<Decision> {
    let Some(local) = local else {
        return Ok(Decision::fetch(ChangeReason::MissingLocally));
    };
    let Some(prior) = prior else {
        return Ok(Decision::fetch(ChangeReason::Unseen));
    };
    if remote.size != prior.size || remote.modified_time != prior.modified_time {
        return Ok(Decision::fetch(ChangeReason::RemoteModified));
    }
    if let Some(expected) = prior.content_hash.as_deref()
        && hash_file(local).await? != expected
    {
        return Ok(Decision::fetch(ChangeReason::LocalDrift));
    }
    Ok(Decision::skip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fingerprint::weak_fingerprint;
    use tempfile::tempdir;

    fn entry(size: u64, modified: &str) -> RemoteEntry {
        RemoteEntry {
            id: "id1".into(),
            name: "A.note".into(),
            size,
            modified_time: modified.into(),
            parents: Vec::new(),
            md5_checksum: None,
        }
    }

    fn record(size: u64, modified: &str, content_hash: Option<String>) -> SyncRecord {
        SyncRecord {
            name: "A.note".into(),
            size,
            modified_time: modified.into(),
            folder_path: String::new(),
            relative_path: "A.note".into(),
            weak_fingerprint: weak_fingerprint("id1", modified, size),
            content_hash,
            last_synced: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn local_file(dir: &Path, body: &[u8]) -> std::path::PathBuf {
        let path = dir.join("A.note");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn missing_local_file_wins_over_everything() {
        let decision = decide(&entry(100, "T1"), Some(&record(100, "T1", None)), None)
            .await
            .unwrap();
        assert_eq!(decision, Decision::fetch(ChangeReason::MissingLocally));
    }

    #[tokio::test]
    async fn unseen_identifier_downloads_regardless_of_metadata() {
        let dir = tempdir().unwrap();
        let path = local_file(dir.path(), b"x");
        for (size, modified) in [(0, ""), (100, "T1"), (u64::MAX, "whatever")] {
            let decision = decide(&entry(size, modified), None, Some(&path))
                .await
                .unwrap();
            assert_eq!(decision, Decision::fetch(ChangeReason::Unseen));
            assert_eq!(decision.reason.as_str(), "unseen");
        }
    }

    #[tokio::test]
    async fn changed_timestamp_is_remote_modified() {
        let dir = tempdir().unwrap();
        let path = local_file(dir.path(), b"x");
        let decision = decide(&entry(100, "T2"), Some(&record(100, "T1", None)), Some(&path))
            .await
            .unwrap();
        assert_eq!(decision, Decision::fetch(ChangeReason::RemoteModified));
        assert_eq!(decision.reason.to_string(), "remote modified");
    }

    #[tokio::test]
    async fn changed_size_is_remote_modified() {
        let dir = tempdir().unwrap();
        let path = local_file(dir.path(), b"x");
        let decision = decide(&entry(101, "T1"), Some(&record(100, "T1", None)), Some(&path))
            .await
            .unwrap();
        assert!(decision.download);
        assert_eq!(decision.reason, ChangeReason::RemoteModified);
    }

    #[tokio::test]
    async fn matching_metadata_without_hash_is_up_to_date() {
        let dir = tempdir().unwrap();
        // Content is never read when no hash is on record.
        let path = local_file(dir.path(), b"anything");
        let decision = decide(&entry(100, "T1"), Some(&record(100, "T1", None)), Some(&path))
            .await
            .unwrap();
        assert_eq!(decision, Decision::skip());
        assert_eq!(decision.reason.as_str(), "up to date");
    }

    #[tokio::test]
    async fn stored_hash_mismatch_is_local_drift() {
        let dir = tempdir().unwrap();
        let path = local_file(dir.path(), b"edited locally");
        let stored = Some(hash_file(&local_file(dir.path(), b"original")).await.unwrap());
        std::fs::write(&path, b"edited locally").unwrap();

        let decision = decide(&entry(100, "T1"), Some(&record(100, "T1", stored)), Some(&path))
            .await
            .unwrap();
        assert_eq!(decision, Decision::fetch(ChangeReason::LocalDrift));
    }

    #[tokio::test]
    async fn stored_hash_match_is_up_to_date() {
        let dir = tempdir().unwrap();
        let path = local_file(dir.path(), b"original");
        let stored = Some(hash_file(&path).await.unwrap());

        let decision = decide(&entry(100, "T1"), Some(&record(100, "T1", stored)), Some(&path))
            .await
            .unwrap();
        assert_eq!(decision, Decision::skip());
    }
}
