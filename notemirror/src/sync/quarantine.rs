use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use super::clock::stamp;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("clock formatting failed: {0}")]
    Clock(#[from] time::error::Format),
    #[error("source has no file name: {0}")]
    NoFileName(PathBuf),
}

/// Append-only holding area for retired and superseded source files.
/// Nothing that enters the mirror is ever hard-deleted; it ends up here
/// as `<timestamp>_<originalFileName>`.
#[derive(Debug, Clone)]
pub struct Quarantine {
    root: PathBuf,
}

impl Quarantine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Moves `source` into quarantine.
    pub async fn retire(&self, source: &Path) -> Result<PathBuf, QuarantineError> {
        let dest = self.claim(source).await?;
        // The claimed placeholder is replaced by the rename or the copy.
        if tokio::fs::rename(source, &dest).await.is_err() {
            // Different filesystem: copy, then drop the original.
            tokio::fs::copy(source, &dest).await?;
            tokio::fs::remove_file(source).await?;
        }
        info!(from = %source.display(), to = %dest.display(), "quarantined file");
        Ok(dest)
    }

    /// Copies `source` into quarantine, leaving it in place.
    pub async fn preserve(&self, source: &Path) -> Result<PathBuf, QuarantineError> {
        let dest = self.claim(source).await?;
        tokio::fs::copy(source, &dest).await?;
        info!(from = %source.display(), to = %dest.display(), "preserved copy in quarantine");
        Ok(dest)
    }

    /// Creates an empty placeholder under a fresh stamped name. Creation is
    /// exclusive, so concurrent callers never end up with the same target.
    async fn claim(&self, source: &Path) -> Result<PathBuf, QuarantineError> {
        let name = source
            .file_name()
            .ok_or_else(|| QuarantineError::NoFileName(source.to_path_buf()))?
            .to_string_lossy()
            .into_owned();
        tokio::fs::create_dir_all(&self.root).await?;
        let stamp = stamp(OffsetDateTime::now_utc())?;

        let mut candidate = self.root.join(format!("{stamp}_{name}"));
        let mut n = 1u32;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await
            {
                Ok(_) => return Ok(candidate),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = self.root.join(format!("{stamp}-{n}_{name}"));
                    n += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
