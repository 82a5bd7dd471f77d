use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use md5::Context;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::paths::{PathError, local_path_for};
use super::remote::{ContentStream, RemoteError};

pub const STAGING_DIR_NAME: &str = ".notemirror-staging";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("transfer failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// SHA-256 of what was written, hex encoded.
    pub content_hash: String,
}

/// Places downloads into the mirror tree. Content is staged on the same
/// filesystem and renamed into place only once the transfer is complete and
/// verified, so the final path never shows a partial file.
#[derive(Debug)]
pub struct MirrorWriter {
    mirror_root: PathBuf,
    staging_dir: PathBuf,
    sequence: AtomicU64,
}

impl MirrorWriter {
    pub fn new(mirror_root: impl Into<PathBuf>) -> Self {
        let mirror_root = mirror_root.into();
        let staging_dir = mirror_root.join(STAGING_DIR_NAME);
        Self {
            mirror_root,
            staging_dir,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Drops staged files left behind by an interrupted run.
    pub async fn clear_staging(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.staging_dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn place(
        &self,
        source: ContentStream,
        relative: &str,
        expected_size: u64,
        expected_md5: Option<&str>,
    ) -> Result<PlacedFile, MirrorError> {
        let target = local_path_for(&self.mirror_root, relative)?;
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let staged = self.staged_path(relative);

        match self
            .stage(source, &staged, expected_size, expected_md5)
            .await
        {
            Ok((bytes, content_hash)) => {
                if let Err(err) = commit(&staged, &target).await {
                    let _ = tokio::fs::remove_file(&staged).await;
                    return Err(err.into());
                }
                debug!(path = %target.display(), bytes, "placed file");
                Ok(PlacedFile {
                    path: target,
                    bytes,
                    content_hash,
                })
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&staged).await;
                Err(err)
            }
        }
    }

    async fn stage(
        &self,
        mut source: ContentStream,
        staged: &Path,
        expected_size: u64,
        expected_md5: Option<&str>,
    ) -> Result<(u64, String), MirrorError> {
        let mut file = tokio::fs::File::create(staged).await?;
        let mut sha = Sha256::new();
        let mut md5 = expected_md5.map(|_| Context::new());
        let mut written = 0u64;

        while let Some(chunk) = source.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            sha.update(&chunk);
            if let Some(ctx) = md5.as_mut() {
                ctx.consume(&chunk);
            }
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        if written != expected_size {
            return Err(MirrorError::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }
        if let (Some(expected), Some(ctx)) = (expected_md5, md5) {
            let actual_md5 = format!("{:x}", ctx.compute());
            if actual_md5 != expected.to_ascii_lowercase() {
                return Err(MirrorError::IntegrityMismatch {
                    expected_md5: expected.to_ascii_lowercase(),
                    actual_md5,
                });
            }
        }

        Ok((written, format!("{:x}", sha.finalize())))
    }

    fn staged_path(&self, relative: &str) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.staging_dir
            .join(format!("{:x}-{seq}.partial", md5::compute(relative)))
    }
}

async fn commit(staged: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(staged, target).await
}
