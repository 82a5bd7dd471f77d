use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use super::paths::{PathError, local_path_for, strip_extension};

#[derive(Debug, Error)]
pub enum InvalidateError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("path error: {0}")]
    Path(#[from] PathError),
}

/// Purges derived-artifact directories for a source file. Artifacts for
/// "A/B/Journal.note" live at "<root>/A/B/Journal" under every derived root;
/// how they are produced is not this type's concern.
#[derive(Debug, Clone, Default)]
pub struct Invalidator {
    roots: Vec<PathBuf>,
}

impl Invalidator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn artifact_dirs(&self, relative: &str) -> Result<Vec<PathBuf>, PathError> {
        let stem = strip_extension(relative);
        self.roots
            .iter()
            .map(|root| local_path_for(root, &stem))
            .collect()
    }

    /// Returns how many directories were removed.
    pub async fn invalidate(&self, relative: &str) -> Result<usize, InvalidateError> {
        let mut removed = 0;
        for dir in self.artifact_dirs(relative)? {
            match tokio::fs::metadata(&dir).await {
                Ok(meta) if meta.is_dir() => {
                    tokio::fs::remove_dir_all(&dir).await?;
                    debug!(dir = %dir.display(), "removed derived artifacts");
                    removed += 1;
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn addresses_strip_extension_under_each_root() {
        let invalidator =
            Invalidator::new(vec![PathBuf::from("/out/images"), PathBuf::from("/out/notes")]);
        assert_eq!(
            invalidator.artifact_dirs("Work/Journal.note").unwrap(),
            vec![
                PathBuf::from("/out/images/Work/Journal"),
                PathBuf::from("/out/notes/Work/Journal"),
            ]
        );
    }

    #[tokio::test]
    async fn removes_existing_artifact_directories() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        let notes = dir.path().join("notes");
        std::fs::create_dir_all(images.join("Work/Journal")).unwrap();
        std::fs::write(images.join("Work/Journal/page-0.svg"), b"<svg/>").unwrap();
        std::fs::create_dir_all(images.join("Work/Other")).unwrap();
        let invalidator = Invalidator::new(vec![images.clone(), notes.clone()]);

        let removed = invalidator.invalidate("Work/Journal.note").await.unwrap();

        assert_eq!(removed, 1);
        assert!(!images.join("Work/Journal").exists());
        assert!(images.join("Work/Other").exists());
    }

    #[tokio::test]
    async fn missing_roots_are_fine() {
        let dir = tempdir().unwrap();
        let invalidator = Invalidator::new(vec![dir.path().join("nope")]);
        assert_eq!(invalidator.invalidate("Journal.note").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn plain_files_at_the_address_are_left_alone() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Journal"), b"not a dir").unwrap();
        let invalidator = Invalidator::new(vec![dir.path().to_path_buf()]);

        assert_eq!(invalidator.invalidate("Journal.note").await.unwrap(), 0);
        assert!(dir.path().join("Journal").exists());
    }
}
