use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use notemirror_core::{DriveClient, DriveError, FOLDER_MIME_TYPE};
use thiserror::Error;
use tracing::{debug, warn};

use super::backoff::Backoff;

const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub type ContentStream = BoxStream<'static, Result<Bytes, RemoteError>>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("drive api error: {0}")]
    Drive(#[from] DriveError),
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

/// A file as reported by the remote listing. Re-fetched every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub modified_time: String,
    pub parents: Vec<String>,
    pub md5_checksum: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub entries: Vec<RemoteEntry>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub parents: Vec<String>,
}

/// The three remote operations the sync engine consumes. Implementations own
/// retry and backoff; callers only see final outcomes.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// One page of non-folder entries matching the target suffix.
    async fn list_page(&self, page_token: Option<&str>) -> Result<RemotePage, RemoteError>;

    async fn lookup_folder(&self, folder_id: &str) -> Result<FolderInfo, RemoteError>;

    async fn open_content(&self, id: &str, expected_size: u64)
    -> Result<ContentStream, RemoteError>;
}

pub struct DriveRemote {
    client: DriveClient,
    suffix: String,
    page_size: u32,
    backoff: Backoff,
    max_attempts: u32,
}

impl DriveRemote {
    pub fn new(client: DriveClient, suffix: impl Into<String>) -> Self {
        Self {
            client,
            suffix: suffix.into(),
            page_size: DEFAULT_PAGE_SIZE,
            backoff: Backoff::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, backoff: Backoff, max_attempts: u32) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn query(&self) -> String {
        let suffix = self.suffix.replace('\\', "\\\\").replace('\'', "\\'");
        format!(
            "mimeType != '{FOLDER_MIME_TYPE}' and name contains '{suffix}' and trashed = false"
        )
    }

    async fn retrying<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, DriveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DriveError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.backoff.delay_for(attempt, err.retry_after_secs());
                    warn!(
                        call = what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "remote call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl RemoteSource for DriveRemote {
    async fn list_page(&self, page_token: Option<&str>) -> Result<RemotePage, RemoteError> {
        let query = self.query();
        let list = self
            .retrying("list", || {
                self.client.list_files(&query, self.page_size, page_token)
            })
            .await?;

        let mut entries = Vec::with_capacity(list.files.len());
        for file in list.files {
            if file.is_folder() || !file.name.ends_with(&self.suffix) {
                continue;
            }
            // Native documents (and shortcuts) report no size and have no media to mirror.
            let Some(size) = file.size else {
                debug!(id = %file.id, name = %file.name, "skipping entry without size");
                continue;
            };
            entries.push(RemoteEntry {
                id: file.id,
                name: file.name,
                size,
                modified_time: file.modified_time.unwrap_or_default(),
                parents: file.parents,
                md5_checksum: file.md5_checksum,
            });
        }

        Ok(RemotePage {
            entries,
            next_page_token: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn lookup_folder(&self, folder_id: &str) -> Result<FolderInfo, RemoteError> {
        let file = self
            .retrying("lookup", || self.client.get_file(folder_id, &["name", "parents"]))
            .await?;
        Ok(FolderInfo {
            name: file.name,
            parents: file.parents,
        })
    }

    async fn open_content(
        &self,
        id: &str,
        expected_size: u64,
    ) -> Result<ContentStream, RemoteError> {
        debug!(id, expected_size, "opening remote content");
        let stream = self.retrying("download", || self.client.download(id)).await?;
        Ok(stream.map(|chunk| chunk.map_err(RemoteError::from)).boxed())
    }
}
