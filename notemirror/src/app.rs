use std::sync::Arc;

use anyhow::Context;
use notemirror_core::DriveClient;
use tracing::info;

use crate::config::MirrorConfig;
use crate::sync::backoff::Backoff;
use crate::sync::engine::{MirrorLayout, RunSummary, SyncEngine};
use crate::sync::remote::DriveRemote;

pub struct MirrorApp {
    config: MirrorConfig,
    engine: SyncEngine,
}

impl MirrorApp {
    pub async fn bootstrap(config: MirrorConfig, dry_run: bool) -> anyhow::Result<Self> {
        if !dry_run {
            for dir in [&config.mirror_root, &config.quarantine_root] {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("failed to create directory at {dir:?}"))?;
            }
        }

        let client = match config.api_base.as_deref() {
            Some(base) => DriveClient::with_base_url(base, config.token.clone()),
            None => DriveClient::new(config.token.clone()),
        }
        .context("failed to build Drive client")?;
        let remote = DriveRemote::new(client, config.suffix.clone())
            .with_page_size(config.page_size)
            .with_retry(Backoff::default(), config.max_attempts);
        let layout = MirrorLayout {
            mirror_root: config.mirror_root.clone(),
            quarantine_root: config.quarantine_root.clone(),
            derived_roots: config.derived_roots.clone(),
        };
        let engine = SyncEngine::new(Arc::new(remote), layout)
            .with_concurrency(config.concurrency)
            .with_dry_run(dry_run);

        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub async fn run(&self) -> anyhow::Result<RunSummary> {
        info!(
            mirror = %self.config.mirror_root.display(),
            quarantine = %self.config.quarantine_root.display(),
            suffix = %self.config.suffix,
            concurrency = self.config.concurrency,
            "sync started"
        );
        let summary = self.engine.run().await.context("sync run failed")?;
        info!(%summary, "sync finished");
        Ok(summary)
    }
}
