use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::error::{LauncherError, LauncherResult};

use super::pipeline::PipelinePhase;

/// Approximate size of the packaged client. May not be correct at any given
/// point; only stands in for the total until the response headers arrive.
pub const EXPECTED_CLIENT_ARCHIVE_SIZE: u64 = 4_513_866_950;

/// Total size of the in-flight download, shared between the writer and any
/// number of progress readers. Zero means "not known yet".
#[derive(Debug, Clone, Default)]
pub struct DownloadProgress {
    total_bytes: Arc<AtomicU64>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: u64) {
        self.total_bytes.store(total, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    pub fn total(&self) -> Option<u64> {
        match self.total_bytes.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Samples the partial archive length against the best known total.
    /// A missing file reads as zero bytes.
    pub async fn estimate(&self, archive: &Path) -> DownloadEstimate {
        let downloaded_bytes = tokio::fs::metadata(archive)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        let (expected_bytes, size_discovered) = match self.total() {
            Some(total) => (total, true),
            None => (EXPECTED_CLIENT_ARCHIVE_SIZE, false),
        };

        DownloadEstimate {
            downloaded_bytes,
            expected_bytes,
            size_discovered,
        }
    }
}

/// Advisory progress sample. Never used to gate correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DownloadEstimate {
    pub downloaded_bytes: u64,
    pub expected_bytes: u64,
    /// False while `expected_bytes` is still the placeholder.
    pub size_discovered: bool,
}

impl DownloadEstimate {
    pub fn fraction(&self) -> f64 {
        if self.expected_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.expected_bytes as f64).clamp(0.0, 1.0)
    }

    /// Human readable form, e.g. `1.20 GB / 4.51 GB`.
    pub fn describe(&self) -> String {
        const BYTES_PER_GB: f64 = 1_000_000_000.0;
        format!(
            "{:.2} GB / {:.2} GB",
            self.downloaded_bytes as f64 / BYTES_PER_GB,
            self.expected_bytes as f64 / BYTES_PER_GB
        )
    }
}

/// Transport used by the pipeline's Download phase.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Streams `url` into `dest`, recording the total size on `progress`
    /// as soon as it is known.
    async fn fetch(&self, url: &str, dest: &Path, progress: &DownloadProgress)
        -> LauncherResult<()>;
}

/// Streaming HTTP transport.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: &DownloadProgress,
    ) -> LauncherResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }

        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        progress.reset();
        if let Some(total) = response.content_length() {
            progress.set_total(total);
        }
        info!(
            "Downloading {} -> {:?} ({:?} bytes)",
            url,
            dest,
            progress.total()
        );

        // Write inside a block so the handle is dropped before the archive is reopened.
        {
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| LauncherError::io(dest, e))?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| LauncherError::io(dest, e))?;
            }
            file.flush().await.map_err(|e| LauncherError::io(dest, e))?;
        }

        debug!("Downloaded: {} -> {:?}", url, dest);
        Ok(())
    }
}

/// Samples the partial archive every `interval` and hands the estimate to
/// `on_sample`, stopping once the pipeline phase leaves `Download`.
pub fn spawn_progress_sampler<F>(
    archive: PathBuf,
    progress: DownloadProgress,
    mut phase: watch::Receiver<Option<PipelinePhase>>,
    interval: Duration,
    on_sample: F,
) -> JoinHandle<()>
where
    F: Fn(DownloadEstimate) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            if *phase.borrow_and_update() != Some(PipelinePhase::Download) {
                break;
            }
            on_sample(progress.estimate(&archive).await);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = phase.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Progress sampler for {:?} stopped", archive);
    })
}
